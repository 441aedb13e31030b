//! Greenwave - adaptive traffic signal retiming
//!
//! Main entry point.

use greenwave::aggregation::WindowRepository;
use greenwave::control::RoadManager;
use greenwave::flow::FlowEstimator;
use greenwave::registry::{DeviceKind, EntityStatus, RegistryRepository, RegistryService};
use greenwave::signal_bus::{LoopbackBus, SignalBus, SignalRepository, TelemetryService};
use greenwave::state::{AppConfig, AppState};
use greenwave::stream::StreamManager;
use greenwave::web_api;
use sqlx::mysql::MySqlPoolOptions;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "greenwave=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting greenwave v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = AppConfig::default();
    tracing::info!(
        database_url = %config.database_url,
        window_secs = config.window_secs,
        min_cycle = config.min_cycle,
        max_cycle = config.max_cycle,
        "Configuration loaded"
    );

    // Create database pool
    let pool = MySqlPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(10))
        .connect(&config.database_url)
        .await?;

    tracing::info!("Database connected");

    // Initialize components
    let registry = Arc::new(RegistryService::new(RegistryRepository::new(pool.clone())));
    let windows = Arc::new(WindowRepository::new(pool.clone()));
    let signals = Arc::new(SignalRepository::new(pool.clone()));
    let bus = Arc::new(LoopbackBus::default());

    let flow = Arc::new(FlowEstimator::new(windows.clone(), config.flow_windows));
    let roads = Arc::new(RoadManager::new(
        flow.clone(),
        bus.clone(),
        config.timing(),
        config.control(),
    ));
    let streams = Arc::new(StreamManager::new(windows.clone(), config.stream()));

    // Drain inbound signal telemetry into the store
    let telemetry = Arc::new(TelemetryService::new(signals.clone()));
    tokio::spawn(telemetry.run(bus.clone() as Arc<dyn SignalBus>));
    tracing::info!("Telemetry drain started");

    // Start stream workers for active cameras. A device that cannot
    // start (bad line config, unknown road) is skipped, not fatal.
    let default_line = config.default_counting_line()?;
    let known_roads = registry.list_roads().await?;
    for device in registry.list_devices().await? {
        if device.kind != DeviceKind::Camera || device.status != EntityStatus::Active {
            continue;
        }
        if !known_roads.iter().any(|r| r.road_id == device.road_id) {
            tracing::error!(
                device_id = %device.device_id,
                road_id = %device.road_id,
                "camera references unknown road; stream not started"
            );
            continue;
        }
        if let Err(e) = streams.register(&device, default_line).await {
            tracing::error!(
                device_id = %device.device_id,
                error = %e,
                "stream worker not started"
            );
        }
    }
    tracing::info!(
        streams = streams.device_ids().await.len(),
        "Stream workers started"
    );

    // Load road controllers and start the ones flagged auto
    roads.initialize(known_roads).await;

    // Create application state
    let state = AppState {
        pool,
        config: config.clone(),
        registry,
        flow,
        roads: roads.clone(),
        streams: streams.clone(),
        signals,
        started_at: Instant::now(),
    };

    let app = web_api::create_router(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http());

    // Start server
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Drain control loops first so no stale timing goes out, then the
    // stream workers with their final flushes.
    let report = roads.shutdown().await;
    if !report.is_clean() {
        for (road_id, reason) in &report.failures {
            tracing::error!(road_id = %road_id, %reason, "road did not stop cleanly");
        }
    }
    streams.shutdown().await;

    tracing::info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to install ctrl-c handler");
    }
    tracing::info!("Shutdown signal received");
}
