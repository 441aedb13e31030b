//! API Routes

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::Deserialize;
use tokio::sync::watch;

use crate::error::Result;
use crate::models::ApiResponse;
use crate::registry::{CreateDeviceRequest, CreateRoadRequest, DeviceKind, EntityStatus};
use crate::state::AppState;
use crate::stream::LiveCounts;

/// Create API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health
        .route("/healthz", get(super::health_check))
        // Roads
        .route("/api/roads", get(list_roads))
        .route("/api/roads", post(create_road))
        .route("/api/roads/:id", get(get_road))
        .route("/api/roads/:id", delete(delete_road))
        // Control mode
        .route("/api/roads/:id/auto", post(set_auto))
        .route("/api/roads/:id/manual", post(set_manual))
        .route("/api/roads/:id/mode", get(get_mode))
        // Flow & signals
        .route("/api/roads/:id/flow", get(get_flow))
        .route("/api/roads/:id/signals", get(get_signal_status))
        .route("/api/roads/:id/signals/log", get(get_signal_log))
        // Devices
        .route("/api/devices", get(list_devices))
        .route("/api/devices", post(create_device))
        .route("/api/devices/:id", get(get_device))
        .route("/api/devices/:id", delete(delete_device))
        // Live counts
        .route("/api/devices/:id/counts", get(get_counts))
        .route("/api/devices/:id/counts/ws", get(counts_ws))
        .with_state(state)
}

// ========================================
// Road Handlers
// ========================================

async fn list_roads(State(state): State<AppState>) -> Result<impl IntoResponse> {
    let roads = state.registry.list_roads().await?;
    Ok(Json(ApiResponse::success(roads)))
}

async fn get_road(
    State(state): State<AppState>,
    Path(road_id): Path<String>,
) -> Result<impl IntoResponse> {
    let road = state.registry.get_road(&road_id).await?;
    Ok(Json(ApiResponse::success(road)))
}

async fn create_road(
    State(state): State<AppState>,
    Json(req): Json<CreateRoadRequest>,
) -> Result<impl IntoResponse> {
    let road = state.registry.create_road(req).await?;
    // The controller's existence mirrors the road's lifecycle.
    state.roads.insert_road(&road).await;
    if road.auto_control {
        if let Err(e) = state.roads.enter_auto(&road.road_id).await {
            tracing::error!(road_id = %road.road_id, error = %e, "auto start after create failed");
        }
    }
    Ok(Json(ApiResponse::success(road)))
}

async fn delete_road(
    State(state): State<AppState>,
    Path(road_id): Path<String>,
) -> Result<impl IntoResponse> {
    // Stop the road's streams and controller before the rows go away.
    for device in state.registry.devices_for_road(&road_id).await? {
        if device.kind == DeviceKind::Camera {
            if let Err(e) = state.streams.remove(&device.device_id).await {
                tracing::debug!(device_id = %device.device_id, error = %e, "no stream to remove");
            }
        }
    }
    if let Err(e) = state.roads.remove_road(&road_id).await {
        tracing::debug!(road_id = %road_id, error = %e, "no controller to remove");
    }
    state.registry.delete_road(&road_id).await?;
    Ok(Json(ApiResponse::success(serde_json::json!({
        "message": "Road successfully deleted"
    }))))
}

// ========================================
// Control Mode Handlers
// ========================================

async fn set_auto(
    State(state): State<AppState>,
    Path(road_id): Path<String>,
) -> Result<impl IntoResponse> {
    state.roads.enter_auto(&road_id).await?;
    // Persist the default mode so a restart restores it.
    if let Err(e) = state.registry.set_road_auto_control(&road_id, true).await {
        tracing::warn!(road_id = %road_id, error = %e, "auto flag not persisted");
    }
    Ok(Json(ApiResponse::success(serde_json::json!({
        "road_id": road_id,
        "mode": "auto"
    }))))
}

async fn set_manual(
    State(state): State<AppState>,
    Path(road_id): Path<String>,
) -> Result<impl IntoResponse> {
    state.roads.enter_manual(&road_id).await?;
    if let Err(e) = state.registry.set_road_auto_control(&road_id, false).await {
        tracing::warn!(road_id = %road_id, error = %e, "manual flag not persisted");
    }
    Ok(Json(ApiResponse::success(serde_json::json!({
        "road_id": road_id,
        "mode": "manual"
    }))))
}

async fn get_mode(
    State(state): State<AppState>,
    Path(road_id): Path<String>,
) -> Result<impl IntoResponse> {
    let mode = state.roads.mode(&road_id).await?;
    Ok(Json(ApiResponse::success(serde_json::json!({
        "road_id": road_id,
        "mode": mode
    }))))
}

// ========================================
// Flow & Signal Handlers
// ========================================

async fn get_flow(
    State(state): State<AppState>,
    Path(road_id): Path<String>,
) -> Result<impl IntoResponse> {
    let flow = state.flow.road_flow(&road_id).await?;
    Ok(Json(ApiResponse::success(flow)))
}

async fn get_signal_status(
    State(state): State<AppState>,
    Path(road_id): Path<String>,
) -> Result<impl IntoResponse> {
    let status = state.signals.status_for_road(&road_id).await?;
    Ok(Json(ApiResponse::success(status)))
}

#[derive(Deserialize)]
struct LogQuery {
    #[serde(default = "default_log_limit")]
    limit: u32,
}

fn default_log_limit() -> u32 {
    100
}

async fn get_signal_log(
    State(state): State<AppState>,
    Path(road_id): Path<String>,
    Query(query): Query<LogQuery>,
) -> Result<impl IntoResponse> {
    let log = state.signals.log_for_road(&road_id, query.limit).await?;
    Ok(Json(ApiResponse::success(log)))
}

// ========================================
// Device Handlers
// ========================================

async fn list_devices(State(state): State<AppState>) -> Result<impl IntoResponse> {
    let devices = state.registry.list_devices().await?;
    Ok(Json(ApiResponse::success(devices)))
}

async fn get_device(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> Result<impl IntoResponse> {
    let device = state.registry.get_device(&device_id).await?;
    Ok(Json(ApiResponse::success(device)))
}

async fn create_device(
    State(state): State<AppState>,
    Json(req): Json<CreateDeviceRequest>,
) -> Result<impl IntoResponse> {
    let device = state.registry.create_device(req).await?;

    if device.kind == DeviceKind::Camera && device.status == EntityStatus::Active {
        let line = state.config.default_counting_line()?;
        state.streams.register(&device, line).await?;
    }

    Ok(Json(ApiResponse::success(device)))
}

async fn delete_device(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> Result<impl IntoResponse> {
    let device = state.registry.get_device(&device_id).await?;

    if device.kind == DeviceKind::Camera {
        if let Err(e) = state.streams.remove(&device_id).await {
            tracing::debug!(device_id = %device_id, error = %e, "no stream to remove");
        }
    }

    state.registry.delete_device(&device_id).await?;
    Ok(Json(ApiResponse::success(serde_json::json!({
        "message": "Device successfully deleted"
    }))))
}

// ========================================
// Live Count Handlers
// ========================================

async fn get_counts(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> Result<impl IntoResponse> {
    let counts = state.streams.counts(&device_id).await?;
    Ok(Json(ApiResponse::success(counts)))
}

async fn counts_ws(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> Response {
    match state.streams.subscribe(&device_id).await {
        Ok(rx) => ws.on_upgrade(move |socket| stream_counts(socket, rx)),
        Err(e) => e.into_response(),
    }
}

/// Push a counts snapshot on every change until the client goes away.
async fn stream_counts(mut socket: WebSocket, mut rx: watch::Receiver<LiveCounts>) {
    loop {
        let payload = {
            let counts = rx.borrow();
            match serde_json::to_string(&*counts) {
                Ok(payload) => payload,
                Err(e) => {
                    tracing::error!(error = %e, "failed to serialize live counts");
                    break;
                }
            }
        };

        if socket.send(Message::Text(payload)).await.is_err() {
            break;
        }
        if rx.changed().await.is_err() {
            // Worker gone: the stream was removed.
            break;
        }
    }
}
