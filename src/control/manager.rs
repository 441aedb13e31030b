//! Road controller registry
//!
//! Owns one controller per road. Controllers are created on road
//! load/creation and removed on road deletion; shutdown drains every
//! auto loop without letting one slow road block the rest.

use super::controller::{ControlConfig, ControlMode, RoadController};
use crate::error::{Error, Result};
use crate::flow::FlowEstimator;
use crate::registry::{EntityStatus, Road};
use crate::signal_bus::SignalBus;
use crate::timing::TimingConfig;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Outcome of a manager shutdown
#[derive(Debug, Default)]
pub struct ShutdownReport {
    pub stopped: usize,
    /// Roads whose loops failed to stop cleanly, with the reason
    pub failures: Vec<(String, String)>,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

pub struct RoadManager {
    controllers: RwLock<HashMap<String, Arc<RoadController>>>,
    flow: Arc<FlowEstimator>,
    bus: Arc<dyn SignalBus>,
    timing: TimingConfig,
    control: ControlConfig,
}

impl RoadManager {
    pub fn new(
        flow: Arc<FlowEstimator>,
        bus: Arc<dyn SignalBus>,
        timing: TimingConfig,
        control: ControlConfig,
    ) -> Self {
        Self {
            controllers: RwLock::new(HashMap::new()),
            flow,
            bus,
            timing,
            control,
        }
    }

    fn build_controller(&self, road: &Road) -> Arc<RoadController> {
        Arc::new(RoadController::new(
            road.road_id.clone(),
            road.name.clone(),
            self.flow.clone(),
            self.bus.clone(),
            self.timing.clone(),
            self.control.clone(),
        ))
    }

    /// Load controllers for all roads. Roads flagged for auto control
    /// start their loops; a failure on one road never blocks the rest.
    pub async fn initialize(&self, roads: Vec<Road>) {
        for road in roads {
            let controller = self.build_controller(&road);
            self.controllers
                .write()
                .await
                .insert(road.road_id.clone(), controller.clone());

            tracing::info!(
                road_id = %road.road_id,
                road_name = %road.name,
                auto = road.auto_control,
                "road controller loaded"
            );

            if road.auto_control && road.status == EntityStatus::Active {
                if let Err(e) = controller.enter_auto().await {
                    tracing::error!(
                        road_id = %road.road_id,
                        error = %e,
                        "failed to start auto control at load"
                    );
                }
            }
        }

        let count = self.controllers.read().await.len();
        tracing::info!(roads = count, "road manager initialized");
    }

    /// Add a controller for a newly created road (manual until enabled).
    pub async fn insert_road(&self, road: &Road) {
        let controller = self.build_controller(road);
        self.controllers
            .write()
            .await
            .insert(road.road_id.clone(), controller);
        tracing::info!(road_id = %road.road_id, "road controller added");
    }

    /// Drop a road's controller, stopping its loop first.
    pub async fn remove_road(&self, road_id: &str) -> Result<()> {
        let controller = self
            .controllers
            .write()
            .await
            .remove(road_id)
            .ok_or_else(|| Error::NotFound(format!("Road {road_id} not found")))?;
        controller.enter_manual().await?;
        tracing::info!(road_id = %road_id, "road controller removed");
        Ok(())
    }

    async fn controller(&self, road_id: &str) -> Result<Arc<RoadController>> {
        self.controllers
            .read()
            .await
            .get(road_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("Road {road_id} not found")))
    }

    pub async fn enter_auto(&self, road_id: &str) -> Result<()> {
        self.controller(road_id).await?.enter_auto().await
    }

    pub async fn enter_manual(&self, road_id: &str) -> Result<()> {
        self.controller(road_id).await?.enter_manual().await
    }

    pub async fn mode(&self, road_id: &str) -> Result<ControlMode> {
        Ok(self.controller(road_id).await?.mode().await)
    }

    pub async fn road_ids(&self) -> Vec<String> {
        self.controllers.read().await.keys().cloned().collect()
    }

    /// Stop every auto loop concurrently. Per-road failures are
    /// aggregated into the report; no failure aborts the others.
    pub async fn shutdown(&self) -> ShutdownReport {
        let controllers: Vec<Arc<RoadController>> =
            self.controllers.read().await.values().cloned().collect();

        tracing::info!(roads = controllers.len(), "road manager shutting down");

        let results = futures::future::join_all(controllers.iter().map(|controller| {
            let controller = controller.clone();
            async move {
                let road_id = controller.road_id().to_string();
                match controller.enter_manual().await {
                    Ok(()) if !controller.loop_alive().await => (road_id, Ok(())),
                    Ok(()) => (
                        road_id,
                        Err("loop still live after manual transition".to_string()),
                    ),
                    Err(e) => (road_id, Err(e.to_string())),
                }
            }
        }))
        .await;

        let mut report = ShutdownReport::default();
        for (road_id, result) in results {
            match result {
                Ok(()) => report.stopped += 1,
                Err(reason) => {
                    tracing::error!(road_id = %road_id, %reason, "road failed to stop cleanly");
                    report.failures.push((road_id, reason));
                }
            }
        }

        tracing::info!(
            stopped = report.stopped,
            failed = report.failures.len(),
            "road manager shutdown complete"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregation::MemoryWindowStore;
    use crate::error::Result as CrateResult;
    use crate::signal_bus::TimingCommand;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    struct FlakyBus {
        fail: AtomicBool,
    }

    #[async_trait]
    impl SignalBus for FlakyBus {
        async fn publish(&self, _command: &TimingCommand) -> CrateResult<()> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(Error::Transient("bus down".to_string()));
            }
            Ok(())
        }

        fn reports(&self) -> tokio::sync::broadcast::Receiver<String> {
            tokio::sync::broadcast::channel(1).1
        }
    }

    fn road(road_id: &str, auto: bool) -> Road {
        Road {
            road_id: road_id.to_string(),
            name: format!("Road {road_id}"),
            location: "D7".to_string(),
            district: "District 7".to_string(),
            city: "Ho Chi Minh City".to_string(),
            status: EntityStatus::Active,
            auto_control: auto,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn manager(bus: Arc<dyn SignalBus>) -> RoadManager {
        manager_with_store(bus, Arc::new(MemoryWindowStore::new()))
    }

    fn manager_with_store(bus: Arc<dyn SignalBus>, store: Arc<MemoryWindowStore>) -> RoadManager {
        let flow = Arc::new(FlowEstimator::new(store, 4));
        RoadManager::new(
            flow,
            bus,
            TimingConfig {
                min_cycle: 0.05,
                max_cycle: 0.2,
                ..TimingConfig::default()
            },
            ControlConfig {
                min_sleep: Duration::from_millis(20),
                stop_grace: Duration::from_secs(2),
                yellow_s: 3,
            },
        )
    }

    #[tokio::test]
    async fn initialize_starts_flagged_roads_only() {
        let mgr = manager(Arc::new(FlakyBus {
            fail: AtomicBool::new(false),
        }));
        mgr.initialize(vec![road("a", true), road("b", false)]).await;

        assert_eq!(mgr.mode("a").await.unwrap(), ControlMode::Auto);
        assert_eq!(mgr.mode("b").await.unwrap(), ControlMode::Manual);
        mgr.shutdown().await;
    }

    #[tokio::test]
    async fn unknown_road_is_not_found() {
        let mgr = manager(Arc::new(FlakyBus {
            fail: AtomicBool::new(false),
        }));
        assert!(matches!(
            mgr.enter_auto("missing").await,
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            mgr.enter_manual("missing").await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn remove_road_stops_its_loop() {
        let mgr = manager(Arc::new(FlakyBus {
            fail: AtomicBool::new(false),
        }));
        mgr.initialize(vec![road("a", true)]).await;

        mgr.remove_road("a").await.unwrap();
        assert!(matches!(mgr.mode("a").await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn shutdown_leaves_zero_loops_under_bus_and_store_failures() {
        let bus = Arc::new(FlakyBus {
            fail: AtomicBool::new(true),
        });
        let store = Arc::new(MemoryWindowStore::new());
        let mgr = manager_with_store(bus.clone(), store.clone());
        mgr.initialize(vec![road("a", true), road("b", true), road("c", true)])
            .await;

        // Loops are running against a failing bus, then the store goes
        // down as well.
        tokio::time::sleep(Duration::from_millis(100)).await;
        store.fail_reads(true);
        tokio::time::sleep(Duration::from_millis(100)).await;

        let report = mgr.shutdown().await;
        assert!(report.is_clean(), "failures: {:?}", report.failures);
        assert_eq!(report.stopped, 3);

        for road_id in mgr.road_ids().await {
            assert_eq!(mgr.mode(&road_id).await.unwrap(), ControlMode::Manual);
        }
    }
}
