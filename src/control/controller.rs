//! Per-road adaptive signal controller
//!
//! One controller per road, switching between manual operation and an
//! auto loop that periodically recomputes timing from measured flow and
//! publishes it on the signal bus.
//!
//! Staleness is governed by a monotonically increasing generation
//! counter, not the mode flag: every transition bumps the generation,
//! each loop iteration captures the generation it was spawned under and
//! re-checks it before applying results. A mode flag alone cannot stop a
//! loop that already computed a result from applying it after a rapid
//! manual/auto flip; the generation check can.

use crate::error::{Error, Result};
use crate::flow::FlowEstimator;
use crate::signal_bus::{SignalBus, TimingCommand};
use crate::timing::{compute, TimingConfig};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify, RwLock};
use tokio::task::JoinHandle;

/// Control mode of a road
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlMode {
    Auto,
    Manual,
}

/// Controller loop tuning
#[derive(Debug, Clone)]
pub struct ControlConfig {
    /// Lower bound on the inter-cycle sleep
    pub min_sleep: Duration,
    /// How long mode transitions wait for the loop to observe the
    /// generation change and exit
    pub stop_grace: Duration,
    /// Fixed amber interval for published phase commands, seconds
    pub yellow_s: u32,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            min_sleep: Duration::from_secs(10),
            stop_grace: Duration::from_secs(10),
            yellow_s: crate::signal_bus::DEFAULT_YELLOW_S,
        }
    }
}

struct ControllerInner {
    road_id: String,
    road_name: String,
    mode: RwLock<ControlMode>,
    /// Bumped on every mode transition; the single source of truth that
    /// invalidates in-flight loop iterations
    generation: AtomicU64,
    /// Wakes the loop out of its inter-cycle sleep on transitions.
    /// `notify_one` stores a permit, so a transition that lands between
    /// the loop's generation check and its sleep still wakes it.
    wake: Notify,
    flow: Arc<FlowEstimator>,
    bus: Arc<dyn SignalBus>,
    timing: TimingConfig,
    control: ControlConfig,
}

pub struct RoadController {
    inner: Arc<ControllerInner>,
    /// Guards the task slot and serializes mode transitions
    task: Mutex<Option<JoinHandle<()>>>,
}

impl RoadController {
    pub fn new(
        road_id: String,
        road_name: String,
        flow: Arc<FlowEstimator>,
        bus: Arc<dyn SignalBus>,
        timing: TimingConfig,
        control: ControlConfig,
    ) -> Self {
        Self {
            inner: Arc::new(ControllerInner {
                road_id,
                road_name,
                mode: RwLock::new(ControlMode::Manual),
                generation: AtomicU64::new(0),
                wake: Notify::new(),
                flow,
                bus,
                timing,
                control,
            }),
            task: Mutex::new(None),
        }
    }

    pub fn road_id(&self) -> &str {
        &self.inner.road_id
    }

    pub async fn mode(&self) -> ControlMode {
        *self.inner.mode.read().await
    }

    /// Whether an auto loop task is currently live
    pub async fn loop_alive(&self) -> bool {
        match self.task.lock().await.as_ref() {
            Some(handle) => !handle.is_finished(),
            None => false,
        }
    }

    #[cfg(test)]
    pub(crate) fn generation(&self) -> u64 {
        self.inner.generation.load(Ordering::SeqCst)
    }

    /// Switch to auto mode and spawn the control loop. Idempotent: a
    /// second call while the loop is live is a no-op.
    pub async fn enter_auto(&self) -> Result<()> {
        let mut task = self.task.lock().await;

        if *self.inner.mode.read().await == ControlMode::Auto {
            if let Some(handle) = task.as_ref() {
                if !handle.is_finished() {
                    tracing::debug!(
                        road_id = %self.inner.road_id,
                        "auto control already running"
                    );
                    return Ok(());
                }
            }
        }

        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;

        // A prior loop must be gone before a new one spawns: two live
        // loops for one road would double-publish timing.
        if let Some(old) = task.take() {
            if !old.is_finished() {
                self.inner.wake.notify_one();
                let abort = old.abort_handle();
                if tokio::time::timeout(self.inner.control.stop_grace, old)
                    .await
                    .is_err()
                {
                    abort.abort();
                    *self.inner.mode.write().await = ControlMode::Manual;
                    return Err(Error::Invariant(format!(
                        "road {}: stale auto loop ignored the generation change; \
                         aborted and falling back to manual",
                        self.inner.road_id
                    )));
                }
            }
        }

        *self.inner.mode.write().await = ControlMode::Auto;

        tracing::info!(
            road_id = %self.inner.road_id,
            road_name = %self.inner.road_name,
            generation,
            "entering auto control"
        );

        let inner = self.inner.clone();
        *task = Some(tokio::spawn(run_loop(inner, generation)));
        Ok(())
    }

    /// Switch to manual mode, invalidating any in-flight loop iteration.
    /// Waits up to the stop grace for the loop to exit; a timeout is an
    /// anomaly (logged, task aborted) but never blocks the caller
    /// indefinitely.
    pub async fn enter_manual(&self) -> Result<()> {
        let mut task = self.task.lock().await;

        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        *self.inner.mode.write().await = ControlMode::Manual;

        tracing::info!(
            road_id = %self.inner.road_id,
            road_name = %self.inner.road_name,
            "entering manual control"
        );

        if let Some(handle) = task.take() {
            if !handle.is_finished() {
                self.inner.wake.notify_one();
                let abort = handle.abort_handle();
                if tokio::time::timeout(self.inner.control.stop_grace, handle)
                    .await
                    .is_err()
                {
                    tracing::warn!(
                        road_id = %self.inner.road_id,
                        grace_ms = self.inner.control.stop_grace.as_millis() as u64,
                        "auto loop did not stop within grace period; aborting"
                    );
                    abort.abort();
                }
            }
        }

        Ok(())
    }
}

/// The auto control loop for one road, pinned to the generation it was
/// spawned under.
async fn run_loop(inner: Arc<ControllerInner>, generation: u64) {
    tracing::info!(
        road_id = %inner.road_id,
        generation,
        "auto control loop started"
    );

    loop {
        if inner.generation.load(Ordering::SeqCst) != generation
            || *inner.mode.read().await != ControlMode::Auto
        {
            break;
        }

        let flow = match inner.flow.road_flow(&inner.road_id).await {
            Ok(flow) => flow,
            Err(e) => {
                tracing::warn!(
                    road_id = %inner.road_id,
                    error = %e,
                    "flow estimation failed; retrying next cycle"
                );
                interruptible_sleep(&inner, inner.control.min_sleep).await;
                continue;
            }
        };

        let timing = compute(flow.north_south, flow.east_west, &inner.timing);

        if timing.cycle < inner.timing.min_cycle - f64::EPSILON
            || timing.cycle > inner.timing.max_cycle + f64::EPSILON
        {
            tracing::error!(
                road_id = %inner.road_id,
                cycle = timing.cycle,
                min = inner.timing.min_cycle,
                max = inner.timing.max_cycle,
                "computed cycle outside configured bounds; falling back to manual"
            );
            *inner.mode.write().await = ControlMode::Manual;
            break;
        }

        // The estimate may be stale if a transition happened while it
        // was computed; never apply a result from a dead generation.
        if inner.generation.load(Ordering::SeqCst) != generation {
            tracing::debug!(
                road_id = %inner.road_id,
                generation,
                "generation changed mid-iteration; discarding result"
            );
            break;
        }

        let (ns, ew) = TimingCommand::phase_pair(&inner.road_id, &timing, inner.control.yellow_s);
        for command in [&ns, &ew] {
            if let Err(e) = inner.bus.publish(command).await {
                tracing::warn!(
                    road_id = %inner.road_id,
                    error = %e,
                    "timing publish failed; continuing"
                );
            }
        }

        tracing::info!(
            road_id = %inner.road_id,
            cycle = timing.cycle,
            green_ns = timing.green_ns,
            green_ew = timing.green_ew,
            flow_ns = flow.north_south,
            flow_ew = flow.east_west,
            "signal timing applied"
        );

        let sleep_for = Duration::from_secs_f64(timing.cycle).max(inner.control.min_sleep);
        interruptible_sleep(&inner, sleep_for).await;
    }

    tracing::info!(
        road_id = %inner.road_id,
        generation,
        "auto control loop exited"
    );
}

/// Sleep that a concurrent mode transition can cut short immediately.
async fn interruptible_sleep(inner: &ControllerInner, duration: Duration) {
    tokio::select! {
        _ = inner.wake.notified() => {}
        _ = tokio::time::sleep(duration) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregation::MemoryWindowStore;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU32;
    use std::time::Instant;

    /// Bus double that counts publishes and can be told to fail
    struct CountingBus {
        published: AtomicU32,
        fail: std::sync::atomic::AtomicBool,
    }

    impl CountingBus {
        fn new() -> Self {
            Self {
                published: AtomicU32::new(0),
                fail: std::sync::atomic::AtomicBool::new(false),
            }
        }

        fn published(&self) -> u32 {
            self.published.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl SignalBus for CountingBus {
        async fn publish(&self, _command: &TimingCommand) -> Result<()> {
            self.published.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                return Err(Error::Transient("bus down".to_string()));
            }
            Ok(())
        }

        fn reports(&self) -> tokio::sync::broadcast::Receiver<String> {
            tokio::sync::broadcast::channel(1).1
        }
    }

    fn fast_timing() -> TimingConfig {
        TimingConfig {
            min_cycle: 0.05,
            max_cycle: 0.2,
            ..TimingConfig::default()
        }
    }

    fn fast_control() -> ControlConfig {
        ControlConfig {
            min_sleep: Duration::from_millis(20),
            stop_grace: Duration::from_secs(2),
            yellow_s: 3,
        }
    }

    fn controller(bus: Arc<dyn SignalBus>) -> RoadController {
        let store = Arc::new(MemoryWindowStore::new());
        let flow = Arc::new(FlowEstimator::new(store, 4));
        RoadController::new(
            "road-1".to_string(),
            "Test Road".to_string(),
            flow,
            bus,
            fast_timing(),
            fast_control(),
        )
    }

    #[tokio::test]
    async fn starts_in_manual_with_no_loop() {
        let ctrl = controller(Arc::new(CountingBus::new()));
        assert_eq!(ctrl.mode().await, ControlMode::Manual);
        assert!(!ctrl.loop_alive().await);
    }

    #[tokio::test]
    async fn double_enter_auto_keeps_one_loop() {
        let bus = Arc::new(CountingBus::new());
        let ctrl = controller(bus.clone());

        ctrl.enter_auto().await.unwrap();
        let generation = ctrl.generation();
        ctrl.enter_auto().await.unwrap();

        // Second call is a no-op: same generation, still exactly one
        // live task.
        assert_eq!(ctrl.generation(), generation);
        assert!(ctrl.loop_alive().await);

        ctrl.enter_manual().await.unwrap();
        assert!(!ctrl.loop_alive().await);
    }

    #[tokio::test]
    async fn loop_publishes_timing_commands() {
        let bus = Arc::new(CountingBus::new());
        let ctrl = controller(bus.clone());

        ctrl.enter_auto().await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        ctrl.enter_manual().await.unwrap();

        // Two commands per iteration, several iterations in 300ms at a
        // ~50ms cycle.
        assert!(bus.published() >= 4, "published {}", bus.published());
        assert_eq!(bus.published() % 2, 0);
    }

    #[tokio::test]
    async fn enter_manual_interrupts_sleep_promptly() {
        let bus = Arc::new(CountingBus::new());
        let store = Arc::new(MemoryWindowStore::new());
        let flow = Arc::new(FlowEstimator::new(store, 4));
        // Zero demand -> min cycle 30s -> the loop sleeps 30s between
        // iterations. A transition must not wait that out.
        let ctrl = RoadController::new(
            "road-1".to_string(),
            "Test Road".to_string(),
            flow,
            bus,
            TimingConfig::default(),
            ControlConfig {
                min_sleep: Duration::from_secs(30),
                stop_grace: Duration::from_secs(5),
                yellow_s: 3,
            },
        );

        ctrl.enter_auto().await.unwrap();
        // Let the first iteration publish and enter its sleep.
        tokio::time::sleep(Duration::from_millis(100)).await;

        let started = Instant::now();
        ctrl.enter_manual().await.unwrap();
        assert!(
            started.elapsed() < Duration::from_secs(2),
            "enter_manual took {:?}",
            started.elapsed()
        );
        assert!(!ctrl.loop_alive().await);
        assert_eq!(ctrl.mode().await, ControlMode::Manual);
    }

    #[tokio::test]
    async fn rapid_flips_leave_single_consistent_state() {
        let bus = Arc::new(CountingBus::new());
        let ctrl = controller(bus.clone());

        for _ in 0..5 {
            ctrl.enter_auto().await.unwrap();
            ctrl.enter_manual().await.unwrap();
        }

        assert_eq!(ctrl.mode().await, ControlMode::Manual);
        assert!(!ctrl.loop_alive().await);

        ctrl.enter_auto().await.unwrap();
        assert!(ctrl.loop_alive().await);
        ctrl.enter_manual().await.unwrap();
        assert!(!ctrl.loop_alive().await);
    }

    #[tokio::test]
    async fn publish_failures_do_not_stop_the_loop() {
        let bus = Arc::new(CountingBus::new());
        bus.fail.store(true, Ordering::SeqCst);
        let ctrl = controller(bus.clone());

        ctrl.enter_auto().await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;

        // Still live and still retrying despite every publish failing.
        assert!(ctrl.loop_alive().await);
        assert!(bus.published() >= 4);

        ctrl.enter_manual().await.unwrap();
        assert!(!ctrl.loop_alive().await);
    }

    #[tokio::test]
    async fn store_outage_keeps_loop_alive_and_stoppable() {
        let bus = Arc::new(CountingBus::new());
        let store = Arc::new(MemoryWindowStore::new());
        store.fail_reads(true);
        let flow = Arc::new(FlowEstimator::new(store.clone(), 4));
        let ctrl = RoadController::new(
            "road-1".to_string(),
            "Test Road".to_string(),
            flow,
            bus.clone(),
            fast_timing(),
            fast_control(),
        );

        ctrl.enter_auto().await.unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;

        // Flow estimation fails every iteration; nothing is published
        // but the loop stays alive and keeps retrying.
        assert!(ctrl.loop_alive().await);
        assert_eq!(bus.published(), 0);

        // Once the store recovers the loop picks up again.
        store.fail_reads(false);
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(bus.published() >= 2);

        let started = Instant::now();
        ctrl.enter_manual().await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(!ctrl.loop_alive().await);
    }

    #[tokio::test]
    async fn road_with_no_data_runs_at_minimum_cycle() {
        let bus = Arc::new(CountingBus::new());
        let store = Arc::new(MemoryWindowStore::new());
        let flow = Arc::new(FlowEstimator::new(store, 4));
        let ctrl = RoadController::new(
            "road-unknown".to_string(),
            "Ghost Road".to_string(),
            flow,
            bus.clone(),
            fast_timing(),
            fast_control(),
        );

        ctrl.enter_auto().await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(bus.published() >= 2);
        ctrl.enter_manual().await.unwrap();
    }
}
