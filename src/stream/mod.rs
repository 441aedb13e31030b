//! Device stream workers
//!
//! One task per camera device stream. The task exclusively owns that
//! device's crossing counter and aggregation window, so nothing else
//! ever mutates them: frames and window flushes interleave on a single
//! loop. Frames arrive from the external detector/tracker through an
//! mpsc channel; live counts go out on a watch channel for the control
//! surface.

use crate::aggregation::{AggregationWindow, Aggregator, WindowStore};
use crate::counting::{CountingLine, CrossingCounter, TrackObservation, VehicleClass};
use crate::error::{Error, Result};
use crate::registry::{Device, DeviceKind};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, RwLock};
use tokio::task::JoinHandle;

/// Stream worker tuning
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Length of one aggregation window
    pub window: chrono::Duration,
    /// How often the window clock is checked
    pub tick: Duration,
    /// How long removal waits for a worker to drain before aborting it
    pub stop_grace: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            window: chrono::Duration::seconds(60),
            tick: Duration::from_secs(1),
            stop_grace: Duration::from_secs(5),
        }
    }
}

/// Snapshot of a device's counts in the current window
#[derive(Debug, Clone, Serialize)]
pub struct LiveCounts {
    pub device_id: String,
    pub total: u32,
    pub by_class: BTreeMap<VehicleClass, u32>,
    pub fps: f32,
    pub window_start: DateTime<Utc>,
}

struct DeviceStreamWorker {
    device_id: String,
    counter: CrossingCounter,
    aggregator: Aggregator,
    counts_tx: watch::Sender<LiveCounts>,
}

impl DeviceStreamWorker {
    fn publish_counts(&self, now: DateTime<Utc>) {
        let window = self.aggregator.window();
        self.counts_tx.send_replace(LiveCounts {
            device_id: self.device_id.clone(),
            total: window.total(),
            by_class: window.counts().clone(),
            fps: window.sampled_fps(now),
            window_start: window.window_start(),
        });
    }

    fn on_frame(&mut self, observations: &[TrackObservation]) {
        let now = Utc::now();
        for event in self.counter.on_frame(observations) {
            self.aggregator.window_mut().accumulate(&event);
        }
        self.aggregator.window_mut().note_frame();
        self.publish_counts(now);
    }

    async fn on_tick(&mut self, now: DateTime<Utc>) {
        if self.aggregator.tick(now).await {
            self.counter.reset();
            self.publish_counts(now);
        }
    }

    async fn run(mut self, mut frames: mpsc::Receiver<Vec<TrackObservation>>, tick: Duration) {
        tracing::info!(device_id = %self.device_id, "device stream started");

        let mut interval = tokio::time::interval(tick);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                maybe_frame = frames.recv() => match maybe_frame {
                    Some(observations) => self.on_frame(&observations),
                    None => break,
                },
                _ = interval.tick() => self.on_tick(Utc::now()).await,
            }
        }

        // Feed closed: one last chance for pending flushes to land.
        self.on_tick(Utc::now()).await;
        tracing::info!(
            device_id = %self.device_id,
            pending = self.aggregator.pending_flushes(),
            "device stream stopped"
        );
    }
}

struct StreamHandle {
    frames: mpsc::Sender<Vec<TrackObservation>>,
    counts: watch::Receiver<LiveCounts>,
    task: JoinHandle<()>,
}

/// Registry of device stream workers
pub struct StreamManager {
    store: Arc<dyn WindowStore>,
    config: StreamConfig,
    streams: RwLock<HashMap<String, StreamHandle>>,
}

impl StreamManager {
    pub fn new(store: Arc<dyn WindowStore>, config: StreamConfig) -> Self {
        Self {
            store,
            config,
            streams: RwLock::new(HashMap::new()),
        }
    }

    /// Start a worker for a camera device. The counting line is part of
    /// the device's setup; callers without one cannot register a stream.
    pub async fn register(&self, device: &Device, line: CountingLine) -> Result<()> {
        if device.kind != DeviceKind::Camera {
            return Err(Error::Config(format!(
                "device {} is not a camera",
                device.device_id
            )));
        }

        let mut streams = self.streams.write().await;
        if streams.contains_key(&device.device_id) {
            return Err(Error::Conflict(format!(
                "stream for device {} already registered",
                device.device_id
            )));
        }

        let now = Utc::now();
        let window = AggregationWindow::new(
            device.device_id.clone(),
            device.direction_from.clone().unwrap_or_default(),
            device.direction_to.clone().unwrap_or_default(),
            self.config.window,
            now,
        );

        let (counts_tx, counts_rx) = watch::channel(LiveCounts {
            device_id: device.device_id.clone(),
            total: 0,
            by_class: BTreeMap::new(),
            fps: 0.0,
            window_start: now,
        });
        let (frames_tx, frames_rx) = mpsc::channel(64);

        let worker = DeviceStreamWorker {
            device_id: device.device_id.clone(),
            counter: CrossingCounter::new(line),
            aggregator: Aggregator::new(window, self.store.clone()),
            counts_tx,
        };
        let task = tokio::spawn(worker.run(frames_rx, self.config.tick));

        streams.insert(
            device.device_id.clone(),
            StreamHandle {
                frames: frames_tx,
                counts: counts_rx,
                task,
            },
        );

        tracing::info!(device_id = %device.device_id, "device stream registered");
        Ok(())
    }

    /// Stop and drop a device's worker. Closing the frame feed lets the
    /// worker drain; a worker that does not exit within the grace period
    /// is aborted.
    pub async fn remove(&self, device_id: &str) -> Result<()> {
        let handle = self
            .streams
            .write()
            .await
            .remove(device_id)
            .ok_or_else(|| Error::NotFound(format!("stream for device {device_id} not found")))?;

        let StreamHandle { frames, task, .. } = handle;
        drop(frames);
        let abort = task.abort_handle();
        if tokio::time::timeout(self.config.stop_grace, task).await.is_err() {
            tracing::warn!(device_id = %device_id, "device stream did not drain; aborting");
            abort.abort();
        }

        tracing::info!(device_id = %device_id, "device stream removed");
        Ok(())
    }

    /// Sender the observation feed pushes frames into.
    pub async fn feed(&self, device_id: &str) -> Result<mpsc::Sender<Vec<TrackObservation>>> {
        let streams = self.streams.read().await;
        let handle = streams
            .get(device_id)
            .ok_or_else(|| Error::NotFound(format!("stream for device {device_id} not found")))?;
        Ok(handle.frames.clone())
    }

    /// Current live counts for one device.
    pub async fn counts(&self, device_id: &str) -> Result<LiveCounts> {
        let streams = self.streams.read().await;
        let handle = streams
            .get(device_id)
            .ok_or_else(|| Error::NotFound(format!("stream for device {device_id} not found")))?;
        let counts = handle.counts.borrow().clone();
        Ok(counts)
    }

    /// Watch live counts for one device (control-surface streaming).
    pub async fn subscribe(&self, device_id: &str) -> Result<watch::Receiver<LiveCounts>> {
        let streams = self.streams.read().await;
        let handle = streams
            .get(device_id)
            .ok_or_else(|| Error::NotFound(format!("stream for device {device_id} not found")))?;
        Ok(handle.counts.clone())
    }

    pub async fn device_ids(&self) -> Vec<String> {
        self.streams.read().await.keys().cloned().collect()
    }

    /// Drain every worker.
    pub async fn shutdown(&self) {
        let device_ids = self.device_ids().await;
        tracing::info!(streams = device_ids.len(), "stream manager shutting down");
        for device_id in device_ids {
            if let Err(e) = self.remove(&device_id).await {
                tracing::error!(device_id = %device_id, error = %e, "stream removal failed at shutdown");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregation::MemoryWindowStore;
    use crate::counting::BBox;
    use chrono::Utc;

    fn camera(device_id: &str) -> Device {
        Device {
            device_id: device_id.to_string(),
            name: format!("Camera {device_id}"),
            road_id: "road-1".to_string(),
            kind: DeviceKind::Camera,
            status: crate::registry::EntityStatus::Active,
            ip_address: Some("192.168.1.100".to_string()),
            direction_from: Some("North".to_string()),
            direction_to: Some("South".to_string()),
            location_details: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn signal(device_id: &str) -> Device {
        Device {
            kind: DeviceKind::Signal,
            ..camera(device_id)
        }
    }

    fn obs(track_id: u64, y: f32) -> TrackObservation {
        TrackObservation {
            track_id,
            class_label: "car".to_string(),
            bbox: BBox {
                x1: 300.0,
                y1: y - 40.0,
                x2: 340.0,
                y2: y,
            },
            confidence: 0.9,
            frame_timestamp: Utc::now(),
        }
    }

    fn fast_config() -> StreamConfig {
        StreamConfig {
            window: chrono::Duration::milliseconds(100),
            tick: Duration::from_millis(10),
            stop_grace: Duration::from_secs(2),
        }
    }

    fn line() -> CountingLine {
        CountingLine::horizontal(100.0, 640.0).unwrap()
    }

    #[tokio::test]
    async fn frames_produce_live_counts() {
        let store = Arc::new(MemoryWindowStore::new());
        let manager = StreamManager::new(store.clone(), fast_config());
        manager.register(&camera("CAM-001"), line()).await.unwrap();

        let feed = manager.feed("CAM-001").await.unwrap();
        feed.send(vec![obs(1, 50.0)]).await.unwrap();
        feed.send(vec![obs(1, 150.0)]).await.unwrap();

        let mut counts = manager.subscribe("CAM-001").await.unwrap();
        // Wait until the crossing shows up in live counts.
        loop {
            if counts.borrow().total == 1 {
                break;
            }
            counts.changed().await.unwrap();
        }

        let snapshot = manager.counts("CAM-001").await.unwrap();
        assert_eq!(snapshot.total, 1);
        assert_eq!(snapshot.by_class[&VehicleClass::Car], 1);

        drop(feed);
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn window_flush_persists_and_resets() {
        let store = Arc::new(MemoryWindowStore::new());
        let manager = StreamManager::new(store.clone(), fast_config());
        manager.register(&camera("CAM-001"), line()).await.unwrap();

        let feed = manager.feed("CAM-001").await.unwrap();
        feed.send(vec![obs(1, 50.0)]).await.unwrap();
        feed.send(vec![obs(1, 150.0)]).await.unwrap();

        // Wait past the window for a flush tick.
        tokio::time::sleep(Duration::from_millis(250)).await;

        let windows = store.recent_windows("CAM-001", 10).await.unwrap();
        assert!(!windows.is_empty());
        let total: u32 = windows.iter().map(|w| w.total_count).sum();
        assert_eq!(total, 1);
        assert_eq!(windows[0].direction_from, "North");

        // Counter was reset at flush: the same track id can cross again
        // in the new window.
        feed.send(vec![obs(1, 50.0)]).await.unwrap();
        feed.send(vec![obs(1, 150.0)]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(250)).await;

        let windows = store.recent_windows("CAM-001", 10).await.unwrap();
        let total: u32 = windows.iter().map(|w| w.total_count).sum();
        assert_eq!(total, 2);

        drop(feed);
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn store_outage_is_retried_not_fatal() {
        let store = Arc::new(MemoryWindowStore::new());
        store.fail_next_appends(2);
        let manager = StreamManager::new(store.clone(), fast_config());
        manager.register(&camera("CAM-001"), line()).await.unwrap();

        let feed = manager.feed("CAM-001").await.unwrap();
        feed.send(vec![obs(1, 50.0)]).await.unwrap();
        feed.send(vec![obs(1, 150.0)]).await.unwrap();

        tokio::time::sleep(Duration::from_millis(400)).await;

        // Despite the injected failures the snapshot eventually landed.
        let windows = store.recent_windows("CAM-001", 10).await.unwrap();
        let total: u32 = windows.iter().map(|w| w.total_count).sum();
        assert_eq!(total, 1);

        drop(feed);
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn duplicate_registration_conflicts() {
        let store = Arc::new(MemoryWindowStore::new());
        let manager = StreamManager::new(store, fast_config());
        manager.register(&camera("CAM-001"), line()).await.unwrap();
        assert!(matches!(
            manager.register(&camera("CAM-001"), line()).await,
            Err(Error::Conflict(_))
        ));
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn non_camera_devices_rejected() {
        let store = Arc::new(MemoryWindowStore::new());
        let manager = StreamManager::new(store, fast_config());
        assert!(matches!(
            manager.register(&signal("SIG-001"), line()).await,
            Err(Error::Config(_))
        ));
    }

    #[tokio::test]
    async fn remove_stops_the_worker() {
        let store = Arc::new(MemoryWindowStore::new());
        let manager = StreamManager::new(store, fast_config());
        manager.register(&camera("CAM-001"), line()).await.unwrap();
        manager.remove("CAM-001").await.unwrap();

        assert!(matches!(
            manager.counts("CAM-001").await,
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            manager.remove("CAM-001").await,
            Err(Error::NotFound(_))
        ));
    }
}
