//! Aggregated window persistence
//!
//! MySQL-backed `WindowStore`. Appends upsert on the
//! `(device_id, window_start)` unique key, so at-least-once flush
//! delivery never produces duplicate rows.

use super::types::AggregatedWindow;
use super::WindowStore;
use crate::counting::VehicleClass;
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::MySqlPool;
use std::collections::BTreeMap;

/// WindowStore backed by MySQL
pub struct WindowRepository {
    pool: MySqlPool,
}

impl WindowRepository {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }

    async fn camera_device_ids(&self, road_id: &str) -> Result<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT device_id FROM devices
            WHERE road_id = ? AND kind = 'camera'
            ORDER BY device_id
            "#,
        )
        .bind(road_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::Transient(e.to_string()))?;

        Ok(rows.into_iter().map(|r| r.0).collect())
    }
}

#[async_trait]
impl WindowStore for WindowRepository {
    async fn append_window(&self, window: &AggregatedWindow) -> Result<()> {
        let counts_json = serde_json::to_value(&window.counts_by_class)?;

        sqlx::query(
            r#"
            INSERT INTO aggregated_windows
                (device_id, window_start, window_end, direction_from,
                 direction_to, total_count, counts_by_class, sampled_fps)
            VALUES
                (?, ?, ?, ?, ?, ?, ?, ?)
            ON DUPLICATE KEY UPDATE
                window_end = VALUES(window_end),
                total_count = VALUES(total_count),
                counts_by_class = VALUES(counts_by_class),
                sampled_fps = VALUES(sampled_fps)
            "#,
        )
        .bind(&window.device_id)
        .bind(window.window_start)
        .bind(window.window_end)
        .bind(&window.direction_from)
        .bind(&window.direction_to)
        .bind(window.total_count)
        .bind(counts_json)
        .bind(window.sampled_fps)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Transient(e.to_string()))?;

        Ok(())
    }

    async fn recent_windows(&self, device_id: &str, limit: u32) -> Result<Vec<AggregatedWindow>> {
        let rows = sqlx::query_as::<_, WindowRow>(
            r#"
            SELECT
                device_id, window_start, window_end, direction_from,
                direction_to, total_count, counts_by_class, sampled_fps
            FROM aggregated_windows
            WHERE device_id = ?
            ORDER BY window_start DESC
            LIMIT ?
            "#,
        )
        .bind(device_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::Transient(e.to_string()))?;

        rows.into_iter().map(AggregatedWindow::try_from).collect()
    }

    async fn recent_windows_for_road(
        &self,
        road_id: &str,
        per_device_limit: u32,
    ) -> Result<Vec<AggregatedWindow>> {
        let mut windows = Vec::new();
        for device_id in self.camera_device_ids(road_id).await? {
            windows.extend(self.recent_windows(&device_id, per_device_limit).await?);
        }
        Ok(windows)
    }
}

/// DB row mapping struct
#[derive(sqlx::FromRow)]
struct WindowRow {
    device_id: String,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
    direction_from: String,
    direction_to: String,
    total_count: i64,
    counts_by_class: serde_json::Value,
    sampled_fps: f32,
}

impl TryFrom<WindowRow> for AggregatedWindow {
    type Error = Error;

    fn try_from(row: WindowRow) -> Result<Self> {
        if row.total_count < 0 {
            return Err(Error::Invariant(format!(
                "window {}@{} has negative total_count {}",
                row.device_id, row.window_start, row.total_count
            )));
        }

        let counts_by_class: BTreeMap<VehicleClass, u32> =
            serde_json::from_value(row.counts_by_class)?;

        let window = AggregatedWindow {
            device_id: row.device_id,
            direction_from: row.direction_from,
            direction_to: row.direction_to,
            window_start: row.window_start,
            window_end: row.window_end,
            total_count: row.total_count as u32,
            counts_by_class,
            sampled_fps: row.sampled_fps,
        };
        window.validate()?;
        Ok(window)
    }
}

/// In-memory WindowStore mirroring the repository's upsert semantics,
/// with injectable append failures.
#[cfg(test)]
pub struct MemoryWindowStore {
    windows: std::sync::Mutex<std::collections::HashMap<String, Vec<AggregatedWindow>>>,
    road_devices: std::sync::Mutex<std::collections::HashMap<String, Vec<String>>>,
    fail_appends: std::sync::atomic::AtomicU32,
    fail_reads: std::sync::atomic::AtomicBool,
    appends: std::sync::atomic::AtomicU32,
}

#[cfg(test)]
impl MemoryWindowStore {
    pub fn new() -> Self {
        Self {
            windows: std::sync::Mutex::new(std::collections::HashMap::new()),
            road_devices: std::sync::Mutex::new(std::collections::HashMap::new()),
            fail_appends: std::sync::atomic::AtomicU32::new(0),
            fail_reads: std::sync::atomic::AtomicBool::new(false),
            appends: std::sync::atomic::AtomicU32::new(0),
        }
    }

    /// Make the next `n` appends fail with a transient error.
    pub fn fail_next_appends(&self, n: u32) {
        self.fail_appends
            .store(n, std::sync::atomic::Ordering::SeqCst);
    }

    /// Make every read fail with a transient error until cleared.
    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads
            .store(fail, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn append_count(&self) -> u32 {
        self.appends.load(std::sync::atomic::Ordering::SeqCst)
    }

    /// Register a device under a road for `recent_windows_for_road`.
    pub fn bind_device(&self, road_id: &str, device_id: &str) {
        self.road_devices
            .lock()
            .unwrap()
            .entry(road_id.to_string())
            .or_default()
            .push(device_id.to_string());
    }
}

#[cfg(test)]
#[async_trait]
impl WindowStore for MemoryWindowStore {
    async fn append_window(&self, window: &AggregatedWindow) -> Result<()> {
        use std::sync::atomic::Ordering;

        let remaining = self.fail_appends.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_appends.store(remaining - 1, Ordering::SeqCst);
            return Err(Error::Transient("store unavailable".to_string()));
        }

        self.appends.fetch_add(1, Ordering::SeqCst);

        let mut windows = self.windows.lock().unwrap();
        let entries = windows.entry(window.device_id.clone()).or_default();
        match entries
            .iter_mut()
            .find(|w| w.window_start == window.window_start)
        {
            Some(existing) => *existing = window.clone(),
            None => entries.push(window.clone()),
        }
        Ok(())
    }

    async fn recent_windows(&self, device_id: &str, limit: u32) -> Result<Vec<AggregatedWindow>> {
        if self.fail_reads.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(Error::Transient("store unavailable".to_string()));
        }
        let windows = self.windows.lock().unwrap();
        let mut entries = windows.get(device_id).cloned().unwrap_or_default();
        entries.sort_by(|a, b| b.window_start.cmp(&a.window_start));
        entries.truncate(limit as usize);
        Ok(entries)
    }

    async fn recent_windows_for_road(
        &self,
        road_id: &str,
        per_device_limit: u32,
    ) -> Result<Vec<AggregatedWindow>> {
        if self.fail_reads.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(Error::Transient("store unavailable".to_string()));
        }
        let device_ids = self
            .road_devices
            .lock()
            .unwrap()
            .get(road_id)
            .cloned()
            .unwrap_or_default();

        let mut out = Vec::new();
        for device_id in device_ids {
            out.extend(self.recent_windows(&device_id, per_device_limit).await?);
        }
        Ok(out)
    }
}
