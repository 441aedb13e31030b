//! Windowed aggregation of crossing events
//!
//! ## Responsibilities
//!
//! - Accumulate crossing events per class over a bounded interval
//! - Flush an immutable snapshot per window and reset
//! - Retry failed flushes on the next tick (at-least-once delivery;
//!   `(device_id, window_start)` is the dedup key)

mod repository;
mod types;

pub use repository::WindowRepository;
pub use types::{AggregatedWindow, AggregationWindow};

#[cfg(test)]
pub use repository::MemoryWindowStore;

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::Arc;

/// Durable storage for aggregated windows. Appends must be idempotent on
/// `(device_id, window_start)` so at-least-once flushing never
/// double-counts downstream.
#[async_trait]
pub trait WindowStore: Send + Sync {
    async fn append_window(&self, window: &AggregatedWindow) -> Result<()>;

    /// Most recent windows for one device, newest first.
    async fn recent_windows(&self, device_id: &str, limit: u32) -> Result<Vec<AggregatedWindow>>;

    /// Most recent windows per camera device of a road, newest first per
    /// device.
    async fn recent_windows_for_road(
        &self,
        road_id: &str,
        per_device_limit: u32,
    ) -> Result<Vec<AggregatedWindow>>;
}

/// Ties one device's accumulator to the window store, with a pending
/// queue for flushes that failed to persist. Owned by the device-stream
/// task (single writer), which makes flush atomic relative to accumulate.
pub struct Aggregator {
    window: AggregationWindow,
    store: Arc<dyn WindowStore>,
    pending: VecDeque<AggregatedWindow>,
}

impl Aggregator {
    pub fn new(window: AggregationWindow, store: Arc<dyn WindowStore>) -> Self {
        Self {
            window,
            store,
            pending: VecDeque::new(),
        }
    }

    pub fn window(&self) -> &AggregationWindow {
        &self.window
    }

    pub fn window_mut(&mut self) -> &mut AggregationWindow {
        &mut self.window
    }

    pub fn pending_flushes(&self) -> usize {
        self.pending.len()
    }

    /// Advance the window clock. Returns `true` when a window rolled over
    /// (the caller must then reset its crossing counter). Snapshots are
    /// flushed oldest-first so persisted windows stay monotonic by
    /// `window_start`; a persistence failure keeps the snapshot queued
    /// for the next tick.
    pub async fn tick(&mut self, now: DateTime<Utc>) -> bool {
        let rolled = match self.window.tick(now) {
            Some(snapshot) => {
                self.pending.push_back(snapshot);
                true
            }
            None => false,
        };

        while let Some(snapshot) = self.pending.front() {
            match self.store.append_window(snapshot).await {
                Ok(()) => {
                    tracing::debug!(
                        device_id = %snapshot.device_id,
                        window_start = %snapshot.window_start,
                        total = snapshot.total_count,
                        "aggregated window persisted"
                    );
                    self.pending.pop_front();
                }
                Err(e) => {
                    tracing::warn!(
                        device_id = %self.window.device_id(),
                        pending = self.pending.len(),
                        error = %e,
                        "window flush failed; will retry on next tick"
                    );
                    break;
                }
            }
        }

        rolled
    }
}
