//! Aggregation data types

use crate::counting::{CrossingEvent, VehicleClass};
use crate::error::{Error, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Immutable snapshot of one counting window for one device stream.
/// Uniquely keyed by `(device_id, window_start)`; consumers treat that
/// pair as a dedup key because delivery is at-least-once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedWindow {
    pub device_id: String,
    pub direction_from: String,
    pub direction_to: String,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub total_count: u32,
    pub counts_by_class: BTreeMap<VehicleClass, u32>,
    pub sampled_fps: f32,
}

impl AggregatedWindow {
    /// Build a snapshot from per-class counts. The total is derived from
    /// the map, so `sum(counts_by_class) == total_count` holds by
    /// construction.
    #[allow(clippy::too_many_arguments)]
    pub fn from_counts(
        device_id: String,
        direction_from: String,
        direction_to: String,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
        counts_by_class: BTreeMap<VehicleClass, u32>,
        sampled_fps: f32,
    ) -> Self {
        let total_count = counts_by_class.values().sum();
        Self {
            device_id,
            direction_from,
            direction_to,
            window_start,
            window_end,
            total_count,
            counts_by_class,
            sampled_fps,
        }
    }

    /// Check the class-count/total invariant. Used when rehydrating rows
    /// from the store, where the two are persisted separately.
    pub fn validate(&self) -> Result<()> {
        let sum: u32 = self.counts_by_class.values().sum();
        if sum != self.total_count {
            return Err(Error::Invariant(format!(
                "window {}@{} class counts sum to {} but total_count is {}",
                self.device_id, self.window_start, sum, self.total_count
            )));
        }
        Ok(())
    }

    /// Window duration in seconds
    pub fn duration_secs(&self) -> f64 {
        (self.window_end - self.window_start).num_milliseconds() as f64 / 1000.0
    }
}

/// Mutable per-device accumulator for the current window. Owned by a
/// single device-stream task, so accumulate and flush never race.
pub struct AggregationWindow {
    device_id: String,
    direction_from: String,
    direction_to: String,
    duration: Duration,
    window_start: DateTime<Utc>,
    counts: BTreeMap<VehicleClass, u32>,
    total: u32,
    frames_seen: u32,
}

impl AggregationWindow {
    pub fn new(
        device_id: String,
        direction_from: String,
        direction_to: String,
        duration: Duration,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            device_id,
            direction_from,
            direction_to,
            duration,
            window_start: now,
            counts: BTreeMap::new(),
            total: 0,
            frames_seen: 0,
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn window_start(&self) -> DateTime<Utc> {
        self.window_start
    }

    pub fn accumulate(&mut self, event: &CrossingEvent) {
        *self.counts.entry(event.class).or_insert(0) += 1;
        self.total += 1;
    }

    /// Record one processed frame, for the window's sampled fps.
    pub fn note_frame(&mut self) {
        self.frames_seen = self.frames_seen.saturating_add(1);
    }

    pub fn total(&self) -> u32 {
        self.total
    }

    pub fn counts(&self) -> &BTreeMap<VehicleClass, u32> {
        &self.counts
    }

    pub fn sampled_fps(&self, now: DateTime<Utc>) -> f32 {
        let elapsed = (now - self.window_start).num_milliseconds() as f32 / 1000.0;
        if elapsed <= 0.0 {
            0.0
        } else {
            self.frames_seen as f32 / elapsed
        }
    }

    /// If the window has elapsed, snapshot it and start the next window
    /// at `now`. Successive snapshots are monotonic by `window_start`.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Option<AggregatedWindow> {
        if now - self.window_start < self.duration {
            return None;
        }

        let snapshot = AggregatedWindow::from_counts(
            self.device_id.clone(),
            self.direction_from.clone(),
            self.direction_to.clone(),
            self.window_start,
            now,
            std::mem::take(&mut self.counts),
            self.sampled_fps(now),
        );

        self.window_start = now;
        self.total = 0;
        self.frames_seen = 0;

        Some(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn event(class: VehicleClass) -> CrossingEvent {
        CrossingEvent {
            track_id: 1,
            class,
            timestamp: Utc::now(),
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap()
    }

    #[test]
    fn total_matches_class_sum() {
        let mut window = AggregationWindow::new(
            "CAM-001".into(),
            "North".into(),
            "South".into(),
            Duration::seconds(60),
            t0(),
        );
        window.accumulate(&event(VehicleClass::Car));
        window.accumulate(&event(VehicleClass::Car));
        window.accumulate(&event(VehicleClass::Truck));

        let snap = window.tick(t0() + Duration::seconds(60)).unwrap();
        assert_eq!(snap.total_count, 3);
        assert_eq!(
            snap.counts_by_class.values().sum::<u32>(),
            snap.total_count
        );
        assert_eq!(snap.counts_by_class[&VehicleClass::Car], 2);
        snap.validate().unwrap();
    }

    #[test]
    fn tick_before_duration_is_noop() {
        let mut window = AggregationWindow::new(
            "CAM-001".into(),
            "North".into(),
            "South".into(),
            Duration::seconds(60),
            t0(),
        );
        window.accumulate(&event(VehicleClass::Bus));
        assert!(window.tick(t0() + Duration::seconds(59)).is_none());
        assert_eq!(window.total(), 1);
    }

    #[test]
    fn tick_rolls_window_start_monotonically() {
        let mut window = AggregationWindow::new(
            "CAM-001".into(),
            "North".into(),
            "South".into(),
            Duration::seconds(60),
            t0(),
        );
        let first = window.tick(t0() + Duration::seconds(61)).unwrap();
        let second = window.tick(t0() + Duration::seconds(125)).unwrap();
        assert_eq!(second.window_start, first.window_end);
        assert!(second.window_start > first.window_start);
        assert_eq!(second.total_count, 0);
    }

    #[test]
    fn sampled_fps_from_frames_seen() {
        let mut window = AggregationWindow::new(
            "CAM-001".into(),
            "North".into(),
            "South".into(),
            Duration::seconds(10),
            t0(),
        );
        for _ in 0..300 {
            window.note_frame();
        }
        let snap = window.tick(t0() + Duration::seconds(10)).unwrap();
        assert!((snap.sampled_fps - 30.0).abs() < 0.01);
    }

    #[test]
    fn validate_rejects_mismatched_total() {
        let mut snap = AggregatedWindow::from_counts(
            "CAM-001".into(),
            "North".into(),
            "South".into(),
            t0(),
            t0() + Duration::seconds(60),
            BTreeMap::from([(VehicleClass::Car, 4)]),
            12.0,
        );
        snap.total_count = 9;
        assert!(matches!(snap.validate(), Err(Error::Invariant(_))));
    }
}
