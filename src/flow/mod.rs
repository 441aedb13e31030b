//! Flow estimation
//!
//! Derives per-approach hourly flow rates for a road from its devices'
//! recent aggregated windows. Missing data yields zero flow, never an
//! error; a road with no recent windows simply reads as empty.

use crate::aggregation::WindowStore;
use crate::error::Result;
use std::sync::Arc;

/// Signal-group approach in the two-phase model
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Approach {
    NorthSouth,
    EastWest,
}

impl Approach {
    /// Map a device's `direction_from` onto an approach. Unmapped
    /// directions contribute to neither phase.
    pub fn from_direction(direction: &str) -> Option<Self> {
        match direction.to_ascii_lowercase().as_str() {
            "north" | "south" | "north-south" | "ns" => Some(Self::NorthSouth),
            "east" | "west" | "east-west" | "ew" => Some(Self::EastWest),
            _ => None,
        }
    }
}

/// Per-direction hourly flow for one road
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct RoadFlow {
    /// Vehicles per hour on the north-south approach
    pub north_south: f64,
    /// Vehicles per hour on the east-west approach
    pub east_west: f64,
}

impl RoadFlow {
    pub const ZERO: RoadFlow = RoadFlow {
        north_south: 0.0,
        east_west: 0.0,
    };
}

/// Reads recent windows and converts counts into hourly rates
pub struct FlowEstimator {
    store: Arc<dyn WindowStore>,
    /// How many recent windows per device enter the estimate
    windows_per_device: u32,
}

impl FlowEstimator {
    pub fn new(store: Arc<dyn WindowStore>, windows_per_device: u32) -> Self {
        Self {
            store,
            windows_per_device,
        }
    }

    /// Hourly flow per approach for a road. Counts are summed over the
    /// most recent N windows per device and scaled by the observed
    /// window durations.
    pub async fn road_flow(&self, road_id: &str) -> Result<RoadFlow> {
        let windows = self
            .store
            .recent_windows_for_road(road_id, self.windows_per_device)
            .await?;

        let mut counts = [0u64; 2];
        let mut duration_secs = [0f64; 2];

        for window in &windows {
            let Some(approach) = Approach::from_direction(&window.direction_from) else {
                tracing::debug!(
                    device_id = %window.device_id,
                    direction_from = %window.direction_from,
                    "window direction maps to no approach; skipping"
                );
                continue;
            };
            let idx = approach as usize;
            counts[idx] += window.total_count as u64;
            duration_secs[idx] += window.duration_secs().max(0.0);
        }

        let rate = |idx: usize| -> f64 {
            if duration_secs[idx] <= 0.0 {
                0.0
            } else {
                counts[idx] as f64 * 3600.0 / duration_secs[idx]
            }
        };

        let flow = RoadFlow {
            north_south: rate(Approach::NorthSouth as usize),
            east_west: rate(Approach::EastWest as usize),
        };

        tracing::debug!(
            road_id = %road_id,
            windows = windows.len(),
            flow_ns = flow.north_south,
            flow_ew = flow.east_west,
            "road flow estimated"
        );

        Ok(flow)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregation::{AggregatedWindow, MemoryWindowStore};
    use crate::counting::VehicleClass;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use std::collections::BTreeMap;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap()
    }

    fn window(device_id: &str, direction: &str, offset_s: i64, total: u32) -> AggregatedWindow {
        let start = t0() + Duration::seconds(offset_s);
        AggregatedWindow {
            device_id: device_id.to_string(),
            direction_from: direction.to_string(),
            direction_to: String::new(),
            window_start: start,
            window_end: start + Duration::seconds(60),
            total_count: total,
            counts_by_class: BTreeMap::from([(VehicleClass::Car, total)]),
            sampled_fps: 25.0,
        }
    }

    #[tokio::test]
    async fn scales_counts_to_hourly_rate() {
        let store = Arc::new(MemoryWindowStore::new());
        store.bind_device("road-1", "CAM-N");
        // Two 60-second windows with 10 vehicles each: 20 vehicles over
        // 120 seconds = 600 vehicles/hour.
        store.append_window(&window("CAM-N", "North", 0, 10)).await.unwrap();
        store.append_window(&window("CAM-N", "North", 60, 10)).await.unwrap();

        let estimator = FlowEstimator::new(store, 4);
        let flow = estimator.road_flow("road-1").await.unwrap();
        assert!((flow.north_south - 600.0).abs() < 1e-9);
        assert_eq!(flow.east_west, 0.0);
    }

    #[tokio::test]
    async fn groups_devices_by_approach() {
        let store = Arc::new(MemoryWindowStore::new());
        store.bind_device("road-1", "CAM-N");
        store.bind_device("road-1", "CAM-E");
        store.append_window(&window("CAM-N", "South", 0, 30)).await.unwrap();
        store.append_window(&window("CAM-E", "East", 0, 6)).await.unwrap();

        let estimator = FlowEstimator::new(store, 4);
        let flow = estimator.road_flow("road-1").await.unwrap();
        assert!((flow.north_south - 1800.0).abs() < 1e-9);
        assert!((flow.east_west - 360.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn missing_data_yields_zero_not_error() {
        let store = Arc::new(MemoryWindowStore::new());
        let estimator = FlowEstimator::new(store, 4);
        let flow = estimator.road_flow("road-without-devices").await.unwrap();
        assert_eq!(flow, RoadFlow::ZERO);
    }

    #[tokio::test]
    async fn unmapped_direction_is_skipped() {
        let store = Arc::new(MemoryWindowStore::new());
        store.bind_device("road-1", "CAM-X");
        store.append_window(&window("CAM-X", "sideways", 0, 50)).await.unwrap();

        let estimator = FlowEstimator::new(store, 4);
        let flow = estimator.road_flow("road-1").await.unwrap();
        assert_eq!(flow, RoadFlow::ZERO);
    }

    #[tokio::test]
    async fn only_recent_windows_enter_estimate() {
        let store = Arc::new(MemoryWindowStore::new());
        store.bind_device("road-1", "CAM-N");
        // Old windows with huge counts, then two quiet recent ones.
        for i in 0..6 {
            let total = if i < 4 { 1000 } else { 0 };
            store
                .append_window(&window("CAM-N", "North", i * 60, total))
                .await
                .unwrap();
        }

        let estimator = FlowEstimator::new(store, 2);
        let flow = estimator.road_flow("road-1").await.unwrap();
        assert_eq!(flow.north_south, 0.0);
    }
}
