//! Crossing counter
//!
//! Converts a noisy tracked-object stream into at-most-once crossing
//! events. A track is counted when it is observed on the positive side of
//! the line after having been observed on the negative side within the
//! same window. A track that first appears already on the positive side is
//! never counted on that appearance: a crossing must be witnessed, not
//! inferred. Track ids may be reassigned by the tracker once its
//! lost-track buffer expires; a long-occluded vehicle can therefore be
//! recounted, which is an accepted accuracy bound.

use super::line::{BBox, CountingLine, Side};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// One detector+tracker output for one object in one frame.
/// Produced by the external observation feed; not owned here.
#[derive(Debug, Clone)]
pub struct TrackObservation {
    pub track_id: u64,
    pub class_label: String,
    pub bbox: BBox,
    pub confidence: f32,
    pub frame_timestamp: DateTime<Utc>,
}

/// Vehicle classes eligible for counting
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum VehicleClass {
    Car,
    Motorcycle,
    Bus,
    Truck,
    Bicycle,
}

impl VehicleClass {
    /// Map a detector class label onto a vehicle class. Unknown labels
    /// (pedestrians, animals, misdetections) return `None` and the
    /// observation is ignored.
    pub fn from_label(label: &str) -> Option<Self> {
        match label.to_ascii_lowercase().as_str() {
            "car" => Some(Self::Car),
            "motorcycle" => Some(Self::Motorcycle),
            "bus" => Some(Self::Bus),
            "truck" => Some(Self::Truck),
            "bicycle" => Some(Self::Bicycle),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Car => "car",
            Self::Motorcycle => "motorcycle",
            Self::Bus => "bus",
            Self::Truck => "truck",
            Self::Bicycle => "bicycle",
        }
    }

}

impl std::fmt::Display for VehicleClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A witnessed line crossing, attributed once per track per window
#[derive(Debug, Clone, PartialEq)]
pub struct CrossingEvent {
    pub track_id: u64,
    pub class: VehicleClass,
    pub timestamp: DateTime<Utc>,
}

/// Per-device-stream crossing state
pub struct CrossingCounter {
    line: CountingLine,
    /// Tracks already counted in the current window
    crossed: HashSet<u64>,
    /// Tracks observed on the negative side in the current window; only
    /// these are eligible to produce an event when they reach the
    /// positive side
    approached: HashSet<u64>,
}

impl CrossingCounter {
    pub fn new(line: CountingLine) -> Self {
        Self {
            line,
            crossed: HashSet::new(),
            approached: HashSet::new(),
        }
    }

    /// Process one frame of observations, in frame order. Returns the
    /// crossing events witnessed in this frame.
    pub fn on_frame(&mut self, observations: &[TrackObservation]) -> Vec<CrossingEvent> {
        let mut events = Vec::new();

        for obs in observations {
            let Some(class) = VehicleClass::from_label(&obs.class_label) else {
                continue;
            };

            match self.line.side(obs.bbox.anchor()) {
                Side::Negative => {
                    self.approached.insert(obs.track_id);
                }
                Side::Positive => {
                    if self.approached.contains(&obs.track_id)
                        && self.crossed.insert(obs.track_id)
                    {
                        tracing::debug!(
                            track_id = obs.track_id,
                            class = %class,
                            "vehicle crossed counting line"
                        );
                        events.push(CrossingEvent {
                            track_id: obs.track_id,
                            class,
                            timestamp: obs.frame_timestamp,
                        });
                    }
                }
                Side::OnLine => {}
            }
        }

        events
    }

    /// Number of tracks counted in the current window
    pub fn crossed_count(&self) -> usize {
        self.crossed.len()
    }

    /// Clear crossing state. Called at window flush; also bounds the
    /// growth of the track-id sets over a long-running stream.
    pub fn reset(&mut self) {
        self.crossed.clear();
        self.approached.clear();
    }
}
