//! Crossing counting
//!
//! ## Responsibilities
//!
//! - Turn per-frame track observations into discrete crossing events
//! - Attribute at most one crossing per track per window
//! - Ignore non-vehicle detections without error

mod counter;
mod line;

pub use counter::{CrossingCounter, CrossingEvent, TrackObservation, VehicleClass};
pub use line::{BBox, CountingLine, Point, Side};
