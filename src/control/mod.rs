//! Adaptive signal control
//!
//! ## Responsibilities
//!
//! - Per-road auto/manual state machine with generation-based
//!   cancellation
//! - Periodic recompute-and-publish loop while in auto mode
//! - Registry of controllers with startup load and shutdown drain

mod controller;
mod manager;

pub use controller::{ControlConfig, ControlMode, RoadController};
pub use manager::{RoadManager, ShutdownReport};
