//! Greenwave
//!
//! Flow-adaptive traffic signal retiming.
//!
//! ## Architecture
//!
//! 1. CrossingCounter - per-stream at-most-once crossing events
//! 2. AggregationWindow - windowed per-class counts, flush + reset
//! 3. FlowEstimator - recent windows -> per-approach hourly flow
//! 4. Timing - Webster two-phase cycle/green computation
//! 5. RoadController - auto/manual state machine per road
//! 6. RoadManager - controller registry, startup load, shutdown drain
//! 7. SignalBus - timing command / status report contract + loopback
//! 8. StreamManager - one worker task per camera device
//! 9. Registry - roads and devices
//! 10. WebAPI - control surface
//!
//! ## Design principles
//!
//! - One owner per mutable structure: each device stream task owns its
//!   counter and window; each road controller owns its loop
//! - Generation counters, not flags, cancel stale control loops
//! - Failures isolated per device and per road

pub mod aggregation;
pub mod control;
pub mod counting;
pub mod flow;
pub mod registry;
pub mod signal_bus;
pub mod stream;
pub mod timing;
pub mod web_api;

pub mod error;
pub mod models;
pub mod state;

pub use error::{Error, Result};
pub use state::{AppConfig, AppState};
