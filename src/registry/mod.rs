//! Road/Device registry
//!
//! Explicit, owned registry of roads and their field devices. Road
//! controllers and device stream workers mirror the lifecycle of the
//! entities recorded here.

mod repository;
mod service;
mod types;

pub use repository::RegistryRepository;
pub use service::RegistryService;
pub use types::{CreateDeviceRequest, CreateRoadRequest, Device, DeviceKind, EntityStatus, Road};
