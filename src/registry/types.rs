//! Registry data types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a road or device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntityStatus {
    Active,
    Inactive,
}

impl Default for EntityStatus {
    fn default() -> Self {
        Self::Active
    }
}

impl From<&str> for EntityStatus {
    fn from(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "inactive" => Self::Inactive,
            _ => Self::Active,
        }
    }
}

impl EntityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "Active",
            Self::Inactive => "Inactive",
        }
    }
}

/// Kind of field device attached to a road
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Camera,
    Signal,
}

impl From<&str> for DeviceKind {
    fn from(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "signal" => Self::Signal,
            _ => Self::Camera,
        }
    }
}

impl DeviceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Camera => "camera",
            Self::Signal => "signal",
        }
    }
}

/// Road (intersection) entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Road {
    pub road_id: String,
    pub name: String,
    pub location: String,
    pub district: String,
    pub city: String,
    pub status: EntityStatus,
    /// Whether the road's controller starts in auto mode
    pub auto_control: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Field device entity. Cameras carry the approach directions their
/// counting line covers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub device_id: String,
    pub name: String,
    pub road_id: String,
    pub kind: DeviceKind,
    pub status: EntityStatus,
    pub ip_address: Option<String>,
    pub direction_from: Option<String>,
    pub direction_to: Option<String>,
    pub location_details: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Road creation request
#[derive(Debug, Clone, Deserialize)]
pub struct CreateRoadRequest {
    pub road_id: Option<String>,
    pub name: String,
    pub location: String,
    pub district: String,
    pub city: String,
    #[serde(default)]
    pub auto_control: bool,
}

/// Device creation request
#[derive(Debug, Clone, Deserialize)]
pub struct CreateDeviceRequest {
    pub device_id: String,
    pub name: String,
    pub road_id: String,
    pub kind: DeviceKind,
    pub ip_address: Option<String>,
    pub direction_from: Option<String>,
    pub direction_to: Option<String>,
    pub location_details: Option<String>,
}
