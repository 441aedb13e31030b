//! Registry business logic
//!
//! Validation lives here so repository callers cannot create devices
//! that reference unknown roads or duplicate identifiers.

use super::repository::RegistryRepository;
use super::types::{CreateDeviceRequest, CreateRoadRequest, Device, Road};
use crate::error::{Error, Result};

pub struct RegistryService {
    repo: RegistryRepository,
}

impl RegistryService {
    pub fn new(repo: RegistryRepository) -> Self {
        Self { repo }
    }

    pub async fn list_roads(&self) -> Result<Vec<Road>> {
        self.repo.get_all_roads().await
    }

    pub async fn get_road(&self, road_id: &str) -> Result<Road> {
        self.repo
            .get_road(road_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Road {road_id} not found")))
    }

    pub async fn create_road(&self, req: CreateRoadRequest) -> Result<Road> {
        if req.name.trim().is_empty() {
            return Err(Error::Validation("road name must not be empty".to_string()));
        }

        let road_id = match &req.road_id {
            Some(id) if !id.trim().is_empty() => id.clone(),
            _ => uuid::Uuid::new_v4().to_string(),
        };

        if self.repo.get_road(&road_id).await?.is_some() {
            return Err(Error::Conflict(format!("Road {road_id} already exists")));
        }

        self.repo.create_road(&road_id, &req).await
    }

    pub async fn delete_road(&self, road_id: &str) -> Result<()> {
        if self.repo.get_road(road_id).await?.is_none() {
            return Err(Error::NotFound(format!("Road {road_id} not found")));
        }
        self.repo.delete_road(road_id).await
    }

    /// Persist a road's default control mode (restored on startup).
    pub async fn set_road_auto_control(&self, road_id: &str, auto: bool) -> Result<()> {
        if self.repo.get_road(road_id).await?.is_none() {
            return Err(Error::NotFound(format!("Road {road_id} not found")));
        }
        self.repo.set_road_auto_control(road_id, auto).await
    }

    pub async fn list_devices(&self) -> Result<Vec<Device>> {
        self.repo.get_all_devices().await
    }

    pub async fn get_device(&self, device_id: &str) -> Result<Device> {
        self.repo
            .get_device(device_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Device {device_id} not found")))
    }

    pub async fn devices_for_road(&self, road_id: &str) -> Result<Vec<Device>> {
        self.repo.devices_for_road(road_id).await
    }

    /// Create a device. A device referencing an unknown road is a setup
    /// error and is rejected before anything is persisted.
    pub async fn create_device(&self, req: CreateDeviceRequest) -> Result<Device> {
        if req.device_id.trim().is_empty() || req.device_id.len() > 64 {
            return Err(Error::Validation(
                "device_id must be 1-64 characters".to_string(),
            ));
        }

        if self.repo.get_road(&req.road_id).await?.is_none() {
            return Err(Error::Config(format!(
                "device {} references unknown road {}",
                req.device_id, req.road_id
            )));
        }

        if self.repo.get_device(&req.device_id).await?.is_some() {
            return Err(Error::Conflict(format!(
                "Device {} already exists",
                req.device_id
            )));
        }

        self.repo.create_device(&req).await
    }

    pub async fn delete_device(&self, device_id: &str) -> Result<()> {
        if self.repo.get_device(device_id).await?.is_none() {
            return Err(Error::NotFound(format!("Device {device_id} not found")));
        }
        self.repo.delete_device(device_id).await
    }
}
