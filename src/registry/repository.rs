//! Road/Device registry persistence

use super::types::{CreateDeviceRequest, CreateRoadRequest, Device, DeviceKind, EntityStatus, Road};
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use sqlx::MySqlPool;

pub struct RegistryRepository {
    pool: MySqlPool,
}

impl RegistryRepository {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }

    pub async fn get_all_roads(&self) -> Result<Vec<Road>> {
        let rows = sqlx::query_as::<_, RoadRow>(
            r#"
            SELECT road_id, name, location, district, city, status,
                   auto_control, created_at, updated_at
            FROM roads
            ORDER BY name
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(rows.into_iter().map(Road::from).collect())
    }

    pub async fn get_road(&self, road_id: &str) -> Result<Option<Road>> {
        let row = sqlx::query_as::<_, RoadRow>(
            r#"
            SELECT road_id, name, location, district, city, status,
                   auto_control, created_at, updated_at
            FROM roads
            WHERE road_id = ?
            "#,
        )
        .bind(road_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(row.map(Road::from))
    }

    pub async fn create_road(&self, road_id: &str, req: &CreateRoadRequest) -> Result<Road> {
        sqlx::query(
            r#"
            INSERT INTO roads
                (road_id, name, location, district, city, status, auto_control)
            VALUES
                (?, ?, ?, ?, ?, 'Active', ?)
            "#,
        )
        .bind(road_id)
        .bind(&req.name)
        .bind(&req.location)
        .bind(&req.district)
        .bind(&req.city)
        .bind(req.auto_control)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        self.get_road(road_id)
            .await?
            .ok_or_else(|| Error::Internal(format!("road {road_id} vanished after insert")))
    }

    pub async fn delete_road(&self, road_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM roads WHERE road_id = ?")
            .bind(road_id)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(())
    }

    /// Persist a road's default control mode so restarts restore it.
    pub async fn set_road_auto_control(&self, road_id: &str, auto: bool) -> Result<()> {
        sqlx::query("UPDATE roads SET auto_control = ? WHERE road_id = ?")
            .bind(auto)
            .bind(road_id)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(())
    }

    pub async fn get_all_devices(&self) -> Result<Vec<Device>> {
        let rows = sqlx::query_as::<_, DeviceRow>(
            r#"
            SELECT device_id, name, road_id, kind, status, ip_address,
                   direction_from, direction_to, location_details,
                   created_at, updated_at
            FROM devices
            ORDER BY device_id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(rows.into_iter().map(Device::from).collect())
    }

    pub async fn get_device(&self, device_id: &str) -> Result<Option<Device>> {
        let row = sqlx::query_as::<_, DeviceRow>(
            r#"
            SELECT device_id, name, road_id, kind, status, ip_address,
                   direction_from, direction_to, location_details,
                   created_at, updated_at
            FROM devices
            WHERE device_id = ?
            "#,
        )
        .bind(device_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(row.map(Device::from))
    }

    pub async fn devices_for_road(&self, road_id: &str) -> Result<Vec<Device>> {
        let rows = sqlx::query_as::<_, DeviceRow>(
            r#"
            SELECT device_id, name, road_id, kind, status, ip_address,
                   direction_from, direction_to, location_details,
                   created_at, updated_at
            FROM devices
            WHERE road_id = ?
            ORDER BY device_id
            "#,
        )
        .bind(road_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(rows.into_iter().map(Device::from).collect())
    }

    pub async fn create_device(&self, req: &CreateDeviceRequest) -> Result<Device> {
        sqlx::query(
            r#"
            INSERT INTO devices
                (device_id, name, road_id, kind, status, ip_address,
                 direction_from, direction_to, location_details)
            VALUES
                (?, ?, ?, ?, 'Active', ?, ?, ?, ?)
            "#,
        )
        .bind(&req.device_id)
        .bind(&req.name)
        .bind(&req.road_id)
        .bind(req.kind.as_str())
        .bind(&req.ip_address)
        .bind(&req.direction_from)
        .bind(&req.direction_to)
        .bind(&req.location_details)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        self.get_device(&req.device_id)
            .await?
            .ok_or_else(|| Error::Internal(format!("device {} vanished after insert", req.device_id)))
    }

    pub async fn delete_device(&self, device_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM devices WHERE device_id = ?")
            .bind(device_id)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(())
    }
}

/// DB row mapping structs
#[derive(sqlx::FromRow)]
struct RoadRow {
    road_id: String,
    name: String,
    location: String,
    district: String,
    city: String,
    status: String,
    auto_control: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<RoadRow> for Road {
    fn from(row: RoadRow) -> Self {
        Self {
            road_id: row.road_id,
            name: row.name,
            location: row.location,
            district: row.district,
            city: row.city,
            status: EntityStatus::from(row.status.as_str()),
            auto_control: row.auto_control,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct DeviceRow {
    device_id: String,
    name: String,
    road_id: String,
    kind: String,
    status: String,
    ip_address: Option<String>,
    direction_from: Option<String>,
    direction_to: Option<String>,
    location_details: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<DeviceRow> for Device {
    fn from(row: DeviceRow) -> Self {
        Self {
            device_id: row.device_id,
            name: row.name,
            road_id: row.road_id,
            kind: DeviceKind::from(row.kind.as_str()),
            status: EntityStatus::from(row.status.as_str()),
            ip_address: row.ip_address,
            direction_from: row.direction_from,
            direction_to: row.direction_to,
            location_details: row.location_details,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}
