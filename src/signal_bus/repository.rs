//! Signal status/log persistence
//!
//! MySQL-backed `SignalStore`. Status rows are keyed by
//! `(road_id, color)`; log rows form an append-only timeline.

use super::telemetry::{SignalLogRecord, SignalStatusRecord, SignalStore};
use super::LightColor;
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::MySqlPool;

pub struct SignalRepository {
    pool: MySqlPool,
}

impl SignalRepository {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }

    /// Current status rows for one road (one per color seen so far).
    pub async fn status_for_road(&self, road_id: &str) -> Result<Vec<SignalStatusRecord>> {
        let rows = sqlx::query_as::<_, StatusRow>(
            r#"
            SELECT road_id, color, duration_s, is_on, updated_at
            FROM signal_status
            WHERE road_id = ?
            ORDER BY color
            "#,
        )
        .bind(road_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::Transient(e.to_string()))?;

        rows.into_iter().map(SignalStatusRecord::try_from).collect()
    }

    /// Most recent timeline samples for one road, newest first.
    pub async fn log_for_road(&self, road_id: &str, limit: u32) -> Result<Vec<SignalLogRecord>> {
        let rows = sqlx::query_as::<_, LogRow>(
            r#"
            SELECT road_id, color, duration_s, remaining_s, recorded_at
            FROM signal_log
            WHERE road_id = ?
            ORDER BY recorded_at DESC
            LIMIT ?
            "#,
        )
        .bind(road_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::Transient(e.to_string()))?;

        rows.into_iter().map(SignalLogRecord::try_from).collect()
    }
}

#[async_trait]
impl SignalStore for SignalRepository {
    async fn upsert_status(&self, record: &SignalStatusRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO signal_status
                (road_id, color, duration_s, is_on, updated_at)
            VALUES
                (?, ?, ?, ?, ?)
            ON DUPLICATE KEY UPDATE
                duration_s = VALUES(duration_s),
                is_on = VALUES(is_on),
                updated_at = VALUES(updated_at)
            "#,
        )
        .bind(&record.road_id)
        .bind(record.color.as_str())
        .bind(record.duration_s)
        .bind(record.is_on)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Transient(e.to_string()))?;

        Ok(())
    }

    async fn append_log(&self, record: &SignalLogRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO signal_log
                (road_id, color, duration_s, remaining_s, recorded_at)
            VALUES
                (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.road_id)
        .bind(record.color.as_str())
        .bind(record.duration_s)
        .bind(record.remaining_s)
        .bind(record.recorded_at)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Transient(e.to_string()))?;

        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct StatusRow {
    road_id: String,
    color: String,
    duration_s: i64,
    is_on: bool,
    updated_at: DateTime<Utc>,
}

impl TryFrom<StatusRow> for SignalStatusRecord {
    type Error = Error;

    fn try_from(row: StatusRow) -> Result<Self> {
        Ok(Self {
            road_id: row.road_id,
            color: row.color.parse::<LightColor>()?,
            duration_s: row.duration_s.max(0) as u32,
            is_on: row.is_on,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct LogRow {
    road_id: String,
    color: String,
    duration_s: i64,
    remaining_s: i64,
    recorded_at: DateTime<Utc>,
}

impl TryFrom<LogRow> for SignalLogRecord {
    type Error = Error;

    fn try_from(row: LogRow) -> Result<Self> {
        Ok(Self {
            road_id: row.road_id,
            color: row.color.parse::<LightColor>()?,
            duration_s: row.duration_s.max(0) as u32,
            remaining_s: row.remaining_s.max(0) as u32,
            recorded_at: row.recorded_at,
        })
    }
}
