//! Inbound signal telemetry
//!
//! Drains status reports from the bus subscription into the persistent
//! store. Malformed payloads are dropped and logged; store outages are
//! logged and the message is lost (field hardware re-reports every
//! second, so the timeline self-heals).

use super::{LightColor, ReportContent, SignalBus, StatusReport};
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Current state of one light, keyed by `(color, road)`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SignalStatusRecord {
    pub road_id: String,
    pub color: LightColor,
    pub duration_s: u32,
    pub is_on: bool,
    pub updated_at: DateTime<Utc>,
}

/// Timeline sample of one light's remaining phase time
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SignalLogRecord {
    pub road_id: String,
    pub color: LightColor,
    pub duration_s: u32,
    pub remaining_s: u32,
    pub recorded_at: DateTime<Utc>,
}

/// Persistence seam for signal status and timeline log records
#[async_trait]
pub trait SignalStore: Send + Sync {
    async fn upsert_status(&self, record: &SignalStatusRecord) -> Result<()>;
    async fn append_log(&self, record: &SignalLogRecord) -> Result<()>;
}

/// Parses and persists inbound status reports
pub struct TelemetryService {
    store: Arc<dyn SignalStore>,
}

impl TelemetryService {
    pub fn new(store: Arc<dyn SignalStore>) -> Self {
        Self { store }
    }

    /// Handle one raw payload from the bus.
    pub async fn handle_raw(&self, payload: &str) -> Result<()> {
        let report = StatusReport::parse(payload)?;
        self.handle(&report).await
    }

    pub async fn handle(&self, report: &StatusReport) -> Result<()> {
        let now = Utc::now();
        match report.content {
            ReportContent::State { on } => {
                self.store
                    .upsert_status(&SignalStatusRecord {
                        road_id: report.road_id.clone(),
                        color: report.color,
                        duration_s: report.duration_s,
                        is_on: on,
                        updated_at: now,
                    })
                    .await?;
                tracing::info!(
                    road_id = %report.road_id,
                    color = %report.color.as_str(),
                    on,
                    "signal state recorded"
                );
            }
            ReportContent::Remaining(remaining_s) => {
                self.store
                    .append_log(&SignalLogRecord {
                        road_id: report.road_id.clone(),
                        color: report.color,
                        duration_s: report.duration_s,
                        remaining_s,
                        recorded_at: now,
                    })
                    .await?;
            }
        }
        Ok(())
    }

    /// Drain a bus subscription until the bus closes. Spawned once at
    /// startup; per-message failures never stop the drain.
    pub async fn run(self: Arc<Self>, bus: Arc<dyn SignalBus>) {
        let mut reports = bus.reports();
        tracing::info!("signal telemetry drain started");
        loop {
            match reports.recv().await {
                Ok(payload) => {
                    if let Err(e) = self.handle_raw(&payload).await {
                        match e {
                            Error::Input(msg) => {
                                tracing::warn!(payload = %payload, %msg, "malformed status report dropped")
                            }
                            other => {
                                tracing::warn!(payload = %payload, error = %other, "status report not persisted")
                            }
                        }
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "telemetry drain lagged; reports skipped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        tracing::info!("signal telemetry drain stopped");
    }
}

/// In-memory SignalStore for tests
#[cfg(test)]
pub struct MemorySignalStore {
    pub statuses: std::sync::Mutex<Vec<SignalStatusRecord>>,
    pub logs: std::sync::Mutex<Vec<SignalLogRecord>>,
}

#[cfg(test)]
impl MemorySignalStore {
    pub fn new() -> Self {
        Self {
            statuses: std::sync::Mutex::new(Vec::new()),
            logs: std::sync::Mutex::new(Vec::new()),
        }
    }
}

#[cfg(test)]
#[async_trait]
impl SignalStore for MemorySignalStore {
    async fn upsert_status(&self, record: &SignalStatusRecord) -> Result<()> {
        let mut statuses = self.statuses.lock().unwrap();
        match statuses
            .iter_mut()
            .find(|s| s.road_id == record.road_id && s.color == record.color)
        {
            Some(existing) => *existing = record.clone(),
            None => statuses.push(record.clone()),
        }
        Ok(())
    }

    async fn append_log(&self, record: &SignalLogRecord) -> Result<()> {
        self.logs.lock().unwrap().push(record.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal_bus::LoopbackBus;
    use std::time::Duration;

    #[tokio::test]
    async fn state_report_upserts_status() {
        let store = Arc::new(MemorySignalStore::new());
        let service = TelemetryService::new(store.clone());

        service.handle_raw("road-1,green,25,ON").await.unwrap();
        service.handle_raw("road-1,green,30,OFF").await.unwrap();

        let statuses = store.statuses.lock().unwrap();
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].duration_s, 30);
        assert!(!statuses[0].is_on);
    }

    #[tokio::test]
    async fn remaining_report_appends_timeline() {
        let store = Arc::new(MemorySignalStore::new());
        let service = TelemetryService::new(store.clone());

        service.handle_raw("road-1,red,30,12").await.unwrap();
        service.handle_raw("road-1,red,30,11").await.unwrap();
        service.handle_raw("road-1,red,30,0").await.unwrap();

        let logs = store.logs.lock().unwrap();
        assert_eq!(logs.len(), 3);
        assert_eq!(logs[2].remaining_s, 0);
        // Status untouched by timeline samples.
        assert!(store.statuses.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn malformed_payload_is_dropped_not_persisted() {
        let store = Arc::new(MemorySignalStore::new());
        let service = TelemetryService::new(store.clone());

        let err = service.handle_raw("garbage").await;
        assert!(matches!(err, Err(Error::Input(_))));
        assert!(store.statuses.lock().unwrap().is_empty());
        assert!(store.logs.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn drain_survives_malformed_messages() {
        let store = Arc::new(MemorySignalStore::new());
        let service = Arc::new(TelemetryService::new(store.clone()));
        let bus = Arc::new(LoopbackBus::default());

        let drain = tokio::spawn(service.run(bus.clone() as Arc<dyn SignalBus>));
        // Give the drain a moment to subscribe.
        tokio::time::sleep(Duration::from_millis(20)).await;

        bus.publish_report("not,a,valid");
        bus.publish_report("road-1,green,25,ON");

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(store.statuses.lock().unwrap().len(), 1);
        drain.abort();
    }
}
