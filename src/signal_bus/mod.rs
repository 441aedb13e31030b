//! Signal bus message contract and bus seam
//!
//! Timing commands and status telemetry travel as comma-separated text
//! payloads over a pub/sub topic. This module owns the codec, the
//! `SignalBus` seam the road controllers publish through, and an
//! in-process loopback implementation; wiring to a real broker is
//! deployment plumbing that lives outside the crate.

mod repository;
mod telemetry;

pub use repository::SignalRepository;
pub use telemetry::{SignalLogRecord, SignalStatusRecord, SignalStore, TelemetryService};

#[cfg(test)]
pub use telemetry::MemorySignalStore;

use crate::error::{Error, Result};
use crate::timing::SignalTiming;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Default yellow interval in seconds for published phase commands
pub const DEFAULT_YELLOW_S: u32 = 3;

/// Outbound timing command for one signal phase.
///
/// Wire format: `"<roadId>,<greenMs>,<yellowMs>,<redMs>"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimingCommand {
    pub road_id: String,
    pub green_ms: u64,
    pub yellow_ms: u64,
    pub red_ms: u64,
}

impl TimingCommand {
    pub fn encode(&self) -> String {
        format!(
            "{},{},{},{}",
            self.road_id, self.green_ms, self.yellow_ms, self.red_ms
        )
    }

    /// The two complementary phase commands for one computed timing: the
    /// north-south phase and the east-west phase that runs inside its
    /// red. `yellow_s` is the fixed amber interval of the field hardware.
    pub fn phase_pair(road_id: &str, timing: &SignalTiming, yellow_s: u32) -> (Self, Self) {
        let cycle = timing.cycle.round() as u64;
        let green_ns = u64::from(timing.green_ns);
        let yellow = u64::from(yellow_s);

        let ns = Self {
            road_id: road_id.to_string(),
            green_ms: green_ns * 1000,
            yellow_ms: yellow * 1000,
            red_ms: cycle.saturating_sub(green_ns) * 1000,
        };
        let ew = Self {
            road_id: road_id.to_string(),
            green_ms: cycle.saturating_sub(green_ns).saturating_sub(yellow) * 1000,
            yellow_ms: yellow * 1000,
            red_ms: (green_ns + yellow) * 1000,
        };
        (ns, ew)
    }
}

/// Light color reported by field hardware
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LightColor {
    Red,
    Yellow,
    Green,
}

impl LightColor {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Red => "red",
            Self::Yellow => "yellow",
            Self::Green => "green",
        }
    }
}

impl std::str::FromStr for LightColor {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "red" => Ok(Self::Red),
            "yellow" => Ok(Self::Yellow),
            "green" => Ok(Self::Green),
            other => Err(Error::Input(format!("unknown light color: {other}"))),
        }
    }
}

/// Payload of an inbound status report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportContent {
    /// The light switched on or off
    State { on: bool },
    /// Seconds remaining in the current phase; zero means the light is
    /// about to turn off
    Remaining(u32),
}

/// Inbound status report from field hardware.
///
/// Wire format: `"<roadId>,<color>,<timeDurationSeconds>,<content>"`
/// where content is the literal `ON`/`OFF` or a decimal seconds value.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusReport {
    pub road_id: String,
    pub color: LightColor,
    pub duration_s: u32,
    pub content: ReportContent,
}

impl StatusReport {
    pub fn parse(payload: &str) -> Result<Self> {
        let mut parts = payload.split(',');
        let road_id = parts
            .next()
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| Error::Input(format!("status report missing road id: {payload:?}")))?
            .trim()
            .to_string();
        let color: LightColor = parts
            .next()
            .ok_or_else(|| Error::Input(format!("status report missing color: {payload:?}")))?
            .trim()
            .parse()?;
        let duration_s: u32 = parts
            .next()
            .ok_or_else(|| Error::Input(format!("status report missing duration: {payload:?}")))?
            .trim()
            .parse()
            .map_err(|_| Error::Input(format!("status report duration not numeric: {payload:?}")))?;
        let content_raw = parts
            .next()
            .ok_or_else(|| Error::Input(format!("status report missing content: {payload:?}")))?
            .trim();
        if parts.next().is_some() {
            return Err(Error::Input(format!(
                "status report has trailing fields: {payload:?}"
            )));
        }

        let content = match content_raw {
            "ON" => ReportContent::State { on: true },
            "OFF" => ReportContent::State { on: false },
            other => other
                .parse::<u32>()
                .map(ReportContent::Remaining)
                .map_err(|_| {
                    Error::Input(format!("status report content not ON/OFF/seconds: {payload:?}"))
                })?,
        };

        Ok(Self {
            road_id,
            color,
            duration_s,
            content,
        })
    }
}

/// Publish seam for timing commands plus a subscription to inbound
/// telemetry. Implementations must be safe to share across all road
/// controller tasks.
#[async_trait]
pub trait SignalBus: Send + Sync {
    /// Publish one timing command. Failures are transient: the caller
    /// logs and retries on its next scheduled iteration.
    async fn publish(&self, command: &TimingCommand) -> Result<()>;

    /// Subscribe to raw inbound status report payloads.
    fn reports(&self) -> broadcast::Receiver<String>;
}

/// In-process bus: outbound commands and inbound reports on broadcast
/// channels. Backs local deployments and tests; a broker-backed bus
/// implements the same trait at the edge.
pub struct LoopbackBus {
    commands: broadcast::Sender<String>,
    reports: broadcast::Sender<String>,
}

impl LoopbackBus {
    pub fn new(capacity: usize) -> Self {
        let (commands, _) = broadcast::channel(capacity);
        let (reports, _) = broadcast::channel(capacity);
        Self { commands, reports }
    }

    /// Observe outbound command payloads.
    pub fn commands(&self) -> broadcast::Receiver<String> {
        self.commands.subscribe()
    }

    /// Inject an inbound status report, as field hardware would.
    pub fn publish_report(&self, payload: &str) {
        // Send errors just mean nobody is subscribed yet.
        let _ = self.reports.send(payload.to_string());
    }
}

impl Default for LoopbackBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl SignalBus for LoopbackBus {
    async fn publish(&self, command: &TimingCommand) -> Result<()> {
        let payload = command.encode();
        tracing::info!(road_id = %command.road_id, payload = %payload, "timing command published");
        // A send error only means no subscriber is attached right now;
        // the loopback bus has no delivery guarantee to keep.
        if self.commands.send(payload).is_err() {
            tracing::debug!(road_id = %command.road_id, "no command subscribers attached");
        }
        Ok(())
    }

    fn reports(&self) -> broadcast::Receiver<String> {
        self.reports.subscribe()
    }
}
