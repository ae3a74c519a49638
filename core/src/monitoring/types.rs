//! Port-mirroring monitoring data model.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which traffic on the source interface is mirrored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Direction {
    Ingress,
    Egress,
    Both,
    /// No direction configured; validated like [`Direction::Both`].
    Unspecified,
}

impl Direction {
    /// Parse a device direction keyword.
    pub fn from_keyword(keyword: &str) -> Option<Self> {
        match keyword {
            "ingress" => Some(Direction::Ingress),
            "egress" => Some(Direction::Egress),
            "both" => Some(Direction::Both),
            _ => None,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Direction::Ingress => "ingress",
            Direction::Egress => "egress",
            Direction::Both => "both",
            Direction::Unspecified => "unspecified",
        };
        f.write_str(name)
    }
}

/// Administrative state of a mirroring session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AdminState {
    Enabled,
    Disabled,
    Unknown,
}

/// One port-mirroring session as configured on the device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MirroringSessionDef {
    pub name: String,
    pub description: Option<String>,
    pub source_interface: String,
    pub dest_interface: String,
    pub direction: Direction,
    pub admin_state: AdminState,
}

/// Octet counters of one interface at one point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CounterSample {
    pub interface: String,
    pub rx_octets: u64,
    pub tx_octets: u64,
    pub sampled_at: DateTime<Utc>,
    /// Rate the device itself printed next to the RX counter (display only).
    pub reported_rx_mbps: Option<f64>,
    /// Rate the device itself printed next to the TX counter (display only).
    pub reported_tx_mbps: Option<f64>,
}

/// Rates derived from two consecutive samples of one interface.
///
/// A direction is `None` when its counter went backwards (device reset).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateSample {
    pub interface: String,
    pub rx_bps: Option<f64>,
    pub tx_bps: Option<f64>,
    pub interval_secs: f64,
}

impl RateSample {
    pub fn rx_mbps(&self) -> Option<f64> {
        self.rx_bps.map(bps_to_mbps)
    }

    pub fn tx_mbps(&self) -> Option<f64> {
        self.tx_bps.map(bps_to_mbps)
    }
}

/// Convert bits per second to megabits per second.
pub fn bps_to_mbps(bps: f64) -> f64 {
    bps / 1_000_000.0
}

/// Outcome of validating one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum VerdictStatus {
    Match,
    Warning,
    Error,
    Unknown,
}

impl fmt::Display for VerdictStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            VerdictStatus::Match => "match",
            VerdictStatus::Warning => "warning",
            VerdictStatus::Error => "error",
            VerdictStatus::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationVerdict {
    pub session_name: String,
    pub status: VerdictStatus,
    pub expected_rate_bps: Option<f64>,
    pub actual_rate_bps: Option<f64>,
    pub delta_percent: Option<f64>,
    pub detail: String,
}

impl ValidationVerdict {
    /// A verdict that could not be computed.
    pub fn unknown(session_name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            session_name: session_name.into(),
            status: VerdictStatus::Unknown,
            expected_rate_bps: None,
            actual_rate_bps: None,
            delta_percent: None,
            detail: detail.into(),
        }
    }
}

/// Everything known about one session in a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionReport {
    pub definition: MirroringSessionDef,
    pub source_rate: Option<RateSample>,
    pub dest_rate: Option<RateSample>,
    /// Last sample of each interface, for display.
    pub source_counters: Option<CounterSample>,
    pub dest_counters: Option<CounterSample>,
    pub verdict: ValidationVerdict,
    /// Carried over from an earlier cycle that could reach the device.
    pub stale: bool,
}

/// Reachability of the device as seen by the last cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConnectionStatus {
    /// No cycle has completed yet, or the monitor is shut down.
    Disconnected,
    Connected,
    Down,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Down => "down",
        };
        f.write_str(name)
    }
}

/// One immutable, fully computed view of all sessions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub cycle: u64,
    pub hostname: Option<String>,
    pub connection_status: ConnectionStatus,
    pub last_updated: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub sessions: Vec<SessionReport>,
}

impl Snapshot {
    /// The snapshot readers see before the first cycle and after shutdown.
    pub fn empty() -> Self {
        Self {
            cycle: 0,
            hostname: None,
            connection_status: ConnectionStatus::Disconnected,
            last_updated: None,
            error: None,
            sessions: Vec::new(),
        }
    }

    /// A Down snapshot that keeps the previous reports, marked stale.
    pub fn degraded_from(
        previous: &Snapshot,
        cycle: u64,
        now: DateTime<Utc>,
        error: impl Into<String>,
    ) -> Self {
        let sessions = previous
            .sessions
            .iter()
            .cloned()
            .map(|mut report| {
                report.stale = true;
                report
            })
            .collect();
        Self {
            cycle,
            hostname: previous.hostname.clone(),
            connection_status: ConnectionStatus::Down,
            last_updated: Some(now),
            error: Some(error.into()),
            sessions,
        }
    }

    pub fn status(&self) -> StatusSummary {
        StatusSummary {
            connection_status: self.connection_status,
            last_updated: self.last_updated,
            error: self.error.clone(),
        }
    }
}

/// Lightweight connection status for polling clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSummary {
    pub connection_status: ConnectionStatus,
    pub last_updated: Option<DateTime<Utc>>,
    pub error: Option<String>,
}
