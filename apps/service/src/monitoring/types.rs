use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::SystemTime;
use uuid::Uuid;

/// Health state assigned to a device after each probe cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Unknown,
    Online,
    Warning,
    Critical,
    Offline,
}

impl HealthState {
    pub fn as_str(self) -> &'static str {
        match self {
            HealthState::Unknown => "unknown",
            HealthState::Online => "online",
            HealthState::Warning => "warning",
            HealthState::Critical => "critical",
            HealthState::Offline => "offline",
        }
    }

    /// Parse the lowercase database representation, defaulting to `Unknown`.
    pub fn parse(value: &str) -> Self {
        match value {
            "online" => HealthState::Online,
            "warning" => HealthState::Warning,
            "critical" => HealthState::Critical,
            "offline" => HealthState::Offline,
            _ => HealthState::Unknown,
        }
    }

    /// States that warrant an alert when entered.
    pub fn is_degraded(self) -> bool {
        matches!(self, HealthState::Offline | HealthState::Warning | HealthState::Critical)
    }
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How a device is probed. Derived from the device record: a configured
/// service port means TCP connect, otherwise ICMP ping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckMethod {
    Icmp,
    TcpPort(u16),
}

/// Raw outcome of a single probe before any parsing
#[derive(Debug, Clone)]
pub struct ProbeOutcome {
    pub success: bool,
    pub raw_output: String,
    pub elapsed_ms: u64,
}

/// Metrics extracted from probe output
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PingMetrics {
    pub packet_loss_pct: f64,
    pub avg_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    pub ttl: Option<u32>,
}

impl PingMetrics {
    /// Metrics for a cycle where nothing was measured.
    pub fn empty() -> Self {
        Self { packet_loss_pct: 0.0, avg_ms: 0.0, min_ms: 0.0, max_ms: 0.0, ttl: None }
    }

    /// Metrics for a probe that got no answer at all.
    pub fn unreachable() -> Self {
        Self { packet_loss_pct: 100.0, avg_ms: 0.0, min_ms: 0.0, max_ms: 0.0, ttl: None }
    }
}

/// Persisted record of one probe. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeResult {
    pub host: String,
    pub packet_loss: f64,
    pub avg_time: f64,
    pub min_time: f64,
    pub max_time: f64,
    pub ttl: Option<u32>,
    pub success: bool,
    pub raw_output: String,
    pub timestamp: SystemTime,
}

/// A state change between two consecutive probe cycles. Append-only history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusTransition {
    pub device_uuid: Uuid,
    pub previous_status: HealthState,
    pub new_status: HealthState,
    pub detail: String,
    pub timestamp: SystemTime,
}
