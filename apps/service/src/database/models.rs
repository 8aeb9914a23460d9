use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use uuid::Uuid;

use crate::monitoring::types::{CheckMethod, HealthState};

/// What a map node represents. Boxes are drawing annotations and are never
/// probed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Host,
    Box,
}

impl DeviceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DeviceKind::Host => "host",
            DeviceKind::Box => "box",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "box" => DeviceKind::Box,
            _ => DeviceKind::Host,
        }
    }
}

/// Device model - a monitored network endpoint on a map.
///
/// The engine consumes devices read-only per cycle; only the observed
/// fields (`current_status`, `last_seen`, `last_latency_ms`, `last_ttl`)
/// are written back, and always for a single device at a time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub id: Option<i64>,
    pub uuid: Uuid,
    pub map_id: i64,
    pub name: String,
    pub kind: DeviceKind,
    /// Hostname or IP. Absent for annotation-only nodes; such devices
    /// always classify as unknown.
    pub address: Option<String>,
    /// Service port; when set the device is checked with a TCP connect
    /// instead of ICMP.
    pub port: Option<u16>,
    pub enabled: bool,
    /// 0 means no automatic scheduling, probe only on demand.
    pub probe_interval_seconds: u64,
    pub warning_latency_ms: Option<f64>,
    pub critical_latency_ms: Option<f64>,
    pub warning_loss_pct: Option<f64>,
    pub critical_loss_pct: Option<f64>,
    pub notifications_enabled: bool,
    pub current_status: HealthState,
    pub last_seen: Option<SystemTime>,
    pub last_latency_ms: Option<f64>,
    pub last_ttl: Option<u32>,
    pub created_at: SystemTime,
    pub updated_at: SystemTime,
}

impl Device {
    /// Create a new device with monitoring disabled until configured.
    pub fn new(name: String, map_id: i64) -> Self {
        let now = SystemTime::now();
        Self {
            id: None,
            uuid: Uuid::new_v4(),
            map_id,
            name,
            kind: DeviceKind::Host,
            address: None,
            port: None,
            enabled: true,
            probe_interval_seconds: 0,
            warning_latency_ms: None,
            critical_latency_ms: None,
            warning_loss_pct: None,
            critical_loss_pct: None,
            notifications_enabled: false,
            current_status: HealthState::Unknown,
            last_seen: None,
            last_latency_ms: None,
            last_ttl: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Check method is derived, not stored: a configured port means TCP.
    pub fn check_method(&self) -> CheckMethod {
        match self.port {
            Some(port) => CheckMethod::TcpPort(port),
            None => CheckMethod::Icmp,
        }
    }

    /// Eligible for probing at all: enabled, addressable, not a box.
    pub fn is_probeable(&self) -> bool {
        self.enabled && self.address.is_some() && self.kind == DeviceKind::Host
    }
}

/// Convert SystemTime to a unix-seconds column value
pub fn to_unix_seconds(time: SystemTime) -> i64 {
    time.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs() as i64
}

/// Convert a unix-seconds column value back to SystemTime
pub fn from_unix_seconds(timestamp: i64) -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(timestamp.max(0) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_method_follows_port() {
        let mut device = Device::new("db-server".to_string(), 1);
        assert_eq!(device.check_method(), CheckMethod::Icmp);
        device.port = Some(5432);
        assert_eq!(device.check_method(), CheckMethod::TcpPort(5432));
    }

    #[test]
    fn probeable_requires_address_and_host_kind() {
        let mut device = Device::new("note".to_string(), 1);
        assert!(!device.is_probeable());
        device.address = Some("10.0.0.1".to_string());
        assert!(device.is_probeable());
        device.kind = DeviceKind::Box;
        assert!(!device.is_probeable());
        device.kind = DeviceKind::Host;
        device.enabled = false;
        assert!(!device.is_probeable());
    }

    #[test]
    fn unix_seconds_roundtrip() {
        let now = SystemTime::now();
        let roundtripped = from_unix_seconds(to_unix_seconds(now));
        let drift = now.duration_since(roundtripped).unwrap();
        assert!(drift < Duration::from_secs(1));
    }
}
