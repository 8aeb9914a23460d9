//! Threshold-based status classification.
//!
//! Evaluation order is the business rule and is fixed: probe failure, then
//! critical latency, critical loss, warning latency, warning loss, online.
//! Thresholds are compared only when configured; critical always wins over
//! warning.

use crate::database::models::Device;

use super::types::{HealthState, PingMetrics};

pub const OFFLINE_DETAIL: &str = "Device offline or unreachable.";
pub const NO_ADDRESS_DETAIL: &str = "Device has no address to probe.";
pub const INVALID_ADDRESS_DETAIL: &str = "Address failed safety validation.";

/// Map a probe outcome and its metrics to a health state plus a
/// human-readable detail line for the transition log and notification body.
pub fn classify(device: &Device, success: bool, metrics: &PingMetrics) -> (HealthState, String) {
    if !success {
        return (HealthState::Offline, OFFLINE_DETAIL.to_string());
    }

    if let Some(limit) = device.critical_latency_ms {
        if metrics.avg_ms > limit {
            return (
                HealthState::Critical,
                format!(
                    "Average latency {:.1} ms exceeds critical threshold {:.0} ms.",
                    metrics.avg_ms, limit
                ),
            );
        }
    }

    if let Some(limit) = device.critical_loss_pct {
        if metrics.packet_loss_pct > limit {
            return (
                HealthState::Critical,
                format!(
                    "Packet loss {:.0}% exceeds critical threshold {:.0}%.",
                    metrics.packet_loss_pct, limit
                ),
            );
        }
    }

    if let Some(limit) = device.warning_latency_ms {
        if metrics.avg_ms > limit {
            return (
                HealthState::Warning,
                format!(
                    "Average latency {:.1} ms exceeds warning threshold {:.0} ms.",
                    metrics.avg_ms, limit
                ),
            );
        }
    }

    if let Some(limit) = device.warning_loss_pct {
        if metrics.packet_loss_pct > limit {
            return (
                HealthState::Warning,
                format!(
                    "Packet loss {:.0}% exceeds warning threshold {:.0}%.",
                    metrics.packet_loss_pct, limit
                ),
            );
        }
    }

    (HealthState::Online, format!("Device is online ({:.1} ms avg).", metrics.avg_ms))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics(avg_ms: f64, loss_pct: f64) -> PingMetrics {
        PingMetrics { packet_loss_pct: loss_pct, avg_ms, min_ms: avg_ms, max_ms: avg_ms, ttl: Some(64) }
    }

    fn device() -> Device {
        Device::new("edge-router".to_string(), 1)
    }

    #[test]
    fn failed_probe_is_offline_regardless_of_thresholds() {
        let mut dev = device();
        dev.critical_latency_ms = Some(100.0);
        let (state, detail) = classify(&dev, false, &PingMetrics::unreachable());
        assert_eq!(state, HealthState::Offline);
        assert_eq!(detail, OFFLINE_DETAIL);
    }

    #[test]
    fn critical_wins_when_warning_also_fires() {
        let mut dev = device();
        dev.critical_latency_ms = Some(100.0);
        dev.warning_loss_pct = Some(1.0);
        // Both critical latency and warning loss exceeded: critical wins.
        let (state, _) = classify(&dev, true, &metrics(150.0, 50.0));
        assert_eq!(state, HealthState::Critical);
    }

    #[test]
    fn warning_latency_detail_embeds_metric_and_threshold() {
        let mut dev = device();
        dev.warning_latency_ms = Some(50.0);
        dev.critical_latency_ms = Some(100.0);
        let (state, detail) = classify(&dev, true, &metrics(75.0, 0.0));
        assert_eq!(state, HealthState::Warning);
        assert!(detail.contains("75"), "detail was: {detail}");
        assert!(detail.contains("50"), "detail was: {detail}");
    }

    #[test]
    fn loss_thresholds_apply_independently_of_latency() {
        let mut dev = device();
        dev.critical_loss_pct = Some(40.0);
        dev.warning_loss_pct = Some(10.0);

        let (state, _) = classify(&dev, true, &metrics(5.0, 50.0));
        assert_eq!(state, HealthState::Critical);

        let (state, detail) = classify(&dev, true, &metrics(5.0, 25.0));
        assert_eq!(state, HealthState::Warning);
        assert!(detail.contains("25"));
    }

    #[test]
    fn unset_thresholds_are_never_compared() {
        let dev = device();
        let (state, _) = classify(&dev, true, &metrics(5000.0, 99.0));
        assert_eq!(state, HealthState::Online);
    }

    #[test]
    fn threshold_is_exclusive() {
        let mut dev = device();
        dev.warning_latency_ms = Some(50.0);
        let (state, _) = classify(&dev, true, &metrics(50.0, 0.0));
        assert_eq!(state, HealthState::Online);
    }
}
