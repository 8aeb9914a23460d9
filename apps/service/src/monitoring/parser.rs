//! Ping-output parsing.
//!
//! Pure functions over the captured process output. Two dialects are
//! supported: the Unix `rtt min/avg/max/mdev` shape and the Windows
//! `Minimum/Maximum/Average` shape. Fields that do not match default to
//! zero (packet loss defaults to 100) so classification always proceeds.

use super::types::{PingMetrics, ProbeOutcome};

/// Which ping output dialect to parse. Fixed per platform at startup,
/// never sniffed from the output itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PingDialect {
    Unix,
    Windows,
}

impl PingDialect {
    pub fn native() -> Self {
        if cfg!(windows) { PingDialect::Windows } else { PingDialect::Unix }
    }
}

/// Extract metrics from raw ping output. Never fails: anomalous output
/// yields default metrics (0 latency, 100% loss).
pub fn parse_ping(raw: &str, dialect: PingDialect) -> PingMetrics {
    match dialect {
        PingDialect::Unix => parse_unix(raw),
        PingDialect::Windows => parse_windows(raw),
    }
}

/// Metrics for a TCP port probe, derived directly from the connect latency.
/// Packet loss is binary: the connection either happened or it did not.
pub fn tcp_metrics(outcome: &ProbeOutcome) -> PingMetrics {
    let elapsed = outcome.elapsed_ms as f64;
    if outcome.success {
        PingMetrics {
            packet_loss_pct: 0.0,
            avg_ms: elapsed,
            min_ms: elapsed,
            max_ms: elapsed,
            ttl: None,
        }
    } else {
        PingMetrics::unreachable()
    }
}

fn parse_unix(raw: &str) -> PingMetrics {
    let packet_loss_pct = number_before(raw, "% packet loss").unwrap_or(100.0);

    let mut min_ms = 0.0;
    let mut avg_ms = 0.0;
    let mut max_ms = 0.0;
    // "rtt min/avg/max/mdev = 1.0/2.0/3.0/0.1 ms" (BSD says "round-trip")
    if let Some(stats) = raw.lines().find(|line| line.contains("min/avg/max")) {
        if let Some((_, values)) = stats.split_once('=') {
            let values = values.trim().trim_end_matches("ms").trim();
            let mut parts = values.split('/');
            min_ms = next_f64(&mut parts);
            avg_ms = next_f64(&mut parts);
            max_ms = next_f64(&mut parts);
        }
    }

    PingMetrics { packet_loss_pct, avg_ms, min_ms, max_ms, ttl: ttl_field(raw) }
}

fn parse_windows(raw: &str) -> PingMetrics {
    // "Lost = 4 (100% loss)"
    let packet_loss_pct = number_before(raw, "% loss").unwrap_or(100.0);

    // "Minimum = 1ms, Maximum = 3ms, Average = 2ms"
    let min_ms = number_after(raw, "Minimum = ").unwrap_or(0.0);
    let max_ms = number_after(raw, "Maximum = ").unwrap_or(0.0);
    let avg_ms = number_after(raw, "Average = ").unwrap_or(0.0);

    PingMetrics { packet_loss_pct, avg_ms, min_ms, max_ms, ttl: ttl_field(raw) }
}

/// TTL from a reply line, either `ttl=64` or `TTL=128`. Absence is not an
/// error: some targets and some utilities simply do not report it.
fn ttl_field(raw: &str) -> Option<u32> {
    for marker in ["ttl=", "TTL="] {
        if let Some(value) = number_after(raw, marker) {
            return Some(value as u32);
        }
    }
    None
}

fn next_f64<'a>(parts: &mut impl Iterator<Item = &'a str>) -> f64 {
    parts.next().and_then(|v| v.trim().parse().ok()).unwrap_or(0.0)
}

/// Parse the number immediately preceding `marker`, e.g. the `0` of
/// "0% packet loss".
fn number_before(raw: &str, marker: &str) -> Option<f64> {
    let index = raw.find(marker)?;
    let digits: String = raw[..index]
        .chars()
        .rev()
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    let number: String = digits.chars().rev().collect();
    number.parse().ok()
}

/// Parse the number immediately following `marker`.
fn number_after(raw: &str, marker: &str) -> Option<f64> {
    let start = raw.find(marker)? + marker.len();
    let number: String =
        raw[start..].chars().take_while(|c| c.is_ascii_digit() || *c == '.').collect();
    number.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const LINUX_OUTPUT: &str = "\
PING example.com (93.184.216.34) 56(84) bytes of data.
64 bytes from 93.184.216.34: icmp_seq=1 ttl=56 time=2.0 ms

--- example.com ping statistics ---
1 packets transmitted, 1 received, 0% packet loss, time 0ms
rtt min/avg/max/mdev = 1.0/2.0/3.0/0.1 ms
";

    const WINDOWS_OUTPUT: &str = "\
Pinging example.com [93.184.216.34] with 32 bytes of data:
Reply from 93.184.216.34: bytes=32 time=2ms TTL=56

Ping statistics for 93.184.216.34:
    Packets: Sent = 4, Received = 4, Lost = 0 (0% loss),
Approximate round trip times in milli-seconds:
    Minimum = 1ms, Maximum = 3ms, Average = 2ms
";

    const WINDOWS_ALL_LOST: &str = "\
Pinging 10.1.2.3 with 32 bytes of data:
Request timed out.
Request timed out.
Request timed out.
Request timed out.

Ping statistics for 10.1.2.3:
    Packets: Sent = 4, Received = 0, Lost = 4 (100% loss),
";

    #[test]
    fn linux_output_parses_rtt_and_loss() {
        let metrics = parse_ping(LINUX_OUTPUT, PingDialect::Unix);
        assert_eq!(metrics.min_ms, 1.0);
        assert_eq!(metrics.avg_ms, 2.0);
        assert_eq!(metrics.max_ms, 3.0);
        assert_eq!(metrics.packet_loss_pct, 0.0);
        assert_eq!(metrics.ttl, Some(56));
    }

    #[test]
    fn windows_output_parses_min_max_avg_and_loss() {
        let metrics = parse_ping(WINDOWS_OUTPUT, PingDialect::Windows);
        assert_eq!(metrics.min_ms, 1.0);
        assert_eq!(metrics.avg_ms, 2.0);
        assert_eq!(metrics.max_ms, 3.0);
        assert_eq!(metrics.packet_loss_pct, 0.0);
        assert_eq!(metrics.ttl, Some(56));
    }

    #[test]
    fn windows_total_loss() {
        let metrics = parse_ping(WINDOWS_ALL_LOST, PingDialect::Windows);
        assert_eq!(metrics.packet_loss_pct, 100.0);
        assert_eq!(metrics.avg_ms, 0.0);
        assert_eq!(metrics.ttl, None);
    }

    #[test]
    fn anomalous_output_defaults_to_total_loss() {
        let metrics = parse_ping("connect: Network is unreachable", PingDialect::Unix);
        assert_eq!(metrics.packet_loss_pct, 100.0);
        assert_eq!(metrics.avg_ms, 0.0);
        assert_eq!(metrics.min_ms, 0.0);
        assert_eq!(metrics.max_ms, 0.0);
        assert_eq!(metrics.ttl, None);

        let metrics = parse_ping("", PingDialect::Windows);
        assert_eq!(metrics.packet_loss_pct, 100.0);
    }

    #[test]
    fn missing_ttl_is_none_not_an_error() {
        let raw = "1 packets transmitted, 1 received, 0% packet loss\n\
                   rtt min/avg/max/mdev = 4.0/4.0/4.0/0.0 ms";
        let metrics = parse_ping(raw, PingDialect::Unix);
        assert_eq!(metrics.ttl, None);
        assert_eq!(metrics.avg_ms, 4.0);
    }

    #[test]
    fn fractional_packet_loss_parses() {
        let raw = "100 packets transmitted, 99 received, 1.5% packet loss";
        let metrics = parse_ping(raw, PingDialect::Unix);
        assert_eq!(metrics.packet_loss_pct, 1.5);
    }

    #[test]
    fn tcp_metrics_are_binary() {
        let ok = ProbeOutcome { success: true, raw_output: String::new(), elapsed_ms: 12 };
        let metrics = tcp_metrics(&ok);
        assert_eq!(metrics.avg_ms, 12.0);
        assert_eq!(metrics.packet_loss_pct, 0.0);

        let failed = ProbeOutcome {
            success: false,
            raw_output: "connection refused".to_string(),
            elapsed_ms: 3,
        };
        let metrics = tcp_metrics(&failed);
        assert_eq!(metrics.packet_loss_pct, 100.0);
        assert_eq!(metrics.avg_ms, 0.0);
    }
}
