//! Probe-target validation.
//!
//! The address ends up as an argument to the system ping utility, so it is
//! validated against a strict host-token pattern before any process is
//! spawned. This is the sole injection defense on that path.

use super::prober::ProbeError;

/// Longest name the DNS will resolve anyway
const MAX_ADDRESS_LEN: usize = 253;

/// Validate an address before it is handed to an external process.
///
/// Accepts hostnames, IPv4 and IPv6 literals. Rejects anything containing
/// shell metacharacters, whitespace, or a leading dash that could be taken
/// for an option flag.
pub fn validate_probe_address(address: &str) -> Result<(), ProbeError> {
    if address.is_empty() || address.len() > MAX_ADDRESS_LEN {
        return Err(ProbeError::InvalidAddress(address.to_string()));
    }

    if address.starts_with('-') {
        return Err(ProbeError::InvalidAddress(address.to_string()));
    }

    let safe = address
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | ':'));

    if safe { Ok(()) } else { Err(ProbeError::InvalidAddress(address.to_string())) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_hostnames_and_ip_literals() {
        assert!(validate_probe_address("example.com").is_ok());
        assert!(validate_probe_address("core-switch-01.internal_lan").is_ok());
        assert!(validate_probe_address("10.0.0.1").is_ok());
        assert!(validate_probe_address("fe80::1").is_ok());
    }

    #[test]
    fn rejects_shell_metacharacters() {
        assert!(validate_probe_address("bad;rm -rf").is_err());
        assert!(validate_probe_address("host name").is_err());
        assert!(validate_probe_address("$(reboot)").is_err());
        assert!(validate_probe_address("a|b").is_err());
        assert!(validate_probe_address("host`id`").is_err());
    }

    #[test]
    fn rejects_empty_oversized_and_flag_like() {
        assert!(validate_probe_address("").is_err());
        assert!(validate_probe_address(&"a".repeat(300)).is_err());
        assert!(validate_probe_address("-c100000").is_err());
    }
}
