//! Scan target parsing and validation.
//!
//! A target is one of:
//! - `auto`: let the scanner pick its local network
//! - a CIDR block: `192.168.1.0/24`
//! - an address range: `10.0.0.1-10.0.0.50` or the short form `10.0.0.1-50`
//! - a single IPv4 address

pub mod resolver;
pub mod validator;

pub use resolver::{resolve_scanner, ScannerResolution};
pub use validator::{TargetValidator, ValidationOutcome};

use ipnetwork::Ipv4Network;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;

/// Sentinel target meaning "scan whatever network the scanner sits on".
pub const AUTO_TARGET: &str = "auto";

/// A parsed scan target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetSpec {
    Auto,
    Network(Ipv4Network),
    Range { start: Ipv4Addr, end: Ipv4Addr },
    Single(Ipv4Addr),
}

impl TargetSpec {
    pub fn parse(target: &str) -> Result<Self, String> {
        let target = target.trim();
        if target.is_empty() {
            return Err("Target is required".to_string());
        }
        if target.eq_ignore_ascii_case(AUTO_TARGET) {
            return Ok(TargetSpec::Auto);
        }
        if let Some((addr, prefix)) = target.split_once('/') {
            return parse_cidr(addr, prefix);
        }
        if let Some((start, end)) = target.split_once('-') {
            return parse_range(start, end);
        }
        parse_ipv4(target)
            .map(TargetSpec::Single)
            .map_err(|_| {
                format!(
                    "'{}' is not a valid target. Use a CIDR block (192.168.1.0/24), \
                     a range (192.168.1.10-192.168.1.50) or 'auto'",
                    target
                )
            })
    }

    /// Inclusive address bounds as integers. `None` for `auto`.
    pub fn bounds(&self) -> Option<(u32, u32)> {
        match self {
            TargetSpec::Auto => None,
            TargetSpec::Network(net) => {
                Some((u32::from(net.network()), u32::from(net.broadcast())))
            }
            TargetSpec::Range { start, end } => Some((u32::from(*start), u32::from(*end))),
            TargetSpec::Single(ip) => Some((u32::from(*ip), u32::from(*ip))),
        }
    }

    /// Number of addresses covered. `None` for `auto`.
    pub fn ip_count(&self) -> Option<u64> {
        self.bounds()
            .map(|(lo, hi)| u64::from(hi) - u64::from(lo) + 1)
    }

    pub fn describe(&self) -> String {
        match self {
            TargetSpec::Auto => "Automatic: the scanner's local network".to_string(),
            TargetSpec::Network(net) => format!(
                "Network {}/{} ({} addresses)",
                net.network(),
                net.prefix(),
                self.ip_count().unwrap_or(0)
            ),
            TargetSpec::Range { start, end } => format!(
                "Range {} to {} ({} addresses)",
                start,
                end,
                self.ip_count().unwrap_or(0)
            ),
            TargetSpec::Single(ip) => format!("Single host {}", ip),
        }
    }
}

impl fmt::Display for TargetSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetSpec::Auto => f.write_str(AUTO_TARGET),
            TargetSpec::Network(net) => write!(f, "{}/{}", net.network(), net.prefix()),
            TargetSpec::Range { start, end } => write!(f, "{}-{}", start, end),
            TargetSpec::Single(ip) => write!(f, "{}", ip),
        }
    }
}

/// Result of checking a target, locally or through the API.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TargetValidation {
    pub valid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TargetValidation {
    pub fn invalid(error: impl Into<String>) -> Self {
        Self {
            valid: false,
            description: None,
            ip_count: None,
            error: Some(error.into()),
        }
    }
}

/// Local syntactic check. Runs before any remote validation.
pub fn validate(target: &str) -> TargetValidation {
    match TargetSpec::parse(target) {
        Ok(spec) => TargetValidation {
            valid: true,
            description: Some(spec.describe()),
            ip_count: spec.ip_count(),
            error: None,
        },
        Err(error) => TargetValidation::invalid(error),
    }
}

/// `Ipv4Addr`'s parser is strict, unlike `Ipv4Network`'s which accepts
/// truncated addresses such as `10.0.0`.
fn parse_ipv4(s: &str) -> Result<Ipv4Addr, String> {
    s.trim()
        .parse::<Ipv4Addr>()
        .map_err(|_| format!("'{}' is not a valid IPv4 address", s.trim()))
}

fn parse_cidr(addr: &str, prefix: &str) -> Result<TargetSpec, String> {
    let ip = parse_ipv4(addr)?;
    let prefix: u8 = prefix
        .trim()
        .parse()
        .map_err(|_| format!("'{}' is not a valid prefix length", prefix.trim()))?;
    if prefix > 32 {
        return Err(format!("Prefix length /{} is out of range (0-32)", prefix));
    }
    let net = Ipv4Network::new(ip, prefix).map_err(|e| e.to_string())?;
    // Normalise host bits away: 192.168.1.7/24 -> 192.168.1.0/24
    let net = Ipv4Network::new(net.network(), prefix).map_err(|e| e.to_string())?;
    Ok(TargetSpec::Network(net))
}

fn parse_range(start: &str, end: &str) -> Result<TargetSpec, String> {
    let start = parse_ipv4(start)?;
    let end_str = end.trim();
    let end = if end_str.contains('.') {
        parse_ipv4(end_str)?
    } else {
        let last: u8 = end_str
            .parse()
            .map_err(|_| format!("'{}' is not a valid range end", end_str))?;
        let o = start.octets();
        Ipv4Addr::new(o[0], o[1], o[2], last)
    };
    if u32::from(start) > u32::from(end) {
        return Err(format!(
            "Range start {} is after range end {}",
            start, end
        ));
    }
    Ok(TargetSpec::Range { start, end })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auto_is_always_valid() {
        assert!(validate("auto").valid);
        assert!(validate(" AUTO ").valid);
        assert_eq!(validate("auto").ip_count, None);
    }

    #[test]
    fn test_valid_cidr_targets() {
        for target in ["192.168.1.0/24", "10.0.0.0/8", "172.16.5.4/32", "0.0.0.0/0"] {
            let result = validate(target);
            assert!(result.valid, "{} should be valid", target);
            assert!(result.error.is_none());
        }
        assert_eq!(validate("192.168.1.0/24").ip_count, Some(256));
        assert_eq!(validate("0.0.0.0/0").ip_count, Some(1 << 32));
    }

    #[test]
    fn test_malformed_targets() {
        for target in [
            "not-an-ip",
            "10.0.0/24",
            "10.0.0.0/33",
            "256.1.1.1",
            "10.0.0.1-",
            "10.0.0.9-10.0.0.1",
            "10.0.0.1-300",
            "",
            "   ",
            "10.0.0.0/abc",
        ] {
            let result = validate(target);
            assert!(!result.valid, "{:?} should be invalid", target);
            assert!(result.error.as_deref().is_some_and(|e| !e.is_empty()));
        }
    }

    #[test]
    fn test_ranges() {
        let short = TargetSpec::parse("10.1.2.10-20").unwrap();
        assert_eq!(
            short,
            TargetSpec::Range {
                start: Ipv4Addr::new(10, 1, 2, 10),
                end: Ipv4Addr::new(10, 1, 2, 20),
            }
        );
        assert_eq!(short.ip_count(), Some(11));

        let long = TargetSpec::parse("10.1.2.250-10.1.3.5").unwrap();
        assert_eq!(long.ip_count(), Some(12));
    }

    #[test]
    fn test_host_bits_are_normalised() {
        let spec = TargetSpec::parse("192.168.1.77/24").unwrap();
        assert_eq!(spec.to_string(), "192.168.1.0/24");
    }

    #[test]
    fn test_single_ip() {
        let spec = TargetSpec::parse("192.168.1.1").unwrap();
        assert_eq!(spec.ip_count(), Some(1));
        assert!(validate("192.168.1.1").valid);
    }
}
