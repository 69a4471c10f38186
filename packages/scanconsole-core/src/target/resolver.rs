//! Scanner selection for a scan target.

use super::TargetSpec;
use crate::scan::Scanner;
use ipnetwork::Ipv4Network;
use serde::Serialize;
use std::net::Ipv4Addr;

/// Which scanner should run a scan, plus optional operator advice.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScannerResolution {
    pub scanner: Option<Scanner>,
    pub suggestion: Option<String>,
}

/// Pick the scanner for `target`.
///
/// A dedicated (non-default, active) scanner whose subnets cover the
/// whole target wins. Otherwise the default scanner is used, or the
/// first active one when no default is configured, and a suggestion is
/// attached. An empty registry resolves to nothing; the caller reports
/// that at submission time.
pub fn resolve_scanner(target: &str, scanners: &[Scanner]) -> ScannerResolution {
    if scanners.is_empty() {
        tracing::debug!("Scanner registry is empty, nothing to resolve");
        return ScannerResolution {
            scanner: None,
            suggestion: None,
        };
    }

    let spec = TargetSpec::parse(target).ok();

    if let Some((lo, hi)) = spec.and_then(|s| s.bounds()) {
        let dedicated = scanners
            .iter()
            .filter(|s| s.is_active && !s.is_default)
            .find(|s| scanner_covers(s, lo, hi));

        if let Some(scanner) = dedicated {
            tracing::info!(
                "Target {} is covered by dedicated scanner '{}' (id {})",
                target,
                scanner.name,
                scanner.id
            );
            return ScannerResolution {
                scanner: Some(scanner.clone()),
                suggestion: None,
            };
        }
    }

    let Some(fallback) = fallback_scanner(scanners) else {
        tracing::warn!("No default or active scanner in registry");
        return ScannerResolution {
            scanner: None,
            suggestion: None,
        };
    };

    let suggestion = match spec {
        Some(TargetSpec::Auto) => None,
        _ => Some(format!(
            "No dedicated scanner covers {}; the scan will run from '{}'. \
             Deploying a scanner inside this network would improve results \
             (MAC addresses and vendor data are only visible on the local segment).",
            target.trim(),
            fallback.name
        )),
    };

    tracing::info!(
        "Using fallback scanner '{}' (id {}) for target {}",
        fallback.name,
        fallback.id,
        target
    );

    ScannerResolution {
        scanner: Some(fallback.clone()),
        suggestion,
    }
}

/// Default scanner (active ones preferred), else the first active scanner.
fn fallback_scanner(scanners: &[Scanner]) -> Option<&Scanner> {
    scanners
        .iter()
        .find(|s| s.is_default && s.is_active)
        .or_else(|| scanners.iter().find(|s| s.is_default))
        .or_else(|| scanners.iter().find(|s| s.is_active))
}

fn scanner_covers(scanner: &Scanner, lo: u32, hi: u32) -> bool {
    scanner.subnets.iter().any(|subnet| match parse_subnet(subnet) {
        Some(net) => network_covers(net, lo, hi),
        None => {
            tracing::debug!(
                "Ignoring unparseable subnet '{}' on scanner '{}'",
                subnet,
                scanner.name
            );
            false
        }
    })
}

fn parse_subnet(subnet: &str) -> Option<Ipv4Network> {
    let (addr, prefix) = subnet.trim().split_once('/')?;
    let addr: Ipv4Addr = addr.parse().ok()?;
    let prefix: u8 = prefix.parse().ok()?;
    Ipv4Network::new(addr, prefix).ok()
}

/// True if every address in `lo..=hi` lies inside `net`.
pub(crate) fn network_covers(net: Ipv4Network, lo: u32, hi: u32) -> bool {
    let mask = u32::from(net.mask());
    let base = u32::from(net.ip()) & mask;
    lo & mask == base && hi & mask == base
}
