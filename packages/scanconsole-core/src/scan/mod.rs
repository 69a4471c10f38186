//! Scan task model and lifecycle tracking.
//!
//! - [`ScanTask`] is the backend's view of a scan job
//! - [`progress`] turns raw progress numbers into display values
//! - [`controller`] owns the single active task and keeps it in sync

pub mod controller;
pub mod progress;

pub use controller::{CancelOutcome, ControllerPhase, ScanController, ScanEvent, Subscription};
pub use progress::TaskProgressView;

use crate::error::ConsoleError;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

/// Backend scan type.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ScanType {
    Quick,
    Comprehensive,
    Arp,
    Snmp,
}

impl ScanType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanType::Quick => "quick",
            ScanType::Comprehensive => "comprehensive",
            ScanType::Arp => "arp",
            ScanType::Snmp => "snmp",
        }
    }
}

impl fmt::Display for ScanType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScanType {
    type Err = ConsoleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "quick" => Ok(ScanType::Quick),
            "comprehensive" => Ok(ScanType::Comprehensive),
            "arp" => Ok(ScanType::Arp),
            "snmp" => Ok(ScanType::Snmp),
            other => Err(ConsoleError::Validation(format!(
                "Unknown scan type '{}' (expected quick, comprehensive, arp or snmp)",
                other
            ))),
        }
    }
}

/// Lifecycle status reported by the backend.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ScanTaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ScanTaskStatus {
    /// Pending or running. At most one task may be active at a time.
    pub fn is_active(&self) -> bool {
        matches!(self, ScanTaskStatus::Pending | ScanTaskStatus::Running)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ScanTaskStatus::Pending => "pending",
            ScanTaskStatus::Running => "running",
            ScanTaskStatus::Completed => "completed",
            ScanTaskStatus::Failed => "failed",
            ScanTaskStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ScanTaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A scan job as reported by the backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScanTask {
    pub id: i64,
    pub name: String,
    pub target: String,
    pub scan_type: ScanType,
    pub status: ScanTaskStatus,
    /// Raw progress. Can be out of range or missing; see [`progress::normalize`].
    #[serde(default)]
    pub progress: Option<f64>,
    /// Host currently being probed, only meaningful while running
    #[serde(default)]
    pub current_ip: Option<String>,
    #[serde(default, alias = "discovered_device_count")]
    pub discovered_devices: u64,
    #[serde(default, deserialize_with = "deserialize_timestamp")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "deserialize_timestamp")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub error_message: Option<String>,
}

impl ScanTask {
    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Authoritative failure reported by the backend, if any.
    pub fn failure(&self) -> Option<ConsoleError> {
        if self.status != ScanTaskStatus::Failed {
            return None;
        }
        let message = self
            .error_message
            .clone()
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| "the scanner reported an unspecified error".to_string());
        Some(ConsoleError::RemoteTaskFailure(message))
    }

    /// Time spent so far, or the total duration once the task has ended.
    pub fn elapsed(&self, now: DateTime<Utc>) -> Option<chrono::Duration> {
        let start = self.start_time?;
        let end = self.end_time.unwrap_or(now);
        Some((end - start).max(chrono::Duration::zero()))
    }
}

/// Body of `POST /scan-tasks`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScanTaskRequest {
    pub name: String,
    pub target: String,
    pub scan_type: ScanType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scanner_ids: Option<Vec<i64>>,
}

impl ScanTaskRequest {
    pub fn new(name: impl Into<String>, target: impl Into<String>, scan_type: ScanType) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            scan_type,
            scanner_ids: None,
        }
    }

    pub fn with_scanner(mut self, scanner_id: i64) -> Self {
        self.scanner_ids = Some(vec![scanner_id]);
        self
    }
}

/// Network probe agent registered with the backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Scanner {
    pub id: i64,
    pub name: String,
    /// CIDR blocks this scanner is authoritative for
    #[serde(default)]
    pub subnets: Vec<String>,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_true() -> bool {
    true
}

/// Accepts RFC 3339 as well as naive ISO 8601 timestamps (taken as UTC).
fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) => parse_timestamp(s)
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp '{}'", s))),
    }
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|naive| naive.and_utc())
}
