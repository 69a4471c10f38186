//! Progress normalization for display.
//!
//! The backend occasionally reports progress outside `[0, 100]` (device
//! counting overshoots while hosts are still being added). Progress is
//! advisory, so out-of-range values are clamped instead of rejected.

use super::{ScanTask, ScanTaskStatus};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Clamp a raw progress value into `[0, 100]`. Missing or NaN means 0.
pub fn normalize(raw: Option<f64>) -> f64 {
    match raw {
        // `<=` also catches -0.0, which would otherwise render as "-0%"
        Some(p) if p.is_nan() || p <= 0.0 => 0.0,
        Some(p) => p.min(100.0),
        None => 0.0,
    }
}

/// Render the clamped value with a trailing `%`.
pub fn format(raw: Option<f64>, decimals: usize) -> String {
    format!("{:.*}%", decimals, normalize(raw))
}

/// Display-ready snapshot of a task.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TaskProgressView {
    pub task_id: i64,
    pub name: String,
    pub target: String,
    pub status: ScanTaskStatus,
    pub percent: f64,
    pub label: String,
    pub current_ip: Option<String>,
    pub devices_found: u64,
    pub elapsed_secs: Option<i64>,
    pub error_message: Option<String>,
}

impl TaskProgressView {
    pub fn from_task(task: &ScanTask, now: DateTime<Utc>) -> Self {
        // A completed scan shows full even if the last poll lagged behind
        let raw = if task.status == ScanTaskStatus::Completed {
            Some(100.0)
        } else {
            task.progress
        };

        Self {
            task_id: task.id,
            name: task.name.clone(),
            target: task.target.clone(),
            status: task.status,
            percent: normalize(raw),
            label: format(raw, 0),
            current_ip: if task.status == ScanTaskStatus::Running {
                task.current_ip.clone()
            } else {
                None
            },
            devices_found: task.discovered_devices,
            elapsed_secs: task.elapsed(now).map(|d| d.num_seconds()),
            error_message: if task.status == ScanTaskStatus::Failed {
                task.error_message.clone()
            } else {
                None
            },
        }
    }

    /// One-line summary used by text front-ends.
    pub fn summary(&self) -> String {
        let mut line = format!("[{:>4}] {} {}", self.label, self.status, self.target);
        if let Some(ref ip) = self.current_ip {
            line.push_str(&format!(" (probing {})", ip));
        }
        line.push_str(&format!(", {} devices", self.devices_found));
        if let Some(secs) = self.elapsed_secs {
            line.push_str(&format!(", {}s", secs));
        }
        line
    }
}
