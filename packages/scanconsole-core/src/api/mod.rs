//! Remote API access.
//!
//! The console never scans or stores anything itself. Everything goes
//! through these traits so the controller and workflow can be driven by
//! the HTTP client in production and by in-memory fakes in tests.

mod client;
pub mod config;

pub use client::HttpApiClient;
pub use config::{load_console_config, ConfigSource, ConsoleConfig};

use crate::error::ApiError;
use crate::scan::{ScanTask, ScanTaskRequest, Scanner};
use crate::target::TargetValidation;
use async_trait::async_trait;

/// Scan task endpoints.
#[async_trait]
pub trait ScanApi: Send + Sync {
    /// `POST /scan-tasks`
    async fn create_scan_task(&self, request: &ScanTaskRequest) -> Result<ScanTask, ApiError>;

    /// `GET /scan-tasks/active`. `None` when nothing is pending or running.
    async fn active_scan_task(&self) -> Result<Option<ScanTask>, ApiError>;

    /// `GET /scan-tasks/{id}`
    async fn scan_task(&self, task_id: i64) -> Result<ScanTask, ApiError>;

    /// `POST /scan-tasks/{id}/cancel`. Idempotent on finished tasks.
    async fn cancel_scan_task(&self, task_id: i64) -> Result<(), ApiError>;

    /// `GET /scanners`
    async fn list_scanners(&self) -> Result<Vec<Scanner>, ApiError>;

    /// `GET /scan-tasks/{id}/results`
    async fn scan_results(&self, task_id: i64) -> Result<serde_json::Value, ApiError>;

    /// `GET /scan-tasks/{id}/download`
    async fn download_results(&self, task_id: i64) -> Result<Vec<u8>, ApiError>;

    /// `POST /network-ranges/validate`
    async fn validate_target(&self, target: &str) -> Result<TargetValidation, ApiError>;
}

/// Kinds of inventory record that support bulk deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Device,
    Asset,
    AssetGroup,
}

impl EntityKind {
    pub fn path_segment(&self) -> &'static str {
        match self {
            EntityKind::Device => "devices",
            EntityKind::Asset => "assets",
            EntityKind::AssetGroup => "asset-groups",
        }
    }

    pub fn noun(&self, count: usize) -> &'static str {
        match (self, count) {
            (EntityKind::Device, 1) => "device",
            (EntityKind::Device, _) => "devices",
            (EntityKind::Asset, 1) => "asset",
            (EntityKind::Asset, _) => "assets",
            (EntityKind::AssetGroup, 1) => "asset group",
            (EntityKind::AssetGroup, _) => "asset groups",
        }
    }
}

/// Per-item inventory operations used by bulk actions.
#[async_trait]
pub trait InventoryApi: Send + Sync {
    /// `DELETE /{devices|assets|asset-groups}/{id}`
    async fn delete_entity(&self, kind: EntityKind, id: i64) -> Result<(), ApiError>;

    /// `POST /devices/{id}/convert`: promote a discovered device to a managed asset.
    async fn convert_device(&self, device_id: i64) -> Result<(), ApiError>;
}
