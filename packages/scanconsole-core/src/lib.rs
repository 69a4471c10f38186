//! Scan Console Core Library
//!
//! This crate provides the client-side logic for driving network discovery
//! scans on a remote discovery server:
//! - Scan task tracking (create, poll, cancel, change notifications)
//! - Target parsing, validation and scanner selection
//! - The guided scan workflow used by the console
//! - Multi-select bulk actions on inventory records
//!
//! # Example
//!
//! ```no_run
//! use scanconsole_core::{api, ScanController, ScanTaskRequest, ScanType};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = api::load_console_config();
//!     let client = Arc::new(api::HttpApiClient::new(&config)?);
//!     let controller = ScanController::new(client, config.poll_interval);
//!
//!     let mut updates = controller.subscribe();
//!     let request = ScanTaskRequest::new("Office LAN", "192.168.1.0/24", ScanType::Quick);
//!     controller.create(request).await?;
//!
//!     while let Some(event) = updates.recv().await {
//!         println!("{:?}", event);
//!         if controller.phase().is_terminal() {
//!             break;
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod error;
pub mod scan;
pub mod selection;
pub mod target;
pub mod workflow;

// Re-export commonly used types
pub use api::{ConfigSource, ConsoleConfig, EntityKind, HttpApiClient, InventoryApi, ScanApi};
pub use error::{ApiError, ConsoleError};
pub use scan::{
    CancelOutcome, ControllerPhase, ScanController, ScanEvent, ScanTask, ScanTaskRequest,
    ScanTaskStatus, ScanType, Scanner, Subscription, TaskProgressView,
};
pub use selection::{bulk_convert, bulk_delete, BulkAction, BulkReport, SelectionSet};
pub use target::{
    resolve_scanner, ScannerResolution, TargetSpec, TargetValidation, TargetValidator,
    ValidationOutcome,
};
pub use workflow::{Intensity, ScanWorkflow, StepStatus, WorkflowStep};
