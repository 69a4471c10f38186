//! Coalescing remote target validation.
//!
//! Operators type targets character by character. Each call first runs
//! the local syntax check; only syntactically valid targets go to the
//! API, and only after a short quiet window. A newer call supersedes any
//! older one still waiting or in flight.

use super::{validate, TargetSpec, TargetValidation};
use crate::api::ScanApi;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_COALESCE_WINDOW: Duration = Duration::from_millis(400);

#[derive(Debug, Clone, PartialEq)]
pub enum ValidationOutcome {
    Checked(TargetValidation),
    /// A newer validation request replaced this one.
    Superseded,
}

pub struct TargetValidator {
    api: Arc<dyn ScanApi>,
    window: Duration,
    generation: AtomicU64,
    in_flight: Mutex<Option<CancellationToken>>,
}

impl std::fmt::Debug for TargetValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TargetValidator")
            .field("window", &self.window)
            .finish_non_exhaustive()
    }
}

impl TargetValidator {
    pub fn new(api: Arc<dyn ScanApi>, window: Duration) -> Self {
        Self {
            api,
            window,
            generation: AtomicU64::new(0),
            in_flight: Mutex::new(None),
        }
    }

    pub async fn validate(&self, target: &str) -> ValidationOutcome {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let token = CancellationToken::new();
        if let Some(previous) = self.slot().replace(token.clone()) {
            previous.cancel();
        }

        let local = validate(target);
        if !local.valid || matches!(TargetSpec::parse(target), Ok(TargetSpec::Auto)) {
            return ValidationOutcome::Checked(local);
        }

        tokio::select! {
            _ = token.cancelled() => return ValidationOutcome::Superseded,
            _ = tokio::time::sleep(self.window) => {}
        }

        let remote = tokio::select! {
            _ = token.cancelled() => return ValidationOutcome::Superseded,
            result = self.api.validate_target(target.trim()) => result,
        };

        if self.generation.load(Ordering::SeqCst) != generation {
            return ValidationOutcome::Superseded;
        }
        self.slot().take();

        match remote {
            Ok(validation) => ValidationOutcome::Checked(validation),
            Err(e) => {
                tracing::debug!("Remote target validation unavailable ({}), using local check", e);
                ValidationOutcome::Checked(local)
            }
        }
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, Option<CancellationToken>> {
        self.in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
