//! Multi-select state and bulk actions built on it.
//!
//! Used for devices, assets and asset groups alike. Bulk actions run the
//! per-item API call for every selected id; there is no rollback, and
//! only ids whose call succeeded leave the selection so failures can be
//! retried.

use crate::api::{EntityKind, InventoryApi};
use crate::error::ApiError;
use futures::future::join_all;
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::hash::Hash;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionSet<T: Eq + Hash> {
    selected: HashSet<T>,
}

impl<T: Eq + Hash> Default for SelectionSet<T> {
    fn default() -> Self {
        Self {
            selected: HashSet::new(),
        }
    }
}

impl<T: Eq + Hash + Clone> SelectionSet<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flip one id. Returns whether it is selected afterwards.
    pub fn toggle(&mut self, id: T) -> bool {
        if self.selected.remove(&id) {
            false
        } else {
            self.selected.insert(id);
            true
        }
    }

    /// Replace the selection with exactly `visible`.
    ///
    /// Callers pass the ids currently shown under the active filter and
    /// page; hidden rows must never be selected implicitly.
    pub fn select_all<I: IntoIterator<Item = T>>(&mut self, visible: I) {
        self.selected = visible.into_iter().collect();
    }

    pub fn clear(&mut self) {
        self.selected.clear();
    }

    pub fn is_selected(&self, id: &T) -> bool {
        self.selected.contains(id)
    }

    /// True when every visible id is selected (header checkbox state).
    pub fn covers_all(&self, visible: &[T]) -> bool {
        !visible.is_empty() && visible.iter().all(|id| self.selected.contains(id))
    }

    pub fn len(&self) -> usize {
        self.selected.len()
    }

    pub fn is_empty(&self) -> bool {
        self.selected.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &T> {
        self.selected.iter()
    }
}

impl<T: Eq + Hash + Clone + Ord> SelectionSet<T> {
    pub fn sorted_ids(&self) -> Vec<T> {
        let mut ids: Vec<T> = self.selected.iter().cloned().collect();
        ids.sort();
        ids
    }
}

impl<T: Eq + Hash + Clone + Ord + fmt::Display> SelectionSet<T> {
    /// Run `op` for every selected id concurrently, then deselect the ids
    /// that succeeded.
    pub async fn apply_bulk<F, Fut>(
        &mut self,
        action: BulkAction,
        kind: EntityKind,
        op: F,
    ) -> BulkReport<T>
    where
        F: Fn(T) -> Fut,
        Fut: Future<Output = Result<(), ApiError>>,
    {
        let ids = self.sorted_ids();
        let results = join_all(ids.iter().cloned().map(&op)).await;

        let mut report = BulkReport {
            action,
            kind,
            succeeded: Vec::new(),
            failed: Vec::new(),
        };
        for (id, result) in ids.into_iter().zip(results) {
            match result {
                Ok(()) => {
                    self.selected.remove(&id);
                    report.succeeded.push(id);
                }
                Err(e) => report.failed.push((id, e.to_string())),
            }
        }

        if report.failed.is_empty() {
            tracing::info!("{}", report.summary());
        } else {
            tracing::warn!("{}", report.summary());
        }
        report
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BulkAction {
    Delete,
    Convert,
}

impl BulkAction {
    fn verb(&self) -> &'static str {
        match self {
            BulkAction::Delete => "delete",
            BulkAction::Convert => "convert",
        }
    }

    fn past_tense(&self) -> &'static str {
        match self {
            BulkAction::Delete => "Deleted",
            BulkAction::Convert => "Converted",
        }
    }
}

/// Per-item outcome of a bulk action.
#[derive(Debug, Clone, PartialEq)]
pub struct BulkReport<T> {
    pub action: BulkAction,
    pub kind: EntityKind,
    pub succeeded: Vec<T>,
    /// Failed ids with the error for each
    pub failed: Vec<(T, String)>,
}

impl<T: fmt::Display> BulkReport<T> {
    pub fn total(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }

    pub fn is_complete_success(&self) -> bool {
        self.failed.is_empty()
    }

    /// Single line aggregating every item's outcome.
    pub fn summary(&self) -> String {
        let total = self.total();
        if total == 0 {
            return format!("No {} selected", self.kind.noun(0));
        }

        let suffix = match self.action {
            BulkAction::Convert => " to managed assets",
            BulkAction::Delete => "",
        };
        if self.failed.is_empty() {
            return format!(
                "{} {} {}{}",
                self.action.past_tense(),
                total,
                self.kind.noun(total),
                suffix
            );
        }

        let failures = self
            .failed
            .iter()
            .map(|(id, err)| format!("{} ({})", id, err))
            .collect::<Vec<_>>()
            .join(", ");

        if self.succeeded.is_empty() {
            format!(
                "Failed to {} {} {}: {}",
                self.action.verb(),
                total,
                self.kind.noun(total),
                failures
            )
        } else {
            format!(
                "{} {} of {} {}{}; {} failed: {}",
                self.action.past_tense(),
                self.succeeded.len(),
                total,
                self.kind.noun(total),
                suffix,
                self.failed.len(),
                failures
            )
        }
    }
}

/// Delete every selected record of `kind`.
pub async fn bulk_delete(
    selection: &mut SelectionSet<i64>,
    api: &dyn InventoryApi,
    kind: EntityKind,
) -> BulkReport<i64> {
    selection
        .apply_bulk(BulkAction::Delete, kind, |id| api.delete_entity(kind, id))
        .await
}

/// Promote every selected device to a managed asset.
pub async fn bulk_convert(
    selection: &mut SelectionSet<i64>,
    api: &dyn InventoryApi,
) -> BulkReport<i64> {
    selection
        .apply_bulk(BulkAction::Convert, EntityKind::Device, |id| {
            api.convert_device(id)
        })
        .await
}
