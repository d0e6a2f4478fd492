//! Aggregated sync status

use serde::{Deserialize, Serialize};

use super::{ChangeStatus, PendingChange};

/// Derived view over the queue, recomputed after every queue mutation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncMetadata {
    pub is_online: bool,
    pub is_syncing: bool,
    /// Items waiting for (or in) a drain
    pub pending_count: usize,
    pub failed_count: usize,
    pub conflict_count: usize,
    /// End of the last non-idle drain (Unix ms)
    pub last_sync_at: Option<i64>,
    pub last_error: Option<String>,
}

impl SyncMetadata {
    /// Recount queue items, keeping connectivity and drain bookkeeping
    #[must_use]
    pub fn recount(&self, queue: &[PendingChange]) -> Self {
        let count = |wanted: &[ChangeStatus]| {
            queue
                .iter()
                .filter(|change| wanted.contains(&change.status))
                .count()
        };

        Self {
            pending_count: count(&[ChangeStatus::Pending, ChangeStatus::Syncing]),
            failed_count: count(&[ChangeStatus::Failed]),
            conflict_count: count(&[ChangeStatus::Conflict]),
            ..self.clone()
        }
    }
}
