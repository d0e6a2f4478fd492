//! Events, run results, and the conflict hand-off published by the sync engine

use serde::Serialize;
use tokio::sync::oneshot;

use crate::models::{ConflictDecision, ConflictItem, PendingChange, SyncMetadata};

/// Notification broadcast to engine subscribers
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// Metadata after a queue mutation or connectivity change
    StatusChange(SyncMetadata),
    ItemSynced(PendingChange),
    ItemFailed(PendingChange),
    /// Changes that entered `conflict` during the last drain
    ConflictsDetected(Vec<PendingChange>),
    SyncComplete(SyncReport),
}

/// Per-drain tallies
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub synced: usize,
    pub failed: usize,
    pub conflicts: usize,
    /// Transient failures left pending for a later drain
    pub retried: usize,
    /// Connectivity dropped before every item was attempted
    pub aborted: bool,
}

/// What a sync trigger did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncRun {
    Completed(SyncReport),
    /// Nothing was pending
    Idle,
    /// Another drain was already running
    AlreadySyncing,
    Offline,
}

impl SyncRun {
    pub const fn report(&self) -> Option<&SyncReport> {
        match self {
            Self::Completed(report) => Some(report),
            _ => None,
        }
    }
}

/// Conflicts handed to the registered resolver
///
/// Dropping `respond_to` without answering leaves the conflicts queued.
#[derive(Debug)]
pub struct ConflictRequest {
    pub conflicts: Vec<ConflictItem>,
    pub respond_to: oneshot::Sender<ConflictDecision>,
}

/// Result of applying a conflict decision
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ResolveOutcome {
    /// Items settled by the decision
    pub resolved: usize,
    /// Resolved items whose payload matched the server and were dropped
    pub finished: usize,
    /// Resolved items re-armed for submission
    pub requeued: usize,
}
