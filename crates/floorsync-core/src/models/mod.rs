//! Data models for floorsync

mod change;
mod conflict;
mod metadata;

pub use change::{ChangeId, ChangeStatus, ChangeType, NewChange, PendingChange};
pub use conflict::{
    ConflictDecision, ConflictHistoryEntry, ConflictItem, FieldConflict, ResolutionStrategy,
    ResolvedData,
};
pub use metadata::SyncMetadata;
