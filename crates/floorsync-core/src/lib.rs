//! floorsync-core - Offline-first sync engine for shop-floor clients
//!
//! Local mutations are queued durably, drained to the server when online,
//! and checked field by field against the server's record. Diverging fields
//! become conflicts that a registered resolver (or past decisions) settles.

pub mod cache;
pub mod client;
pub mod config;
pub mod connectivity;
pub mod detect;
pub mod engine;
pub mod error;
pub mod events;
pub mod models;
pub mod queue;
pub mod resolve;
pub mod store;
pub mod util;

pub use client::{ApplyError, ApplyOutcome, EntityApi, EntityRouter, HttpEntityClient};
pub use config::SyncSettings;
pub use connectivity::{ConnectivityHandle, ConnectivityMonitor};
pub use engine::SyncEngine;
pub use error::{Error, Result};
pub use events::{ConflictRequest, ResolveOutcome, SyncEvent, SyncReport, SyncRun};
pub use models::{
    ChangeId, ChangeStatus, ChangeType, ConflictDecision, ConflictItem, NewChange, PendingChange,
    ResolutionStrategy, SyncMetadata,
};
pub use store::{KeyValueStore, MemoryStore, SqliteStore};
