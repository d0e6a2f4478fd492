//! Sync orchestration over the pending queue.
//!
//! [`SyncEngine`] is a cheap-to-clone handle shared by the presentation layer
//! and background triggers. It drains the queue in FIFO order, one item at a
//! time, and never runs two drains at once.

mod triggers;

#[cfg(test)]
mod tests;

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot, Mutex, MutexGuard};

use crate::cache::ReadCache;
use crate::client::{ApplyError, ApplyOutcome, EntityApi};
use crate::config::SyncSettings;
use crate::connectivity::ConnectivityMonitor;
use crate::detect;
use crate::error::{Error, Result};
use crate::events::{ConflictRequest, ResolveOutcome, SyncEvent, SyncReport, SyncRun};
use crate::models::{
    ChangeId, ChangeStatus, ConflictDecision, ConflictHistoryEntry, ConflictItem, NewChange,
    PendingChange, ResolutionStrategy, SyncMetadata,
};
use crate::queue::PendingQueue;
use crate::resolve::{self, ConflictHistory};
use crate::store::{self, KeyValueStore, STATUS_KEY};
use crate::util::now_ms;

pub use triggers::{spawn_connectivity_listener, spawn_periodic_sync};

const EVENT_CAPACITY: usize = 64;

/// Offline-first sync engine.
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<Inner>,
}

struct Inner {
    settings: SyncSettings,
    store: Arc<dyn KeyValueStore>,
    api: Arc<dyn EntityApi>,
    connectivity: Arc<dyn ConnectivityMonitor>,
    cache: ReadCache,
    events: broadcast::Sender<SyncEvent>,
    syncing: AtomicBool,
    state: Mutex<State>,
}

struct State {
    queue: PendingQueue,
    history: ConflictHistory,
    metadata: SyncMetadata,
    resolver: Option<mpsc::UnboundedSender<ConflictRequest>>,
    /// Conflicts already handed to the current resolver
    dispatched: HashSet<ChangeId>,
}

impl SyncEngine {
    /// Build an engine over injected storage, transport, and connectivity.
    ///
    /// Restores the queue, history, and last published status from `store`.
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        api: Arc<dyn EntityApi>,
        connectivity: Arc<dyn ConnectivityMonitor>,
        settings: SyncSettings,
    ) -> Result<Self> {
        settings.validate()?;

        let queue = PendingQueue::load(Arc::clone(&store))?;
        let history = ConflictHistory::load(Arc::clone(&store), settings.history_limit)?;
        let cache = ReadCache::new(Arc::clone(&store), settings.cache_ttl_ms)?;

        let persisted: SyncMetadata =
            store::load_json(store.as_ref(), STATUS_KEY)?.unwrap_or_default();
        let metadata = SyncMetadata {
            is_online: connectivity.is_online(),
            is_syncing: false,
            ..persisted
        }
        .recount(queue.items());

        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        tracing::debug!(
            "Sync engine ready: {} queued, {} history entries",
            queue.len(),
            history.len()
        );

        Ok(Self {
            inner: Arc::new(Inner {
                settings,
                store,
                api,
                connectivity,
                cache,
                events,
                syncing: AtomicBool::new(false),
                state: Mutex::new(State {
                    queue,
                    history,
                    metadata,
                    resolver: None,
                    dispatched: HashSet::new(),
                }),
            }),
        })
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.inner.settings
    }

    /// Opt-in read cache sharing the engine's store
    pub fn cache(&self) -> &ReadCache {
        &self.inner.cache
    }

    pub fn connectivity(&self) -> Arc<dyn ConnectivityMonitor> {
        Arc::clone(&self.inner.connectivity)
    }

    /// Receive events published after this call
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.inner.events.subscribe()
    }

    pub async fn metadata(&self) -> SyncMetadata {
        self.state().await.metadata.clone()
    }

    /// Queue a local mutation; returns once it is durable
    pub async fn add_to_queue(&self, change: NewChange) -> Result<ChangeId> {
        let pending = change.into_pending(self.inner.settings.max_retries, now_ms())?;
        let mut state = self.state().await;
        let id = state.queue.enqueue(pending)?;
        tracing::debug!("Queued change {id}");
        self.publish(&mut state);
        Ok(id)
    }

    /// Queued changes in FIFO order, optionally filtered by status
    pub async fn list(&self, status: Option<ChangeStatus>) -> Vec<PendingChange> {
        self.state().await.queue.list(status)
    }

    pub async fn get(&self, id: &ChangeId) -> Option<PendingChange> {
        self.state().await.queue.get(id).cloned()
    }

    /// Remove one change; unknown ids are a no-op
    pub async fn remove(&self, id: &ChangeId) -> Result<Option<PendingChange>> {
        let mut state = self.state().await;
        let removed = state.queue.remove(id)?;
        if removed.is_some() {
            state.dispatched.remove(id);
            self.publish(&mut state);
        }
        Ok(removed)
    }

    /// Drain now; fails with [`Error::Offline`] when offline
    pub async fn force_sync(&self) -> Result<SyncRun> {
        if !self.inner.connectivity.is_online() {
            return Err(Error::Offline);
        }
        self.sync().await
    }

    /// Drain the queue unless offline or another drain is running
    pub async fn sync(&self) -> Result<SyncRun> {
        if !self.inner.connectivity.is_online() {
            return Ok(SyncRun::Offline);
        }

        if self
            .inner
            .syncing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("Sync already in progress");
            return Ok(SyncRun::AlreadySyncing);
        }

        let mut guard = DrainGuard {
            engine: self.clone(),
            finished: false,
        };
        let result = self.drain().await;
        if result.is_err() {
            self.recover_from_failed_drain().await;
        }
        guard.finished = true;
        drop(guard);
        result
    }

    /// Re-arm every `failed` change with a fresh retry budget and drain
    ///
    /// A queue without failed changes is left untouched.
    pub async fn retry_failed(&self) -> Result<SyncRun> {
        {
            let mut state = self.state().await;
            if state.queue.ids_with_status(ChangeStatus::Failed).is_empty() {
                return Ok(SyncRun::Idle);
            }
            let rearmed = state.queue.rearm_failed()?;
            tracing::info!("Retrying {} failed change(s)", rearmed.len());
            self.publish(&mut state);
        }
        self.sync().await
    }

    /// Conflict view of every change in `conflict`
    pub async fn conflict_items(&self) -> Vec<ConflictItem> {
        let state = self.state().await;
        Self::collect_conflicts(&state, None)
    }

    /// Resolution history, oldest first
    pub async fn conflict_history(&self) -> Vec<ConflictHistoryEntry> {
        self.state().await.history.entries().to_vec()
    }

    /// Apply a decision to the outstanding conflicts
    ///
    /// Items the decision fully covers leave the conflict set: dropped when
    /// the resolved payload already matches the server, otherwise re-armed for
    /// the next drain. Others stay in `conflict`. An empty decision is a no-op.
    pub async fn resolve_conflicts(&self, decision: ConflictDecision) -> Result<ResolveOutcome> {
        let mut outcome = ResolveOutcome::default();
        if decision.is_empty() {
            tracing::debug!("Empty conflict decision, leaving conflicts queued");
            return Ok(outcome);
        }

        let now = now_ms();
        let mut state = self.state().await;
        let conflicted = state.queue.list(Some(ChangeStatus::Conflict));

        let mut resolutions = Vec::new();
        for change in conflicted {
            let Some(server) = change.server_record.clone() else {
                continue;
            };
            let Some(item) = detect::conflict_item(&change, &server, now) else {
                continue;
            };
            let Some(resolved) = resolve::resolve(&item, &change.payload, &decision) else {
                continue;
            };

            let mut settled = change.clone();
            settled.payload = resolved.data.clone();

            if detect::conflict_item(&settled, &server, now).is_none() {
                state.queue.remove(&change.id)?;
                settled.status = ChangeStatus::Synced;
                settled.server_record = None;
                let _ = self.inner.events.send(SyncEvent::ItemSynced(settled));
                outcome.finished += 1;
            } else {
                let data = resolved.data.clone();
                state.queue.update(&change.id, |item| {
                    item.payload = data;
                    item.status = ChangeStatus::Pending;
                    item.retry_count = 0;
                    item.timestamp = now;
                    item.last_error = None;
                    item.server_record = None;
                })?;
                outcome.requeued += 1;
            }

            state.dispatched.remove(&change.id);
            outcome.resolved += 1;
            resolutions.push(resolved);
        }

        if outcome.resolved > 0 {
            state.history.record(resolutions, now)?;
            tracing::info!(
                "Resolved {} conflict(s): {} finished, {} re-queued",
                outcome.resolved,
                outcome.finished,
                outcome.requeued
            );
            self.publish(&mut state);
        }

        Ok(outcome)
    }

    /// Resolve every conflict by replaying history, falling back to `default`
    pub async fn auto_resolve(&self, default: ResolutionStrategy) -> Result<ResolveOutcome> {
        let decision = {
            let state = self.state().await;
            let items = Self::collect_conflicts(&state, None);
            if items.is_empty() {
                return Ok(ResolveOutcome::default());
            }
            state.history.auto_decision(&items, default)
        };
        self.resolve_conflicts(decision).await
    }

    /// Register the resolver channel, replacing any previous one
    ///
    /// Every conflict not yet handed to a resolver is sent right away as one
    /// request; afterwards each drain sends its new conflicts exactly once.
    pub async fn set_conflict_resolver(&self) -> mpsc::UnboundedReceiver<ConflictRequest> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let mut state = self.state().await;
        state.resolver = Some(sender);
        state.dispatched.clear();
        self.dispatch_conflicts(&mut state);
        receiver
    }

    /// Stop handing conflicts out; they accumulate until a resolver registers
    pub async fn clear_conflict_resolver(&self) {
        let mut state = self.state().await;
        state.resolver = None;
        state.dispatched.clear();
    }

    /// Drop every `failed` change; returns how many were removed
    pub async fn clear_failed(&self) -> Result<usize> {
        self.clear_status(ChangeStatus::Failed).await
    }

    /// Drop every `conflict` change; returns how many were removed
    pub async fn clear_conflicts(&self) -> Result<usize> {
        self.clear_status(ChangeStatus::Conflict).await
    }

    /// Drop the whole queue and the read cache; returns how many changes were removed
    ///
    /// Conflict history is kept so later conflicts can still be auto-resolved.
    pub async fn clear_all(&self) -> Result<usize> {
        let mut state = self.state().await;
        let removed = state.queue.len();
        state.queue.clear()?;
        state.dispatched.clear();
        let evicted = self.inner.cache.clear()?;
        tracing::info!("Cleared {removed} change(s) and {evicted} cache entries");
        self.publish(&mut state);
        Ok(removed)
    }

    /// Recompute and publish metadata, e.g. after a connectivity change
    pub async fn refresh_status(&self) -> SyncMetadata {
        let mut state = self.state().await;
        self.publish(&mut state);
        state.metadata.clone()
    }

    async fn clear_status(&self, status: ChangeStatus) -> Result<usize> {
        let mut state = self.state().await;
        let ids = state.queue.ids_with_status(status);
        let removed = state.queue.remove_status(status)?;
        for id in &ids {
            state.dispatched.remove(id);
        }
        if removed > 0 {
            tracing::info!("Cleared {removed} {status} change(s)");
            self.publish(&mut state);
        }
        Ok(removed)
    }

    async fn drain(&self) -> Result<SyncRun> {
        let ids = {
            let mut state = self.state().await;
            let ids = state.queue.ids_with_status(ChangeStatus::Pending);
            if ids.is_empty() {
                return Ok(SyncRun::Idle);
            }
            state.metadata.is_syncing = true;
            self.publish(&mut state);
            ids
        };

        tracing::info!("Syncing {} change(s)", ids.len());

        let mut report = SyncReport::default();
        let mut new_conflicts = Vec::new();

        for id in ids {
            if !self.inner.connectivity.is_online() {
                tracing::warn!("Connectivity lost, abandoning drain");
                report.aborted = true;
                break;
            }

            let change = {
                let mut state = self.state().await;
                if !state.queue.get(&id).is_some_and(PendingChange::is_drainable) {
                    continue;
                }
                let change = state
                    .queue
                    .update(&id, |item| item.status = ChangeStatus::Syncing)?;
                self.publish(&mut state);
                change
            };
            let Some(change) = change else {
                continue;
            };

            // No lock is held across the network call
            let outcome = self.inner.api.apply(&change).await;

            let mut state = self.state().await;
            let keep_going =
                self.settle(&mut state, change, outcome, &mut report, &mut new_conflicts)?;
            self.publish(&mut state);
            if !keep_going {
                report.aborted = true;
                break;
            }
        }

        let mut state = self.state().await;
        state.metadata.is_syncing = false;
        state.metadata.last_sync_at = Some(now_ms());
        state.metadata.last_error =
            (report.failed > 0).then(|| format!("{} items failed to sync", report.failed));
        self.publish(&mut state);

        tracing::info!(
            "Sync complete: {} synced, {} failed, {} conflicts, {} retrying",
            report.synced,
            report.failed,
            report.conflicts,
            report.retried
        );

        if !new_conflicts.is_empty() {
            let _ = self
                .inner
                .events
                .send(SyncEvent::ConflictsDetected(new_conflicts));

            if self.inner.settings.auto_resolve {
                drop(state);
                let outcome = self
                    .auto_resolve(self.inner.settings.default_strategy)
                    .await?;
                tracing::debug!("Auto-resolved {} conflict(s)", outcome.resolved);
            } else {
                self.dispatch_conflicts(&mut state);
            }
        }

        let _ = self.inner.events.send(SyncEvent::SyncComplete(report));
        Ok(SyncRun::Completed(report))
    }

    /// Record the outcome of one submission; returns false to stop the drain
    fn settle(
        &self,
        state: &mut State,
        change: PendingChange,
        outcome: ApplyOutcome,
        report: &mut SyncReport,
        new_conflicts: &mut Vec<PendingChange>,
    ) -> Result<bool> {
        let id = change.id;

        let server = match outcome {
            ApplyOutcome::Applied(_) => None,
            ApplyOutcome::Conflict(server) => Some(server),
            ApplyOutcome::Failed(ApplyError::Offline(reason)) => {
                tracing::warn!("Lost connectivity while syncing {id}: {reason}");
                state.queue.update(&id, |item| {
                    item.status = ChangeStatus::Pending;
                    item.last_error = Some(reason);
                })?;
                return Ok(false);
            }
            ApplyOutcome::Failed(ApplyError::Transient(reason)) => {
                let updated = state.queue.update(&id, |item| {
                    item.retry_count += 1;
                    item.status = if item.has_retry_budget() {
                        ChangeStatus::Pending
                    } else {
                        ChangeStatus::Failed
                    };
                    item.last_error = Some(reason);
                })?;
                if let Some(updated) = updated {
                    if updated.status == ChangeStatus::Failed {
                        tracing::warn!(
                            "Change {id} failed after {} attempt(s)",
                            updated.retry_count
                        );
                        report.failed += 1;
                        let _ = self.inner.events.send(SyncEvent::ItemFailed(updated));
                    } else {
                        tracing::warn!(
                            "Change {id} will be retried ({}/{})",
                            updated.retry_count,
                            updated.max_retries
                        );
                        report.retried += 1;
                    }
                }
                return Ok(true);
            }
            ApplyOutcome::Failed(ApplyError::Rejected(reason)) => {
                tracing::warn!("Change {id} rejected: {reason}");
                let updated = state.queue.update(&id, |item| {
                    item.status = ChangeStatus::Failed;
                    item.last_error = Some(reason);
                })?;
                report.failed += 1;
                if let Some(updated) = updated {
                    let _ = self.inner.events.send(SyncEvent::ItemFailed(updated));
                }
                return Ok(true);
            }
        };

        if let Some(server) = server {
            if detect::conflict_item(&change, &server, now_ms()).is_some() {
                let updated = state.queue.update(&id, |item| {
                    item.status = ChangeStatus::Conflict;
                    item.server_record = Some(server);
                })?;
                tracing::debug!("Change {id} conflicts with the server record");
                report.conflicts += 1;
                new_conflicts.extend(updated);
                return Ok(true);
            }
        }

        state.queue.remove(&id)?;
        tracing::debug!("Change {id} synced");
        report.synced += 1;
        let mut synced = change;
        synced.status = ChangeStatus::Synced;
        let _ = self.inner.events.send(SyncEvent::ItemSynced(synced));
        Ok(true)
    }

    /// Hand undispatched conflicts to the resolver
    ///
    /// The reply is awaited on its own task so a slow decision never blocks
    /// the engine.
    fn dispatch_conflicts(&self, state: &mut State) {
        let Some(resolver) = state.resolver.clone() else {
            return;
        };

        let conflicts = Self::collect_conflicts(state, Some(&state.dispatched));
        if conflicts.is_empty() {
            return;
        }

        let (respond_to, reply) = oneshot::channel();
        let ids = conflicts
            .iter()
            .filter_map(|item| item.id.parse::<ChangeId>().ok())
            .collect::<Vec<_>>();
        let count = conflicts.len();

        if resolver
            .send(ConflictRequest {
                conflicts,
                respond_to,
            })
            .is_err()
        {
            tracing::warn!("Conflict resolver went away; conflicts will wait for a new one");
            state.resolver = None;
            return;
        }

        tracing::debug!("Handed {count} conflict(s) to the resolver");
        state.dispatched.extend(ids);

        let engine = self.clone();
        tokio::spawn(async move {
            let Ok(decision) = reply.await else {
                tracing::debug!("Conflict resolver dropped the request");
                return;
            };

            match engine.resolve_conflicts(decision).await {
                Ok(outcome) if outcome.requeued > 0 => {
                    if let Err(error) = engine.sync().await {
                        tracing::warn!("Sync after conflict resolution failed: {error}");
                    }
                }
                Ok(_) => {}
                Err(error) => tracing::warn!("Failed to apply conflict decision: {error}"),
            }
        });
    }

    fn collect_conflicts(state: &State, skip: Option<&HashSet<ChangeId>>) -> Vec<ConflictItem> {
        let now = now_ms();
        state
            .queue
            .items()
            .iter()
            .filter(|change| change.status == ChangeStatus::Conflict)
            .filter(|change| skip.map_or(true, |skip| !skip.contains(&change.id)))
            .filter_map(|change| {
                let server = change.server_record.as_ref()?;
                detect::conflict_item(change, server, now)
            })
            .collect()
    }

    /// Put interrupted items back to `pending` after a storage error mid-drain
    async fn recover_from_failed_drain(&self) {
        let mut state = self.state().await;
        self.reset_interrupted(&mut state);
    }

    fn reset_interrupted(&self, state: &mut State) {
        for id in state.queue.ids_with_status(ChangeStatus::Syncing) {
            if let Err(error) = state
                .queue
                .update(&id, |item| item.status = ChangeStatus::Pending)
            {
                tracing::warn!("Could not reset change {id}: {error}");
            }
        }
        state.metadata.is_syncing = false;
        self.publish(state);
    }

    /// Recount metadata, persist it, and broadcast it
    fn publish(&self, state: &mut State) {
        state.metadata = SyncMetadata {
            is_online: self.inner.connectivity.is_online(),
            ..state.metadata.recount(state.queue.items())
        };

        if let Err(error) = store::save_json(self.inner.store.as_ref(), STATUS_KEY, &state.metadata)
        {
            tracing::warn!("Failed to persist sync status: {error}");
        }

        let _ = self
            .inner
            .events
            .send(SyncEvent::StatusChange(state.metadata.clone()));
    }

    async fn state(&self) -> MutexGuard<'_, State> {
        self.inner.state.lock().await
    }
}

/// Releases the single-flight flag when a drain ends, including when the
/// drain future is dropped mid-flight
///
/// An abandoned drain leaves its in-flight change in `syncing`; that change
/// goes back to `pending` before the flag clears.
struct DrainGuard {
    engine: SyncEngine,
    finished: bool,
}

impl Drop for DrainGuard {
    fn drop(&mut self) {
        if !self.finished {
            tracing::warn!("Sync interrupted, returning in-flight changes to the queue");

            let recovered = match self.engine.inner.state.try_lock() {
                Ok(mut state) => {
                    self.engine.reset_interrupted(&mut state);
                    true
                }
                Err(_) => false,
            };

            if !recovered {
                if let Ok(runtime) = tokio::runtime::Handle::try_current() {
                    let engine = self.engine.clone();
                    runtime.spawn(async move {
                        engine.recover_from_failed_drain().await;
                        engine.inner.syncing.store(false, Ordering::Release);
                    });
                    return;
                }
            }
        }

        self.engine.inner.syncing.store(false, Ordering::Release);
    }
}
