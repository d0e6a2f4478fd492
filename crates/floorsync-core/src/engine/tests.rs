use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use tokio::sync::{broadcast, Semaphore};

use super::*;
use crate::connectivity::ConnectivityHandle;
use crate::store::{MemoryStore, SqliteStore};

/// Fake server answering from a script, then accepting everything
#[derive(Default)]
struct ScriptedApi {
    script: std::sync::Mutex<VecDeque<ApplyOutcome>>,
    calls: AtomicUsize,
    gate: Option<Arc<Semaphore>>,
    /// Drop connectivity after this many calls
    disconnect_after: Option<(usize, ConnectivityHandle)>,
}

impl ScriptedApi {
    fn new(script: impl IntoIterator<Item = ApplyOutcome>) -> Self {
        Self {
            script: std::sync::Mutex::new(script.into_iter().collect()),
            ..Self::default()
        }
    }

    fn push(&self, outcome: ApplyOutcome) {
        self.script.lock().unwrap().push_back(outcome);
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl EntityApi for ScriptedApi {
    fn apply<'a>(&'a self, change: &'a PendingChange) -> BoxFuture<'a, ApplyOutcome> {
        async move {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some(gate) = &self.gate {
                gate.acquire().await.unwrap().forget();
            }

            let outcome = self
                .script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| ApplyOutcome::Applied(change.payload.clone()));

            if let Some((after, network)) = &self.disconnect_after {
                if call >= *after {
                    network.set_online(false);
                }
            }
            outcome
        }
        .boxed()
    }
}

struct Harness {
    engine: SyncEngine,
    api: Arc<ScriptedApi>,
    network: ConnectivityHandle,
}

fn harness(api: ScriptedApi, network: ConnectivityHandle) -> Harness {
    harness_with(api, network, SyncSettings::default())
}

fn harness_with(api: ScriptedApi, network: ConnectivityHandle, settings: SyncSettings) -> Harness {
    let api = Arc::new(api);
    let engine = SyncEngine::new(
        Arc::new(MemoryStore::new()),
        api.clone(),
        Arc::new(network.clone()),
        settings,
    )
    .unwrap();
    Harness {
        engine,
        api,
        network,
    }
}

fn machine_update(status: &str) -> NewChange {
    NewChange::update("machines", json!({ "status": status })).with_entity_id("5")
}

fn drain_events(events: &mut broadcast::Receiver<SyncEvent>) -> Vec<SyncEvent> {
    let mut received = Vec::new();
    while let Ok(event) = events.try_recv() {
        received.push(event);
    }
    received
}

async fn wait_until<F>(mut done: F)
where
    F: FnMut() -> BoxFuture<'static, bool>,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        while !done().await {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();
}

fn completed(run: SyncRun) -> SyncReport {
    match run {
        SyncRun::Completed(report) => report,
        other => panic!("expected a completed drain, got {other:?}"),
    }
}

#[tokio::test]
async fn machines_conflict_resolves_to_server_value() {
    let server = json!({"id": 5, "status": "stopped", "updatedAt": 4_102_444_800_000_i64});
    let h = harness(
        ScriptedApi::new([ApplyOutcome::Conflict(server)]),
        ConnectivityHandle::offline(),
    );

    let id = h.engine.add_to_queue(machine_update("running")).await.unwrap();
    assert!(matches!(h.engine.force_sync().await, Err(Error::Offline)));
    assert_eq!(h.api.calls(), 0);

    h.network.set_online(true);
    let report = completed(h.engine.force_sync().await.unwrap());
    assert_eq!(report.conflicts, 1);

    let items = h.engine.conflict_items().await;
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].id, id.to_string());
    assert_eq!(items[0].conflicts.len(), 1);
    assert_eq!(items[0].conflicts[0].field, "status");
    assert_eq!(items[0].server_timestamp, 4_102_444_800_000);

    let decision = ConflictDecision::new().with(id.to_string(), ResolutionStrategy::KeepServer);
    let outcome = h.engine.resolve_conflicts(decision).await.unwrap();
    assert_eq!(outcome.resolved, 1);
    assert_eq!(outcome.finished, 1);

    assert!(h.engine.conflict_items().await.is_empty());
    assert!(h.engine.list(None).await.is_empty());

    let history = h.engine.conflict_history().await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].resolutions[0].data, json!({"status": "stopped"}));
    assert_eq!(h.api.calls(), 1);
}

#[tokio::test]
async fn second_drain_is_idle_and_leaves_metadata_alone() {
    let h = harness(ScriptedApi::default(), ConnectivityHandle::online());
    h.engine.add_to_queue(machine_update("running")).await.unwrap();
    h.engine
        .add_to_queue(NewChange::create("alert", json!({"title": "Spindle temp"})))
        .await
        .unwrap();

    let report = completed(h.engine.sync().await.unwrap());
    assert_eq!(report.synced, 2);
    assert_eq!(h.api.calls(), 2);

    let before = h.engine.metadata().await;
    let mut events = h.engine.subscribe();

    assert_eq!(h.engine.sync().await.unwrap(), SyncRun::Idle);
    assert_eq!(h.api.calls(), 2);
    assert_eq!(h.engine.metadata().await, before);
    assert!(drain_events(&mut events).is_empty());
}

#[tokio::test]
async fn concurrent_force_sync_runs_one_pass() {
    let gate = Arc::new(Semaphore::new(0));
    let api = ScriptedApi {
        gate: Some(Arc::clone(&gate)),
        ..ScriptedApi::default()
    };
    let h = harness(api, ConnectivityHandle::online());
    h.engine.add_to_queue(machine_update("running")).await.unwrap();

    let engine = h.engine.clone();
    let first = tokio::spawn(async move { engine.force_sync().await });

    let api = Arc::clone(&h.api);
    wait_until(move || {
        let api = Arc::clone(&api);
        async move { api.calls() == 1 }.boxed()
    })
    .await;

    assert_eq!(h.engine.force_sync().await.unwrap(), SyncRun::AlreadySyncing);
    assert!(h.engine.metadata().await.is_syncing);

    gate.add_permits(1);
    let report = completed(first.await.unwrap().unwrap());
    assert_eq!(report.synced, 1);
    assert_eq!(h.api.calls(), 1);
    assert!(!h.engine.metadata().await.is_syncing);
}

#[tokio::test]
async fn abandoned_drain_returns_change_to_queue_and_releases_sync() {
    let gate = Arc::new(Semaphore::new(0));
    let api = ScriptedApi {
        gate: Some(Arc::clone(&gate)),
        ..ScriptedApi::default()
    };
    let h = harness(api, ConnectivityHandle::online());
    let id = h.engine.add_to_queue(machine_update("running")).await.unwrap();

    let abandoned = tokio::time::timeout(Duration::from_millis(50), h.engine.sync()).await;
    assert!(abandoned.is_err());

    let change = h.engine.get(&id).await.unwrap();
    assert_eq!(change.status, ChangeStatus::Pending);
    assert_eq!(change.retry_count, 0);
    let metadata = h.engine.metadata().await;
    assert!(!metadata.is_syncing);
    assert_eq!(metadata.pending_count, 1);

    gate.add_permits(1);
    let report = completed(h.engine.sync().await.unwrap());
    assert_eq!(report.synced, 1);
    assert_eq!(h.api.calls(), 2);
    assert!(h.engine.list(None).await.is_empty());
}

#[tokio::test]
async fn items_enqueued_offline_reach_a_terminal_or_conflict_state() {
    let h = harness(
        ScriptedApi::new([
            ApplyOutcome::Applied(Value::Null),
            ApplyOutcome::Conflict(json!({"status": "stopped"})),
            ApplyOutcome::Failed(ApplyError::Rejected("HTTP 422".into())),
        ]),
        ConnectivityHandle::offline(),
    );

    for status in ["running", "idle", "setup"] {
        h.engine.add_to_queue(machine_update(status)).await.unwrap();
    }
    assert_eq!(h.engine.metadata().await.pending_count, 3);

    h.network.set_online(true);
    let report = completed(h.engine.force_sync().await.unwrap());
    assert_eq!((report.synced, report.conflicts, report.failed), (1, 1, 1));

    let remaining = h.engine.list(None).await;
    let statuses = remaining.iter().map(|c| c.status).collect::<Vec<_>>();
    assert_eq!(statuses, vec![ChangeStatus::Conflict, ChangeStatus::Failed]);

    let metadata = h.engine.metadata().await;
    assert_eq!(metadata.pending_count, 0);
    assert_eq!(metadata.conflict_count, 1);
    assert_eq!(metadata.failed_count, 1);
    assert_eq!(metadata.last_error.as_deref(), Some("1 items failed to sync"));
    assert!(metadata.last_sync_at.is_some());
}

#[tokio::test]
async fn transient_errors_consume_budget_then_fail() {
    let settings = SyncSettings {
        max_retries: 2,
        ..SyncSettings::default()
    };
    let h = harness_with(
        ScriptedApi::new([
            ApplyOutcome::Failed(ApplyError::Transient("HTTP 503".into())),
            ApplyOutcome::Failed(ApplyError::Transient("timed out".into())),
        ]),
        ConnectivityHandle::online(),
        settings,
    );
    let id = h.engine.add_to_queue(machine_update("running")).await.unwrap();
    let mut events = h.engine.subscribe();

    let report = completed(h.engine.sync().await.unwrap());
    assert_eq!((report.retried, report.failed), (1, 0));
    let change = h.engine.get(&id).await.unwrap();
    assert_eq!(change.status, ChangeStatus::Pending);
    assert_eq!(change.retry_count, 1);
    assert_eq!(change.last_error.as_deref(), Some("HTTP 503"));
    assert_eq!(h.engine.metadata().await.last_error, None);

    let report = completed(h.engine.sync().await.unwrap());
    assert_eq!(report.failed, 1);
    let change = h.engine.get(&id).await.unwrap();
    assert_eq!(change.status, ChangeStatus::Failed);
    assert_eq!(change.retry_count, 2);

    let failed = drain_events(&mut events)
        .into_iter()
        .filter(|event| matches!(event, SyncEvent::ItemFailed(_)))
        .count();
    assert_eq!(failed, 1);
}

#[tokio::test]
async fn rejection_fails_without_retrying() {
    let h = harness(
        ScriptedApi::new([ApplyOutcome::Failed(ApplyError::Rejected("HTTP 400".into()))]),
        ConnectivityHandle::online(),
    );
    let id = h.engine.add_to_queue(machine_update("running")).await.unwrap();

    completed(h.engine.sync().await.unwrap());
    let change = h.engine.get(&id).await.unwrap();
    assert_eq!(change.status, ChangeStatus::Failed);
    assert_eq!(change.retry_count, 0);
}

#[tokio::test]
async fn offline_during_call_aborts_without_spending_budget() {
    let h = harness(
        ScriptedApi::new([ApplyOutcome::Failed(ApplyError::Offline(
            "connection refused".into(),
        ))]),
        ConnectivityHandle::online(),
    );
    h.engine.add_to_queue(machine_update("running")).await.unwrap();
    h.engine.add_to_queue(machine_update("idle")).await.unwrap();

    let report = completed(h.engine.sync().await.unwrap());
    assert!(report.aborted);
    assert_eq!(h.api.calls(), 1);

    for change in h.engine.list(None).await {
        assert_eq!(change.status, ChangeStatus::Pending);
        assert_eq!(change.retry_count, 0);
    }
}

#[tokio::test]
async fn lost_connectivity_between_items_stops_the_drain() {
    let network = ConnectivityHandle::online();
    let api = ScriptedApi {
        disconnect_after: Some((1, network.clone())),
        ..ScriptedApi::default()
    };
    let h = harness(api, network);
    h.engine.add_to_queue(machine_update("running")).await.unwrap();
    let second = h.engine.add_to_queue(machine_update("idle")).await.unwrap();

    let report = completed(h.engine.sync().await.unwrap());
    assert_eq!(report.synced, 1);
    assert!(report.aborted);
    assert_eq!(h.api.calls(), 1);

    let remaining = h.engine.list(None).await;
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, second);
    assert_eq!(remaining[0].status, ChangeStatus::Pending);
}

#[tokio::test]
async fn retry_failed_without_failures_is_a_noop() {
    let h = harness(ScriptedApi::default(), ConnectivityHandle::online());
    h.engine.add_to_queue(machine_update("running")).await.unwrap();
    let before = h.engine.metadata().await;
    let mut events = h.engine.subscribe();

    assert_eq!(h.engine.retry_failed().await.unwrap(), SyncRun::Idle);

    assert_eq!(h.api.calls(), 0);
    assert_eq!(h.engine.metadata().await, before);
    assert_eq!(h.engine.list(None).await[0].status, ChangeStatus::Pending);
    assert!(drain_events(&mut events).is_empty());
}

#[tokio::test]
async fn retry_failed_rearms_and_drains() {
    let h = harness(
        ScriptedApi::new([ApplyOutcome::Failed(ApplyError::Rejected("HTTP 403".into()))]),
        ConnectivityHandle::online(),
    );
    h.engine.add_to_queue(machine_update("running")).await.unwrap();
    completed(h.engine.sync().await.unwrap());
    assert_eq!(h.engine.metadata().await.failed_count, 1);

    let report = completed(h.engine.retry_failed().await.unwrap());
    assert_eq!(report.synced, 1);
    assert!(h.engine.list(None).await.is_empty());
    assert_eq!(h.engine.metadata().await.last_error, None);
}

#[tokio::test]
async fn conflict_without_real_difference_counts_as_synced() {
    let h = harness(
        ScriptedApi::new([ApplyOutcome::Conflict(
            json!({"id": 5, "status": "running", "updatedAt": 99}),
        )]),
        ConnectivityHandle::online(),
    );
    h.engine.add_to_queue(machine_update("running")).await.unwrap();

    let report = completed(h.engine.sync().await.unwrap());
    assert_eq!((report.synced, report.conflicts), (1, 0));
    assert!(h.engine.list(None).await.is_empty());
}

#[tokio::test]
async fn conflicting_create_stays_queued_as_conflict() {
    let h = harness(
        ScriptedApi::new([ApplyOutcome::Conflict(
            json!({"id": "m-1", "name": "Press 9"}),
        )]),
        ConnectivityHandle::online(),
    );
    let id = h
        .engine
        .add_to_queue(NewChange::create("machines", json!({"id": "m-1", "name": "Press 4"})))
        .await
        .unwrap();
    let mut events = h.engine.subscribe();

    let report = completed(h.engine.sync().await.unwrap());
    assert_eq!((report.synced, report.conflicts), (0, 1));

    let change = h.engine.get(&id).await.unwrap();
    assert_eq!(change.status, ChangeStatus::Conflict);
    assert_eq!(change.payload, json!({"id": "m-1", "name": "Press 4"}));

    let items = h.engine.conflict_items().await;
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].conflicts[0].field, "name");
    assert_eq!(items[0].conflicts[0].server_value, json!("Press 9"));

    let synced = drain_events(&mut events)
        .into_iter()
        .filter(|event| matches!(event, SyncEvent::ItemSynced(_)))
        .count();
    assert_eq!(synced, 0);
}

#[tokio::test]
async fn create_echoed_back_by_server_counts_as_synced() {
    let h = harness(
        ScriptedApi::new([ApplyOutcome::Conflict(
            json!({"id": "m-1", "name": "Press 4", "createdAt": 5}),
        )]),
        ConnectivityHandle::online(),
    );
    h.engine
        .add_to_queue(NewChange::create("machines", json!({"id": "m-1", "name": "Press 4"})))
        .await
        .unwrap();

    let report = completed(h.engine.sync().await.unwrap());
    assert_eq!((report.synced, report.conflicts), (1, 0));
    assert!(h.engine.list(None).await.is_empty());
}

#[tokio::test]
async fn resolver_gets_each_conflict_once_and_reply_requeues() {
    let h = harness(
        ScriptedApi::new([ApplyOutcome::Conflict(json!({"status": "stopped"}))]),
        ConnectivityHandle::online(),
    );
    let mut requests = h.engine.set_conflict_resolver().await;
    let id = h.engine.add_to_queue(machine_update("running")).await.unwrap();
    let mut events = h.engine.subscribe();

    completed(h.engine.sync().await.unwrap());
    let request = requests.try_recv().unwrap();
    assert_eq!(request.conflicts.len(), 1);
    assert_eq!(request.conflicts[0].entity_name, "machines #5");

    assert!(drain_events(&mut events)
        .iter()
        .any(|event| matches!(event, SyncEvent::ConflictsDetected(items) if items.len() == 1)));

    assert_eq!(h.engine.sync().await.unwrap(), SyncRun::Idle);
    assert!(requests.try_recv().is_err());

    request
        .respond_to
        .send(ConflictDecision::new().with(id.to_string(), ResolutionStrategy::KeepLocal))
        .unwrap();

    let engine = h.engine.clone();
    wait_until(move || {
        let engine = engine.clone();
        async move { engine.list(None).await.is_empty() }.boxed()
    })
    .await;
    assert_eq!(h.api.calls(), 2);
    assert_eq!(h.engine.conflict_history().await.len(), 1);
}

#[tokio::test]
async fn conflicts_wait_for_a_resolver() {
    let h = harness(
        ScriptedApi::new([ApplyOutcome::Conflict(json!({"status": "stopped"}))]),
        ConnectivityHandle::online(),
    );
    h.engine.add_to_queue(machine_update("running")).await.unwrap();
    completed(h.engine.sync().await.unwrap());
    assert_eq!(h.engine.metadata().await.conflict_count, 1);

    let mut requests = h.engine.set_conflict_resolver().await;
    let request = requests.try_recv().unwrap();
    assert_eq!(request.conflicts.len(), 1);
}

#[tokio::test]
async fn cancelled_or_dropped_decisions_keep_conflicts() {
    let h = harness(
        ScriptedApi::new([
            ApplyOutcome::Conflict(json!({"status": "stopped"})),
            ApplyOutcome::Conflict(json!({"status": "stopped"})),
        ]),
        ConnectivityHandle::online(),
    );
    let mut requests = h.engine.set_conflict_resolver().await;
    h.engine.add_to_queue(machine_update("running")).await.unwrap();
    completed(h.engine.sync().await.unwrap());

    let request = requests.try_recv().unwrap();
    request.respond_to.send(ConflictDecision::cancelled()).unwrap();
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    assert_eq!(h.engine.metadata().await.conflict_count, 1);
    assert!(h.engine.conflict_history().await.is_empty());

    h.engine.add_to_queue(machine_update("idle")).await.unwrap();
    completed(h.engine.sync().await.unwrap());
    let request = requests.try_recv().unwrap();
    assert_eq!(request.conflicts.len(), 1);
    drop(request);
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    assert_eq!(h.engine.metadata().await.conflict_count, 2);
}

#[tokio::test]
async fn partial_decision_leaves_item_in_conflict() {
    let h = harness(
        ScriptedApi::new([ApplyOutcome::Conflict(json!({"status": "stopped", "speed": 10}))]),
        ConnectivityHandle::online(),
    );
    let id = h
        .engine
        .add_to_queue(
            NewChange::update("machines", json!({"status": "running", "speed": 12}))
                .with_entity_id("5"),
        )
        .await
        .unwrap();
    completed(h.engine.sync().await.unwrap());

    let decision =
        ConflictDecision::new().with(format!("{id}_status"), ResolutionStrategy::KeepLocal);
    let outcome = h.engine.resolve_conflicts(decision).await.unwrap();
    assert_eq!(outcome.resolved, 0);
    assert_eq!(h.engine.get(&id).await.unwrap().status, ChangeStatus::Conflict);

    let decision = ConflictDecision::new()
        .with(format!("{id}_status"), ResolutionStrategy::KeepLocal)
        .with(format!("{id}_speed"), ResolutionStrategy::KeepServer);
    let outcome = h.engine.resolve_conflicts(decision).await.unwrap();
    assert_eq!(outcome.requeued, 1);

    let change = h.engine.get(&id).await.unwrap();
    assert_eq!(change.status, ChangeStatus::Pending);
    assert_eq!(change.payload, json!({"status": "running", "speed": 10}));
    assert_eq!(change.server_record, None);
}

#[tokio::test]
async fn auto_resolve_setting_settles_new_conflicts() {
    let settings = SyncSettings {
        auto_resolve: true,
        ..SyncSettings::default()
    };
    let h = harness_with(
        ScriptedApi::new([ApplyOutcome::Conflict(json!({"status": "stopped"}))]),
        ConnectivityHandle::online(),
        settings,
    );
    let mut requests = h.engine.set_conflict_resolver().await;
    h.engine.add_to_queue(machine_update("running")).await.unwrap();

    let report = completed(h.engine.sync().await.unwrap());
    assert_eq!(report.conflicts, 1);
    assert!(h.engine.list(None).await.is_empty());
    assert_eq!(h.engine.conflict_history().await.len(), 1);
    assert!(requests.try_recv().is_err());
}

#[tokio::test]
async fn auto_resolve_replays_last_strategy_for_entity() {
    let h = harness(
        ScriptedApi::new([
            ApplyOutcome::Conflict(json!({"status": "stopped"})),
            ApplyOutcome::Conflict(json!({"status": "stopped"})),
        ]),
        ConnectivityHandle::online(),
    );

    let first = h.engine.add_to_queue(machine_update("running")).await.unwrap();
    completed(h.engine.sync().await.unwrap());
    h.engine
        .resolve_conflicts(ConflictDecision::new().with(first.to_string(), ResolutionStrategy::KeepLocal))
        .await
        .unwrap();
    h.engine.remove(&first).await.unwrap();

    let second = h.engine.add_to_queue(machine_update("setup")).await.unwrap();
    completed(h.engine.sync().await.unwrap());

    let outcome = h
        .engine
        .auto_resolve(ResolutionStrategy::KeepServer)
        .await
        .unwrap();
    assert_eq!(outcome.requeued, 1);
    let change = h.engine.get(&second).await.unwrap();
    assert_eq!(change.payload, json!({"status": "setup"}));
    assert_eq!(change.status, ChangeStatus::Pending);
}

#[tokio::test]
async fn clear_commands_remove_by_status() {
    let h = harness(
        ScriptedApi::new([
            ApplyOutcome::Conflict(json!({"status": "stopped"})),
            ApplyOutcome::Failed(ApplyError::Rejected("HTTP 400".into())),
        ]),
        ConnectivityHandle::online(),
    );
    for status in ["running", "idle"] {
        h.engine.add_to_queue(machine_update(status)).await.unwrap();
    }
    completed(h.engine.sync().await.unwrap());

    assert_eq!(h.engine.clear_failed().await.unwrap(), 1);
    assert_eq!(h.engine.clear_failed().await.unwrap(), 0);
    assert_eq!(h.engine.clear_conflicts().await.unwrap(), 1);

    h.network.set_online(false);
    h.engine.add_to_queue(machine_update("setup")).await.unwrap();
    h.engine
        .cache()
        .cache_data("machines", &json!([{"id": 5}]), None)
        .unwrap();
    assert_eq!(h.engine.clear_all().await.unwrap(), 1);
    assert_eq!(h.engine.cache().get_cached_data::<Value>("machines").unwrap(), None);
    assert!(h.engine.cache().keys().unwrap().is_empty());
    let metadata = h.engine.metadata().await;
    assert_eq!(
        (metadata.pending_count, metadata.failed_count, metadata.conflict_count),
        (0, 0, 0)
    );
}

#[tokio::test]
async fn enqueue_publishes_status() {
    let h = harness(ScriptedApi::default(), ConnectivityHandle::offline());
    let mut events = h.engine.subscribe();

    h.engine.add_to_queue(machine_update("running")).await.unwrap();

    match events.try_recv().unwrap() {
        SyncEvent::StatusChange(metadata) => {
            assert_eq!(metadata.pending_count, 1);
            assert!(!metadata.is_online);
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn queue_and_status_survive_restart() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("floorsync.db");

    let id = {
        let store = Arc::new(SqliteStore::open(&path).unwrap());
        let engine = SyncEngine::new(
            store,
            Arc::new(ScriptedApi::default()),
            Arc::new(ConnectivityHandle::offline()),
            SyncSettings::default(),
        )
        .unwrap();
        engine.add_to_queue(machine_update("running")).await.unwrap()
    };

    let store = Arc::new(SqliteStore::open(&path).unwrap());
    let engine = SyncEngine::new(
        store,
        Arc::new(ScriptedApi::default()),
        Arc::new(ConnectivityHandle::online()),
        SyncSettings::default(),
    )
    .unwrap();

    let metadata = engine.metadata().await;
    assert_eq!(metadata.pending_count, 1);
    assert!(metadata.is_online);
    assert_eq!(engine.list(None).await[0].id, id);
}

#[tokio::test]
async fn reconnect_triggers_a_drain() {
    let h = harness(ScriptedApi::default(), ConnectivityHandle::offline());
    h.engine.add_to_queue(machine_update("running")).await.unwrap();
    let listener = spawn_connectivity_listener(h.engine.clone());
    tokio::task::yield_now().await;

    h.network.set_online(true);
    let engine = h.engine.clone();
    wait_until(move || {
        let engine = engine.clone();
        async move { engine.list(None).await.is_empty() }.boxed()
    })
    .await;
    assert_eq!(h.api.calls(), 1);
    assert!(h.engine.metadata().await.is_online);
    listener.abort();
}

#[tokio::test(start_paused = true)]
async fn periodic_sync_drains_pending_work() {
    let h = harness(ScriptedApi::default(), ConnectivityHandle::online());
    let periodic = spawn_periodic_sync(h.engine.clone(), Duration::from_secs(30));
    h.engine.add_to_queue(machine_update("running")).await.unwrap();

    tokio::time::sleep(Duration::from_secs(31)).await;
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }

    assert_eq!(h.api.calls(), 1);
    assert!(h.engine.list(None).await.is_empty());
    periodic.abort();
}

#[tokio::test]
async fn events_report_each_synced_item_and_the_run() {
    let h = harness(ScriptedApi::default(), ConnectivityHandle::online());
    h.engine.add_to_queue(machine_update("running")).await.unwrap();
    let mut events = h.engine.subscribe();

    completed(h.engine.sync().await.unwrap());

    let received = drain_events(&mut events);
    let synced = received
        .iter()
        .filter(|event| matches!(event, SyncEvent::ItemSynced(change) if change.status == ChangeStatus::Synced))
        .count();
    assert_eq!(synced, 1);
    assert!(matches!(
        received.last(),
        Some(SyncEvent::SyncComplete(report)) if report.synced == 1
    ));
}
