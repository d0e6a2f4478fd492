use std::future::Future;
use std::time::Duration;

use floorsync_core::connectivity::spawn_health_probe;
use floorsync_core::engine::{spawn_connectivity_listener, spawn_periodic_sync};
use floorsync_core::{
    ConflictDecision, ConflictRequest, ConnectivityHandle, ResolutionStrategy, SyncEngine,
    SyncEvent,
};
use tokio::sync::broadcast::error::RecvError;

use crate::cli::StrategyArg;
use crate::commands::common::{format_conflict_lines, open_engine_with, Context};
use crate::commands::sync::describe_run;
use crate::error::CliError;

/// Health probe cadence when periodic sync is disabled
const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_secs(30);

pub async fn run_watch(context: &Context, strategy: Option<StrategyArg>) -> Result<(), CliError> {
    let settings = &context.settings;
    let connectivity = ConnectivityHandle::new(!context.offline);
    let engine = open_engine_with(context, true, connectivity.clone())?;

    let mut tasks = vec![spawn_connectivity_listener(engine.clone())];
    if let Some(interval) = settings.periodic_interval() {
        tasks.push(spawn_periodic_sync(engine.clone(), interval));
    }
    if let Some(url) = settings.health_url.clone().filter(|_| !context.offline) {
        let client = reqwest::Client::builder()
            .timeout(settings.request_timeout())
            .build()
            .map_err(|error| {
                floorsync_core::Error::Config(format!("failed to build HTTP client: {error}"))
            })?;
        let interval = settings
            .periodic_interval()
            .unwrap_or(DEFAULT_PROBE_INTERVAL);
        tracing::info!("Probing {url} every {}s", interval.as_secs());
        tasks.push(spawn_health_probe(connectivity, client, url, interval));
    }

    match engine.sync().await {
        Ok(run) => println!("{}", describe_run(&run)),
        Err(error) => tracing::warn!("Initial sync failed: {error}"),
    }
    println!("Watching for changes; press Ctrl-C to stop");

    watch_until(&engine, strategy.map(Into::into), async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            tracing::warn!("Cannot listen for Ctrl-C: {error}");
            std::future::pending::<()>().await;
        }
    })
    .await;

    for task in tasks {
        task.abort();
    }
    Ok(())
}

/// Answer conflicts and report events until `shutdown` completes
pub async fn watch_until<F>(
    engine: &SyncEngine,
    strategy: Option<ResolutionStrategy>,
    shutdown: F,
) where
    F: Future<Output = ()>,
{
    let mut requests = engine.set_conflict_resolver().await;
    let mut events = engine.subscribe();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            () = &mut shutdown => break,
            Some(request) = requests.recv() => answer_conflicts(request, strategy),
            event = events.recv() => match event {
                Ok(event) => report_event(&event),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("Missed {skipped} sync event(s)");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    engine.clear_conflict_resolver().await;
}

fn answer_conflicts(request: ConflictRequest, strategy: Option<ResolutionStrategy>) {
    let decision = match strategy {
        Some(strategy) => {
            println!(
                "Resolving {} conflict(s) with {strategy}",
                request.conflicts.len()
            );
            request
                .conflicts
                .iter()
                .map(|item| (item.id.clone(), strategy))
                .collect::<ConflictDecision>()
        }
        None => {
            for line in format_conflict_lines(&request.conflicts) {
                println!("{line}");
            }
            println!("Left queued; settle with `floorsync resolve`");
            ConflictDecision::cancelled()
        }
    };

    if request.respond_to.send(decision).is_err() {
        tracing::debug!("Engine stopped waiting for a conflict decision");
    }
}

fn report_event(event: &SyncEvent) {
    match event {
        SyncEvent::StatusChange(metadata) => tracing::debug!(
            "Status: online={} pending={} failed={} conflicts={}",
            metadata.is_online,
            metadata.pending_count,
            metadata.failed_count,
            metadata.conflict_count
        ),
        SyncEvent::ItemSynced(change) => {
            println!("synced  {} {}", change.change_type, change.display_name());
        }
        SyncEvent::ItemFailed(change) => println!(
            "failed  {} {}: {}",
            change.change_type,
            change.display_name(),
            change.last_error.as_deref().unwrap_or("unknown error")
        ),
        SyncEvent::ConflictsDetected(changes) => {
            println!("{} new conflict(s)", changes.len());
        }
        SyncEvent::SyncComplete(report) => tracing::info!(
            "Sync pass: {} synced, {} failed, {} conflicts",
            report.synced,
            report.failed,
            report.conflicts
        ),
    }
}
