//! Background drain triggers

use std::time::Duration;

use tokio::task::JoinHandle;

use super::SyncEngine;
use crate::events::SyncRun;

/// Republish status on every connectivity change and drain when coming back online
pub fn spawn_connectivity_listener(engine: SyncEngine) -> JoinHandle<()> {
    let mut changes = engine.connectivity().subscribe();

    tokio::spawn(async move {
        let mut was_online = *changes.borrow_and_update();

        while changes.changed().await.is_ok() {
            let online = *changes.borrow_and_update();
            engine.refresh_status().await;

            if online && !was_online {
                match engine.sync().await {
                    Ok(SyncRun::Completed(report)) => {
                        tracing::debug!("Reconnect sync finished: {report:?}");
                    }
                    Ok(_) => {}
                    Err(error) => tracing::warn!("Reconnect sync failed: {error}"),
                }
            }
            was_online = online;
        }
    })
}

/// Drain every `interval` while online with pending work and no drain running
pub fn spawn_periodic_sync(engine: SyncEngine, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // First tick fires immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;

            let metadata = engine.metadata().await;
            let online = engine.connectivity().is_online();
            if !online || metadata.is_syncing || metadata.pending_count == 0 {
                continue;
            }

            if let Err(error) = engine.sync().await {
                tracing::warn!("Periodic sync failed: {error}");
            }
        }
    })
}
