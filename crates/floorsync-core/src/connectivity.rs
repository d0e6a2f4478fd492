//! Online/offline signal consumed by the sync engine

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Source of the online/offline state
pub trait ConnectivityMonitor: Send + Sync {
    /// Current state
    fn is_online(&self) -> bool;

    /// Receiver that observes every state change
    fn subscribe(&self) -> watch::Receiver<bool>;
}

/// Manually driven connectivity state
///
/// Cheap to clone; all clones share one state. Platform integrations and the
/// health probe push transitions through [`ConnectivityHandle::set_online`].
#[derive(Clone)]
pub struct ConnectivityHandle {
    state: Arc<watch::Sender<bool>>,
}

impl ConnectivityHandle {
    pub fn new(online: bool) -> Self {
        let (state, _) = watch::channel(online);
        Self {
            state: Arc::new(state),
        }
    }

    pub fn online() -> Self {
        Self::new(true)
    }

    pub fn offline() -> Self {
        Self::new(false)
    }

    /// Record the current state; returns true when it changed
    pub fn set_online(&self, online: bool) -> bool {
        let changed = self.state.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });

        if changed {
            if online {
                tracing::info!("Connection restored");
            } else {
                tracing::warn!("Connection lost");
            }
        }
        changed
    }
}

impl Default for ConnectivityHandle {
    fn default() -> Self {
        Self::online()
    }
}

impl ConnectivityMonitor for ConnectivityHandle {
    fn is_online(&self) -> bool {
        *self.state.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.state.subscribe()
    }
}

/// Poll an HTTP health endpoint and drive `handle` from the result
///
/// Any 2xx response counts as online; errors and other statuses count as
/// offline.
pub fn spawn_health_probe(
    handle: ConnectivityHandle,
    client: reqwest::Client,
    url: String,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            let online = match client.get(&url).send().await {
                Ok(response) => response.status().is_success(),
                Err(error) => {
                    tracing::debug!("Health probe failed: {error}");
                    false
                }
            };
            handle.set_online(online);
        }
    })
}
