//! Durable FIFO queue of local mutations awaiting server confirmation

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::models::{ChangeId, ChangeStatus, PendingChange};
use crate::store::{self, KeyValueStore, QUEUE_KEY};

/// Ordered log of pending changes mirrored to durable storage
///
/// Every mutation builds the next queue, persists it, and only then replaces
/// the in-memory copy, so a failed write leaves the queue untouched.
pub struct PendingQueue {
    store: Arc<dyn KeyValueStore>,
    items: Vec<PendingChange>,
}

impl PendingQueue {
    /// Load the queue from storage
    ///
    /// Items left in `syncing` by an interrupted drain go back to `pending`.
    pub fn load(store: Arc<dyn KeyValueStore>) -> Result<Self> {
        let mut items: Vec<PendingChange> =
            store::load_json(store.as_ref(), QUEUE_KEY)?.unwrap_or_default();

        let mut resumed = 0usize;
        for item in &mut items {
            if item.status == ChangeStatus::Syncing {
                item.status = ChangeStatus::Pending;
                resumed += 1;
            }
        }

        let queue = Self { store, items };
        if resumed > 0 {
            tracing::warn!("Resumed {resumed} change(s) interrupted mid-sync");
            queue.persist(&queue.items)?;
        }
        Ok(queue)
    }

    /// All items in insertion order
    pub fn items(&self) -> &[PendingChange] {
        &self.items
    }

    /// Items in insertion order, optionally restricted to one status
    pub fn list(&self, status: Option<ChangeStatus>) -> Vec<PendingChange> {
        self.items
            .iter()
            .filter(|item| status.map_or(true, |wanted| item.status == wanted))
            .cloned()
            .collect()
    }

    pub fn get(&self, id: &ChangeId) -> Option<&PendingChange> {
        self.items.iter().find(|item| item.id == *id)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Ids of items with the given status, in drain order
    pub fn ids_with_status(&self, status: ChangeStatus) -> Vec<ChangeId> {
        self.items
            .iter()
            .filter(|item| item.status == status)
            .map(|item| item.id)
            .collect()
    }

    /// Append a change; returns once it is durable
    pub fn enqueue(&mut self, change: PendingChange) -> Result<ChangeId> {
        if self.get(&change.id).is_some() {
            return Err(Error::InvalidInput(format!(
                "change {} is already queued",
                change.id
            )));
        }

        let id = change.id;
        let mut next = self.items.clone();
        next.push(change);
        self.commit(next)?;
        Ok(id)
    }

    /// Apply `mutate` to a non-terminal item and return the updated copy
    ///
    /// Returns `Ok(None)` when the id is unknown. `synced` and `failed` items
    /// are terminal and cannot be mutated here.
    pub fn update(
        &mut self,
        id: &ChangeId,
        mutate: impl FnOnce(&mut PendingChange),
    ) -> Result<Option<PendingChange>> {
        let Some(index) = self.items.iter().position(|item| item.id == *id) else {
            return Ok(None);
        };

        let status = self.items[index].status;
        if matches!(status, ChangeStatus::Synced | ChangeStatus::Failed) {
            return Err(Error::InvalidInput(format!(
                "change {id} is {status} and cannot be modified"
            )));
        }

        let mut next = self.items.clone();
        mutate(&mut next[index]);
        let updated = next[index].clone();
        self.commit(next)?;
        Ok(Some(updated))
    }

    /// Give every `failed` item a fresh retry budget; returns the re-armed items
    pub fn rearm_failed(&mut self) -> Result<Vec<PendingChange>> {
        let mut next = self.items.clone();
        let mut rearmed = Vec::new();
        for item in &mut next {
            if item.status == ChangeStatus::Failed {
                item.status = ChangeStatus::Pending;
                item.retry_count = 0;
                item.last_error = None;
                rearmed.push(item.clone());
            }
        }

        if !rearmed.is_empty() {
            self.commit(next)?;
        }
        Ok(rearmed)
    }

    /// Remove an item; unknown ids are a no-op
    pub fn remove(&mut self, id: &ChangeId) -> Result<Option<PendingChange>> {
        let Some(index) = self.items.iter().position(|item| item.id == *id) else {
            return Ok(None);
        };

        let mut next = self.items.clone();
        let removed = next.remove(index);
        self.commit(next)?;
        Ok(Some(removed))
    }

    /// Remove every item with the given status; returns how many were removed
    pub fn remove_status(&mut self, status: ChangeStatus) -> Result<usize> {
        let next = self
            .items
            .iter()
            .filter(|item| item.status != status)
            .cloned()
            .collect::<Vec<_>>();
        let removed = self.items.len() - next.len();
        if removed > 0 {
            self.commit(next)?;
        }
        Ok(removed)
    }

    /// Remove everything
    pub fn clear(&mut self) -> Result<()> {
        self.commit(Vec::new())
    }

    fn commit(&mut self, next: Vec<PendingChange>) -> Result<()> {
        self.persist(&next)?;
        self.items = next;
        Ok(())
    }

    fn persist(&self, items: &[PendingChange]) -> Result<()> {
        store::save_json(self.store.as_ref(), QUEUE_KEY, items)
    }
}
