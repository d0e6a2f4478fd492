//! Conflict resolution strategies and the bounded resolution history

use std::sync::Arc;

use serde_json::Value;

use crate::error::Result;
use crate::models::{
    ConflictDecision, ConflictHistoryEntry, ConflictItem, ResolutionStrategy, ResolvedData,
};
use crate::store::{self, KeyValueStore, HISTORY_KEY};

/// Default number of history entries kept
pub const DEFAULT_HISTORY_LIMIT: usize = 100;

/// Settle one field
pub fn apply_strategy(strategy: ResolutionStrategy, local: &Value, server: &Value) -> Value {
    match strategy {
        ResolutionStrategy::KeepLocal => local.clone(),
        ResolutionStrategy::KeepServer => server.clone(),
        ResolutionStrategy::Merge => {
            if server.is_null() {
                local.clone()
            } else {
                server.clone()
            }
        }
    }
}

/// Produce the final payload for a conflict item
///
/// Each field uses its own decision entry if present, else the item's entry.
/// Returns `None` unless every conflicting field has a strategy. Fields that
/// did not conflict keep their local values.
pub fn resolve(
    item: &ConflictItem,
    local_payload: &Value,
    decision: &ConflictDecision,
) -> Option<ResolvedData> {
    let item_strategy = decision.get(&item.id);

    let strategies = item
        .conflicts
        .iter()
        .map(|conflict| decision.get(&conflict.id).or(item_strategy))
        .collect::<Option<Vec<_>>>()?;

    let mut data = match local_payload {
        Value::Object(_) => local_payload.clone(),
        _ => Value::Object(serde_json::Map::new()),
    };
    if let Value::Object(fields) = &mut data {
        for (conflict, strategy) in item.conflicts.iter().zip(&strategies) {
            fields.insert(
                conflict.field.clone(),
                apply_strategy(*strategy, &conflict.local_value, &conflict.server_value),
            );
        }
    }

    let strategy = item_strategy.unwrap_or_else(|| summarize(&strategies));

    Some(ResolvedData {
        id: item.id.clone(),
        entity: item.entity.clone(),
        data,
        strategy,
    })
}

/// A single strategy describing a per-field choice set; mixed choices count as a merge
fn summarize(strategies: &[ResolutionStrategy]) -> ResolutionStrategy {
    match strategies.split_first() {
        Some((first, rest)) if rest.iter().all(|other| other == first) => *first,
        _ => ResolutionStrategy::Merge,
    }
}

/// Most-recent-last log of resolutions, bounded and persisted
pub struct ConflictHistory {
    store: Arc<dyn KeyValueStore>,
    entries: Vec<ConflictHistoryEntry>,
    limit: usize,
}

impl ConflictHistory {
    /// Load history from storage, trimming it to `limit`
    pub fn load(store: Arc<dyn KeyValueStore>, limit: usize) -> Result<Self> {
        let entries: Vec<ConflictHistoryEntry> =
            store::load_json(store.as_ref(), HISTORY_KEY)?.unwrap_or_default();
        let limit = limit.max(1);
        let mut history = Self {
            store,
            entries,
            limit,
        };
        history.entries = history.bounded(history.entries.clone());
        Ok(history)
    }

    /// Entries, oldest first
    pub fn entries(&self) -> &[ConflictHistoryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append one entry, evicting the oldest beyond the limit
    pub fn record(&mut self, resolutions: Vec<ResolvedData>, now_ms: i64) -> Result<()> {
        if resolutions.is_empty() {
            return Ok(());
        }

        let mut next = self.entries.clone();
        next.push(ConflictHistoryEntry {
            timestamp: now_ms,
            resolutions,
        });
        let next = self.bounded(next);

        store::save_json(self.store.as_ref(), HISTORY_KEY, &next)?;
        self.entries = next;
        Ok(())
    }

    /// Most recently chosen strategy for an entity type
    pub fn strategy_for(&self, entity: &str) -> Option<ResolutionStrategy> {
        self.entries.iter().rev().find_map(|entry| {
            entry
                .resolutions
                .iter()
                .rev()
                .find(|resolved| resolved.entity == entity)
                .map(|resolved| resolved.strategy)
        })
    }

    /// Decision replaying past choices, falling back to `default`
    pub fn auto_decision(
        &self,
        items: &[ConflictItem],
        default: ResolutionStrategy,
    ) -> ConflictDecision {
        items
            .iter()
            .map(|item| {
                let strategy = self.strategy_for(&item.entity).unwrap_or(default);
                (item.id.clone(), strategy)
            })
            .collect()
    }

    fn bounded(&self, mut entries: Vec<ConflictHistoryEntry>) -> Vec<ConflictHistoryEntry> {
        if entries.len() > self.limit {
            let excess = entries.len() - self.limit;
            entries.drain(..excess);
        }
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::conflict_item;
    use crate::models::{NewChange, PendingChange};
    use crate::store::MemoryStore;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn change(entity: &str, payload: Value) -> PendingChange {
        NewChange::update(entity, payload)
            .with_entity_id("5")
            .into_pending(3, 0)
            .unwrap()
    }

    fn resolved(entity: &str, strategy: ResolutionStrategy) -> ResolvedData {
        ResolvedData {
            id: "x".to_string(),
            entity: entity.to_string(),
            data: json!({}),
            strategy,
        }
    }

    #[test]
    fn strategies_match_documented_examples() {
        let local = change("machines", json!({"a": 1, "b": 2}));
        let server = json!({"a": 9, "b": null});
        let item = conflict_item(&local, &server, 0).unwrap();

        let merge = ConflictDecision::new().with(item.id.clone(), ResolutionStrategy::Merge);
        let keep_local = ConflictDecision::new().with(item.id.clone(), ResolutionStrategy::KeepLocal);
        let keep_server =
            ConflictDecision::new().with(item.id.clone(), ResolutionStrategy::KeepServer);

        assert_eq!(
            resolve(&item, &local.payload, &merge).unwrap().data,
            json!({"a": 9, "b": 2})
        );
        assert_eq!(
            resolve(&item, &local.payload, &keep_local).unwrap().data,
            json!({"a": 1, "b": 2})
        );
        assert_eq!(
            resolve(&item, &local.payload, &keep_server).unwrap().data,
            json!({"a": 9, "b": null})
        );
    }

    #[test]
    fn field_entries_override_item_entry() {
        let local = change("machines", json!({"a": 1, "b": 2}));
        let item = conflict_item(&local, &json!({"a": 9, "b": 8}), 0).unwrap();
        let decision = ConflictDecision::new()
            .with(item.id.clone(), ResolutionStrategy::KeepServer)
            .with(format!("{}_b", item.id), ResolutionStrategy::KeepLocal);

        let resolved = resolve(&item, &local.payload, &decision).unwrap();
        assert_eq!(resolved.data, json!({"a": 9, "b": 2}));
        assert_eq!(resolved.strategy, ResolutionStrategy::KeepServer);
    }

    #[test]
    fn partial_decision_resolves_nothing() {
        let local = change("machines", json!({"a": 1, "b": 2}));
        let item = conflict_item(&local, &json!({"a": 9, "b": 8}), 0).unwrap();
        let decision =
            ConflictDecision::new().with(format!("{}_a", item.id), ResolutionStrategy::KeepLocal);

        assert!(resolve(&item, &local.payload, &decision).is_none());
        assert!(resolve(&item, &local.payload, &ConflictDecision::cancelled()).is_none());
    }

    #[test]
    fn mixed_field_strategies_summarize_as_merge() {
        let local = change("machines", json!({"a": 1, "b": 2}));
        let item = conflict_item(&local, &json!({"a": 9, "b": 8}), 0).unwrap();
        let decision = ConflictDecision::new()
            .with(format!("{}_a", item.id), ResolutionStrategy::KeepLocal)
            .with(format!("{}_b", item.id), ResolutionStrategy::KeepServer);

        let resolved = resolve(&item, &local.payload, &decision).unwrap();
        assert_eq!(resolved.strategy, ResolutionStrategy::Merge);
        assert_eq!(resolved.data, json!({"a": 1, "b": 8}));
    }

    #[test]
    fn history_is_bounded() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let mut history = ConflictHistory::load(Arc::clone(&store), DEFAULT_HISTORY_LIMIT).unwrap();

        for index in 0..101 {
            history
                .record(vec![resolved("machines", ResolutionStrategy::KeepLocal)], index)
                .unwrap();
        }

        assert_eq!(history.len(), 100);
        assert_eq!(history.entries()[0].timestamp, 1);

        let reloaded = ConflictHistory::load(store, DEFAULT_HISTORY_LIMIT).unwrap();
        assert_eq!(reloaded.len(), 100);
    }

    #[test]
    fn strategy_for_prefers_most_recent_entry() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let mut history = ConflictHistory::load(store, 10).unwrap();
        history
            .record(vec![resolved("machines", ResolutionStrategy::KeepLocal)], 1)
            .unwrap();
        history
            .record(vec![resolved("alert", ResolutionStrategy::KeepServer)], 2)
            .unwrap();
        history
            .record(vec![resolved("machines", ResolutionStrategy::Merge)], 3)
            .unwrap();

        assert_eq!(history.strategy_for("machines"), Some(ResolutionStrategy::Merge));
        assert_eq!(history.strategy_for("alert"), Some(ResolutionStrategy::KeepServer));
        assert_eq!(history.strategy_for("report"), None);
    }

    #[test]
    fn auto_decision_falls_back_to_default() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let mut history = ConflictHistory::load(store, 10).unwrap();
        history
            .record(vec![resolved("machines", ResolutionStrategy::KeepLocal)], 1)
            .unwrap();

        let machine = change("machines", json!({"a": 1}));
        let report = change("report", json!({"a": 1}));
        let items = vec![
            conflict_item(&machine, &json!({"a": 2}), 0).unwrap(),
            conflict_item(&report, &json!({"a": 2}), 0).unwrap(),
        ];

        let decision = history.auto_decision(&items, ResolutionStrategy::KeepServer);
        assert_eq!(
            decision.get(&machine.id.to_string()),
            Some(ResolutionStrategy::KeepLocal)
        );
        assert_eq!(
            decision.get(&report.id.to_string()),
            Some(ResolutionStrategy::KeepServer)
        );
    }

    #[test]
    fn empty_resolutions_are_not_recorded() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let mut history = ConflictHistory::load(store, 10).unwrap();
        history.record(Vec::new(), 1).unwrap();
        assert!(history.is_empty());
    }
}
