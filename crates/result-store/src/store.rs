//! Bounded Panel Store Implementation

use chrono::{DateTime, Utc};
use lab_protocol::Panel;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info};

/// Default capacity (panels)
pub const DEFAULT_CAPACITY: usize = 10_000;

/// Recency key: collection time (absent sorts oldest), then insertion sequence
type RecencyKey = (Option<DateTime<Utc>>, u64);

struct Entry {
    panel: Arc<Panel>,
    key: RecencyKey,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<String, Entry>,
    /// Ascending recency index; the first element is the eviction candidate
    order: BTreeSet<(RecencyKey, String)>,
    next_seq: u64,
}

/// Result of an insert
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InsertOutcome {
    /// An existing panel with the same id was replaced
    pub replaced: bool,
    /// Id of the panel evicted to stay within capacity, if any. This is the
    /// incoming panel itself when it is older than everything retained.
    pub evicted: Option<String>,
}

/// Store statistics, derived from current contents
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoreStats {
    pub total: usize,
    pub at_risk_count: usize,
    pub capacity: usize,
    pub occupancy_pct: f64,
    pub risk_pct: f64,
}

/// Bounded, thread-safe store of classified panels
pub struct ResultStore {
    inner: RwLock<Inner>,
    capacity: usize,
}

impl ResultStore {
    /// Create a store holding at most `capacity` panels (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        info!("Creating result store with capacity {}", capacity);
        Self {
            inner: RwLock::new(Inner::default()),
            capacity,
        }
    }

    /// Create a store with default capacity (10 000 panels)
    pub fn with_default_capacity() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Insert or replace a panel, evicting the oldest-collected one when full
    pub fn insert(&self, panel: Panel) -> InsertOutcome {
        let mut inner = self.write();
        let mut outcome = InsertOutcome::default();

        let key = (panel.collected_at, inner.next_seq);
        inner.next_seq += 1;
        let id = panel.id.clone();

        if let Some(previous) = inner.entries.remove(&id) {
            inner.order.remove(&(previous.key, id.clone()));
            outcome.replaced = true;
        } else if inner.entries.len() >= self.capacity {
            let oldest_is_older = inner
                .order
                .first()
                .is_some_and(|(oldest, _)| *oldest < key);

            if !oldest_is_older {
                debug!("Panel {} older than all retained panels, not stored", id);
                outcome.evicted = Some(id);
                return outcome;
            }

            if let Some((_, evicted)) = inner.order.pop_first() {
                inner.entries.remove(&evicted);
                debug!("Evicted panel {} to admit {}", evicted, id);
                outcome.evicted = Some(evicted);
            }
        }

        inner.order.insert((key, id.clone()));
        inner.entries.insert(
            id,
            Entry {
                panel: Arc::new(panel),
                key,
            },
        );

        outcome
    }

    /// Look up a panel by id
    pub fn get(&self, id: &str) -> Option<Arc<Panel>> {
        self.read().entries.get(id).map(|e| Arc::clone(&e.panel))
    }

    /// Panels ordered newest collection first, undated panels last
    pub fn list_recent(&self, limit: Option<usize>) -> Vec<Arc<Panel>> {
        self.collect(limit, |_| true)
    }

    /// At-risk panels, same ordering as `list_recent`
    pub fn list_at_risk(&self, limit: Option<usize>) -> Vec<Arc<Panel>> {
        self.collect(limit, |panel| panel.risk_flag())
    }

    fn collect(&self, limit: Option<usize>, filter: impl Fn(&Panel) -> bool) -> Vec<Arc<Panel>> {
        let inner = self.read();
        let mut dated = Vec::new();
        let mut undated = Vec::new();

        for ((collected_at, _), id) in inner.order.iter().rev() {
            let Some(entry) = inner.entries.get(id) else {
                continue;
            };
            if !filter(&entry.panel) {
                continue;
            }
            if collected_at.is_some() {
                dated.push(Arc::clone(&entry.panel));
            } else {
                undated.push(Arc::clone(&entry.panel));
            }
        }

        dated.extend(undated);
        dated.truncate(limit.unwrap_or(usize::MAX));
        dated
    }

    /// Compute statistics over the current contents
    pub fn stats(&self) -> StoreStats {
        let inner = self.read();
        let total = inner.entries.len();
        let at_risk_count = inner
            .entries
            .values()
            .filter(|e| e.panel.risk_flag())
            .count();

        let risk_pct = if total == 0 {
            0.0
        } else {
            at_risk_count as f64 / total as f64 * 100.0
        };

        StoreStats {
            total,
            at_risk_count,
            capacity: self.capacity,
            occupancy_pct: total as f64 / self.capacity as f64 * 100.0,
            risk_pct,
        }
    }

    /// Number of stored panels
    /// Retained panels matching `filter`, counted on demand
    pub fn count_where(&self, filter: impl Fn(&Panel) -> bool) -> usize {
        self.read()
            .entries
            .values()
            .filter(|e| filter(&e.panel))
            .count()
    }

    pub fn len(&self) -> usize {
        self.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of panels
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Remove every panel
    pub fn clear(&self) {
        let mut inner = self.write();
        inner.entries.clear();
        inner.order.clear();
    }
}

impl Default for ResultStore {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;
    use std::collections::HashSet;

    fn at(secs: i64) -> Option<DateTime<Utc>> {
        Some(Utc.timestamp_opt(secs, 0).unwrap())
    }

    fn panel(id: &str, collected_at: Option<DateTime<Utc>>) -> Panel {
        Panel::new(id, collected_at)
    }

    fn ids(panels: &[Arc<Panel>]) -> Vec<String> {
        panels.iter().map(|p| p.id.clone()).collect()
    }

    #[test]
    fn test_capacity_eviction() {
        let store = ResultStore::new(2);
        store.insert(panel("A", at(1)));
        store.insert(panel("B", at(2)));
        let outcome = store.insert(panel("C", at(3)));

        assert_eq!(outcome.evicted.as_deref(), Some("A"));
        assert_eq!(store.len(), 2);
        assert!(store.get("A").is_none());
        assert!(store.get("B").is_some());
        assert!(store.get("C").is_some());
    }

    #[test]
    fn test_replace_same_id() {
        let store = ResultStore::new(10);
        store.insert(panel("A", at(1)).with_subject("first"));
        let outcome = store.insert(panel("A", at(5)).with_subject("second"));

        assert!(outcome.replaced);
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("A").unwrap().subject_id.as_deref(), Some("second"));
    }

    #[test]
    fn test_replace_at_capacity_does_not_evict() {
        let store = ResultStore::new(2);
        store.insert(panel("A", at(1)));
        store.insert(panel("B", at(2)));
        let outcome = store.insert(panel("A", at(3)));

        assert!(outcome.replaced);
        assert!(outcome.evicted.is_none());
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_undated_evicted_first_and_listed_last() {
        let store = ResultStore::new(3);
        store.insert(panel("undated", None));
        store.insert(panel("old", at(10)));
        store.insert(panel("new", at(20)));

        assert_eq!(ids(&store.list_recent(None)), ["new", "old", "undated"]);

        store.insert(panel("newest", at(30)));
        assert!(store.get("undated").is_none());
        assert_eq!(ids(&store.list_recent(Some(2))), ["newest", "new"]);
    }

    #[test]
    fn test_incoming_older_than_all_is_not_stored() {
        let store = ResultStore::new(2);
        store.insert(panel("B", at(5)));
        store.insert(panel("C", at(6)));
        let outcome = store.insert(panel("A", at(1)));

        assert_eq!(outcome.evicted.as_deref(), Some("A"));
        assert!(store.get("A").is_none());
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_list_at_risk_and_stats() {
        let store = ResultStore::new(4);
        store.insert(panel("ok", at(1)));
        store.insert(panel("risk-1", at(2)).with_assessment(vec!["anemia (<11 g/dL)".into()]));
        store.insert(panel("risk-2", at(3)).with_assessment(vec!["leukopenia (<4000)".into()]));

        assert_eq!(ids(&store.list_at_risk(None)), ["risk-2", "risk-1"]);

        let stats = store.stats();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.at_risk_count, 2);
        assert_eq!(stats.capacity, 4);
        assert!((stats.occupancy_pct - 75.0).abs() < 1e-9);
        assert!((stats.risk_pct - 66.666).abs() < 0.01);
    }

    #[test]
    fn test_count_where_follows_replacement_and_eviction() {
        let store = ResultStore::new(2);
        let anemic = |id: &str, t| panel(id, at(t)).with_assessment(vec!["anemia (<11 g/dL)".into()]);

        store.insert(anemic("A", 1));
        store.insert(anemic("A", 2));
        assert_eq!(store.count_where(|p| p.risk_flag()), 1);

        store.insert(anemic("B", 3));
        store.insert(panel("C", at(4)));
        assert_eq!(store.count_where(|p| p.risk_flag()), 1);
        assert_eq!(store.count_where(|p| p.id == "A"), 0);
    }

    #[test]
    fn test_empty_stats() {
        let store = ResultStore::new(0);
        let stats = store.stats();
        assert_eq!(stats.capacity, 1);
        assert_eq!(stats.total, 0);
        assert_eq!(stats.risk_pct, 0.0);
    }

    #[test]
    fn test_concurrent_inserts_respect_capacity() {
        let store = ResultStore::new(50);

        std::thread::scope(|scope| {
            for t in 0..8 {
                let store = &store;
                scope.spawn(move || {
                    for i in 0..200 {
                        store.insert(panel(&format!("{}-{}", t, i), at(i as i64)));
                        assert!(store.len() <= 50);
                        let _ = store.list_recent(Some(5));
                    }
                });
            }
        });

        assert_eq!(store.len(), 50);
    }

    proptest! {
        #[test]
        fn prop_retains_most_recent(
            capacity in 1usize..8,
            timestamps in proptest::collection::vec(proptest::option::of(0i64..20), 0..40),
        ) {
            let store = ResultStore::new(capacity);
            for (i, ts) in timestamps.iter().enumerate() {
                store.insert(panel(&i.to_string(), ts.and_then(|s| at(s))));
                prop_assert!(store.len() <= capacity);
            }

            let mut keyed: Vec<_> = timestamps.iter().enumerate().map(|(i, ts)| ((*ts, i), i)).collect();
            keyed.sort();
            let expected: HashSet<String> = keyed
                .iter()
                .rev()
                .take(capacity)
                .map(|(_, i)| i.to_string())
                .collect();
            let actual: HashSet<String> = ids(&store.list_recent(None)).into_iter().collect();

            prop_assert_eq!(actual, expected);
        }

        #[test]
        fn prop_insert_is_idempotent_by_id(value in 0i64..1000) {
            let store = ResultStore::new(4);
            store.insert(panel("same", at(value)));
            store.insert(panel("same", at(value + 1)));
            prop_assert_eq!(store.len(), 1);
            prop_assert_eq!(store.get("same").unwrap().collected_at, at(value + 1));
        }
    }
}
