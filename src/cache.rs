use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use serde_json::Value;
use tracing::trace;

use crate::listeners::{ListenerSet, Subscription};

/// Key of a cached query result, e.g. `labour/<id>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryKey(String);

impl QueryKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn labour(labour_id: &str) -> Self {
        Self(format!("labour/{labour_id}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Entry {
    value: Value,
    stale: bool,
}

/// Everything cached under one key at a point in time, stale flag included.
/// Restoring it puts the key back exactly as it was.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheSnapshot(Option<Entry>);

impl CacheSnapshot {
    pub fn value(&self) -> Option<&Value> {
        self.0.as_ref().map(|e| &e.value)
    }
}

/// Keyed read-model cache. Last writer wins per key.
///
/// `invalidate` keeps the current value (so the UI has something to show)
/// but marks it stale and tells invalidation subscribers, who are expected
/// to refetch and `set` the authoritative value.
pub struct QueryCache {
    entries: RwLock<HashMap<QueryKey, Entry>>,
    invalidations: ListenerSet<QueryKey>,
}

impl QueryCache {
    pub fn new() -> Self {
        Self { entries: RwLock::new(HashMap::new()), invalidations: ListenerSet::new() }
    }

    pub fn get(&self, key: &QueryKey) -> Option<Value> {
        self.entries.read().get(key).map(|e| e.value.clone())
    }

    pub fn set(&self, key: QueryKey, value: Value) {
        trace!(key = %key, "cache set");
        self.entries.write().insert(key, Entry { value, stale: false });
    }

    pub fn remove(&self, key: &QueryKey) -> Option<Value> {
        self.entries.write().remove(key).map(|e| e.value)
    }

    pub fn snapshot(&self, key: &QueryKey) -> CacheSnapshot {
        CacheSnapshot(self.entries.read().get(key).cloned())
    }

    /// Put back what `snapshot` captured. An empty snapshot removes the key.
    pub fn restore(&self, key: QueryKey, snapshot: CacheSnapshot) {
        trace!(key = %key, "cache restore");
        let mut entries = self.entries.write();
        match snapshot.0 {
            Some(entry) => {
                entries.insert(key, entry);
            }
            None => {
                entries.remove(&key);
            }
        }
    }

    pub fn is_stale(&self, key: &QueryKey) -> bool {
        self.entries.read().get(key).is_some_and(|e| e.stale)
    }

    pub fn invalidate(&self, key: &QueryKey) {
        if let Some(entry) = self.entries.write().get_mut(key) {
            entry.stale = true;
        }
        self.invalidations.broadcast(key);
    }

    /// Receive every invalidated key. Not called on subscribe.
    pub fn subscribe_invalidations<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&QueryKey) + Send + Sync + 'static,
    {
        // ListenerSet always fires on subscribe; skip that first call.
        let primed = AtomicBool::new(false);
        self.invalidations.subscribe(|| QueryKey::new(""), move |key| {
            if primed.swap(true, Ordering::AcqRel) {
                listener(key);
            }
        })
    }
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn invalidate_marks_stale_and_notifies() {
        let cache = QueryCache::new();
        let key = QueryKey::labour("l1");
        cache.set(key.clone(), json!({ "id": "l1" }));

        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        let _sub = cache.subscribe_invalidations(move |k| s.lock().push(k.clone()));
        assert!(seen.lock().is_empty());

        cache.invalidate(&key);
        assert!(cache.is_stale(&key));
        assert_eq!(cache.get(&key), Some(json!({ "id": "l1" })));
        assert_eq!(*seen.lock(), vec![key.clone()]);

        cache.set(key.clone(), json!({ "id": "l1", "fresh": true }));
        assert!(!cache.is_stale(&key));
    }

    #[test]
    fn restoring_an_empty_snapshot_removes_the_key() {
        let cache = QueryCache::new();
        let key = QueryKey::new("x");
        let empty = cache.snapshot(&key);
        cache.set(key.clone(), json!(1));
        cache.restore(key.clone(), empty);
        assert_eq!(cache.get(&key), None);
    }

    #[test]
    fn restore_brings_back_the_stale_flag() {
        let cache = QueryCache::new();
        let key = QueryKey::new("x");
        cache.set(key.clone(), json!(1));
        cache.invalidate(&key);
        let snap = cache.snapshot(&key);

        cache.set(key.clone(), json!(2));
        assert!(!cache.is_stale(&key));

        cache.restore(key.clone(), snap);
        assert_eq!(cache.get(&key), Some(json!(1)));
        assert!(cache.is_stale(&key));
    }
}
