//! Keyed event state with functional patches.
//!
//! Every update is a pure function of the key's current value. The store
//! applies it under a single lock, appends it to the key's patch log, bumps the
//! global sequence number and broadcasts the new value before releasing the
//! lock, so subscribers observe updates in application order.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;

pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

type Patch = Arc<dyn Fn(Option<&Value>) -> Value + Send + Sync>;

/// Change notification pushed to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventUpdate {
    pub seq: u64,
    pub key: String,
    pub value: Value,
}

/// Point-in-time copy of every key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventSnapshot {
    /// Sequence number of the last update included in the snapshot.
    pub sequence: u64,
    pub state: BTreeMap<String, Value>,
}

impl EventSnapshot {
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.state.get(key)
    }

    #[must_use]
    pub fn to_json(&self) -> Value {
        Value::Object(self.state.clone().into_iter().collect())
    }
}

#[derive(Default)]
struct Inner {
    state: BTreeMap<String, Value>,
    log: HashMap<String, Vec<Patch>>,
    seq: u64,
}

/// Cloneable handle to one run's event state.
#[derive(Clone)]
pub struct EventStore {
    inner: Arc<Mutex<Inner>>,
    tx: broadcast::Sender<EventUpdate>,
}

impl fmt::Debug for EventStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock();
        f.debug_struct("EventStore")
            .field("keys", &inner.state.keys().collect::<Vec<_>>())
            .field("sequence", &inner.seq)
            .field("subscribers", &self.tx.receiver_count())
            .finish()
    }
}

impl Default for EventStore {
    fn default() -> Self {
        Self::new()
    }
}

impl EventStore {
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_EVENT_CAPACITY)
    }

    /// `capacity` bounds how far a subscriber may lag before it starts
    /// missing notifications.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            tx,
        }
    }

    // A patch that panics leaves the state untouched, so a poisoned lock is
    // still consistent.
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply `patch` to the value under `key` and return the new value.
    pub fn update<F>(&self, key: impl Into<String>, patch: F) -> Value
    where
        F: Fn(Option<&Value>) -> Value + Send + Sync + 'static,
    {
        let key = key.into();
        let patch: Patch = Arc::new(patch);

        let mut inner = self.lock();
        let next = patch(inner.state.get(&key));
        inner.state.insert(key.clone(), next.clone());
        inner.log.entry(key.clone()).or_default().push(patch);
        inner.seq += 1;
        let seq = inner.seq;

        // No subscribers is fine; lagging ones resync from `snapshot()`.
        let _ = self.tx.send(EventUpdate {
            seq,
            key: key.clone(),
            value: next.clone(),
        });
        drop(inner);

        tracing::trace!(key = %key, seq, "event state updated");
        next
    }

    /// Typed variant of [`update`](Self::update).
    ///
    /// An absent key starts from `T::default()`. A value that does not
    /// deserialize as `T`, or a result that fails to serialize, leaves the
    /// current value in place.
    pub fn update_typed<T, F>(&self, key: impl Into<String>, transform: F) -> Value
    where
        T: DeserializeOwned + Serialize + Default,
        F: Fn(T) -> T + Send + Sync + 'static,
    {
        self.update(key, move |current| {
            let typed = match current {
                None | Some(Value::Null) => T::default(),
                Some(value) => match T::deserialize(value) {
                    Ok(typed) => typed,
                    Err(_) => return value.clone(),
                },
            };
            match serde_json::to_value(transform(typed)) {
                Ok(next) => next,
                Err(_) => current.cloned().unwrap_or(Value::Null),
            }
        })
    }

    #[must_use]
    pub fn get_state(&self, key: &str) -> Option<Value> {
        self.lock().state.get(key).cloned()
    }

    /// Deserialize the value under `key`, `None` when absent or of another shape.
    #[must_use]
    pub fn get_typed<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let inner = self.lock();
        inner
            .state
            .get(key)
            .and_then(|v| T::deserialize(v).ok())
    }

    #[must_use]
    pub fn snapshot(&self) -> EventSnapshot {
        let inner = self.lock();
        EventSnapshot {
            sequence: inner.seq,
            state: inner.state.clone(),
        }
    }

    /// Fold the logged patches for `key` starting from an absent value.
    #[must_use]
    pub fn replay(&self, key: &str) -> Option<Value> {
        let patches = self.lock().log.get(key).cloned()?;
        let mut value: Option<Value> = None;
        for patch in patches {
            value = Some(patch(value.as_ref()));
        }
        value
    }

    /// Collapse the patch log for `key` into one patch yielding its current
    /// value.
    ///
    /// Streaming writers log one patch per flush, each holding the text so
    /// far, so an uncompacted log grows quadratically with the stream. State,
    /// sequence and subscribers are unaffected, and `replay` still matches the
    /// visible value.
    pub fn compact(&self, key: &str) {
        let mut inner = self.lock();
        let Some(current) = inner.state.get(key).cloned() else {
            return;
        };
        let collapsed: Patch = Arc::new(move |_| current.clone());
        inner.log.insert(key.to_string(), vec![collapsed]);
    }

    #[must_use]
    pub fn patch_count(&self, key: &str) -> usize {
        self.lock().log.get(key).map_or(0, Vec::len)
    }

    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.lock().state.keys().cloned().collect()
    }

    /// Sequence number of the most recent update (0 before any update).
    #[must_use]
    pub fn sequence(&self) -> u64 {
        self.lock().seq
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EventUpdate> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_update_and_get_state() {
        let store = EventStore::new();
        assert_eq!(store.get_state("count"), None);

        let v = store.update("count", |cur| {
            json!(cur.and_then(Value::as_i64).unwrap_or(0) + 1)
        });
        assert_eq!(v, json!(1));
        store.update("count", |cur| {
            json!(cur.and_then(Value::as_i64).unwrap_or(0) + 1)
        });

        assert_eq!(store.get_state("count"), Some(json!(2)));
        assert_eq!(store.patch_count("count"), 2);
        assert_eq!(store.sequence(), 2);
    }

    #[test]
    fn test_replay_matches_state() {
        let store = EventStore::new();
        for word in ["a", "b", "c"] {
            store.update("words", move |cur| {
                let mut list = cur.cloned().unwrap_or_else(|| json!([]));
                if let Some(arr) = list.as_array_mut() {
                    arr.push(json!(word));
                }
                list
            });
        }
        assert_eq!(store.replay("words"), store.get_state("words"));
        assert_eq!(store.replay("missing"), None);
    }

    #[test]
    fn test_compact_keeps_value_and_replay() {
        let store = EventStore::new();
        for word in ["a", "ab", "abc"] {
            store.update("text", move |_| json!(word));
        }
        let seq = store.sequence();
        assert_eq!(store.patch_count("text"), 3);

        store.compact("text");
        assert_eq!(store.patch_count("text"), 1);
        assert_eq!(store.replay("text"), Some(json!("abc")));
        assert_eq!(store.sequence(), seq);

        store.update("text", |v| json!(format!("{}d", v.and_then(Value::as_str).unwrap_or(""))));
        assert_eq!(store.replay("text"), store.get_state("text"));
        assert_eq!(store.patch_count("text"), 2);

        store.compact("missing");
        assert_eq!(store.patch_count("missing"), 0);
    }

    #[test]
    fn test_update_typed_defaults_and_keeps_mismatched_values() {
        let store = EventStore::new();
        store.update_typed::<Vec<String>, _>("names", |mut names| {
            names.push("ada".into());
            names
        });
        assert_eq!(store.get_state("names"), Some(json!(["ada"])));

        store.update("flag", |_| json!("not a number"));
        store.update_typed::<u32, _>("flag", |n| n + 1);
        assert_eq!(store.get_state("flag"), Some(json!("not a number")));
        assert_eq!(store.patch_count("flag"), 2);
    }

    #[tokio::test]
    async fn test_subscribers_receive_ordered_updates() {
        let store = EventStore::with_capacity(16);
        let mut rx = store.subscribe();

        store.update("a", |_| json!(1));
        store.update("b", |_| json!(2));
        store.update("a", |_| json!(3));

        let mut seen = Vec::new();
        for _ in 0..3 {
            let update = rx.recv().await.unwrap();
            seen.push((update.seq, update.key, update.value));
        }
        assert_eq!(
            seen,
            vec![
                (1, "a".to_string(), json!(1)),
                (2, "b".to_string(), json!(2)),
                (3, "a".to_string(), json!(3)),
            ]
        );
    }

    #[test]
    fn test_update_without_subscribers_is_ok() {
        let store = EventStore::with_capacity(1);
        for i in 0..10 {
            store.update("k", move |_| json!(i));
        }
        assert_eq!(store.get_state("k"), Some(json!(9)));
    }

    #[test]
    fn test_clones_share_state() {
        let store = EventStore::new();
        let clone = store.clone();
        clone.update("k", |_| json!("v"));
        assert_eq!(store.snapshot().get("k"), Some(&json!("v")));
        assert_eq!(store.snapshot().sequence, 1);
    }

    #[test]
    fn test_panicking_patch_leaves_state_intact() {
        let store = EventStore::new();
        store.update("k", |_| json!(1));

        let cloned = store.clone();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            cloned.update("k", |_| panic!("bad patch"));
        }));
        assert!(result.is_err());

        assert_eq!(store.get_state("k"), Some(json!(1)));
        assert_eq!(store.patch_count("k"), 1);
        store.update("k", |_| json!(2));
        assert_eq!(store.get_state("k"), Some(json!(2)));
    }

    #[test]
    fn test_concurrent_updates_are_serialized() {
        let store = EventStore::new();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        store.update("n", |cur| {
                            json!(cur.and_then(Value::as_u64).unwrap_or(0) + 1)
                        });
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(store.get_state("n"), Some(json!(800)));
        assert_eq!(store.replay("n"), Some(json!(800)));
        assert_eq!(store.sequence(), 800);
    }

    proptest! {
        #[test]
        fn prop_replay_equals_visible_value(ops in prop::collection::vec((0u8..3, -50i64..50), 1..40)) {
            let store = EventStore::new();
            for (key_idx, delta) in ops {
                let key = format!("k{key_idx}");
                store.update(key, move |cur| {
                    json!(cur.and_then(Value::as_i64).unwrap_or(0) + delta)
                });
            }
            for key in store.keys() {
                prop_assert_eq!(store.replay(&key), store.get_state(&key));
            }
        }
    }
}
