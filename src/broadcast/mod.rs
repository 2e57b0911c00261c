// src/broadcast/mod.rs

//! Process-wide update fan-out.
//!
//! Named topics hold their latest value; a new subscriber first receives a
//! replay of every stored topic (in sorted topic order) and then live events
//! in the single global emission order. Emission is safe from any thread:
//! the worker thread broadcasts while subscribers consume on async tasks.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;

/// One event on the update stream.
///
/// Serializes to the wire shape `{"type": "<topic>Update", "data": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateEvent {
    #[serde(rename = "type")]
    pub kind: String,
    pub data: Value,
}

impl UpdateEvent {
    pub fn new(topic: &str, data: Value) -> Self {
        Self {
            kind: format!("{topic}Update"),
            data,
        }
    }

    /// Render as one server-sent-event frame.
    pub fn to_sse(&self) -> String {
        format!("event:{}\ndata:{}\n\n", self.kind, self.data)
    }
}

/// `None` is the terminal sentinel pushed by [`UpdateBroadcaster::close`].
type SubscriberQueue = mpsc::UnboundedSender<Option<UpdateEvent>>;

#[derive(Debug, Default)]
struct Shared {
    stores: std::collections::BTreeMap<String, Value>,
    subscribers: HashMap<u64, SubscriberQueue>,
    next_id: u64,
}

impl Shared {
    fn push_all(&mut self, event: Option<UpdateEvent>) {
        // Subscribers whose receiving end is gone are pruned on the spot.
        self.subscribers
            .retain(|_, queue| queue.send(event.clone()).is_ok());
    }
}

/// Multi-subscriber broadcaster with replay-on-subscribe.
#[derive(Debug, Clone, Default)]
pub struct UpdateBroadcaster {
    shared: Arc<Mutex<Shared>>,
}

impl UpdateBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        // A poisoning panic mid-broadcast leaves the registry usable.
        self.shared.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Store `value` as the latest snapshot of `topic` and push it to every
    /// subscriber.
    ///
    /// When both the previous and the new value are JSON objects, one
    /// `{key: null}` tombstone event is pushed per key that disappeared,
    /// before the full new snapshot. Subscribers see explicit deletions, not
    /// silently shrinking maps. Value-type changes between broadcasts skip
    /// this synthesis.
    pub fn broadcast(&self, topic: &str, value: Value) {
        let mut shared = self.lock();

        let removed: Vec<String> = match (shared.stores.get(topic), &value) {
            (Some(Value::Object(old)), Value::Object(new)) => old
                .keys()
                .filter(|k| !new.contains_key(*k))
                .cloned()
                .collect(),
            _ => Vec::new(),
        };
        for key in removed {
            let mut tombstone = serde_json::Map::new();
            tombstone.insert(key, Value::Null);
            let event = UpdateEvent::new(topic, Value::Object(tombstone));
            shared.push_all(Some(event));
        }

        shared.stores.insert(topic.to_string(), value.clone());
        shared.push_all(Some(UpdateEvent::new(topic, value)));
    }

    /// Incremental single-key variant: upsert (or delete, when `value` is
    /// `null`) one key inside the stored object of `topic`, and push only
    /// that delta.
    pub fn broadcast_entry(&self, topic: &str, key: &str, value: Value) {
        let mut shared = self.lock();

        let store = shared
            .stores
            .entry(topic.to_string())
            .or_insert_with(|| Value::Object(serde_json::Map::new()));
        if let Value::Object(map) = store {
            if value.is_null() {
                map.remove(key);
            } else {
                map.insert(key.to_string(), value.clone());
            }
        } else {
            debug!(topic, "broadcast_entry on non-object topic; replacing store");
            let mut map = serde_json::Map::new();
            if !value.is_null() {
                map.insert(key.to_string(), value.clone());
            }
            *store = Value::Object(map);
        }

        let mut delta = serde_json::Map::new();
        delta.insert(key.to_string(), value);
        shared.push_all(Some(UpdateEvent::new(topic, Value::Object(delta))));
    }

    /// Coalesced multi-key variant: merge `entries` into the stored object of
    /// `topic` and push one event carrying exactly the changed entries.
    pub fn broadcast_entries(&self, topic: &str, entries: serde_json::Map<String, Value>) {
        if entries.is_empty() {
            return;
        }
        let mut shared = self.lock();

        let store = shared
            .stores
            .entry(topic.to_string())
            .or_insert_with(|| Value::Object(serde_json::Map::new()));
        if let Value::Object(map) = store {
            for (key, value) in &entries {
                if value.is_null() {
                    map.remove(key);
                } else {
                    map.insert(key.clone(), value.clone());
                }
            }
        } else {
            debug!(topic, "broadcast_entries on non-object topic; replacing store");
            let mut map = serde_json::Map::new();
            for (key, value) in &entries {
                if !value.is_null() {
                    map.insert(key.clone(), value.clone());
                }
            }
            *store = Value::Object(map);
        }

        shared.push_all(Some(UpdateEvent::new(topic, Value::Object(entries))));
    }

    /// Open a fresh subscription.
    ///
    /// The current snapshot of every topic is queued immediately, in sorted
    /// topic order, so a subscriber never observes a void state.
    pub fn updates(&self) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut shared = self.lock();

        for (topic, value) in &shared.stores {
            let _ = tx.send(Some(UpdateEvent::new(topic, value.clone())));
        }

        let id = shared.next_id;
        shared.next_id += 1;
        shared.subscribers.insert(id, tx);
        debug!(id, "new update subscription");

        Subscription {
            id,
            rx,
            shared: Arc::clone(&self.shared),
        }
    }

    /// Push the terminal sentinel to every subscriber. Subscriptions yield
    /// `None` once they reach it.
    pub fn close(&self) {
        self.lock().push_all(None);
    }
}

/// One subscriber's ordered, unbounded event queue.
///
/// Dropping the subscription deregisters it from the fan-out set.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    rx: mpsc::UnboundedReceiver<Option<UpdateEvent>>,
    shared: Arc<Mutex<Shared>>,
}

impl Subscription {
    /// Next event, or `None` once the broadcaster closed.
    pub async fn next(&mut self) -> Option<UpdateEvent> {
        match self.rx.recv().await {
            Some(Some(event)) => Some(event),
            // Sentinel or broadcaster dropped: the stream is over.
            Some(None) | None => None,
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.shared
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .subscribers
            .remove(&self.id);
    }
}
