//! Observer connection registry and broadcast fan-out.
//!
//! Every observer gets a bounded outbox drained by its own socket writer.
//! All access to the observer set goes through one mutex, which also holds
//! the latest committed cache snapshot: a new observer's Hello and the
//! fan-out of each commit are serialized against each other, so an observer
//! never misses an update committed after its Hello was built.
//!
//! Observer iteration order is unspecified. Failed observers are removed
//! with `swap_remove`.

use std::sync::{Mutex, MutexGuard, PoisonError};

use axum::extract::ws::Utf8Bytes;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::cache::StatusCache;
use crate::config::Topology;
use crate::types::{OutboundMessage, StatusUpdate};

/// Frames an observer may have queued before it counts as too slow.
pub const OUTBOX_CAPACITY: usize = 64;

struct Observer {
    id: Uuid,
    outbox: mpsc::Sender<Utf8Bytes>,
}

struct Inner {
    observers: Vec<Observer>,
    /// Cache as of the last commit; source for every Hello.
    snapshot: StatusCache,
}

/// Handle returned to a newly registered observer.
pub struct Subscription {
    pub id: Uuid,
    /// Outbound frames, Hello first.
    pub frames: mpsc::Receiver<Utf8Bytes>,
}

pub struct Registry {
    topology: Topology,
    outbox_capacity: usize,
    inner: Mutex<Inner>,
}

impl Registry {
    pub fn new(topology: Topology, snapshot: StatusCache) -> Self {
        Self::with_outbox_capacity(topology, snapshot, OUTBOX_CAPACITY)
    }

    pub fn with_outbox_capacity(
        topology: Topology,
        snapshot: StatusCache,
        outbox_capacity: usize,
    ) -> Self {
        Self {
            topology,
            outbox_capacity: outbox_capacity.max(1),
            inner: Mutex::new(Inner {
                observers: Vec::new(),
                snapshot,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a new observer. Its outbox already holds the Hello frame.
    pub fn add(&self) -> Result<Subscription, serde_json::Error> {
        let id = Uuid::new_v4();
        let (outbox, frames) = mpsc::channel(self.outbox_capacity);

        let mut inner = self.lock();
        let hello = OutboundMessage::hello(&self.topology, &inner.snapshot).encode()?;
        // Fresh channel with capacity >= 1: cannot be full or closed.
        let _ = outbox.try_send(hello);
        inner.observers.push(Observer { id, outbox });

        info!(observer = %id, observers = inner.observers.len(), "observer opened, hello queued");
        Ok(Subscription { id, frames })
    }

    /// Drop an observer. Returns false if it was already gone.
    pub fn remove(&self, id: Uuid) -> bool {
        let mut inner = self.lock();
        match inner.observers.iter().position(|o| o.id == id) {
            Some(idx) => {
                inner.observers.swap_remove(idx);
                info!(observer = %id, observers = inner.observers.len(), "observer closed");
                true
            }
            None => false,
        }
    }

    /// Record a committed update and fan it out.
    ///
    /// `cache` must already contain `update`.
    pub fn commit(&self, update: &StatusUpdate, cache: &StatusCache) -> usize {
        let frame = match OutboundMessage::Update(*update).encode() {
            Ok(frame) => frame,
            Err(e) => {
                error!("update encode error: {e}");
                return 0;
            }
        };
        let snapshot = cache.clone();

        let mut inner = self.lock();
        inner.snapshot = snapshot;
        deliver(&mut inner.observers, &frame, "update")
    }

    /// Serialize `msg` once and deliver it to every observer.
    /// Returns how many observers accepted the frame.
    pub fn publish(&self, msg: &OutboundMessage<'_>) -> usize {
        let frame = match msg.encode() {
            Ok(frame) => frame,
            Err(e) => {
                error!(op = msg.op(), "message encode error: {e}");
                return 0;
            }
        };

        let mut inner = self.lock();
        deliver(&mut inner.observers, &frame, msg.op())
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.lock().observers.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Best-effort fan-out. An observer whose outbox is closed or full is
/// removed; the rest still receive the frame.
fn deliver(observers: &mut Vec<Observer>, frame: &Utf8Bytes, op: &'static str) -> usize {
    let mut delivered = 0;
    let mut idx = 0;
    while idx < observers.len() {
        match observers[idx].outbox.try_send(frame.clone()) {
            Ok(()) => {
                delivered += 1;
                idx += 1;
            }
            Err(e) => {
                let gone = observers.swap_remove(idx);
                let reason = match e {
                    TrySendError::Full(_) => "outbox full",
                    TrySendError::Closed(_) => "connection gone",
                };
                warn!(observer = %gone.id, op, reason, "delivery failed, observer dropped");
            }
        }
    }
    debug!(op, delivered, "broadcast");
    delivered
}

#[cfg(test)]
mod tests {
    use serde_json::Value;

    use super::*;

    fn topology() -> Topology {
        Topology {
            total_shards: 10,
            patron_bots: 2,
            patron_shards: 5,
        }
    }

    fn registry() -> Registry {
        Registry::new(topology(), StatusCache::new(&topology()))
    }

    fn next_json(sub: &mut Subscription) -> Value {
        let frame = sub.frames.try_recv().expect("frame queued");
        serde_json::from_str(frame.as_str()).unwrap()
    }

    fn commit(registry: &Registry, cache: &mut StatusCache, bot: u32, shard: u32, status: u8) -> usize {
        let update = StatusUpdate { bot, shard, status };
        cache.apply(&update);
        registry.commit(&update, cache)
    }

    #[test]
    fn test_hello_first() {
        let registry = registry();
        let mut sub = registry.add().unwrap();

        let hello = next_json(&mut sub);
        assert_eq!(hello["op"], "hello");
        assert_eq!(hello["data"]["totalShards"], 10);
        assert_eq!(hello["data"]["totalPatrons"], 2);
        assert_eq!(hello["data"]["patronShards"], 5);
        assert!(sub.frames.try_recv().is_err());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_hello_reflects_latest_commit() {
        let registry = registry();
        let mut cache = StatusCache::new(&topology());
        commit(&registry, &mut cache, 0, 3, 2);
        commit(&registry, &mut cache, 0, 3, 4);

        let mut sub = registry.add().unwrap();
        let hello = next_json(&mut sub);
        assert_eq!(hello["data"]["state"]["0"]["3"], 4);
    }

    #[test]
    fn test_commit_reaches_every_observer() {
        let registry = registry();
        let mut subs: Vec<_> = (0..3).map(|_| registry.add().unwrap()).collect();
        let mut cache = StatusCache::new(&topology());

        assert_eq!(commit(&registry, &mut cache, 0, 3, 2), 3);

        for sub in &mut subs {
            assert_eq!(next_json(sub)["op"], "hello");
            let update = next_json(sub);
            assert_eq!(update["op"], "update");
            assert_eq!(update["data"]["bot"], 0);
            assert_eq!(update["data"]["shard"], 3);
            assert_eq!(update["data"]["status"], 2);
            assert!(sub.frames.try_recv().is_err());
        }
    }

    #[test]
    fn test_failed_observer_pruned() {
        let registry = registry();
        let mut alive_a = registry.add().unwrap();
        let dead = registry.add().unwrap();
        let mut alive_b = registry.add().unwrap();
        drop(dead.frames);

        assert_eq!(registry.publish(&OutboundMessage::tick()), 2);
        assert_eq!(registry.len(), 2);
        assert!(!registry.remove(dead.id));

        // Later broadcasts reach exactly the survivors.
        assert_eq!(registry.publish(&OutboundMessage::tick()), 2);
        for sub in [&mut alive_a, &mut alive_b] {
            assert_eq!(next_json(sub)["op"], "hello");
            assert_eq!(next_json(sub)["op"], "tick");
            assert_eq!(next_json(sub)["op"], "tick");
        }
    }

    #[test]
    fn test_slow_observer_pruned() {
        let registry = Registry::with_outbox_capacity(topology(), StatusCache::new(&topology()), 2);
        let _stalled = registry.add().unwrap();

        // Hello + one tick fill the outbox; the next tick overflows it.
        assert_eq!(registry.publish(&OutboundMessage::tick()), 1);
        assert_eq!(registry.publish(&OutboundMessage::tick()), 0);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_remove_once() {
        let registry = registry();
        let sub = registry.add().unwrap();
        let other = registry.add().unwrap();

        assert!(registry.remove(sub.id));
        assert!(!registry.remove(sub.id));
        assert_eq!(registry.len(), 1);
        assert!(registry.remove(other.id));
        assert!(registry.is_empty());
    }
}
