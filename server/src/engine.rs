//! State engine: the only writer of the status cache.
//!
//! Drains the update queue one update at a time: apply, persist, then
//! broadcast. The same loop drives the heartbeat, so the engine wakes for
//! exactly two reasons: a queued update or a heartbeat tick.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::cache::StatusCache;
use crate::error::PersistError;
use crate::registry::Registry;
use crate::store::SnapshotStore;
use crate::types::{OutboundMessage, StatusUpdate};

/// Bounded FIFO between producers and the engine. `send` waits while the
/// queue is full.
pub fn update_queue(
    capacity: usize,
) -> (mpsc::Sender<StatusUpdate>, mpsc::Receiver<StatusUpdate>) {
    mpsc::channel(capacity)
}

pub struct Engine {
    cache: StatusCache,
    store: SnapshotStore,
    registry: Arc<Registry>,
    updates: mpsc::Receiver<StatusUpdate>,
    heartbeat: Duration,
}

impl Engine {
    pub fn new(
        cache: StatusCache,
        store: SnapshotStore,
        registry: Arc<Registry>,
        updates: mpsc::Receiver<StatusUpdate>,
        heartbeat: Duration,
    ) -> Self {
        Self {
            cache,
            store,
            registry,
            updates,
            heartbeat,
        }
    }

    /// Run until every producer is gone (`Ok`) or a snapshot write fails.
    pub async fn run(mut self) -> Result<(), PersistError> {
        let mut ticker = time::interval_at(Instant::now() + self.heartbeat, self.heartbeat);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(heartbeat_secs = self.heartbeat.as_secs_f64(), "state engine running");

        loop {
            tokio::select! {
                update = self.updates.recv() => match update {
                    Some(update) => self.commit(update).await?,
                    None => {
                        info!("update queue closed, state engine stopping");
                        return Ok(());
                    }
                },
                _ = ticker.tick() => {
                    self.registry.publish(&OutboundMessage::tick());
                }
            }
        }
    }

    async fn commit(&mut self, update: StatusUpdate) -> Result<(), PersistError> {
        self.cache.apply(&update);
        self.store.save(&self.cache).await?;
        let delivered = self.registry.commit(&update, &self.cache);
        debug!(
            bot = update.bot,
            shard = update.shard,
            status = update.status,
            delivered,
            "update committed"
        );
        Ok(())
    }
}
