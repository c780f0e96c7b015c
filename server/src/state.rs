//! Shared server state, built once at startup and handed to every handler.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::info;

use crate::config::Config;
use crate::engine::{self, Engine};
use crate::error::PersistError;
use crate::registry::Registry;
use crate::store::SnapshotStore;
use crate::types::StatusUpdate;
use crate::validate::Validator;

/// Shared state accessible from all handlers.
pub struct AppState {
    pub config: Config,
    pub validator: Validator,
    /// Producer side of the update queue.
    pub updates: mpsc::Sender<StatusUpdate>,
    /// Active observer connections.
    pub registry: Arc<Registry>,
}

impl AppState {
    /// Load the snapshot and wire up the queue, registry and engine.
    ///
    /// The returned engine owns the cache and must be spawned by the caller.
    pub fn bootstrap(config: Config) -> Result<(Arc<Self>, Engine), PersistError> {
        let store = SnapshotStore::new(&config.state_file);
        let cache = store.load(&config.topology)?;

        let registry = Arc::new(Registry::new(config.topology, cache.clone()));
        let (updates, queue) = engine::update_queue(config.queue_capacity);
        let engine = Engine::new(cache, store, Arc::clone(&registry), queue, config.heartbeat);

        info!(
            total_shards = config.topology.total_shards,
            patron_bots = config.topology.patron_bots,
            patron_shards = config.topology.patron_shards,
            queue_capacity = config.queue_capacity,
            "state initialized"
        );

        let state = Arc::new(Self {
            validator: Validator::from_config(&config),
            config,
            updates,
            registry,
        });
        Ok((state, engine))
    }
}
