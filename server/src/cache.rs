//! In-memory fleet state: bot → shard → status.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::config::Topology;
use crate::types::{BotId, ShardId, ShardStatus, StatusUpdate};

/// Last known status of every reported shard.
///
/// Holds an entry for every bot in the topology from construction on.
/// Bot entries are never removed; shard entries are only added or
/// overwritten. Only the state engine mutates the live cache.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatusCache {
    bots: BTreeMap<BotId, BTreeMap<ShardId, ShardStatus>>,
}

impl StatusCache {
    /// Empty cache with one (empty) entry per bot in `topology`.
    pub fn new(topology: &Topology) -> Self {
        let mut cache = Self::default();
        cache.fill_topology(topology);
        cache
    }

    /// Add any bot from `topology` that has no entry yet.
    pub fn fill_topology(&mut self, topology: &Topology) {
        for bot in topology.bot_ids() {
            self.bots.entry(bot).or_default();
        }
    }

    pub fn apply(&mut self, update: &StatusUpdate) {
        self.bots
            .entry(update.bot)
            .or_default()
            .insert(update.shard, update.status);
    }

    /// Status of one shard; `None` when never reported.
    #[cfg(test)]
    pub fn get(&self, bot: BotId, shard: ShardId) -> Option<ShardStatus> {
        self.bots.get(&bot)?.get(&shard).copied()
    }

    pub fn bot_count(&self) -> usize {
        self.bots.len()
    }

    pub fn shard_count(&self) -> usize {
        self.bots.values().map(BTreeMap::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topology() -> Topology {
        Topology {
            total_shards: 10,
            patron_bots: 2,
            patron_shards: 5,
        }
    }

    #[test]
    fn test_prepopulated() {
        let cache = StatusCache::new(&topology());
        assert_eq!(cache.bot_count(), 3);
        assert_eq!(cache.shard_count(), 0);
        assert_eq!(
            serde_json::to_value(&cache).unwrap(),
            serde_json::json!({ "0": {}, "1": {}, "2": {} })
        );
    }

    #[test]
    fn test_apply_overwrites() {
        let mut cache = StatusCache::new(&topology());
        cache.apply(&StatusUpdate {
            bot: 0,
            shard: 3,
            status: 2,
        });
        cache.apply(&StatusUpdate {
            bot: 0,
            shard: 3,
            status: 4,
        });
        assert_eq!(cache.get(0, 3), Some(4));
        assert_eq!(cache.get(0, 4), None);
        assert_eq!(cache.shard_count(), 1);
    }

    #[test]
    fn test_fill_topology_keeps_existing() {
        let mut cache = StatusCache::new(&Topology {
            total_shards: 10,
            patron_bots: 4,
            patron_shards: 5,
        });
        cache.apply(&StatusUpdate {
            bot: 4,
            shard: 1,
            status: 1,
        });

        // Shrinking the topology never drops bots.
        cache.fill_topology(&topology());
        assert_eq!(cache.bot_count(), 5);
        assert_eq!(cache.get(4, 1), Some(1));
    }
}
