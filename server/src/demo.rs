//! Synthetic update generator for demo deployments.

use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::Topology;
use crate::types::{ShardStatus, StatusUpdate};

/// Seed every bot-0 shard, then report one random shard per `period`.
pub fn spawn(
    topology: Topology,
    updates: mpsc::Sender<StatusUpdate>,
    period: Duration,
) -> JoinHandle<()> {
    warn!("demo mode enabled, injecting synthetic updates");
    tokio::spawn(async move {
        generate(topology.total_shards, updates, period, StdRng::from_entropy()).await;
        info!("demo generator stopped");
    })
}

async fn generate(
    total_shards: u32,
    updates: mpsc::Sender<StatusUpdate>,
    period: Duration,
    mut rng: StdRng,
) {
    for shard in 0..total_shards {
        if updates.send(random_update(&mut rng, shard)).await.is_err() {
            return;
        }
    }

    let mut interval = tokio::time::interval(period);
    loop {
        interval.tick().await;
        let shard = rng.gen_range(0..total_shards.max(1));
        if updates.send(random_update(&mut rng, shard)).await.is_err() {
            return;
        }
    }
}

/// Status in 1..=4; the generator never reports unknown.
fn random_update(rng: &mut StdRng, shard: u32) -> StatusUpdate {
    let status: ShardStatus = rng.gen_range(1..=4);
    StatusUpdate {
        bot: 0,
        shard,
        status,
    }
}
