//! Wire types: webhook input and observer stream output.
//!
//! Observer stream frames are JSON text:
//! - `{"op":"hello","data":{"totalShards":..,"totalPatrons":..,"patronShards":..,"state":{..}}}`
//! - `{"op":"update","data":{"bot":..,"shard":..,"status":..}}`
//! - `{"op":"tick","data":true}`

use axum::extract::ws::Utf8Bytes;
use serde::{Deserialize, Serialize};

use crate::cache::StatusCache;
use crate::config::Topology;

pub type BotId = u32;
pub type ShardId = u32;
/// Liveness state reported by a shard. `0` means unknown.
pub type ShardStatus = u8;

// ═══════════════════════════════════════════════════════════════
// Producer → server
// ═══════════════════════════════════════════════════════════════

/// Raw webhook body. Signed so that negative ids reach range validation
/// instead of failing to decode.
#[derive(Debug, Deserialize)]
pub struct WebhookBody {
    pub bot: i64,
    pub id: i64,
    pub status: i64,
}

/// A validated report: shard `shard` of bot `bot` is in `status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub bot: BotId,
    pub shard: ShardId,
    pub status: ShardStatus,
}

// ═══════════════════════════════════════════════════════════════
// Server → observer
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Serialize)]
#[serde(tag = "op", content = "data", rename_all = "lowercase")]
pub enum OutboundMessage<'a> {
    Hello(HelloMsg<'a>),
    Update(StatusUpdate),
    Tick(bool),
}

/// First frame on every observer connection: topology plus full state.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HelloMsg<'a> {
    pub total_shards: u32,
    pub total_patrons: u32,
    pub patron_shards: u32,
    pub state: &'a StatusCache,
}

impl<'a> OutboundMessage<'a> {
    pub fn hello(topology: &Topology, state: &'a StatusCache) -> Self {
        OutboundMessage::Hello(HelloMsg {
            total_shards: topology.total_shards,
            total_patrons: topology.patron_bots,
            patron_shards: topology.patron_shards,
            state,
        })
    }

    pub fn tick() -> Self {
        OutboundMessage::Tick(true)
    }

    pub fn op(&self) -> &'static str {
        match self {
            OutboundMessage::Hello(_) => "hello",
            OutboundMessage::Update(_) => "update",
            OutboundMessage::Tick(_) => "tick",
        }
    }

    /// Serialize once into a text frame shareable across connections.
    pub fn encode(&self) -> Result<Utf8Bytes, serde_json::Error> {
        serde_json::to_string(self).map(Utf8Bytes::from)
    }
}
