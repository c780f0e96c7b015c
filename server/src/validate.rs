//! Admission checks for producer submissions.
//!
//! Callers run the checks in a fixed order and the first failure wins:
//! source address, shared key, then (after reading the body) body shape,
//! bot range, shard range.

use std::collections::HashSet;
use std::net::IpAddr;

use serde_json::error::Category;
use subtle::ConstantTimeEq;

use crate::config::{Config, Topology};
use crate::error::Rejection;
use crate::types::{StatusUpdate, WebhookBody};

#[derive(Debug, Clone)]
pub struct Validator {
    topology: Topology,
    key: String,
    allowed: HashSet<IpAddr>,
}

impl Validator {
    pub fn new(topology: Topology, key: impl Into<String>, allowed: &[IpAddr]) -> Self {
        Self {
            topology,
            key: key.into(),
            allowed: allowed.iter().map(|ip| ip.to_canonical()).collect(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.topology, config.webhook_key.clone(), &config.allowed_ips)
    }

    /// Only addresses on the allow-list may submit.
    pub fn check_source(&self, source: IpAddr) -> Result<(), Rejection> {
        let source = source.to_canonical();
        if self.allowed.contains(&source) {
            Ok(())
        } else {
            Err(Rejection::Forbidden(source))
        }
    }

    pub fn check_key(&self, presented: &str) -> Result<(), Rejection> {
        if bool::from(presented.as_bytes().ct_eq(self.key.as_bytes())) {
            Ok(())
        } else {
            Err(Rejection::Unauthorized)
        }
    }

    /// Decode a webhook body and range-check it against the topology.
    pub fn decode(&self, body: &[u8]) -> Result<StatusUpdate, Rejection> {
        let raw: WebhookBody = serde_json::from_slice(body).map_err(|e| match e.classify() {
            // Valid JSON, wrong shape.
            Category::Data => Rejection::Malformed(e.to_string()),
            Category::Io | Category::Syntax | Category::Eof => Rejection::Decode(e.to_string()),
        })?;

        let bot = in_range("bot", raw.bot, self.topology.patron_bots)?;
        let shard = in_range("shard", raw.id, self.topology.shard_bound(bot))?;
        let status = u8::try_from(raw.status)
            .map_err(|_| Rejection::Malformed(format!("status {} is not a status code", raw.status)))?;

        Ok(StatusUpdate { bot, shard, status })
    }
}

fn in_range(what: &'static str, value: i64, max: u32) -> Result<u32, Rejection> {
    u32::try_from(value)
        .ok()
        .filter(|v| *v <= max)
        .ok_or(Rejection::OutOfRange { what, value, max })
}
