//! Server configuration — all from environment variables.

use std::env;
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

/// Fleet shape. Bot `0` is the free-tier fleet, bots `1..=patron_bots` are
/// patron fleets with their own (smaller) shard bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Topology {
    pub total_shards: u32,
    pub patron_bots: u32,
    pub patron_shards: u32,
}

impl Topology {
    /// Highest shard id accepted for `bot`, inclusive.
    pub fn shard_bound(&self, bot: u32) -> u32 {
        if bot == 0 {
            self.total_shards
        } else {
            self.patron_shards
        }
    }

    pub fn bot_ids(&self) -> impl Iterator<Item = u32> {
        0..=self.patron_bots
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub topology: Topology,
    /// Shared secret expected in `/api/webhook/{key}`.
    pub webhook_key: String,
    /// Producer source addresses allowed to submit updates.
    pub allowed_ips: Vec<IpAddr>,
    /// Run the synthetic update generator.
    pub demo: bool,
    /// Listen address for HTTP + WebSocket.
    pub listen_addr: String,
    /// Snapshot file.
    pub state_file: PathBuf,
    /// Static web UI root.
    pub website_dir: PathBuf,
    pub heartbeat: Duration,
    /// Update queue bound; producers wait when it is full.
    pub queue_capacity: usize,
    /// Log level filter.
    pub log_level: String,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build a config from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let topology = Topology {
            total_shards: required(&lookup, "BOT_SHARDS")?,
            patron_bots: required(&lookup, "PATRON_BOTS")?,
            patron_shards: required(&lookup, "PATRON_SHARDS")?,
        };

        let webhook_key = lookup("WEBHOOK_KEY")
            .filter(|k| !k.is_empty())
            .ok_or(ConfigError::Missing("WEBHOOK_KEY"))?;

        let allowed_ips = match lookup("ALLOWED_IPS") {
            Some(raw) => parse_ip_list(&raw)?,
            None => vec![IpAddr::from([127, 0, 0, 1]), IpAddr::from([0u16, 0, 0, 0, 0, 0, 0, 1])],
        };

        let heartbeat_secs: u64 = optional(&lookup, "HEARTBEAT_SECS")?.unwrap_or(5);
        if heartbeat_secs == 0 {
            return Err(ConfigError::Invalid {
                name: "HEARTBEAT_SECS",
                value: "0".into(),
            });
        }

        let queue_capacity: usize = optional(&lookup, "UPDATE_QUEUE_CAPACITY")?.unwrap_or(128);
        if queue_capacity == 0 {
            return Err(ConfigError::Invalid {
                name: "UPDATE_QUEUE_CAPACITY",
                value: "0".into(),
            });
        }

        Ok(Self {
            topology,
            webhook_key,
            allowed_ips,
            demo: optional(&lookup, "ENABLE_DEMO")?.unwrap_or(false),
            listen_addr: lookup("LISTEN_ADDR").unwrap_or_else(|| "0.0.0.0:8080".into()),
            state_file: lookup("STATE_FILE")
                .unwrap_or_else(|| "state.dat".into())
                .into(),
            website_dir: lookup("WEBSITE_DIR")
                .unwrap_or_else(|| "website".into())
                .into(),
            heartbeat: Duration::from_secs(heartbeat_secs),
            queue_capacity,
            log_level: lookup("RUST_LOG")
                .unwrap_or_else(|| "shardwatchd=info,tower_http=info".into()),
        })
    }
}

fn required<T, F>(lookup: &F, name: &'static str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    optional(lookup, name)?.ok_or(ConfigError::Missing(name))
}

fn optional<T, F>(lookup: &F, name: &'static str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { name, value: raw }),
    }
}

fn parse_ip_list(raw: &str) -> Result<Vec<IpAddr>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse().map_err(|_| ConfigError::Invalid {
                name: "ALLOWED_IPS",
                value: s.to_string(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    const BASE: &[(&str, &str)] = &[
        ("BOT_SHARDS", "10"),
        ("PATRON_BOTS", "2"),
        ("PATRON_SHARDS", "5"),
        ("WEBHOOK_KEY", "hunter2"),
    ];

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup_from(BASE)).unwrap();
        assert_eq!(
            config.topology,
            Topology {
                total_shards: 10,
                patron_bots: 2,
                patron_shards: 5
            }
        );
        assert_eq!(config.webhook_key, "hunter2");
        assert_eq!(config.allowed_ips.len(), 2);
        assert!(!config.demo);
        assert_eq!(config.heartbeat, Duration::from_secs(5));
        assert_eq!(config.queue_capacity, 128);
        assert_eq!(config.state_file, PathBuf::from("state.dat"));
    }

    #[test]
    fn test_missing_topology() {
        let err = Config::from_lookup(lookup_from(&BASE[1..])).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("BOT_SHARDS")));
    }

    #[test]
    fn test_invalid_values() {
        let mut pairs = BASE.to_vec();
        pairs.push(("ENABLE_DEMO", "maybe"));
        let err = Config::from_lookup(lookup_from(&pairs)).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "ENABLE_DEMO", .. }));

        let mut pairs = BASE.to_vec();
        pairs.push(("ALLOWED_IPS", "10.0.0.1, not-an-ip"));
        let err = Config::from_lookup(lookup_from(&pairs)).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "ALLOWED_IPS", .. }));
    }

    #[test]
    fn test_ip_list_and_demo() {
        let mut pairs = BASE.to_vec();
        pairs.push(("ALLOWED_IPS", " 10.0.0.1 ,192.168.1.7,"));
        pairs.push(("ENABLE_DEMO", "true"));
        let config = Config::from_lookup(lookup_from(&pairs)).unwrap();
        assert_eq!(
            config.allowed_ips,
            vec![IpAddr::from([10, 0, 0, 1]), IpAddr::from([192, 168, 1, 7])]
        );
        assert!(config.demo);
    }

    #[test]
    fn test_shard_bound() {
        let t = Topology {
            total_shards: 10,
            patron_bots: 2,
            patron_shards: 5,
        };
        assert_eq!(t.shard_bound(0), 10);
        assert_eq!(t.shard_bound(2), 5);
        assert_eq!(t.bot_ids().collect::<Vec<_>>(), vec![0, 1, 2]);
    }
}
