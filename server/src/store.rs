//! Durable snapshot of the status cache.
//!
//! The whole cache is rewritten after every committed update. The cache is
//! bounded by the fleet topology, so a full rewrite stays small and keeps
//! the on-disk format trivially consistent.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::cache::StatusCache;
use crate::config::Topology;
use crate::error::PersistError;

#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[cfg(test)]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the snapshot, or start from an empty topology-sized cache when
    /// no snapshot exists yet. An unreadable or undecodable file is an error.
    pub fn load(&self, topology: &Topology) -> Result<StatusCache, PersistError> {
        let raw = match fs::read(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                warn!(path = %self.path.display(), "no snapshot on disk, starting empty");
                return Ok(StatusCache::new(topology));
            }
            Err(e) => return Err(self.io_error(e)),
        };

        let mut cache: StatusCache =
            bincode::deserialize(&raw).map_err(|source| PersistError::Decode {
                path: self.path.clone(),
                source,
            })?;
        cache.fill_topology(topology);

        info!(
            path = %self.path.display(),
            bots = cache.bot_count(),
            shards = cache.shard_count(),
            "loaded snapshot"
        );
        Ok(cache)
    }

    /// Replace the snapshot with `cache`.
    ///
    /// The cache is encoded on the caller's task; the file write and fsync
    /// run on the blocking pool so the runtime workers never wait on disk.
    pub async fn save(&self, cache: &StatusCache) -> Result<(), PersistError> {
        let bytes = bincode::serialize(cache).map_err(PersistError::Encode)?;
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.write(&bytes))
            .await
            .map_err(PersistError::Task)?
    }

    /// Written to a temporary file in the same directory, synced, then
    /// renamed over the old snapshot. The temporary file is created
    /// owner read/write only, and the rename keeps that mode.
    fn write(&self, bytes: &[u8]) -> Result<(), PersistError> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };

        let mut temp = NamedTempFile::new_in(dir).map_err(|e| self.io_error(e))?;
        temp.write_all(bytes).map_err(|e| self.io_error(e))?;
        temp.as_file().sync_all().map_err(|e| self.io_error(e))?;
        temp.persist(&self.path).map_err(|e| self.io_error(e.error))?;

        debug!(bytes = bytes.len(), "saved snapshot");
        Ok(())
    }

    fn io_error(&self, source: io::Error) -> PersistError {
        PersistError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StatusUpdate;

    fn topology() -> Topology {
        Topology {
            total_shards: 10,
            patron_bots: 2,
            patron_shards: 5,
        }
    }

    #[tokio::test]
    async fn test_missing_file_is_empty_cache() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("state.dat"));

        let cache = store.load(&topology()).unwrap();
        assert_eq!(cache, StatusCache::new(&topology()));
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("state.dat"));

        let mut cache = StatusCache::new(&topology());
        for (bot, shard, status) in [(0, 3, 2), (0, 10, 1), (1, 0, 4), (2, 5, 3)] {
            cache.apply(&StatusUpdate { bot, shard, status });
        }
        store.save(&cache).await.unwrap();

        let loaded = store.load(&topology()).unwrap();
        assert_eq!(loaded, cache);
        assert_eq!(loaded.get(0, 10), Some(1));
    }

    #[tokio::test]
    async fn test_save_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("state.dat"));

        let mut cache = StatusCache::new(&topology());
        cache.apply(&StatusUpdate {
            bot: 0,
            shard: 1,
            status: 1,
        });
        store.save(&cache).await.unwrap();
        cache.apply(&StatusUpdate {
            bot: 0,
            shard: 1,
            status: 3,
        });
        store.save(&cache).await.unwrap();

        assert_eq!(store.load(&topology()).unwrap().get(0, 1), Some(3));
        // Only the snapshot itself remains; temp files were renamed away.
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_load_fills_new_bots() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("state.dat"));
        store.save(&StatusCache::new(&topology())).await.unwrap();

        let grown = Topology {
            patron_bots: 4,
            ..topology()
        };
        let cache = store.load(&grown).unwrap();
        assert_eq!(cache.bot_count(), 5);
    }

    #[tokio::test]
    async fn test_corrupt_file_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.dat");
        fs::write(&path, b"\xff\xff\xff\xff\xff\xff\xff\x7fgarbage").unwrap();

        let err = SnapshotStore::new(&path).load(&topology()).unwrap_err();
        assert!(matches!(err, PersistError::Decode { .. }));
    }

    #[tokio::test]
    async fn test_save_into_missing_dir_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("nope").join("state.dat"));

        let err = store.save(&StatusCache::new(&topology())).await.unwrap_err();
        assert!(matches!(err, PersistError::Io { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_snapshot_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("state.dat"));
        store.save(&StatusCache::new(&topology())).await.unwrap();

        let mode = fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
