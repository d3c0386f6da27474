//! Cluster state kept in a directory shared by the processes of one host.
//!
//! Layout under the root directory:
//!
//! ```text
//! stats/<id>.json     latest StatisticsRecord of instance <id>
//! launches/<id>       spawn time (ms since epoch) of instance <id>
//! locks/<kind>.lock   holder of the manager or http lock, as JSON
//! stop                present once a cluster-wide stop was requested
//! ```
//!
//! Statistics are replaced with write-then-rename so readers never observe a
//! half-written record. Locks are created with `create_new`, which the OS
//! serialises; a lock file whose holder is no longer running is removed and
//! re-created by the next contender.

use crate::launcher::InstanceLauncher;
use crate::layer::{ClusterLayer, LockKind};
use crate::membership::Liveness;
use crate::statistics::StatisticsRecord;
use async_trait::async_trait;
use gridgate_common::{now_millis, GridgateError, InstanceId, Result, Role};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

#[derive(Debug, PartialEq, Eq, Serialize, Deserialize)]
struct LockFile {
    holder: InstanceId,
    acquired_at: u64,
}

pub struct DirectoryCluster {
    root: PathBuf,
    liveness: Liveness,
    launcher: Arc<dyn InstanceLauncher>,
}

impl DirectoryCluster {
    /// Opens (creating if needed) the cluster directory at `root`.
    pub async fn open(
        root: impl Into<PathBuf>,
        liveness: Liveness,
        launcher: Arc<dyn InstanceLauncher>,
    ) -> Result<Self> {
        let root = root.into();
        for dir in ["stats", "launches", "locks"] {
            fs::create_dir_all(root.join(dir)).await?;
        }
        Ok(Self {
            root,
            liveness,
            launcher,
        })
    }

    /// Lowers the cluster-wide stop flag so a stopped cluster can be started
    /// again.
    pub async fn clear_stop(&self) -> Result<()> {
        Self::remove_if_exists(&self.stop_path()).await?;
        Ok(())
    }

    fn stats_path(&self, id: InstanceId) -> PathBuf {
        self.root.join("stats").join(format!("{}.json", id))
    }

    fn launch_path(&self, id: InstanceId) -> PathBuf {
        self.root.join("launches").join(id.to_string())
    }

    fn lock_path(&self, kind: LockKind) -> PathBuf {
        self.root.join("locks").join(format!("{}.lock", kind.name()))
    }

    fn stop_path(&self) -> PathBuf {
        self.root.join("stop")
    }

    async fn read_record(&self, id: InstanceId) -> Result<Option<StatisticsRecord>> {
        match fs::read(self.stats_path(id)).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes).ok()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn read_launch(&self, id: InstanceId) -> Result<Option<u64>> {
        match fs::read_to_string(self.launch_path(id)).await {
            Ok(text) => Ok(text.trim().parse().ok()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// `None` while the file is missing or still being written
    async fn read_lock(&self, kind: LockKind) -> Result<Option<LockFile>> {
        match fs::read(self.lock_path(kind)).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes).ok()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn create_lock(&self, kind: LockKind, holder: InstanceId) -> std::io::Result<()> {
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(self.lock_path(kind))
            .await?;
        let body = serde_json::to_vec(&LockFile {
            holder,
            acquired_at: now_millis(),
        })?;
        file.write_all(&body).await?;
        file.flush().await
    }

    /// Removes the lock file of a dead holder, but only if it still is the
    /// file `seen` was read from.
    ///
    /// The file is first renamed to a tombstone private to `holder`, so two
    /// contenders can never both remove the same file. If the tombstone turns
    /// out to be a newer lock, it is linked back in place.
    ///
    /// # Returns
    /// `true` if the dead holder's lock is gone and `holder` may contend again
    async fn remove_stale_lock(
        &self,
        kind: LockKind,
        holder: InstanceId,
        seen: &LockFile,
    ) -> Result<bool> {
        let path = self.lock_path(kind);
        let tombstone = self.root.join("locks").join(format!(
            "{}.lock.{}.{}.stale",
            kind.name(),
            holder,
            std::process::id()
        ));

        match fs::rename(&path, &tombstone).await {
            Ok(()) => {}
            // Someone else removed it first
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(true),
            Err(e) => return Err(e.into()),
        }

        let moved: Option<LockFile> = match fs::read(&tombstone).await {
            Ok(bytes) => serde_json::from_slice(&bytes).ok(),
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };
        if moved.as_ref() == Some(seen) {
            Self::remove_if_exists(&tombstone).await?;
            return Ok(true);
        }

        // A contender replaced the stale lock before the rename: put it back
        match fs::hard_link(&tombstone, &path).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                warn!("{} lock was re-created while restoring it", kind.name());
            }
            Err(e) => return Err(e.into()),
        }
        Self::remove_if_exists(&tombstone).await?;
        Ok(false)
    }

    async fn remove_if_exists(path: &Path) -> std::io::Result<()> {
        match fs::remove_file(path).await {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl ClusterLayer for DirectoryCluster {
    async fn publish_statistics(&self, record: StatisticsRecord) -> Result<()> {
        let path = self.stats_path(record.instance_id);
        let tmp = path.with_extension(format!("json.{}", record.process_id));
        fs::write(&tmp, serde_json::to_vec(&record)?).await?;
        fs::rename(&tmp, &path).await?;
        Self::remove_if_exists(&self.launch_path(record.instance_id)).await?;
        Ok(())
    }

    async fn list_statistics(&self) -> Result<Vec<StatisticsRecord>> {
        let mut records = Vec::new();
        let mut entries = fs::read_dir(self.root.join("stats")).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match fs::read(&path).await {
                Ok(bytes) => match serde_json::from_slice::<StatisticsRecord>(&bytes) {
                    Ok(record) => records.push(record),
                    Err(e) => warn!("Skipping unreadable statistics {}: {}", path.display(), e),
                },
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            }
        }
        records.sort_by_key(|r| r.instance_id);
        Ok(records)
    }

    async fn is_instance_running(&self, id: InstanceId) -> Result<bool> {
        let record = self.read_record(id).await?;
        let launched = self.read_launch(id).await?;
        Ok(self
            .liveness
            .is_running(record.as_ref(), launched, now_millis()))
    }

    async fn spawn_instance(&self, role: Role, id: InstanceId) -> Result<()> {
        self.launcher.launch(role, id)?;
        fs::write(self.launch_path(id), now_millis().to_string()).await?;
        Ok(())
    }

    async fn acquire_lock(&self, kind: LockKind, holder: InstanceId) -> Result<bool> {
        // Second round only after removing a dead holder's lock file
        for _ in 0..2 {
            match self.create_lock(kind, holder).await {
                Ok(()) => return Ok(true),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {}
                Err(e) => {
                    return Err(GridgateError::Lock(format!(
                        "creating {} lock: {}",
                        kind.name(),
                        e
                    )))
                }
            }

            let Some(current) = self.read_lock(kind).await? else {
                return Ok(false);
            };
            if current.holder == holder {
                return Ok(true);
            }
            if self.is_instance_running(current.holder).await? {
                return Ok(false);
            }

            debug!(
                "Removing {} lock of dead instance {}",
                kind.name(),
                current.holder
            );
            if !self.remove_stale_lock(kind, holder, &current).await? {
                return Ok(false);
            }
        }
        Ok(false)
    }

    async fn release_lock(&self, kind: LockKind, holder: InstanceId) -> Result<()> {
        if let Some(current) = self.read_lock(kind).await? {
            if current.holder == holder {
                Self::remove_if_exists(&self.lock_path(kind)).await?;
            }
        }
        Ok(())
    }

    async fn request_stop(&self) -> Result<()> {
        fs::write(self.stop_path(), now_millis().to_string()).await?;
        Ok(())
    }

    async fn stop_requested(&self) -> Result<bool> {
        Ok(fs::try_exists(self.stop_path()).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn noop_launcher() -> Arc<dyn InstanceLauncher> {
        Arc::new(|_role: Role, _id: InstanceId| -> Result<()> { Ok(()) })
    }

    async fn open(dir: &TempDir) -> DirectoryCluster {
        let liveness = Liveness::new(std::time::Duration::from_millis(1000), std::time::Duration::ZERO);
        DirectoryCluster::open(dir.path(), liveness, noop_launcher())
            .await
            .unwrap()
    }

    async fn lock_holder(cluster: &DirectoryCluster, kind: LockKind) -> Option<InstanceId> {
        cluster.read_lock(kind).await.unwrap().map(|l| l.holder)
    }

    #[tokio::test]
    async fn test_stale_lock_removed_when_unchanged() {
        let dir = TempDir::new().unwrap();
        let cluster = open(&dir).await;
        cluster.create_lock(LockKind::Manager, 5).await.unwrap();
        let seen = cluster.read_lock(LockKind::Manager).await.unwrap().unwrap();

        assert!(cluster.remove_stale_lock(LockKind::Manager, 1, &seen).await.unwrap());
        assert_eq!(lock_holder(&cluster, LockKind::Manager).await, None);
        assert_eq!(std::fs::read_dir(dir.path().join("locks")).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_replaced_lock_is_restored() {
        let dir = TempDir::new().unwrap();
        let cluster = open(&dir).await;
        let seen = LockFile {
            holder: 5,
            acquired_at: 1,
        };
        // Another contender already took over from instance 5
        cluster.create_lock(LockKind::Manager, 2).await.unwrap();

        assert!(!cluster.remove_stale_lock(LockKind::Manager, 1, &seen).await.unwrap());
        assert_eq!(lock_holder(&cluster, LockKind::Manager).await, Some(2));
        assert_eq!(std::fs::read_dir(dir.path().join("locks")).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_stale_lock_already_gone() {
        let dir = TempDir::new().unwrap();
        let cluster = open(&dir).await;
        let seen = LockFile {
            holder: 5,
            acquired_at: 1,
        };
        assert!(cluster.remove_stale_lock(LockKind::Http, 1, &seen).await.unwrap());
    }
}
