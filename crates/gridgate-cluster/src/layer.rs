use crate::statistics::StatisticsRecord;
use async_trait::async_trait;
use gridgate_common::{InstanceId, Result, Role};

/// Cluster-wide mutual exclusion primitives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockKind {
    /// Held by the instance performing failover supervision
    Manager,
    /// Held by the gateway bound to the public ports
    Http,
}

impl LockKind {
    pub fn name(&self) -> &'static str {
        match self {
            LockKind::Manager => "manager",
            LockKind::Http => "http",
        }
    }
}

/// Shared cluster state as seen by one process.
///
/// Implementations decide where statistics, locks and the stop flag live.
/// Locks are try-locks: acquisition never blocks, and a lock whose holder is
/// no longer running may be taken over. Two processes can therefore believe
/// they own the same lock for a short window; callers tolerate that.
#[async_trait]
pub trait ClusterLayer: Send + Sync {
    /// Stores `record` as the latest statistics of its instance
    async fn publish_statistics(&self, record: StatisticsRecord) -> Result<()>;

    /// Latest record of every instance that ever published
    async fn list_statistics(&self) -> Result<Vec<StatisticsRecord>>;

    async fn is_instance_running(&self, id: InstanceId) -> Result<bool>;

    /// Starts `id` as a new process
    async fn spawn_instance(&self, role: Role, id: InstanceId) -> Result<()>;

    /// Tries to take `kind` for `holder`. `Ok(false)` if another running
    /// instance holds it.
    async fn acquire_lock(&self, kind: LockKind, holder: InstanceId) -> Result<bool>;

    /// Drops `kind` if `holder` holds it
    async fn release_lock(&self, kind: LockKind, holder: InstanceId) -> Result<()>;

    /// Raises the cluster-wide stop flag
    async fn request_stop(&self) -> Result<()>;

    async fn stop_requested(&self) -> Result<bool>;

    async fn acquire_manager_lock(&self, holder: InstanceId) -> Result<bool> {
        self.acquire_lock(LockKind::Manager, holder).await
    }

    async fn acquire_http_lock(&self, holder: InstanceId) -> Result<bool> {
        self.acquire_lock(LockKind::Http, holder).await
    }

    /// Drops every lock held by `holder`
    async fn release_locks(&self, holder: InstanceId) -> Result<()> {
        self.release_lock(LockKind::Manager, holder).await?;
        self.release_lock(LockKind::Http, holder).await
    }
}
