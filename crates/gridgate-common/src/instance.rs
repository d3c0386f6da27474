use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime};

/// Small integer identifying an instance within the configured topology.
pub type InstanceId = u32;

/// Wall-clock time in milliseconds since the Unix epoch.
///
/// Statistics records are compared across processes, so they carry wall-clock
/// timestamps rather than `Instant`s. A clock set before the epoch reads as 0,
/// which makes every record look stale instead of panicking.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Elapsed time between a recorded millisecond timestamp and `now_ms`.
///
/// Timestamps from the future (clock skew between processes) count as zero age.
pub fn age_millis(recorded_ms: u64, now_ms: u64) -> Duration {
    Duration::from_millis(now_ms.saturating_sub(recorded_ms))
}

/// Role an instance plays in the cluster
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Hosts the public HTTP(S)/admin listeners
    Gateway,
    /// Executes database operations, addressed through the load balancer
    Worker,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Gateway => write!(f, "gateway"),
            Role::Worker => write!(f, "worker"),
        }
    }
}

/// Identity of the running process. Immutable for the process lifetime.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InstanceDescriptor {
    pub id: InstanceId,
    pub process_id: u32,
    /// Start time in milliseconds since the Unix epoch
    pub started_at: u64,
    pub role: Role,
    /// Gateway and worker functionality co-reside in this process
    pub embedded: bool,
}

impl InstanceDescriptor {
    pub fn new(id: InstanceId, role: Role, embedded: bool) -> Self {
        Self {
            id,
            process_id: std::process::id(),
            started_at: now_millis(),
            role,
            embedded,
        }
    }

    pub fn is_gateway(&self) -> bool {
        self.role == Role::Gateway
    }
}
