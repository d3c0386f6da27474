use crate::error::{GridgateError, Result};
use crate::instance::{InstanceId, Role};
use std::net::SocketAddr;
use std::time::Duration;

/// Shape of the cluster: how many gateway instances precede the workers.
///
/// Instance ids `[0, hot_standby_count)` are gateways (one HTTP owner plus hot
/// standbys). Ids `[hot_standby_count, hot_standby_count + server_count)` are
/// workers, each occupying one load balancer slot. With `server_count == 0`
/// the topology is embedded: gateways execute database work themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Topology {
    pub hot_standby_count: u32,
    pub server_count: u32,
}

impl Topology {
    pub fn new(hot_standby_count: u32, server_count: u32) -> Self {
        Self {
            hot_standby_count,
            server_count,
        }
    }

    /// Single embedded process, the smallest useful topology
    pub fn standalone() -> Self {
        Self::new(1, 0)
    }

    pub fn instance_count(&self) -> u32 {
        self.hot_standby_count + self.server_count
    }

    pub fn is_embedded(&self) -> bool {
        self.server_count == 0
    }

    pub fn is_multi_instance(&self) -> bool {
        self.instance_count() > 1
    }

    pub fn is_worker_id(&self, id: InstanceId) -> bool {
        id >= self.hot_standby_count && id < self.instance_count()
    }

    /// Load balancer slot for a worker id, `None` for gateway or unknown ids.
    pub fn slot_of(&self, id: InstanceId) -> Option<usize> {
        if self.is_worker_id(id) {
            Some((id - self.hot_standby_count) as usize)
        } else {
            None
        }
    }

    pub fn role_of(&self, id: InstanceId) -> Role {
        if self.is_worker_id(id) {
            Role::Worker
        } else {
            Role::Gateway
        }
    }

    /// Every configured instance id, ascending
    pub fn instance_ids(&self) -> impl Iterator<Item = InstanceId> {
        0..self.instance_count()
    }
}

impl Default for Topology {
    fn default() -> Self {
        Self::standalone()
    }
}

/// Addresses the HTTP owner binds. Any `None` listener is skipped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListenerConfig {
    pub http: Option<SocketAddr>,
    pub https: Option<SocketAddr>,
    pub admin: Option<SocketAddr>,
}

impl ListenerConfig {
    pub fn is_empty(&self) -> bool {
        self.http.is_none() && self.https.is_none() && self.admin.is_none()
    }
}

/// Configuration consumed by the core of a gridgate process.
///
/// Supplied by the CLI; the core treats it as opaque input and only checks it
/// for internal consistency via [`ClusterConfig::validate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterConfig {
    /// Id of this process within the topology
    pub instance_id: InstanceId,
    pub topology: Topology,
    /// Interval between statistics refreshes and peer checks
    ///
    /// Peers whose statistics are older than 1.25 × this value are stale.
    /// Default: 5s
    pub heartbeat: Duration,
    /// Lifetime of a single-use SSO pre-authentication token
    ///
    /// Default: 60s
    pub sso_timeout: Duration,
    /// Idle time after which a session is reaped and disconnected
    ///
    /// Default: 30 minutes
    pub session_timeout: Duration,
    /// Cadence of the diagnostic session dump, `None` to disable
    pub session_dump_interval: Option<Duration>,
    /// System tokens that issued GUIDs must never collide with
    pub reserved_tokens: Vec<String>,
    pub listeners: ListenerConfig,
    /// How long a freshly spawned instance counts as running before it has
    /// published its first statistics record
    ///
    /// Default: 20s
    pub startup_grace: Duration,
}

impl ClusterConfig {
    pub fn role(&self) -> Role {
        self.topology.role_of(self.instance_id)
    }

    /// Dead-peer threshold: 1.25 × heartbeat.
    pub fn staleness_threshold(&self) -> Duration {
        staleness_threshold(self.heartbeat)
    }

    pub fn validate(&self) -> Result<()> {
        if self.heartbeat.is_zero() {
            return Err(GridgateError::InvalidConfig(
                "heartbeat must be greater than zero".to_string(),
            ));
        }
        if self.sso_timeout.is_zero() || self.session_timeout.is_zero() {
            return Err(GridgateError::InvalidConfig(
                "SSO and session timeouts must be greater than zero".to_string(),
            ));
        }
        if self.topology.hot_standby_count == 0 {
            return Err(GridgateError::InvalidConfig(
                "at least one gateway instance is required".to_string(),
            ));
        }
        if self.instance_id >= self.topology.instance_count() {
            return Err(GridgateError::InvalidConfig(format!(
                "instance id {} is outside the topology (0..{})",
                self.instance_id,
                self.topology.instance_count()
            )));
        }
        if self.reserved_tokens.iter().any(|t| t.is_empty()) {
            return Err(GridgateError::InvalidConfig(
                "reserved tokens must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            instance_id: 0,
            topology: Topology::default(),
            heartbeat: Duration::from_secs(5),
            sso_timeout: Duration::from_secs(60),
            session_timeout: Duration::from_secs(30 * 60),
            session_dump_interval: None,
            reserved_tokens: Vec::new(),
            listeners: ListenerConfig::default(),
            startup_grace: Duration::from_secs(20),
        }
    }
}

/// 1.25 × heartbeat, the slack that absorbs scheduling jitter between peers.
pub fn staleness_threshold(heartbeat: Duration) -> Duration {
    heartbeat * 5 / 4
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topology_roles() {
        let topology = Topology::new(2, 3);
        assert_eq!(topology.instance_count(), 5);
        assert_eq!(topology.role_of(0), Role::Gateway);
        assert_eq!(topology.role_of(1), Role::Gateway);
        assert_eq!(topology.role_of(2), Role::Worker);
        assert_eq!(topology.role_of(4), Role::Worker);
        assert!(!topology.is_embedded());
        assert!(topology.is_multi_instance());
    }

    #[test]
    fn test_topology_slots() {
        let topology = Topology::new(2, 3);
        assert_eq!(topology.slot_of(0), None);
        assert_eq!(topology.slot_of(1), None);
        assert_eq!(topology.slot_of(2), Some(0));
        assert_eq!(topology.slot_of(4), Some(2));
        assert_eq!(topology.slot_of(5), None);
    }

    #[test]
    fn test_standalone_is_embedded() {
        let topology = Topology::standalone();
        assert!(topology.is_embedded());
        assert!(!topology.is_multi_instance());
        assert_eq!(topology.instance_ids().collect::<Vec<_>>(), vec![0]);
    }

    #[test]
    fn test_staleness_threshold() {
        assert_eq!(
            staleness_threshold(Duration::from_millis(1000)),
            Duration::from_millis(1250)
        );
    }

    #[test]
    fn test_config_default_is_valid() {
        let config = ClusterConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.heartbeat, Duration::from_secs(5));
        assert_eq!(config.role(), Role::Gateway);
    }

    #[test]
    fn test_config_rejects_out_of_range_instance() {
        let config = ClusterConfig {
            instance_id: 3,
            topology: Topology::new(1, 2),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(GridgateError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_config_rejects_zero_heartbeat() {
        let config = ClusterConfig {
            heartbeat: Duration::ZERO,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
