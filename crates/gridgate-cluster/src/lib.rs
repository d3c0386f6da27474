//! Gridgate Cluster Membership
//!
//! Everything a process needs to know about its peers:
//!
//! - [`StatisticsRecord`]: the heartbeat snapshot each instance publishes
//! - [`ClusterCheck`]: staleness and manager-presence evaluation
//! - [`ClusterLayer`]: the contract to the shared cluster state (statistics,
//!   liveness, locks, process spawning, cluster-wide stop flag)
//! - [`LocalCluster`] and [`DirectoryCluster`]: in-process and shared-directory
//!   implementations of that contract
//! - [`InstanceLauncher`]: how a missing instance is started as a new process

pub mod directory;
pub mod launcher;
pub mod layer;
pub mod local;
pub mod membership;
pub mod statistics;

pub use directory::DirectoryCluster;
pub use launcher::{CommandLauncher, InstanceLauncher};
pub use layer::{ClusterLayer, LockKind};
pub use local::LocalCluster;
pub use membership::{ClusterCheck, Liveness};
pub use statistics::StatisticsRecord;
