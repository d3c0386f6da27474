use crate::statistics::StatisticsRecord;
use gridgate_common::{staleness_threshold, ClusterConfig, InstanceId};
use std::time::Duration;

/// Outcome of scanning the peers' statistics records.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterCheck {
    /// At least one peer has not refreshed within 1.25 × heartbeat
    pub ensure_needed: bool,
    /// Another instance's record claims the manager role
    pub manager_present: bool,
    /// Ids of the stale peers, ascending
    pub stale_peers: Vec<InstanceId>,
}

impl ClusterCheck {
    /// Evaluates every peer except `self_id`.
    ///
    /// A configured peer that has never published a record counts as stale,
    /// which is how a cold cluster gets its missing instances spawned.
    ///
    /// # Arguments
    /// * `records` - Statistics records of all known instances
    /// * `configured` - Every instance id of the topology
    /// * `self_id` - The evaluating instance, skipped
    /// * `heartbeat` - Configured heartbeat interval
    /// * `now_ms` - Current wall-clock time in milliseconds since the epoch
    pub fn evaluate(
        records: &[StatisticsRecord],
        configured: &[InstanceId],
        self_id: InstanceId,
        heartbeat: Duration,
        now_ms: u64,
    ) -> Self {
        let threshold = staleness_threshold(heartbeat);
        let mut check = ClusterCheck::default();

        for record in records.iter().filter(|r| r.instance_id != self_id) {
            if record.age(now_ms) > threshold {
                check.stale_peers.push(record.instance_id);
            }
            if record.is_manager {
                check.manager_present = true;
            }
        }

        let missing = configured
            .iter()
            .copied()
            .filter(|&id| id != self_id && !records.iter().any(|r| r.instance_id == id));
        check.stale_peers.extend(missing);

        check.stale_peers.sort_unstable();
        check.stale_peers.dedup();
        check.ensure_needed = !check.stale_peers.is_empty();
        check
    }

    /// Recovery runs when a peer is stale and either this instance is the
    /// manager owner or nobody else claims the role.
    pub fn should_recover(&self, is_manager_owner: bool) -> bool {
        self.ensure_needed && (is_manager_owner || !self.manager_present)
    }
}

/// Liveness rule shared by the cluster layer implementations.
///
/// An instance is running if its statistics record is no older than
/// 1.25 × heartbeat, or if it was spawned less than `startup_grace` ago and
/// has not had the chance to publish yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Liveness {
    pub heartbeat: Duration,
    pub startup_grace: Duration,
}

impl Liveness {
    pub fn new(heartbeat: Duration, startup_grace: Duration) -> Self {
        Self {
            heartbeat,
            startup_grace,
        }
    }

    pub fn from_config(config: &ClusterConfig) -> Self {
        Self::new(config.heartbeat, config.startup_grace)
    }

    pub fn is_running(
        &self,
        record: Option<&StatisticsRecord>,
        spawned_at_ms: Option<u64>,
        now_ms: u64,
    ) -> bool {
        let fresh = record
            .map(|r| r.age(now_ms) <= staleness_threshold(self.heartbeat))
            .unwrap_or(false);
        let launching = spawned_at_ms
            .map(|at| gridgate_common::age_millis(at, now_ms) < self.startup_grace)
            .unwrap_or(false);
        fresh || launching
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridgate_common::Role;

    const HEARTBEAT: Duration = Duration::from_millis(1000);
    const NOW: u64 = 1_000_000;

    fn record(id: InstanceId, age_ms: u64, is_manager: bool) -> StatisticsRecord {
        StatisticsRecord {
            instance_id: id,
            role: Role::Gateway,
            process_id: 100 + id,
            last_updated: NOW - age_ms,
            is_manager,
        }
    }

    #[test]
    fn test_all_fresh_needs_nothing() {
        let records = vec![record(0, 0, true), record(1, 900, false), record(2, 1250, false)];
        let check = ClusterCheck::evaluate(&records, &[0, 1, 2], 0, HEARTBEAT, NOW);
        assert!(!check.ensure_needed);
        assert!(check.stale_peers.is_empty());
        assert!(!check.should_recover(true));
    }

    #[test]
    fn test_stale_peer_with_other_manager_does_not_recover() {
        let records = vec![record(0, 0, false), record(1, 1300, false), record(2, 100, true)];
        let check = ClusterCheck::evaluate(&records, &[0, 1, 2], 0, HEARTBEAT, NOW);
        assert!(check.ensure_needed);
        assert!(check.manager_present);
        assert_eq!(check.stale_peers, vec![1]);
        assert!(!check.should_recover(false));
    }

    #[test]
    fn test_stale_peer_without_manager_recovers() {
        let records = vec![record(0, 0, false), record(1, 1300, false)];
        let check = ClusterCheck::evaluate(&records, &[0, 1, 2], 0, HEARTBEAT, NOW);
        assert!(check.ensure_needed);
        assert!(!check.manager_present);
        assert!(check.should_recover(false));
    }

    #[test]
    fn test_manager_owner_recovers_regardless() {
        let records = vec![record(0, 0, true), record(1, 1300, false), record(2, 0, true)];
        let check = ClusterCheck::evaluate(&records, &[0, 1, 2], 0, HEARTBEAT, NOW);
        assert!(check.manager_present);
        assert!(check.should_recover(true));
    }

    #[test]
    fn test_own_record_is_ignored() {
        let records = vec![record(0, 60_000, true)];
        let check = ClusterCheck::evaluate(&records, &[0], 0, HEARTBEAT, NOW);
        assert_eq!(check, ClusterCheck::default());
    }

    #[test]
    fn test_unpublished_peer_is_stale() {
        let records = vec![record(0, 0, true), record(2, 100, false)];
        let check = ClusterCheck::evaluate(&records, &[0, 1, 2, 3], 0, HEARTBEAT, NOW);
        assert!(check.ensure_needed);
        assert_eq!(check.stale_peers, vec![1, 3]);
        assert!(check.should_recover(true));
    }

    #[test]
    fn test_cold_cluster_with_no_records() {
        let check = ClusterCheck::evaluate(&[], &[0, 1, 2], 0, HEARTBEAT, NOW);
        assert!(check.ensure_needed);
        assert!(!check.manager_present);
        assert_eq!(check.stale_peers, vec![1, 2]);
        assert!(check.should_recover(false));
    }

    #[test]
    fn test_liveness() {
        let liveness = Liveness::new(HEARTBEAT, Duration::from_secs(4));
        assert!(liveness.is_running(Some(&record(1, 1250, false)), None, NOW));
        assert!(!liveness.is_running(Some(&record(1, 1251, false)), None, NOW));
        assert!(!liveness.is_running(None, None, NOW));
        assert!(liveness.is_running(None, Some(NOW - 3_999), NOW));
        assert!(!liveness.is_running(None, Some(NOW - 4_000), NOW));
        assert!(liveness.is_running(Some(&record(1, 5_000, false)), Some(NOW - 10), NOW));
    }
}
