use crate::launcher::InstanceLauncher;
use crate::layer::{ClusterLayer, LockKind};
use crate::membership::Liveness;
use crate::statistics::StatisticsRecord;
use async_trait::async_trait;
use gridgate_common::{now_millis, InstanceId, Result, Role};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Default)]
struct State {
    statistics: HashMap<InstanceId, StatisticsRecord>,
    launches: HashMap<InstanceId, u64>,
    locks: HashMap<LockKind, InstanceId>,
    stop: bool,
}

impl State {
    fn is_running(&self, liveness: &Liveness, id: InstanceId, now_ms: u64) -> bool {
        liveness.is_running(
            self.statistics.get(&id),
            self.launches.get(&id).copied(),
            now_ms,
        )
    }
}

/// Cluster state shared by the instances of one process.
///
/// Used for embedded topologies, where the whole cluster is a single process,
/// and in tests, where several supervisors share one `LocalCluster`.
pub struct LocalCluster {
    state: Mutex<State>,
    liveness: Liveness,
    launcher: Arc<dyn InstanceLauncher>,
}

impl LocalCluster {
    pub fn new(liveness: Liveness, launcher: Arc<dyn InstanceLauncher>) -> Self {
        Self {
            state: Mutex::new(State::default()),
            liveness,
            launcher,
        }
    }

    /// Current holder of a lock
    pub fn lock_holder(&self, kind: LockKind) -> Option<InstanceId> {
        self.state.lock().locks.get(&kind).copied()
    }

    /// Forgets everything about an instance, as if its process had died long
    /// ago: its statistics, pending launch and locks are dropped.
    pub fn forget(&self, id: InstanceId) {
        let mut state = self.state.lock();
        state.statistics.remove(&id);
        state.launches.remove(&id);
        state.locks.retain(|_, holder| *holder != id);
    }
}

#[async_trait]
impl ClusterLayer for LocalCluster {
    async fn publish_statistics(&self, record: StatisticsRecord) -> Result<()> {
        let mut state = self.state.lock();
        state.launches.remove(&record.instance_id);
        state.statistics.insert(record.instance_id, record);
        Ok(())
    }

    async fn list_statistics(&self) -> Result<Vec<StatisticsRecord>> {
        let state = self.state.lock();
        let mut records: Vec<_> = state.statistics.values().cloned().collect();
        records.sort_by_key(|r| r.instance_id);
        Ok(records)
    }

    async fn is_instance_running(&self, id: InstanceId) -> Result<bool> {
        Ok(self.state.lock().is_running(&self.liveness, id, now_millis()))
    }

    async fn spawn_instance(&self, role: Role, id: InstanceId) -> Result<()> {
        self.launcher.launch(role, id)?;
        self.state.lock().launches.insert(id, now_millis());
        Ok(())
    }

    async fn acquire_lock(&self, kind: LockKind, holder: InstanceId) -> Result<bool> {
        let mut state = self.state.lock();
        let now_ms = now_millis();
        let acquired = match state.locks.get(&kind).copied() {
            None => true,
            Some(current) if current == holder => true,
            Some(current) => {
                let alive = state.is_running(&self.liveness, current, now_ms);
                if !alive {
                    debug!("Taking over {} lock from dead instance {}", kind.name(), current);
                }
                !alive
            }
        };
        if acquired {
            state.locks.insert(kind, holder);
        }
        Ok(acquired)
    }

    async fn release_lock(&self, kind: LockKind, holder: InstanceId) -> Result<()> {
        let mut state = self.state.lock();
        if state.locks.get(&kind) == Some(&holder) {
            state.locks.remove(&kind);
        }
        Ok(())
    }

    async fn request_stop(&self) -> Result<()> {
        self.state.lock().stop = true;
        Ok(())
    }

    async fn stop_requested(&self) -> Result<bool> {
        Ok(self.state.lock().stop)
    }
}
