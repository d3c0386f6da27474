use crate::core::GatewayCore;
use crate::listeners::{bind_listeners, BindOutcome};
use crate::services::{DeploymentHook, HttpService};
use futures::future::join_all;
use gridgate_cluster::{ClusterCheck, ClusterLayer, LockKind, StatisticsRecord};
use gridgate_common::{now_millis, ClusterConfig, InstanceDescriptor, InstanceId, Result, Role};
use gridgate_registry::{run_session_reaper, run_sso_reaper, PoolStatus};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

/// Lifecycle of a supervisor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Starting,
    Running,
    Stopping,
    Stopped,
}

/// External services the supervisor drives.
pub struct Collaborators {
    pub cluster: Arc<dyn ClusterLayer>,
    pub http: Arc<dyn HttpService>,
    pub deployment: Arc<dyn DeploymentHook>,
    /// Connection pools reported in the session dump
    pub pools: Vec<Arc<dyn PoolStatus>>,
}

/// Point-in-time view of a supervisor, for admin endpoints
#[derive(Debug, Clone, Serialize)]
pub struct SupervisorStatus {
    pub descriptor: InstanceDescriptor,
    pub phase: Phase,
    pub http_owner: bool,
    pub manager_owner: bool,
    pub sessions: usize,
    pub preauth_tokens: usize,
    pub workers: Vec<InstanceId>,
}

/// Node Supervisor - negotiates roles and keeps the cluster complete.
///
/// One supervisor runs in every gridgate process. It is responsible for:
///
/// 1. **Role negotiation**: deciding whether this process owns the public
///    HTTP sockets and whether it performs failover supervision
/// 2. **Heartbeat**: publishing this instance's statistics and checking every
///    peer's statistics for staleness
/// 3. **Recovery**: spawning configured instances that are no longer running
/// 4. **Fast failover**: standbys watch for a vanished owner and take over
/// 5. **Shutdown**: reacting to the cluster-wide stop flag
///
/// # Ownership
///
/// The HTTP and manager roles are each guarded by a cluster lock. The lock
/// layer lets a standby take over a lock whose holder stopped publishing
/// statistics, so two processes may briefly both believe they own a role.
/// That window closes once the old owner is gone; it is not detected here.
///
/// # Background Work
///
/// Reapers and watchers run as tasks on a [`TaskTracker`] and stop when the
/// supervisor's [`CancellationToken`] fires. Shutdown closes the tracker and
/// cancels the token without waiting for in-flight work.
pub struct NodeSupervisor {
    config: ClusterConfig,
    descriptor: InstanceDescriptor,
    core: Arc<GatewayCore>,
    collaborators: Collaborators,
    http_owner: AtomicBool,
    manager_owner: AtomicBool,
    reapers_started: AtomicBool,
    phase: Mutex<Phase>,
    /// Serialises recovery passes within this process
    ensure_lock: tokio::sync::Mutex<()>,
    tasks: TaskTracker,
    cancel: CancellationToken,
}

impl NodeSupervisor {
    /// Creates a supervisor for the instance described by `config`.
    ///
    /// # Arguments
    /// * `config` - Validated before anything else happens
    /// * `collaborators` - Cluster layer, HTTP layer, deployment hook and pools
    ///
    /// # Returns
    /// A supervisor in [`Phase::Starting`]; call [`NodeSupervisor::start`] next
    pub fn new(config: ClusterConfig, collaborators: Collaborators) -> Result<Arc<Self>> {
        config.validate()?;

        let descriptor = InstanceDescriptor::new(
            config.instance_id,
            config.role(),
            config.topology.is_embedded(),
        );
        let core = Arc::new(GatewayCore::new(&config));

        Ok(Arc::new(Self {
            config,
            descriptor,
            core,
            collaborators,
            http_owner: AtomicBool::new(false),
            manager_owner: AtomicBool::new(false),
            reapers_started: AtomicBool::new(false),
            phase: Mutex::new(Phase::Starting),
            ensure_lock: tokio::sync::Mutex::new(()),
            tasks: TaskTracker::new(),
            cancel: CancellationToken::new(),
        }))
    }

    pub fn descriptor(&self) -> &InstanceDescriptor {
        &self.descriptor
    }

    pub fn core(&self) -> &Arc<GatewayCore> {
        &self.core
    }

    pub fn is_http_owner(&self) -> bool {
        self.http_owner.load(Ordering::Acquire)
    }

    pub fn is_manager_owner(&self) -> bool {
        self.manager_owner.load(Ordering::Acquire)
    }

    pub fn phase(&self) -> Phase {
        *self.phase.lock()
    }

    fn id(&self) -> InstanceId {
        self.descriptor.id
    }

    fn cluster(&self) -> &Arc<dyn ClusterLayer> {
        &self.collaborators.cluster
    }

    /// Runs the startup sequence.
    ///
    /// # Behavior
    /// - Workers start their registries' reapers and never contend for HTTP
    /// - Gateways try to bind the configured ports; a conflict leaves them
    ///   standby
    /// - Every instance tries to become manager owner
    /// - An instance that owns neither role and knows of no manager runs one
    ///   recovery pass, which bootstraps a cold cluster
    /// - Standbys start watchers that take over a role once its owner is gone
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        info!(
            "Starting {} instance {} (pid {}, embedded: {})",
            self.descriptor.role,
            self.id(),
            self.descriptor.process_id,
            self.descriptor.embedded
        );

        self.publish_statistics().await?;

        match self.descriptor.role {
            Role::Worker => self.start_reapers(),
            Role::Gateway => {
                self.try_become_http_owner().await;
                if self.descriptor.embedded {
                    self.start_reapers();
                }
            }
        }

        self.try_become_manager().await;
        self.publish_statistics().await?;

        let http_owner = self.is_http_owner();
        let manager_owner = self.is_manager_owner();

        if !http_owner && !manager_owner && !self.manager_known().await? {
            info!("No manager known, running bootstrap recovery");
            self.ensure().await?;
        }

        if self.descriptor.is_gateway() && !http_owner {
            self.spawn_http_watcher();
        }
        if !http_owner && !manager_owner && self.config.topology.is_multi_instance() {
            self.spawn_manager_watcher();
        }

        *self.phase.lock() = Phase::Running;
        info!(
            "Instance {} running (http owner: {}, manager owner: {})",
            self.id(),
            http_owner,
            manager_owner
        );
        Ok(())
    }

    /// Runs the heartbeat loop until a stop is observed.
    ///
    /// Each wake publishes this instance's statistics, checks its peers and,
    /// while this process owns HTTP, refreshes deployments. A failure inside
    /// the loop is logged and ends it; restarting the process is left to the
    /// peers' recovery.
    pub async fn run(self: &Arc<Self>) -> Result<()> {
        let result = self.heartbeat_loop().await;
        if let Err(e) = &result {
            error!("Heartbeat loop of instance {} failed: {}", self.id(), e);
        }
        self.finish().await;
        result
    }

    async fn heartbeat_loop(&self) -> Result<()> {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {}
                _ = tokio::time::sleep(self.config.heartbeat) => {}
            }

            if self.cancel.is_cancelled() {
                info!("Instance {} halted", self.id());
                return Ok(());
            }
            if self.cluster().stop_requested().await? {
                info!("Cluster stop requested, instance {} exiting", self.id());
                return Ok(());
            }

            self.heartbeat().await?;
        }
    }

    /// One heartbeat tick
    pub async fn heartbeat(&self) -> Result<()> {
        self.publish_statistics().await?;
        self.check_cluster().await?;
        if self.is_http_owner() {
            self.collaborators.deployment.redeploy();
        }
        Ok(())
    }

    /// Raises the cluster-wide stop flag and wakes the heartbeat loop.
    pub async fn shutdown(&self) -> Result<()> {
        info!("Shutdown requested by instance {}", self.id());
        self.cluster().request_stop().await?;
        self.cancel.cancel();
        Ok(())
    }

    /// Stops this process's loops without touching the cluster-wide flag.
    pub fn halt(&self) {
        self.cancel.cancel();
    }

    async fn finish(&self) {
        *self.phase.lock() = Phase::Stopping;

        // Stop accepting background work and abandon whatever is in flight
        self.tasks.close();
        self.cancel.cancel();

        if let Err(e) = self.cluster().release_locks(self.id()).await {
            warn!("Failed to release locks of instance {}: {}", self.id(), e);
        }
        self.http_owner.store(false, Ordering::Release);
        self.manager_owner.store(false, Ordering::Release);

        *self.phase.lock() = Phase::Stopped;
        info!("Instance {} stopped", self.id());
    }

    /// Checks the peers and runs recovery if needed.
    ///
    /// # Returns
    /// `true` if a recovery pass was triggered
    pub async fn check_cluster(&self) -> Result<bool> {
        let records = self.cluster().list_statistics().await?;
        let configured: Vec<InstanceId> = self.config.topology.instance_ids().collect();
        let check = ClusterCheck::evaluate(
            &records,
            &configured,
            self.id(),
            self.config.heartbeat,
            now_millis(),
        );

        if check.should_recover(self.is_manager_owner()) {
            warn!(
                "Stale peers {:?} detected by instance {}, running recovery",
                check.stale_peers,
                self.id()
            );
            self.ensure().await?;
            return Ok(true);
        }

        if check.ensure_needed {
            debug!(
                "Stale peers {:?}, leaving recovery to the manager",
                check.stale_peers
            );
        }
        Ok(false)
    }

    /// Spawns every configured instance that is not running.
    ///
    /// Missing instances are started in ascending id order. Concurrent calls
    /// are serialised, and because a spawned instance counts as running during
    /// its startup grace, a second pass does not spawn it again. A failed
    /// spawn is logged and does not prevent the remaining spawns.
    ///
    /// # Returns
    /// The ids that were spawned successfully
    pub async fn ensure(&self) -> Result<Vec<InstanceId>> {
        let _guard = self.ensure_lock.lock().await;
        let cluster = self.cluster();

        let candidates: Vec<InstanceId> = self
            .config
            .topology
            .instance_ids()
            .filter(|&id| id != self.id())
            .collect();
        let running = join_all(candidates.iter().map(|&id| cluster.is_instance_running(id))).await;

        let mut missing = Vec::new();
        for (id, running) in candidates.into_iter().zip(running) {
            if !running? {
                missing.push(id);
            }
        }
        missing.sort_unstable();

        let mut spawned = Vec::with_capacity(missing.len());
        for id in missing {
            let role = self.config.topology.role_of(id);
            info!("Instance {} is not running, spawning {}", id, role);
            match cluster.spawn_instance(role, id).await {
                Ok(()) => spawned.push(id),
                Err(e) => error!("Failed to spawn instance {}: {}", id, e),
            }
        }
        Ok(spawned)
    }

    /// Point-in-time status snapshot
    pub fn status(&self) -> SupervisorStatus {
        SupervisorStatus {
            descriptor: self.descriptor.clone(),
            phase: self.phase(),
            http_owner: self.is_http_owner(),
            manager_owner: self.is_manager_owner(),
            sessions: self.core.session_registry().len(),
            preauth_tokens: self.core.preauth_registry().len(),
            workers: self
                .core
                .balancer()
                .workers()
                .iter()
                .map(|w| w.instance_id())
                .collect(),
        }
    }

    async fn publish_statistics(&self) -> Result<()> {
        let record = StatisticsRecord::new(&self.descriptor, self.is_manager_owner());
        self.cluster().publish_statistics(record).await
    }

    async fn manager_known(&self) -> Result<bool> {
        let records = self.cluster().list_statistics().await?;
        Ok(records
            .iter()
            .any(|r| r.instance_id != self.id() && r.is_manager))
    }

    /// Takes the HTTP lock and binds the listeners.
    ///
    /// Bind conflicts and lock failures are expected for standbys: they are
    /// logged and leave this process standby.
    async fn try_become_http_owner(&self) -> bool {
        if self.is_http_owner() {
            return true;
        }

        match self.cluster().acquire_http_lock(self.id()).await {
            Ok(true) => {}
            Ok(false) => return false,
            Err(e) => {
                warn!("Could not acquire HTTP lock: {}", e);
                return false;
            }
        }

        let listeners = match bind_listeners(&self.config.listeners).await {
            Ok(BindOutcome::Bound(listeners)) => listeners,
            Ok(BindOutcome::InUse(addr)) => {
                info!("{} is in use, instance {} stays HTTP standby", addr, self.id());
                self.release_http_lock().await;
                return false;
            }
            Err(e) => {
                warn!("Binding listeners failed, instance {} stays HTTP standby: {}", self.id(), e);
                self.release_http_lock().await;
                return false;
            }
        };

        if let Err(e) = self.collaborators.http.start(listeners) {
            error!("HTTP service failed to start: {}", e);
            self.release_http_lock().await;
            return false;
        }

        self.http_owner.store(true, Ordering::Release);
        self.start_reapers();
        info!("Instance {} is HTTP owner", self.id());
        true
    }

    async fn release_http_lock(&self) {
        if let Err(e) = self.cluster().release_lock(LockKind::Http, self.id()).await {
            warn!("Failed to release HTTP lock: {}", e);
        }
    }

    async fn try_become_manager(&self) -> bool {
        if self.is_manager_owner() {
            return true;
        }

        match self.cluster().acquire_manager_lock(self.id()).await {
            Ok(true) => {
                self.manager_owner.store(true, Ordering::Release);
                info!("Instance {} is manager owner", self.id());
                true
            }
            Ok(false) => false,
            Err(e) => {
                warn!("Could not acquire manager lock: {}", e);
                false
            }
        }
    }

    fn start_reapers(&self) {
        if self.reapers_started.swap(true, Ordering::AcqRel) {
            return;
        }

        self.tasks.spawn(run_sso_reaper(
            Arc::clone(self.core.preauth_registry()),
            self.cancel.child_token(),
        ));
        self.tasks.spawn(run_session_reaper(
            Arc::clone(self.core.session_registry()),
            self.config.session_dump_interval,
            self.collaborators.pools.clone(),
            self.cancel.child_token(),
        ));
    }

    fn spawn_http_watcher(self: &Arc<Self>) {
        let this = Arc::clone(self);
        self.tasks.spawn(async move {
            debug!("Instance {} watching for HTTP owner failure", this.id());
            while this.wait_heartbeat().await {
                if this.try_become_http_owner().await {
                    info!("Instance {} took over the HTTP role", this.id());
                    break;
                }
            }
        });
    }

    fn spawn_manager_watcher(self: &Arc<Self>) {
        let this = Arc::clone(self);
        self.tasks.spawn(async move {
            debug!("Instance {} watching for manager owner failure", this.id());
            while this.wait_heartbeat().await {
                if this.try_become_manager().await {
                    info!("Instance {} took over the manager role", this.id());
                    break;
                }
            }
        });
    }

    /// Sleeps one heartbeat. `false` once cancelled.
    async fn wait_heartbeat(&self) -> bool {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(self.config.heartbeat) => !self.cancel.is_cancelled(),
        }
    }
}

impl std::fmt::Debug for NodeSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeSupervisor")
            .field("descriptor", &self.descriptor)
            .field("phase", &self.phase())
            .field("http_owner", &self.is_http_owner())
            .field("manager_owner", &self.is_manager_owner())
            .finish()
    }
}
