use gridgate_balancer::{LoadBalancer, WorkerHandle};
use gridgate_common::{ClusterConfig, InstanceId, Result};
use gridgate_registry::{PreAuthRegistry, Session, SessionConnection, SessionRegistry};
use std::sync::Arc;

/// Process-wide registries shared with the HTTP and routing layers.
///
/// Constructed once per process and handed to every component that needs it;
/// all operations are safe to call from any task without external locking.
pub struct GatewayCore {
    preauth: Arc<PreAuthRegistry>,
    sessions: Arc<SessionRegistry>,
    balancer: Arc<LoadBalancer>,
}

impl GatewayCore {
    pub fn new(config: &ClusterConfig) -> Self {
        Self {
            preauth: Arc::new(PreAuthRegistry::new(
                config.sso_timeout,
                config.reserved_tokens.clone(),
            )),
            sessions: Arc::new(SessionRegistry::new(
                config.session_timeout,
                config.reserved_tokens.clone(),
            )),
            balancer: Arc::new(LoadBalancer::new(config.topology)),
        }
    }

    /// Issues a single-use SSO token for `username`.
    pub fn issue_preauth(&self, username: impl Into<String>) -> String {
        self.preauth.preauth(username)
    }

    /// Consumes an SSO token, returning the username on first use only.
    pub fn validate_preauth(&self, token: &str) -> Option<String> {
        self.preauth.validate(token)
    }

    pub fn register_session(&self, connection: Arc<dyn SessionConnection>) -> String {
        self.sessions.register(connection)
    }

    /// Looks up a session and acquires a share of it.
    ///
    /// The caller must call [`Session::release`] when done.
    pub fn get_session(&self, guid: &str) -> Option<Arc<Session>> {
        self.sessions.get(guid)
    }

    pub fn remove_session(&self, guid: &str) -> bool {
        self.sessions.remove(guid)
    }

    /// Picks a healthy worker, blocking for up to about 8 seconds.
    pub async fn pick_worker(&self) -> Result<WorkerHandle> {
        self.balancer.pick().await
    }

    pub fn pick_worker_by_id(&self, id: InstanceId) -> Option<WorkerHandle> {
        self.balancer.pick_by_id(id)
    }

    pub fn register_worker(&self, worker: WorkerHandle) -> bool {
        self.balancer.register(worker)
    }

    pub fn deregister_worker(&self, worker: &WorkerHandle) -> bool {
        self.balancer.deregister(worker)
    }

    pub fn preauth_registry(&self) -> &Arc<PreAuthRegistry> {
        &self.preauth
    }

    pub fn session_registry(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    pub fn balancer(&self) -> &Arc<LoadBalancer> {
        &self.balancer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridgate_balancer::RemoteWorker;
    use gridgate_common::Topology;

    struct NullConnection;

    impl SessionConnection for NullConnection {
        fn disconnect(&self) {}

        fn describe(&self) -> String {
            "null".to_string()
        }
    }

    fn core() -> GatewayCore {
        GatewayCore::new(&ClusterConfig {
            topology: Topology::new(1, 2),
            reserved_tokens: vec!["system-a".to_string(), "system-b".to_string()],
            ..Default::default()
        })
    }

    #[test]
    fn test_preauth_flow() {
        let core = core();
        let token = core.issue_preauth("dave");
        assert_eq!(core.validate_preauth(&token).as_deref(), Some("dave"));
        assert_eq!(core.validate_preauth(&token), None);
    }

    #[test]
    fn test_session_flow() {
        let core = core();
        let guid = core.register_session(Arc::new(NullConnection));

        let session = core.get_session(&guid).unwrap();
        assert_eq!(session.share_count(), 1);
        session.release();

        assert!(core.remove_session(&guid));
        assert!(core.get_session(&guid).is_none());
        assert!(core.remove_session(&guid));
    }

    #[tokio::test]
    async fn test_worker_flow() {
        let core = core();
        let worker: WorkerHandle = Arc::new(RemoteWorker::new(2, "10.0.0.2:7000"));
        assert!(core.register_worker(worker.clone()));

        assert_eq!(core.pick_worker().await.unwrap().instance_id(), 2);
        assert!(core.pick_worker_by_id(2).is_some());
        assert!(core.pick_worker_by_id(1).is_none());
        assert!(core.pick_worker_by_id(0).is_none());

        assert!(core.deregister_worker(&worker));
        assert!(core.pick_worker_by_id(2).is_none());
    }
}
