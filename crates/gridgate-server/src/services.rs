//! Contracts to the collaborators the core drives but does not implement.

use crate::listeners::BoundListeners;
use gridgate_common::Result;
use parking_lot::Mutex;
use std::net::SocketAddr;
use tracing::info;

/// The HTTP layer serving the public and admin listeners.
pub trait HttpService: Send + Sync {
    /// Takes ownership of freshly bound listeners and starts serving them
    fn start(&self, listeners: BoundListeners) -> Result<()>;
}

/// Deployment service refreshed on every heartbeat while this process owns
/// the HTTP role.
pub trait DeploymentHook: Send + Sync {
    fn redeploy(&self);
}

/// Keeps the listeners open without serving them.
///
/// Holding the sockets is what makes HTTP ownership visible to other
/// processes; this is enough for deployments whose HTTP stack runs elsewhere
/// and for tests.
#[derive(Default)]
pub struct HoldingHttpService {
    held: Mutex<Option<BoundListeners>>,
}

impl HoldingHttpService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn local_addrs(&self) -> Vec<SocketAddr> {
        self.held
            .lock()
            .as_ref()
            .map(|l| l.local_addrs())
            .unwrap_or_default()
    }

    pub fn is_serving(&self) -> bool {
        self.held.lock().is_some()
    }
}

impl HttpService for HoldingHttpService {
    fn start(&self, listeners: BoundListeners) -> Result<()> {
        info!("Holding listeners on {:?}", listeners.local_addrs());
        *self.held.lock() = Some(listeners);
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopDeployment;

impl DeploymentHook for NoopDeployment {
    fn redeploy(&self) {}
}
