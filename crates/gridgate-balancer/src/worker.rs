use gridgate_common::InstanceId;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A database-executing worker that requests can be routed to
pub trait Worker: Send + Sync {
    fn instance_id(&self) -> InstanceId;

    /// Whether the worker currently accepts requests
    fn is_up(&self) -> bool;
}

pub type WorkerHandle = Arc<dyn Worker>;

/// Worker reachable at a network address, marked up or down by whoever
/// watches its connection.
pub struct RemoteWorker {
    id: InstanceId,
    pub addr: String,
    up: AtomicBool,
}

impl RemoteWorker {
    pub fn new(id: InstanceId, addr: impl Into<String>) -> Self {
        Self {
            id,
            addr: addr.into(),
            up: AtomicBool::new(true),
        }
    }

    pub fn mark_up(&self) {
        self.up.store(true, Ordering::Release);
    }

    pub fn mark_down(&self) {
        self.up.store(false, Ordering::Release);
    }
}

impl Worker for RemoteWorker {
    fn instance_id(&self) -> InstanceId {
        self.id
    }

    fn is_up(&self) -> bool {
        self.up.load(Ordering::Acquire)
    }
}

impl fmt::Debug for RemoteWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteWorker")
            .field("id", &self.id)
            .field("addr", &self.addr)
            .field("up", &self.is_up())
            .finish()
    }
}
