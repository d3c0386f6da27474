use crate::worker::WorkerHandle;
use gridgate_common::{GridgateError, InstanceId, Result, Topology};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Full slot scans attempted by [`LoadBalancer::pick`] before giving up
pub const MAX_SCANS: u32 = 32;

/// Pause between two unsuccessful scans
pub const SCAN_BACKOFF: Duration = Duration::from_millis(250);

/// Round-robin load balancer over a fixed-size worker slot table.
///
/// Slot `i` belongs to the worker with instance id `hot_standby_count + i`.
/// Gateway ids never occupy a slot. Registration replaces a single slot under
/// its own lock; the round-robin cursor is the only state shared by all
/// pickers and is advanced with an atomic increment.
pub struct LoadBalancer {
    slots: Box<[RwLock<Option<WorkerHandle>>]>,
    cursor: AtomicUsize,
    topology: Topology,
}

impl LoadBalancer {
    /// Create a load balancer with one empty slot per configured worker
    pub fn new(topology: Topology) -> Self {
        let slots = (0..topology.server_count)
            .map(|_| RwLock::new(None))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            slots,
            cursor: AtomicUsize::new(0),
            topology,
        }
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Place a worker into its id-derived slot.
    ///
    /// Returns `false` if the worker's id is not a worker id in this topology.
    pub fn register(&self, worker: WorkerHandle) -> bool {
        let id = worker.instance_id();
        match self.topology.slot_of(id) {
            Some(slot) => {
                *self.slots[slot].write() = Some(worker);
                debug!("Registered worker {} in slot {}", id, slot);
                true
            }
            None => {
                warn!("Ignoring registration of instance {} outside the worker range", id);
                false
            }
        }
    }

    /// Clear the slot of a worker. Only the registered handle is removed, so a
    /// stale deregistration cannot evict a replacement.
    pub fn deregister(&self, worker: &WorkerHandle) -> bool {
        let Some(slot) = self.topology.slot_of(worker.instance_id()) else {
            return false;
        };
        let mut current = self.slots[slot].write();
        match current.as_ref() {
            Some(registered) if Arc::ptr_eq(registered, worker) => {
                *current = None;
                true
            }
            _ => false,
        }
    }

    /// Direct slot lookup. `None` for ids outside the worker range and for
    /// empty slots; neither is an error.
    pub fn pick_by_id(&self, id: InstanceId) -> Option<WorkerHandle> {
        let slot = self.topology.slot_of(id)?;
        self.slots[slot].read().clone()
    }

    /// One full scan from the next cursor position.
    ///
    /// Returns the first occupied slot whose worker reports itself up.
    pub fn try_pick(&self) -> Option<WorkerHandle> {
        let len = self.slots.len();
        if len == 0 {
            return None;
        }

        let start = self.cursor.fetch_add(1, Ordering::Relaxed) % len;
        (0..len).find_map(|offset| {
            let slot = self.slots[(start + offset) % len].read();
            slot.as_ref().filter(|w| w.is_up()).cloned()
        })
    }

    /// Pick a healthy worker, waiting for one to appear.
    ///
    /// Scans up to [`MAX_SCANS`] times with [`SCAN_BACKOFF`] between scans,
    /// so a caller blocks for at most about 8 seconds. Exhausting the budget
    /// yields [`GridgateError::NoWorkersAvailable`], which callers must
    /// surface to the user instead of retrying.
    pub async fn pick(&self) -> Result<WorkerHandle> {
        for scan in 1..=MAX_SCANS {
            if let Some(worker) = self.try_pick() {
                return Ok(worker);
            }
            debug!("No worker available on scan {}/{}", scan, MAX_SCANS);
            tokio::time::sleep(SCAN_BACKOFF).await;
        }

        warn!("No workers available after {} scans", MAX_SCANS);
        Err(GridgateError::NoWorkersAvailable { scans: MAX_SCANS })
    }

    /// Registered workers in slot order
    pub fn workers(&self) -> Vec<WorkerHandle> {
        self.slots.iter().filter_map(|s| s.read().clone()).collect()
    }
}
