use crate::timeout_registry::{Expiring, TimeoutRegistry};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// The client connection behind a session, owned by the HTTP layer.
pub trait SessionConnection: Send + Sync {
    /// Forcibly closes the connection
    fn disconnect(&self);

    /// Short human-readable description used in diagnostic dumps
    fn describe(&self) -> String;
}

/// Stateful handle for an authenticated client connection.
///
/// Every successful [`SessionRegistry::get`] touches the session and bumps its
/// share count; callers must [`Session::release`] what they acquire.
pub struct Session {
    guid: String,
    created_at: Instant,
    last_touched: Mutex<Instant>,
    share_count: AtomicU32,
    disconnected: AtomicBool,
    connection: Arc<dyn SessionConnection>,
}

impl Session {
    fn new(guid: &str, connection: Arc<dyn SessionConnection>) -> Self {
        let now = Instant::now();
        Self {
            guid: guid.to_string(),
            created_at: now,
            last_touched: Mutex::new(now),
            share_count: AtomicU32::new(0),
            disconnected: AtomicBool::new(false),
            connection,
        }
    }

    pub fn guid(&self) -> &str {
        &self.guid
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn last_touched(&self) -> Instant {
        *self.last_touched.lock()
    }

    pub fn share_count(&self) -> u32 {
        self.share_count.load(Ordering::Acquire)
    }

    /// Gives back a share acquired through `get`. Never drops below zero.
    pub fn release(&self) {
        let _ = self
            .share_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    /// Closes the underlying connection. Only the first call has an effect.
    pub fn disconnect(&self) -> bool {
        if self.disconnected.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.connection.disconnect();
        true
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::Acquire)
    }

    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_touched())
    }
}

impl Expiring for Session {
    fn last_active(&self) -> Instant {
        self.last_touched()
    }

    fn touch(&self) {
        *self.last_touched.lock() = Instant::now();
        self.share_count.fetch_add(1, Ordering::AcqRel);
    }
}

impl fmt::Display for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let now = Instant::now();
        write!(
            f,
            "Session[{}] age={}s idle={}s shares={} {}",
            self.guid,
            now.saturating_duration_since(self.created_at).as_secs(),
            self.idle_for(now).as_secs(),
            self.share_count(),
            self.connection.describe()
        )
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("guid", &self.guid)
            .field("share_count", &self.share_count())
            .field("disconnected", &self.is_disconnected())
            .finish()
    }
}

/// Live sessions, evicted and disconnected after the idle timeout.
pub struct SessionRegistry {
    inner: TimeoutRegistry<Arc<Session>>,
}

impl SessionRegistry {
    pub fn new(timeout: Duration, reserved: Vec<String>) -> Self {
        Self {
            inner: TimeoutRegistry::new("session", timeout, reserved),
        }
    }

    /// Registers a session for `connection` and returns its GUID.
    pub fn register(&self, connection: Arc<dyn SessionConnection>) -> String {
        self.inner
            .issue_with(|guid| Arc::new(Session::new(guid, connection)))
    }

    /// Looks up and touches a session.
    ///
    /// A session reaped an instant ago is simply not found.
    pub fn get(&self, guid: &str) -> Option<Arc<Session>> {
        self.inner.get(guid)
    }

    pub fn remove(&self, guid: &str) -> bool {
        self.inner.remove(guid)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Label used in log lines
    pub fn name(&self) -> &'static str {
        self.inner.name()
    }

    pub fn timeout(&self) -> Duration {
        self.inner.timeout()
    }

    pub fn sessions(&self) -> Vec<Arc<Session>> {
        self.inner.values()
    }

    /// Evicts idle sessions and disconnects each one, returning how many were
    /// evicted.
    pub fn sweep(&self, now: Instant) -> usize {
        let evicted = self.inner.sweep(now);
        for session in &evicted {
            debug!("Session {} idle for {:?}, disconnecting", session.guid(), session.idle_for(now));
            session.disconnect();
        }
        evicted.len()
    }
}
