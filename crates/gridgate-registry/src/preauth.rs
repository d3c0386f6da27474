use crate::timeout_registry::{Expiring, TimeoutRegistry};
use std::time::{Duration, Instant};

/// Pending SSO handoff for a user
#[derive(Debug, Clone)]
pub struct PreAuth {
    pub username: String,
    pub created_at: Instant,
}

impl PreAuth {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            created_at: Instant::now(),
        }
    }
}

impl Expiring for PreAuth {
    fn last_active(&self) -> Instant {
        self.created_at
    }
}

/// Single-use SSO pre-authentication tokens.
///
/// A token is consumed by the first successful [`PreAuthRegistry::validate`];
/// unconsumed tokens are evicted by the SSO reaper once older than the SSO
/// timeout. Eviction only drops the key.
pub struct PreAuthRegistry {
    inner: TimeoutRegistry<PreAuth>,
}

impl PreAuthRegistry {
    pub fn new(timeout: Duration, reserved: Vec<String>) -> Self {
        Self {
            inner: TimeoutRegistry::new("sso", timeout, reserved),
        }
    }

    /// Issues a token for `username`.
    pub fn preauth(&self, username: impl Into<String>) -> String {
        self.inner.issue(PreAuth::new(username))
    }

    /// Consumes the token and returns the username it was issued for.
    ///
    /// Returns `None` for unknown, expired and already consumed tokens alike.
    pub fn validate(&self, token: &str) -> Option<String> {
        self.inner.validate(token).map(|p| p.username)
    }

    pub fn remove(&self, token: &str) -> bool {
        self.inner.remove(token)
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

    /// Drops expired tokens, returning how many were evicted.
    pub fn sweep(&self, now: Instant) -> usize {
        self.inner.sweep(now).len()
    }
}
