use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use gridgate_common::token;
use std::time::{Duration, Instant};

/// An entry that can age out of a [`TimeoutRegistry`].
pub trait Expiring {
    /// Instant from which the entry's age is measured
    fn last_active(&self) -> Instant;

    /// Called on every successful non-destructive lookup
    fn touch(&self) {}
}

impl<T: Expiring> Expiring for std::sync::Arc<T> {
    fn last_active(&self) -> Instant {
        (**self).last_active()
    }

    fn touch(&self) {
        (**self).touch()
    }
}

type TokenGenerator = Box<dyn Fn() -> String + Send + Sync>;

/// Concurrent GUID-keyed map whose entries expire `timeout` after they were
/// last active.
///
/// Expiry is sampling-based: nothing happens until [`TimeoutRegistry::sweep`]
/// runs, which the reaper does every [`crate::sweep_interval`]. The worst-case
/// lifetime of an entry is therefore `timeout + interval`.
///
/// # Thread Safety
///
/// Backed by a [`DashMap`], so every operation may be called concurrently from
/// request handlers and the reaper task. Entries are cloned out of the map;
/// store `Arc`s for payloads with shared mutable state.
pub struct TimeoutRegistry<T> {
    name: &'static str,
    entries: DashMap<String, T>,
    reserved: Vec<String>,
    timeout: Duration,
    generator: TokenGenerator,
}

impl<T> TimeoutRegistry<T>
where
    T: Expiring + Clone,
{
    /// Creates an empty registry.
    ///
    /// # Arguments
    /// * `name` - Label used in log lines
    /// * `timeout` - Age after which an entry is evicted by `sweep`
    /// * `reserved` - System tokens that are never issued
    pub fn new(name: &'static str, timeout: Duration, reserved: Vec<String>) -> Self {
        Self::with_generator(name, timeout, reserved, token::generate)
    }

    /// Creates a registry with a custom token source.
    pub fn with_generator<G>(
        name: &'static str,
        timeout: Duration,
        reserved: Vec<String>,
        generator: G,
    ) -> Self
    where
        G: Fn() -> String + Send + Sync + 'static,
    {
        Self {
            name,
            entries: DashMap::new(),
            reserved,
            timeout,
            generator: Box::new(generator),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Stores `payload` under a freshly issued GUID and returns the GUID.
    pub fn issue(&self, payload: T) -> String {
        self.issue_with(|_| payload)
    }

    /// Issues a GUID and stores the payload built from it.
    ///
    /// Candidates equal to a reserved token or to a live key are discarded and
    /// regenerated. The vacancy check and the insert happen under the same
    /// shard lock, so two concurrent issuers can never share a GUID.
    pub fn issue_with<F>(&self, build: F) -> String
    where
        F: FnOnce(&str) -> T,
    {
        loop {
            let candidate = (self.generator)();
            if token::is_reserved(&self.reserved, &candidate) {
                continue;
            }
            match self.entries.entry(candidate) {
                Entry::Occupied(_) => continue,
                Entry::Vacant(slot) => {
                    let guid = slot.key().clone();
                    slot.insert(build(&guid));
                    return guid;
                }
            }
        }
    }

    /// Removes and returns the entry. Unknown, expired and already consumed
    /// GUIDs all yield `None`.
    pub fn validate(&self, guid: &str) -> Option<T> {
        self.entries.remove(guid).map(|(_, payload)| payload)
    }

    /// Non-destructive lookup that touches the entry on success.
    pub fn get(&self, guid: &str) -> Option<T> {
        self.entries.get(guid).map(|entry| {
            entry.value().touch();
            entry.value().clone()
        })
    }

    /// Removes the entry if present. Always succeeds.
    pub fn remove(&self, guid: &str) -> bool {
        self.entries.remove(guid);
        true
    }

    pub fn contains(&self, guid: &str) -> bool {
        self.entries.contains_key(guid)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Clones every live payload.
    pub fn values(&self) -> Vec<T> {
        self.entries.iter().map(|e| e.value().clone()).collect()
    }

    /// Evicts every entry older than the timeout as of `now` and returns the
    /// evicted payloads.
    ///
    /// Each payload is returned by at most one sweep: the age is re-checked
    /// under the shard lock, so an entry touched after the scan survives and an
    /// entry removed concurrently is skipped.
    pub fn sweep(&self, now: Instant) -> Vec<T> {
        let candidates: Vec<String> = self
            .entries
            .iter()
            .filter(|e| self.is_expired(e.value(), now))
            .map(|e| e.key().clone())
            .collect();

        candidates
            .into_iter()
            .filter_map(|guid| {
                self.entries
                    .remove_if(&guid, |_, payload| self.is_expired(payload, now))
                    .map(|(_, payload)| payload)
            })
            .collect()
    }

    fn is_expired(&self, payload: &T, now: Instant) -> bool {
        now.saturating_duration_since(payload.last_active()) > self.timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::{HashSet, VecDeque};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[derive(Clone)]
    struct Record {
        value: u32,
        at: Instant,
        touches: Arc<AtomicU32>,
    }

    impl Record {
        fn new(value: u32) -> Self {
            Self {
                value,
                at: Instant::now(),
                touches: Arc::new(AtomicU32::new(0)),
            }
        }
    }

    impl Expiring for Record {
        fn last_active(&self) -> Instant {
            self.at
        }

        fn touch(&self) {
            self.touches.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn scripted(tokens: &[&str]) -> impl Fn() -> String + Send + Sync + 'static {
        let queue = Mutex::new(tokens.iter().map(|t| t.to_string()).collect::<VecDeque<_>>());
        move || queue.lock().pop_front().unwrap_or_else(token::generate)
    }

    #[test]
    fn test_issue_skips_reserved_and_live_tokens() {
        let registry = TimeoutRegistry::with_generator(
            "test",
            Duration::from_secs(60),
            vec!["system".to_string(), "admin".to_string()],
            scripted(&["system", "a", "admin", "a", "b"]),
        );

        assert_eq!(registry.issue(Record::new(1)), "a");
        // "admin" is reserved and "a" is live, so the next token issued is "b"
        assert_eq!(registry.issue(Record::new(2)), "b");
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_issued_guids_are_distinct() {
        let registry = TimeoutRegistry::new("test", Duration::from_secs(60), vec![]);
        let guids: HashSet<String> = (0..500).map(|i| registry.issue(Record::new(i))).collect();
        assert_eq!(guids.len(), 500);
        assert_eq!(registry.len(), 500);
    }

    #[test]
    fn test_validate_is_destructive() {
        let registry = TimeoutRegistry::new("test", Duration::from_secs(60), vec![]);
        let guid = registry.issue(Record::new(7));

        assert_eq!(registry.validate(&guid).map(|e| e.value), Some(7));
        assert!(registry.validate(&guid).is_none());
        assert!(registry.validate("never-issued").is_none());
    }

    #[test]
    fn test_get_touches_without_removing() {
        let registry = TimeoutRegistry::new("test", Duration::from_secs(60), vec![]);
        let entry = Record::new(3);
        let touches = entry.touches.clone();
        let guid = registry.issue(entry);

        assert!(registry.get(&guid).is_some());
        assert!(registry.get(&guid).is_some());
        assert_eq!(touches.load(Ordering::Relaxed), 2);
        assert!(registry.contains(&guid));
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn test_remove_is_idempotent() {
        let registry = TimeoutRegistry::new("test", Duration::from_secs(60), vec![]);
        let guid = registry.issue(Record::new(1));
        assert!(registry.remove(&guid));
        assert!(registry.remove(&guid));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_sweep_evicts_only_expired_entries() {
        let registry = TimeoutRegistry::new("test", Duration::from_secs(10), vec![]);
        let mut old = Record::new(1);
        old.at = Instant::now() - Duration::from_secs(11);
        let old_guid = registry.issue(old);
        let fresh_guid = registry.issue(Record::new(2));

        let evicted = registry.sweep(Instant::now());
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].value, 1);
        assert!(!registry.contains(&old_guid));
        assert!(registry.contains(&fresh_guid));

        // Already evicted entries are never returned twice
        assert!(registry.sweep(Instant::now()).is_empty());
    }

    #[test]
    fn test_sweep_keeps_entry_at_exact_timeout() {
        let registry = TimeoutRegistry::new("test", Duration::from_secs(10), vec![]);
        let entry = Record::new(1);
        let at = entry.at;
        registry.issue(entry);

        assert!(registry.sweep(at + Duration::from_secs(10)).is_empty());
        assert_eq!(registry.sweep(at + Duration::from_millis(10_001)).len(), 1);
    }

    #[test]
    fn test_concurrent_issue_and_validate() {
        let registry = Arc::new(TimeoutRegistry::new("test", Duration::from_secs(60), vec![]));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    let mut consumed = 0;
                    for i in 0..200 {
                        let guid = registry.issue(Record::new(t * 1000 + i));
                        if registry.validate(&guid).is_some() {
                            consumed += 1;
                        }
                    }
                    consumed
                })
            })
            .collect();

        let total: u32 = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(total, 1600);
        assert!(registry.is_empty());
    }
}
