// Copyright 2025 Gridgate Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Background sweep tasks for the pre-auth and session registries.
//!
//! Each registry gets exactly one reaper task. A reaper wakes every
//! [`sweep_interval`], evicts whatever has outlived the registry timeout and
//! goes back to sleep until the next tick or until its cancellation token
//! fires. The session reaper additionally logs a diagnostic dump of every
//! live session on its own, slower cadence.

use crate::preauth::PreAuthRegistry;
use crate::session::SessionRegistry;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(1);

/// Status line of a connection pool, included in the session dump.
pub trait PoolStatus: Send + Sync {
    fn status(&self) -> String;
}

/// Sleep between sweeps: a quarter of the timeout, shortened to the dump
/// interval when one is configured so the dump never lags behind eviction.
pub fn sweep_interval(timeout: Duration, dump: Option<Duration>) -> Duration {
    let quarter = timeout / 4;
    let sleep = match dump {
        Some(dump) if !dump.is_zero() => quarter.min(dump),
        _ => quarter,
    };
    sleep.max(MIN_SWEEP_INTERVAL)
}

/// Tracks when the next session dump is due.
#[derive(Debug)]
struct DumpSchedule {
    every: Option<Duration>,
    last: Instant,
}

impl DumpSchedule {
    fn new(every: Option<Duration>, start: Instant) -> Self {
        Self {
            every: every.filter(|d| !d.is_zero()),
            last: start,
        }
    }

    fn due(&mut self, now: Instant) -> bool {
        match self.every {
            Some(every) if now.saturating_duration_since(self.last) >= every => {
                self.last = now;
                true
            }
            _ => false,
        }
    }
}

/// Runs a sweep callback every `period` until `cancel` fires.
async fn run_reaper<F>(name: &'static str, period: Duration, cancel: CancellationToken, mut sweep: F)
where
    F: FnMut(Instant),
{
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!("{} reaper started, sweeping every {:?}", name, period);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("{} reaper shutting down", name);
                break;
            }
            _ = ticker.tick() => sweep(Instant::now()),
        }
    }
}

/// Evicts expired SSO pre-authentication tokens until cancelled.
pub async fn run_sso_reaper(registry: Arc<PreAuthRegistry>, cancel: CancellationToken) {
    let period = sweep_interval(registry.timeout(), None);
    let name = registry.name();
    run_reaper(name, period, cancel, move |now| {
        let evicted = registry.sweep(now);
        if evicted > 0 {
            debug!("{} reaper evicted {} expired tokens", name, evicted);
        }
    })
    .await
}

/// Evicts and disconnects idle sessions until cancelled.
///
/// # Arguments
/// * `registry` - The session registry to sweep
/// * `dump_interval` - Cadence of the diagnostic dump, `None` to disable
/// * `pools` - Connection pools whose status lines are included in the dump
/// * `cancel` - Stops the reaper when cancelled
pub async fn run_session_reaper(
    registry: Arc<SessionRegistry>,
    dump_interval: Option<Duration>,
    pools: Vec<Arc<dyn PoolStatus>>,
    cancel: CancellationToken,
) {
    let period = sweep_interval(registry.timeout(), dump_interval);
    let mut schedule = DumpSchedule::new(dump_interval, Instant::now());

    let name = registry.name();
    run_reaper(name, period, cancel, move |now| {
        let evicted = registry.sweep(now);
        if evicted > 0 {
            debug!("{} reaper evicted {} idle sessions", name, evicted);
        }
        if schedule.due(now) {
            dump_sessions(&registry, &pools);
        }
    })
    .await
}

fn dump_sessions(registry: &SessionRegistry, pools: &[Arc<dyn PoolStatus>]) {
    let sessions = registry.sessions();
    info!("Session dump: {} live sessions", sessions.len());
    for session in &sessions {
        info!("  {}", session);
    }
    for pool in pools {
        info!("  {}", pool.status());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionConnection;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Default)]
    struct CountingConnection {
        disconnects: AtomicU32,
    }

    impl SessionConnection for CountingConnection {
        fn disconnect(&self) {
            self.disconnects.fetch_add(1, Ordering::SeqCst);
        }

        fn describe(&self) -> String {
            "test".to_string()
        }
    }

    #[test]
    fn test_sweep_interval_quarter_of_timeout() {
        assert_eq!(
            sweep_interval(Duration::from_secs(60), None),
            Duration::from_secs(15)
        );
    }

    #[test]
    fn test_sweep_interval_bounded_by_dump() {
        assert_eq!(
            sweep_interval(Duration::from_secs(60), Some(Duration::from_secs(5))),
            Duration::from_secs(5)
        );
        assert_eq!(
            sweep_interval(Duration::from_secs(8), Some(Duration::from_secs(5))),
            Duration::from_secs(2)
        );
        // A zero dump interval means "no dump"
        assert_eq!(
            sweep_interval(Duration::from_secs(8), Some(Duration::ZERO)),
            Duration::from_secs(2)
        );
    }

    #[test]
    fn test_sweep_interval_never_zero() {
        assert_eq!(sweep_interval(Duration::from_nanos(3), None), MIN_SWEEP_INTERVAL);
    }

    #[test]
    fn test_dump_schedule() {
        let start = Instant::now();
        let mut schedule = DumpSchedule::new(Some(Duration::from_secs(10)), start);
        assert!(!schedule.due(start + Duration::from_secs(5)));
        assert!(schedule.due(start + Duration::from_secs(10)));
        assert!(!schedule.due(start + Duration::from_secs(15)));
        assert!(schedule.due(start + Duration::from_secs(21)));

        let mut disabled = DumpSchedule::new(None, start);
        assert!(!disabled.due(start + Duration::from_secs(3600)));
    }

    #[tokio::test]
    async fn test_session_reaper_evicts_idle_sessions() {
        let registry = Arc::new(SessionRegistry::new(Duration::from_millis(200), vec![]));
        let connection = Arc::new(CountingConnection::default());
        let guid = registry.register(connection.clone());

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_session_reaper(
            registry.clone(),
            Some(Duration::from_millis(100)),
            vec![],
            cancel.clone(),
        ));

        // timeout + sweep interval is the worst case before eviction
        tokio::time::sleep(Duration::from_millis(400)).await;

        assert!(registry.get(&guid).is_none());
        assert_eq!(connection.disconnects.load(Ordering::SeqCst), 1);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_session_reaper_spares_active_sessions() {
        let registry = Arc::new(SessionRegistry::new(Duration::from_millis(300), vec![]));
        let guid = registry.register(Arc::new(CountingConnection::default()));

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_session_reaper(registry.clone(), None, vec![], cancel.clone()));

        for _ in 0..6 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            assert!(registry.get(&guid).is_some());
        }

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_sso_reaper_evicts_expired_tokens() {
        let registry = Arc::new(PreAuthRegistry::new(Duration::from_millis(100), vec![]));
        let token = registry.preauth("carol");

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_sso_reaper(registry.clone(), cancel.clone()));

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(registry.is_empty());
        assert_eq!(registry.validate(&token), None);

        cancel.cancel();
        handle.await.unwrap();
    }
}
