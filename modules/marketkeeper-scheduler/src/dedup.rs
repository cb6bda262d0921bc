//! Process-local, time-windowed idempotency store.
//!
//! Secondary guard only: the authoritative "already done?" answer always comes
//! from the market store. Entries do not survive a restart.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

pub struct DedupCache {
    entries: Mutex<HashMap<String, DateTime<Utc>>>,
    /// Fixed sweep horizon. Independent of the TTL each caller checks with.
    retention: Duration,
    admitted: AtomicU64,
    suppressed: AtomicU64,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DedupStats {
    pub entries: usize,
    /// `should_process` calls that returned true.
    pub admitted: u64,
    /// `should_process` calls that returned false.
    pub suppressed: u64,
}

impl DedupCache {
    pub fn new(retention: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            retention,
            admitted: AtomicU64::new(0),
            suppressed: AtomicU64::new(0),
            sweeper: Mutex::new(None),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, DateTime<Utc>>> {
        // A panic while holding the lock cannot leave the map half-written.
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Check-and-set: true (and the key is stamped) iff the key is absent or
    /// its last stamp is at least `ttl` old.
    pub fn should_process(&self, key: &str, ttl: Duration) -> bool {
        self.should_process_at(key, ttl, Utc::now())
    }

    pub fn should_process_at(&self, key: &str, ttl: Duration, now: DateTime<Utc>) -> bool {
        let mut entries = self.lock();
        if let Some(last) = entries.get(key) {
            if age(*last, now) < ttl {
                drop(entries);
                self.suppressed.fetch_add(1, Ordering::Relaxed);
                debug!(key, "Dedup: recently handled, suppressing");
                return false;
            }
        }
        entries.insert(key.to_string(), now);
        drop(entries);
        self.admitted.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Unconditionally stamp the key.
    pub fn mark_handled(&self, key: &str) {
        self.mark_handled_at(key, Utc::now());
    }

    pub fn mark_handled_at(&self, key: &str, now: DateTime<Utc>) {
        self.lock().insert(key.to_string(), now);
    }

    /// Read-only freshness check.
    pub fn was_recently_handled(&self, key: &str, ttl: Duration) -> bool {
        self.was_recently_handled_at(key, ttl, Utc::now())
    }

    pub fn was_recently_handled_at(&self, key: &str, ttl: Duration, now: DateTime<Utc>) -> bool {
        self.lock()
            .get(key)
            .is_some_and(|last| age(*last, now) < ttl)
    }

    /// Drop every entry older than the retention horizon. Returns how many.
    pub fn sweep(&self) -> usize {
        self.sweep_at(Utc::now())
    }

    pub fn sweep_at(&self, now: DateTime<Utc>) -> usize {
        let retention = self.retention;
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, last| age(*last, now) < retention);
        before - entries.len()
    }

    pub fn size(&self) -> usize {
        self.lock().len()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn stats(&self) -> DedupStats {
        DedupStats {
            entries: self.size(),
            admitted: self.admitted.load(Ordering::Relaxed),
            suppressed: self.suppressed.load(Ordering::Relaxed),
        }
    }

    /// Spawn the periodic sweep. Replaces any sweeper already running.
    /// The task holds only a weak reference and exits once the cache is dropped.
    pub fn start_sweeper(self: &Arc<Self>, every: Duration) {
        let weak: Weak<Self> = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let Some(cache) = weak.upgrade() else { break };
                let removed = cache.sweep();
                if removed > 0 {
                    debug!(removed, remaining = cache.size(), "Dedup sweep");
                }
            }
        });

        let previous = self
            .sweeper
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
        info!(
            every_secs = every.as_secs(),
            retention_secs = self.retention.as_secs(),
            "Dedup sweeper started"
        );
    }

    /// Stop the sweeper. Safe to call more than once.
    pub fn shutdown(&self) {
        let handle = self.sweeper.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle {
            handle.abort();
            info!("Dedup sweeper stopped");
        }
    }

    pub fn sweeper_running(&self) -> bool {
        self.sweeper
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }
}

/// Clock skew backwards counts as zero age.
fn age(last: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (now - last).to_std().unwrap_or(Duration::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as Delta;

    const HOUR: Duration = Duration::from_secs(3600);
    const THIRTY_MIN: Duration = Duration::from_millis(1_800_000);

    #[test]
    fn second_immediate_call_is_suppressed() {
        let cache = DedupCache::new(HOUR);
        let t0 = Utc::now();
        assert!(cache.should_process_at("k", THIRTY_MIN, t0));
        assert!(!cache.should_process_at("k", THIRTY_MIN, t0));
        assert!(cache.should_process_at("k", THIRTY_MIN, t0 + Delta::minutes(30)));
    }

    #[test]
    fn resolution_window_scenario() {
        let cache = DedupCache::new(HOUR);
        let t0 = Utc::now();
        assert!(cache.should_process_at("market-resolve-M1", THIRTY_MIN, t0));
        assert!(!cache.should_process_at("market-resolve-M1", THIRTY_MIN, t0 + Delta::minutes(10)));
        assert!(cache.should_process_at("market-resolve-M1", THIRTY_MIN, t0 + Delta::minutes(31)));
    }

    #[test]
    fn suppressed_call_does_not_refresh_stamp() {
        let cache = DedupCache::new(HOUR);
        let t0 = Utc::now();
        assert!(cache.should_process_at("k", THIRTY_MIN, t0));
        // A suppressed check at t+20 must not push expiry to t+50.
        assert!(!cache.should_process_at("k", THIRTY_MIN, t0 + Delta::minutes(20)));
        assert!(cache.should_process_at("k", THIRTY_MIN, t0 + Delta::minutes(30)));
    }

    #[test]
    fn was_recently_handled_is_read_only() {
        let cache = DedupCache::new(HOUR);
        let t0 = Utc::now();
        assert!(!cache.was_recently_handled_at("k", THIRTY_MIN, t0));
        assert_eq!(cache.size(), 0);

        cache.mark_handled_at("k", t0);
        assert!(cache.was_recently_handled_at("k", THIRTY_MIN, t0 + Delta::minutes(5)));
        assert!(!cache.was_recently_handled_at("k", THIRTY_MIN, t0 + Delta::minutes(45)));
        assert_eq!(cache.stats().admitted, 0);
    }

    #[test]
    fn mark_handled_refreshes() {
        let cache = DedupCache::new(HOUR);
        let t0 = Utc::now();
        cache.mark_handled_at("k", t0);
        cache.mark_handled_at("k", t0 + Delta::minutes(25));
        assert!(cache.was_recently_handled_at("k", THIRTY_MIN, t0 + Delta::minutes(40)));
        assert_eq!(cache.size(), 1);
    }

    #[test]
    fn ttl_is_per_call() {
        let cache = DedupCache::new(HOUR);
        let t0 = Utc::now();
        cache.mark_handled_at("k", t0);
        let later = t0 + Delta::minutes(15);
        assert!(cache.was_recently_handled_at("k", THIRTY_MIN, later));
        assert!(!cache.was_recently_handled_at("k", Duration::from_secs(600), later));
    }

    #[test]
    fn sweep_uses_retention_not_ttl() {
        let cache = DedupCache::new(HOUR);
        let t0 = Utc::now();
        for i in 0..500 {
            assert!(cache.should_process_at(&format!("k{i}"), Duration::from_secs(1), t0));
        }
        // Short TTLs have long expired but entries stay until retention passes.
        assert_eq!(cache.sweep_at(t0 + Delta::minutes(59)), 0);
        assert_eq!(cache.size(), 500);

        assert_eq!(cache.sweep_at(t0 + Delta::minutes(61)), 500);
        assert_eq!(cache.size(), 0);
    }

    #[test]
    fn sweep_keeps_young_entries() {
        let cache = DedupCache::new(HOUR);
        let t0 = Utc::now();
        cache.mark_handled_at("old", t0);
        cache.mark_handled_at("young", t0 + Delta::minutes(50));
        assert_eq!(cache.sweep_at(t0 + Delta::minutes(70)), 1);
        assert!(cache.was_recently_handled_at("young", HOUR, t0 + Delta::minutes(70)));
    }

    #[test]
    fn concurrent_check_and_set_admits_exactly_one() {
        let cache = Arc::new(DedupCache::new(HOUR));
        let barrier = Arc::new(std::sync::Barrier::new(32));
        let handles: Vec<_> = (0..32)
            .map(|_| {
                let cache = cache.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    cache.should_process("market-resolve-M7", THIRTY_MIN)
                })
            })
            .collect();

        let admitted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|admitted| *admitted)
            .count();
        assert_eq!(admitted, 1);
        let stats = cache.stats();
        assert_eq!(stats.admitted, 1);
        assert_eq!(stats.suppressed, 31);
    }

    #[test]
    fn clear_empties() {
        let cache = DedupCache::new(HOUR);
        cache.mark_handled("a");
        cache.mark_handled("b");
        cache.clear();
        assert_eq!(cache.size(), 0);
        assert!(cache.should_process("a", THIRTY_MIN));
    }

    #[tokio::test]
    async fn sweeper_lifecycle() {
        let cache = Arc::new(DedupCache::new(Duration::ZERO));
        cache.mark_handled("k");
        cache.start_sweeper(Duration::from_millis(10));
        assert!(cache.sweeper_running());

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(cache.size(), 0);

        cache.shutdown();
        cache.shutdown();
        tokio::task::yield_now().await;
        assert!(!cache.sweeper_running());
    }
}
