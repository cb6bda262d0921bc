//! Credential-rotating retry around classifier calls.
//!
//! The rotation pointer is shared by every call through one `KeyRotator`, so
//! consecutive calls start on different keys and spread load across the pool.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::{debug, warn};

use marketkeeper_common::{MarketKeeperError, Result};

pub struct KeyRotator {
    keys: Vec<String>,
    next: AtomicUsize,
}

impl KeyRotator {
    pub fn new(keys: Vec<String>) -> Result<Self> {
        let keys: Vec<String> = keys
            .into_iter()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .collect();
        if keys.is_empty() {
            return Err(MarketKeeperError::Config(
                "credential pool is empty".to_string(),
            ));
        }
        Ok(Self {
            keys,
            next: AtomicUsize::new(0),
        })
    }

    pub fn pool_size(&self) -> usize {
        self.keys.len()
    }

    /// Index the next attempt will use.
    pub fn pointer(&self) -> usize {
        self.next.load(Ordering::Relaxed) % self.keys.len()
    }

    fn advance(&self) -> usize {
        self.next.fetch_add(1, Ordering::Relaxed) % self.keys.len()
    }

    /// Run `op` with up to one attempt per credential in the pool.
    pub async fn execute<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.execute_with(self.keys.len(), op).await
    }

    /// Run `op` until it succeeds, fails with a non-transient error, or
    /// `max_attempts` rate-limited attempts have been made. Each attempt takes
    /// the next credential round-robin. Exhaustion returns the last error.
    pub async fn execute_with<T, F, Fut>(&self, max_attempts: usize, mut op: F) -> Result<T>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = max_attempts.max(1);
        let mut last_err = None;

        for attempt in 1..=max_attempts {
            let index = self.advance();
            let key = self.keys[index].clone();

            match op(key).await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(attempt, key_index = index, "Succeeded after rotating credentials");
                    }
                    return Ok(value);
                }
                Err(e) if e.is_transient() => {
                    warn!(
                        attempt,
                        max_attempts,
                        key_index = index,
                        error = %e,
                        "Rate limited, rotating to next credential"
                    );
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_err.unwrap_or_else(|| {
            MarketKeeperError::RateLimited("credential pool exhausted".to_string())
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn rotator(n: usize) -> KeyRotator {
        KeyRotator::new((0..n).map(|i| format!("key-{i}")).collect()).unwrap()
    }

    #[test]
    fn empty_pool_is_config_error() {
        let err = KeyRotator::new(vec![" ".into(), String::new()]).err().unwrap();
        assert!(matches!(err, MarketKeeperError::Config(_)));
    }

    #[tokio::test]
    async fn all_rate_limited_uses_each_key_once() {
        let rotator = rotator(3);
        // Move the pointer off zero first.
        let _ = rotator.execute(|_| async { Ok::<_, MarketKeeperError>(()) }).await;
        assert_eq!(rotator.pointer(), 1);

        let seen = Mutex::new(Vec::new());
        let result: Result<()> = rotator
            .execute(|key| {
                seen.lock().unwrap().push(key.clone());
                async move { Err(MarketKeeperError::RateLimited(format!("429 on {key}"))) }
            })
            .await;

        let err = result.unwrap_err();
        assert_eq!(err.to_string(), "Rate limited: 429 on key-0");
        assert_eq!(*seen.lock().unwrap(), vec!["key-1", "key-2", "key-0"]);
    }

    #[tokio::test]
    async fn non_transient_error_stops_immediately() {
        let rotator = rotator(4);
        let calls = AtomicUsize::new(0);
        let result: Result<()> = rotator
            .execute(|_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(MarketKeeperError::Classifier("malformed output".into())) }
            })
            .await;

        assert!(matches!(result, Err(MarketKeeperError::Classifier(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn recovers_on_second_key() {
        let rotator = rotator(3);
        let result = rotator
            .execute(|key| async move {
                if key == "key-0" {
                    Err(MarketKeeperError::RateLimited("quota".into()))
                } else {
                    Ok(key)
                }
            })
            .await
            .unwrap();
        assert_eq!(result, "key-1");
        assert_eq!(rotator.pointer(), 2);
    }

    #[tokio::test]
    async fn consecutive_calls_spread_across_pool() {
        let rotator = rotator(2);
        let mut picked = Vec::new();
        for _ in 0..3 {
            let key = rotator
                .execute(|k| async move { Ok::<_, MarketKeeperError>(k) })
                .await
                .unwrap();
            picked.push(key);
        }
        assert_eq!(picked, vec!["key-0", "key-1", "key-0"]);
    }

    #[tokio::test]
    async fn explicit_bound_wraps_around() {
        let rotator = rotator(2);
        let calls = AtomicUsize::new(0);
        let _: Result<()> = rotator
            .execute_with(5, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(MarketKeeperError::RateLimited("slow down".into())) }
            })
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }
}
