//! Best-effort lifecycle event delivery.
//!
//! `publish` never fails. An unconfigured transport logs `[OFFLINE]`; a
//! transport that keeps failing is retried with linear backoff and the event
//! is then logged at error level as `[FALLBACK]`. That log line is the only
//! record of an undelivered event.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use marketkeeper_common::config::PublisherConfig;
use marketkeeper_common::{EventEnvelope, LifecycleEvent, TxId};

use crate::traits::EventTransport;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    Delivered(TxId),
    Offline,
    Fallback,
}

pub struct EventPublisher {
    transport: Option<Arc<dyn EventTransport>>,
    max_attempts: u32,
    base_delay: Duration,
}

impl EventPublisher {
    pub fn new(transport: Option<Arc<dyn EventTransport>>, config: &PublisherConfig) -> Self {
        Self {
            transport,
            max_attempts: config.max_attempts.max(1),
            base_delay: config.base_delay,
        }
    }

    /// Publisher with no transport; every event is logged as offline.
    pub fn offline() -> Self {
        Self::new(None, &PublisherConfig::default())
    }

    pub fn is_online(&self) -> bool {
        self.transport.is_some()
    }

    /// Linear backoff before the attempt after `attempt`. Saturates on overflow.
    fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }

    pub async fn publish(&self, event: LifecycleEvent) -> PublishOutcome {
        let envelope = EventEnvelope::new(&event, Utc::now());

        let Some(transport) = &self.transport else {
            info!(
                event_type = %envelope.event_type,
                envelope = %render(&envelope),
                "[OFFLINE] Event stream not configured"
            );
            return PublishOutcome::Offline;
        };

        for attempt in 1..=self.max_attempts {
            match transport.send(&envelope).await {
                Ok(tx_id) => {
                    debug!(
                        event_type = %envelope.event_type,
                        tx_id = %tx_id,
                        attempt,
                        "Event published"
                    );
                    return PublishOutcome::Delivered(tx_id);
                }
                Err(e) => {
                    warn!(
                        event_type = %envelope.event_type,
                        attempt,
                        max_attempts = self.max_attempts,
                        error = %e,
                        "Event publish failed"
                    );
                    if attempt < self.max_attempts {
                        tokio::time::sleep(self.backoff(attempt)).await;
                    }
                }
            }
        }

        error!(
            event_type = %envelope.event_type,
            envelope = %render(&envelope),
            "[FALLBACK] Event not delivered"
        );
        PublishOutcome::Fallback
    }
}

fn render(envelope: &EventEnvelope) -> String {
    serde_json::to_string(envelope).unwrap_or_else(|_| format!("{envelope:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockTransport;

    fn config(max_attempts: u32) -> PublisherConfig {
        PublisherConfig {
            max_attempts,
            base_delay: Duration::from_millis(5),
        }
    }

    fn vote() -> LifecycleEvent {
        LifecycleEvent::MarketVote {
            market_id: "M1".into(),
            voter: "0xabc".into(),
            side: true,
            amount: None,
        }
    }

    #[tokio::test]
    async fn offline_returns_without_sending() {
        let publisher = EventPublisher::offline();
        assert!(!publisher.is_online());
        assert_eq!(publisher.publish(vote()).await, PublishOutcome::Offline);
    }

    #[tokio::test]
    async fn delivers_first_try() {
        let transport = Arc::new(MockTransport::new());
        let publisher = EventPublisher::new(Some(transport.clone()), &config(2));
        let outcome = publisher.publish(vote()).await;
        assert!(matches!(outcome, PublishOutcome::Delivered(_)));
        assert_eq!(transport.attempts(), 1);
        assert_eq!(transport.delivered()[0].event_type, "market-vote");
    }

    #[tokio::test]
    async fn retries_then_delivers() {
        let transport = Arc::new(MockTransport::failing_times(1));
        let publisher = EventPublisher::new(Some(transport.clone()), &config(2));
        let outcome = publisher.publish(vote()).await;
        assert!(matches!(outcome, PublishOutcome::Delivered(_)));
        assert_eq!(transport.attempts(), 2);
    }

    #[tokio::test]
    async fn exhaustion_falls_back_after_bound() {
        let transport = Arc::new(MockTransport::always_failing());
        let publisher = EventPublisher::new(Some(transport.clone()), &config(3));
        assert_eq!(publisher.publish(vote()).await, PublishOutcome::Fallback);
        assert_eq!(transport.attempts(), 3);
        assert!(transport.delivered().is_empty());
    }

    #[tokio::test]
    async fn backoff_is_linear() {
        let transport = Arc::new(MockTransport::always_failing());
        let publisher = EventPublisher::new(
            Some(transport.clone()),
            &PublisherConfig {
                max_attempts: 3,
                base_delay: Duration::from_millis(20),
            },
        );
        let started = std::time::Instant::now();
        publisher.publish(vote()).await;
        // 20ms after attempt 1, 40ms after attempt 2, none after the last.
        assert!(started.elapsed() >= Duration::from_millis(60));
    }

    #[test]
    fn backoff_saturates_instead_of_overflowing() {
        let publisher = EventPublisher::new(
            None,
            &PublisherConfig {
                max_attempts: 3,
                base_delay: Duration::MAX,
            },
        );
        assert_eq!(publisher.backoff(2), Duration::MAX);
        assert_eq!(publisher_with_delay(7).backoff(3), Duration::from_millis(21));
    }

    fn publisher_with_delay(base_ms: u64) -> EventPublisher {
        EventPublisher::new(
            None,
            &PublisherConfig {
                max_attempts: 2,
                base_delay: Duration::from_millis(base_ms),
            },
        )
    }

    #[tokio::test]
    async fn zero_attempts_still_tries_once() {
        let transport = Arc::new(MockTransport::new());
        let publisher = EventPublisher::new(Some(transport.clone()), &config(0));
        publisher.publish(vote()).await;
        assert_eq!(transport.attempts(), 1);
    }
}
