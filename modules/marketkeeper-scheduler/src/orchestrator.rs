//! One poll tick: create markets for closed videos, then resolve elapsed markets.
//!
//! Items run sequentially. Every item error is caught at the item boundary,
//! and a failed discovery query only empties its own phase.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use marketkeeper_common::config::WindowConfig;
use marketkeeper_common::{
    ConvictionRecord, InputRef, LifecycleEvent, MarketKeeperError, Result, TickSummary, WorkItem,
};

use crate::dedup::DedupCache;
use crate::publisher::EventPublisher;
use crate::retry::KeyRotator;
use crate::traits::{BlobStore, Classifier, MarketStore};

/// Conviction blobs fetched concurrently per item.
const BLOB_CONCURRENCY: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollWindows {
    /// Secondary guard TTL for market creation.
    pub creation: Duration,
    /// Primary guard TTL for market resolution.
    pub resolution: Duration,
}

impl From<&WindowConfig> for PollWindows {
    fn from(config: &WindowConfig) -> Self {
        Self {
            creation: config.creation,
            resolution: config.resolution,
        }
    }
}

pub struct PollOrchestrator {
    store: Arc<dyn MarketStore>,
    blobs: Arc<dyn BlobStore>,
    classifier: Arc<dyn Classifier>,
    rotator: Arc<KeyRotator>,
    dedup: Arc<DedupCache>,
    publisher: Arc<EventPublisher>,
    windows: PollWindows,
}

impl PollOrchestrator {
    pub fn new(
        store: Arc<dyn MarketStore>,
        blobs: Arc<dyn BlobStore>,
        classifier: Arc<dyn Classifier>,
        rotator: Arc<KeyRotator>,
        dedup: Arc<DedupCache>,
        publisher: Arc<EventPublisher>,
        windows: PollWindows,
    ) -> Self {
        Self {
            store,
            blobs,
            classifier,
            rotator,
            dedup,
            publisher,
            windows,
        }
    }

    pub async fn tick(&self) -> TickSummary {
        let started = Instant::now();

        let markets_created = self.creation_phase().await;
        let markets_resolved = self.resolution_phase().await;

        let summary = TickSummary {
            markets_created,
            markets_resolved,
        };
        info!(
            markets_created,
            markets_resolved,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Poll tick complete"
        );
        summary
    }

    // --- Creation ---

    async fn creation_phase(&self) -> u32 {
        let candidates = match self.store.list_videos_needing_markets().await {
            Ok(candidates) => candidates,
            Err(e) => {
                warn!(error = %e, "Failed to list videos needing markets");
                return 0;
            }
        };
        if !candidates.is_empty() {
            info!(count = candidates.len(), "Videos awaiting markets");
        }

        let mut created = 0;
        for video_id in &candidates {
            match self.create_markets(video_id).await {
                Ok(n) => created += n,
                Err(e) => warn!(video_id = %video_id, error = %e, "Market creation failed"),
            }
        }
        created
    }

    async fn create_markets(&self, video_id: &str) -> Result<u32> {
        if !self.store.markets_for_video(video_id).await?.is_empty() {
            debug!(video_id, "Markets already exist, skipping");
            return Ok(0);
        }

        let refs = self.store.conviction_refs(video_id).await?;
        if refs.is_empty() {
            debug!(video_id, "No convictions submitted, skipping");
            return Ok(0);
        }

        // The store may not reflect a write still in flight from a recent tick.
        let key = WorkItem::creation(video_id).dedup_key();
        if self.dedup.was_recently_handled(&key, self.windows.creation) {
            debug!(video_id, "Creation recently attempted, skipping");
            return Ok(0);
        }
        self.dedup.mark_handled(&key);

        let records = self.load_records(&refs).await;
        if records.is_empty() {
            warn!(video_id, refs = refs.len(), "No usable convictions");
            return Ok(0);
        }

        let classifier = &self.classifier;
        let records = &records;
        let groups = self
            .rotator
            .execute(move |credential| async move {
                classifier.cluster(&credential, records).await
            })
            .await?;
        if groups.is_empty() {
            info!(video_id, "Classifier produced no market groups");
            return Ok(0);
        }

        let mut created = 0;
        for group in groups {
            if group.conviction_ids.is_empty() || group.question.trim().is_empty() {
                warn!(video_id, "Skipping empty market group");
                continue;
            }
            match self
                .store
                .create_market(video_id, &group.question, &group.conviction_ids)
                .await
            {
                Ok(tx_id) => {
                    info!(video_id, tx_id = %tx_id, question = %group.question, "Market created");
                    self.publisher
                        .publish(LifecycleEvent::MarketCreated {
                            video_id: video_id.to_string(),
                            question: group.question,
                            conviction_ids: group.conviction_ids,
                            tx_id,
                        })
                        .await;
                    created += 1;
                }
                Err(e) => warn!(
                    video_id,
                    question = %group.question,
                    error = %e,
                    "Failed to create market for group"
                ),
            }
        }
        Ok(created)
    }

    // --- Resolution ---

    async fn resolution_phase(&self) -> u32 {
        let candidates = match self.store.list_markets_needing_resolution().await {
            Ok(candidates) => candidates,
            Err(e) => {
                warn!(error = %e, "Failed to list markets needing resolution");
                return 0;
            }
        };
        if !candidates.is_empty() {
            info!(count = candidates.len(), "Markets awaiting resolution");
        }

        let mut resolved = 0;
        for candidate in &candidates {
            // No authoritative "already resolved" re-check here; this guard is primary.
            let key = WorkItem::resolution(&candidate.id).dedup_key();
            if !self.dedup.should_process(&key, self.windows.resolution) {
                debug!(market_id = %candidate.id, "Resolution recently attempted, skipping");
                continue;
            }
            match self.resolve_market(&candidate.id).await {
                Ok(()) => resolved += 1,
                Err(e) => warn!(market_id = %candidate.id, error = %e, "Market resolution failed"),
            }
        }
        resolved
    }

    async fn resolve_market(&self, market_id: &str) -> Result<()> {
        let market = self
            .store
            .market(market_id)
            .await?
            .ok_or_else(|| MarketKeeperError::NotFound(format!("market {market_id}")))?;
        let video = self
            .store
            .video(&market.video_id)
            .await?
            .ok_or_else(|| MarketKeeperError::NotFound(format!("video {}", market.video_id)))?;

        let refs: Vec<InputRef> = self
            .store
            .conviction_refs(&market.video_id)
            .await?
            .into_iter()
            .filter(|r| {
                market.conviction_ids.is_empty() || market.conviction_ids.contains(&r.conviction_id)
            })
            .collect();
        let support = self.load_records(&refs).await;
        if support.is_empty() {
            return Err(MarketKeeperError::NotFound(format!(
                "supporting convictions for market {market_id}"
            )));
        }

        let classifier = &self.classifier;
        let evidence_ref = video.evidence_ref.as_str();
        let claim = market.question.as_str();
        let support = &support;
        let verdict = self
            .rotator
            .execute(move |credential| async move {
                classifier.resolve(&credential, evidence_ref, claim, support).await
            })
            .await?;

        let tx_id = self.store.resolve_market(&market.id, verdict.outcome).await?;
        info!(market_id, tx_id = %tx_id, outcome = verdict.outcome, "Market resolved");

        self.publisher
            .publish(LifecycleEvent::MarketResolved {
                market_id: market.id.clone(),
                winning_side: verdict.outcome,
                reasoning: verdict.reasoning,
                tx_id,
            })
            .await;
        Ok(())
    }

    // --- Shared ---

    /// Download and parse every ref, dropping the ones that fail.
    async fn load_records(&self, refs: &[InputRef]) -> Vec<ConvictionRecord> {
        let blobs = &self.blobs;
        // Owned refs keep the item futures free of higher-ranked borrows, so the
        // tick future stays `Send`.
        stream::iter(refs.iter().cloned())
            .map(move |r| async move {
                let parsed = match blobs.download(&r.blob_ref).await {
                    Ok(bytes) => ConvictionRecord::from_blob(&r.conviction_id, &bytes),
                    Err(e) => Err(e),
                };
                match parsed {
                    Ok(record) => Some(record),
                    Err(e) => {
                        warn!(conviction_id = %r.conviction_id, error = %e, "Skipping conviction");
                        None
                    }
                }
            })
            .buffered(BLOB_CONCURRENCY)
            .filter_map(|record| async move { record })
            .collect()
            .await
    }
}
