// Collaborator seams for the poll orchestrator.
//
// MarketStore is the system of record. BlobStore holds raw conviction bodies.
// Classifier is the AI call, always made with one credential from the pool.
// EventTransport is the broadcast channel behind the publisher.
//
// Real adapters live in `infra`; deterministic doubles live in `testing`.

use async_trait::async_trait;

use marketkeeper_common::{
    ConvictionRecord, EventEnvelope, InputRef, Market, MarketGroup, Result, TxId, Verdict, Video,
};

// ---------------------------------------------------------------------------
// MarketStore: authoritative reads and writes
// ---------------------------------------------------------------------------

#[async_trait]
pub trait MarketStore: Send + Sync {
    /// Videos whose conviction window has closed and which have no market yet.
    async fn list_videos_needing_markets(&self) -> Result<Vec<String>>;

    /// Unresolved markets whose decision window has elapsed.
    async fn list_markets_needing_resolution(&self) -> Result<Vec<Market>>;

    /// Markets already created for a video. Non-empty means "already done".
    async fn markets_for_video(&self, video_id: &str) -> Result<Vec<Market>>;

    async fn conviction_refs(&self, video_id: &str) -> Result<Vec<InputRef>>;

    async fn video(&self, video_id: &str) -> Result<Option<Video>>;

    async fn market(&self, market_id: &str) -> Result<Option<Market>>;

    async fn create_market(
        &self,
        video_id: &str,
        question: &str,
        conviction_ids: &[String],
    ) -> Result<TxId>;

    async fn resolve_market(&self, market_id: &str, outcome: bool) -> Result<TxId>;
}

// ---------------------------------------------------------------------------
// BlobStore
// ---------------------------------------------------------------------------

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Fails with `NotFound` or `Unavailable`.
    async fn download(&self, blob_ref: &str) -> Result<Vec<u8>>;
}

// ---------------------------------------------------------------------------
// Classifier: credential is chosen by the KeyRotator, never by the impl
// ---------------------------------------------------------------------------

#[async_trait]
pub trait Classifier: Send + Sync {
    /// Group convictions into prediction markets, one question per group.
    async fn cluster(
        &self,
        credential: &str,
        records: &[ConvictionRecord],
    ) -> Result<Vec<MarketGroup>>;

    /// Decide a market question against the video evidence.
    async fn resolve(
        &self,
        credential: &str,
        evidence_ref: &str,
        claim: &str,
        support: &[ConvictionRecord],
    ) -> Result<Verdict>;
}

// ---------------------------------------------------------------------------
// EventTransport
// ---------------------------------------------------------------------------

#[async_trait]
pub trait EventTransport: Send + Sync {
    async fn send(&self, envelope: &EventEnvelope) -> Result<TxId>;
}
