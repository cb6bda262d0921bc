// Test doubles for the poll orchestrator.
//
// One mock per trait boundary:
// - MockStore (MarketStore): stateful in-memory system of record
// - MockBlobs (BlobStore): HashMap-based ref→bytes
// - MockClassifier (Classifier): deterministic grouping and verdicts
// - MockTransport (EventTransport): scripted failures, records deliveries
//
// Plus helpers for building videos, markets and conviction blobs.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::json;

use marketkeeper_common::{
    ConvictionRecord, EventEnvelope, InputRef, Market, MarketGroup, MarketKeeperError, Result,
    TxId, Verdict, Video,
};

use crate::traits::{BlobStore, Classifier, EventTransport, MarketStore};

// ---------------------------------------------------------------------------
// Builders
// ---------------------------------------------------------------------------

pub fn video(id: &str) -> Video {
    Video {
        id: id.to_string(),
        evidence_ref: format!("blob-video-{id}"),
        title: Some(format!("Video {id}")),
    }
}

pub fn market(id: &str, video_id: &str, question: &str, conviction_ids: &[&str]) -> Market {
    Market {
        id: id.to_string(),
        video_id: video_id.to_string(),
        question: question.to_string(),
        conviction_ids: conviction_ids.iter().map(|s| s.to_string()).collect(),
        resolved: false,
    }
}

pub fn input_ref(conviction_id: &str) -> InputRef {
    InputRef {
        conviction_id: conviction_id.to_string(),
        blob_ref: format!("blob-{conviction_id}"),
    }
}

pub fn conviction_blob(fact: &str, proof: &str) -> Vec<u8> {
    json!({ "fact": fact, "proof": proof }).to_string().into_bytes()
}

// ---------------------------------------------------------------------------
// MockStore
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedMarket {
    pub video_id: String,
    pub question: String,
    pub conviction_ids: Vec<String>,
}

#[derive(Default)]
struct StoreState {
    pending_videos: Vec<String>,
    pending_resolution: Vec<String>,
    videos: HashMap<String, Video>,
    markets: HashMap<String, Market>,
    refs: HashMap<String, Vec<InputRef>>,
    created: Vec<CreatedMarket>,
    resolved: Vec<(String, bool)>,
    fail_video_listing: bool,
    fail_market_listing: bool,
    fail_questions: HashSet<String>,
}

/// In-memory system of record. Listings are not filtered against writes, so
/// a video stays "pending" after its market is created, like a lagging index.
pub struct MockStore {
    state: Mutex<StoreState>,
}

impl Default for MockStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MockStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(StoreState::default()),
        }
    }

    /// Register a video awaiting markets, with its conviction refs.
    pub fn with_pending_video(self, video: Video, refs: Vec<InputRef>) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            state.pending_videos.push(video.id.clone());
            state.refs.insert(video.id.clone(), refs);
            state.videos.insert(video.id.clone(), video);
        }
        self
    }

    /// Register a video that is not listed as pending.
    pub fn with_video(self, video: Video, refs: Vec<InputRef>) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            state.refs.insert(video.id.clone(), refs);
            state.videos.insert(video.id.clone(), video);
        }
        self
    }

    pub fn with_market(self, market: Market) -> Self {
        self.state
            .lock()
            .unwrap()
            .markets
            .insert(market.id.clone(), market);
        self
    }

    /// Register a market and list it as awaiting resolution.
    pub fn with_pending_resolution(self, market: Market) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            state.pending_resolution.push(market.id.clone());
            state.markets.insert(market.id.clone(), market);
        }
        self
    }

    /// List a market id for resolution without registering the market itself.
    pub fn with_dangling_resolution(self, market_id: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .pending_resolution
            .push(market_id.to_string());
        self
    }

    /// `list_videos_needing_markets` fails.
    pub fn failing_video_listing(self) -> Self {
        self.state.lock().unwrap().fail_video_listing = true;
        self
    }

    /// `list_markets_needing_resolution` fails.
    pub fn failing_market_listing(self) -> Self {
        self.state.lock().unwrap().fail_market_listing = true;
        self
    }

    /// `create_market` fails for this question.
    pub fn failing_create(self, question: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .fail_questions
            .insert(question.to_string());
        self
    }

    pub fn created(&self) -> Vec<CreatedMarket> {
        self.state.lock().unwrap().created.clone()
    }

    pub fn resolved(&self) -> Vec<(String, bool)> {
        self.state.lock().unwrap().resolved.clone()
    }
}

#[async_trait]
impl MarketStore for MockStore {
    async fn list_videos_needing_markets(&self) -> Result<Vec<String>> {
        let state = self.state.lock().unwrap();
        if state.fail_video_listing {
            return Err(MarketKeeperError::Store("MockStore: rpc timeout".into()));
        }
        Ok(state.pending_videos.clone())
    }

    async fn list_markets_needing_resolution(&self) -> Result<Vec<Market>> {
        let state = self.state.lock().unwrap();
        if state.fail_market_listing {
            return Err(MarketKeeperError::Store("MockStore: rpc timeout".into()));
        }
        Ok(state
            .pending_resolution
            .iter()
            .map(|id| {
                state.markets.get(id).cloned().unwrap_or_else(|| Market {
                    id: id.clone(),
                    video_id: String::new(),
                    question: String::new(),
                    conviction_ids: Vec::new(),
                    resolved: false,
                })
            })
            .collect())
    }

    async fn markets_for_video(&self, video_id: &str) -> Result<Vec<Market>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .markets
            .values()
            .filter(|m| m.video_id == video_id)
            .cloned()
            .collect())
    }

    async fn conviction_refs(&self, video_id: &str) -> Result<Vec<InputRef>> {
        let state = self.state.lock().unwrap();
        Ok(state.refs.get(video_id).cloned().unwrap_or_default())
    }

    async fn video(&self, video_id: &str) -> Result<Option<Video>> {
        Ok(self.state.lock().unwrap().videos.get(video_id).cloned())
    }

    async fn market(&self, market_id: &str) -> Result<Option<Market>> {
        Ok(self.state.lock().unwrap().markets.get(market_id).cloned())
    }

    async fn create_market(
        &self,
        video_id: &str,
        question: &str,
        conviction_ids: &[String],
    ) -> Result<TxId> {
        let mut state = self.state.lock().unwrap();
        if state.fail_questions.contains(question) {
            return Err(MarketKeeperError::Store(format!(
                "MockStore: execution reverted for {question:?}"
            )));
        }
        state.created.push(CreatedMarket {
            video_id: video_id.to_string(),
            question: question.to_string(),
            conviction_ids: conviction_ids.to_vec(),
        });
        let n = state.created.len();
        let id = format!("created-{n}");
        state.markets.insert(
            id.clone(),
            Market {
                id,
                video_id: video_id.to_string(),
                question: question.to_string(),
                conviction_ids: conviction_ids.to_vec(),
                resolved: false,
            },
        );
        Ok(format!("0xcreate{n}"))
    }

    async fn resolve_market(&self, market_id: &str, outcome: bool) -> Result<TxId> {
        let mut state = self.state.lock().unwrap();
        state.resolved.push((market_id.to_string(), outcome));
        if let Some(market) = state.markets.get_mut(market_id) {
            market.resolved = true;
        }
        Ok(format!("0xresolve{}", state.resolved.len()))
    }
}

// ---------------------------------------------------------------------------
// MockBlobs
// ---------------------------------------------------------------------------

/// Unregistered refs fail with `NotFound`; refs marked down fail with `Unavailable`.
#[derive(Default)]
pub struct MockBlobs {
    blobs: HashMap<String, Vec<u8>>,
    down: HashSet<String>,
    downloads: AtomicU32,
}

impl MockBlobs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_blob(mut self, blob_ref: &str, bytes: Vec<u8>) -> Self {
        self.blobs.insert(blob_ref.to_string(), bytes);
        self
    }

    /// Register a conviction blob under the ref `input_ref` would produce.
    pub fn on_conviction(self, conviction_id: &str, fact: &str) -> Self {
        self.on_blob(
            &format!("blob-{conviction_id}"),
            conviction_blob(fact, "timestamp 00:42"),
        )
    }

    pub fn unavailable(mut self, blob_ref: &str) -> Self {
        self.down.insert(blob_ref.to_string());
        self
    }

    pub fn downloads(&self) -> u32 {
        self.downloads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BlobStore for MockBlobs {
    async fn download(&self, blob_ref: &str) -> Result<Vec<u8>> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        if self.down.contains(blob_ref) {
            return Err(MarketKeeperError::Unavailable(format!(
                "MockBlobs: aggregator down for {blob_ref}"
            )));
        }
        self.blobs
            .get(blob_ref)
            .cloned()
            .ok_or_else(|| MarketKeeperError::NotFound(format!("MockBlobs: no blob {blob_ref}")))
    }
}

// ---------------------------------------------------------------------------
// MockClassifier
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolveCall {
    pub evidence_ref: String,
    pub claim: String,
    pub support_ids: Vec<String>,
}

/// Clustering defaults to one group holding every record, asking about the
/// first record's fact. Verdicts default to YES.
#[derive(Default)]
pub struct MockClassifier {
    groupings: HashMap<String, Vec<MarketGroup>>,
    failing_convictions: HashSet<String>,
    verdicts: HashMap<String, Verdict>,
    failing_claims: HashSet<String>,
    rate_limited_keys: HashSet<String>,
    credentials: Mutex<Vec<String>>,
    cluster_calls: AtomicU32,
    resolve_calls: Mutex<Vec<ResolveCall>>,
}

impl MockClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Groups returned when the records include this conviction id.
    pub fn on_cluster(mut self, conviction_id: &str, groups: Vec<MarketGroup>) -> Self {
        self.groupings.insert(conviction_id.to_string(), groups);
        self
    }

    /// `cluster` fails with a non-transient error when the records include this id.
    pub fn failing_cluster(mut self, conviction_id: &str) -> Self {
        self.failing_convictions.insert(conviction_id.to_string());
        self
    }

    pub fn on_resolve(mut self, claim: &str, verdict: Verdict) -> Self {
        self.verdicts.insert(claim.to_string(), verdict);
        self
    }

    pub fn failing_resolve(mut self, claim: &str) -> Self {
        self.failing_claims.insert(claim.to_string());
        self
    }

    /// Any call made with this credential is rate limited.
    pub fn rate_limited_key(mut self, credential: &str) -> Self {
        self.rate_limited_keys.insert(credential.to_string());
        self
    }

    pub fn credentials_used(&self) -> Vec<String> {
        self.credentials.lock().unwrap().clone()
    }

    pub fn cluster_calls(&self) -> u32 {
        self.cluster_calls.load(Ordering::SeqCst)
    }

    pub fn resolve_calls(&self) -> Vec<ResolveCall> {
        self.resolve_calls.lock().unwrap().clone()
    }

    fn check_credential(&self, credential: &str) -> Result<()> {
        self.credentials.lock().unwrap().push(credential.to_string());
        if self.rate_limited_keys.contains(credential) {
            return Err(MarketKeeperError::RateLimited(format!(
                "MockClassifier: quota exhausted for {credential}"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Classifier for MockClassifier {
    async fn cluster(
        &self,
        credential: &str,
        records: &[ConvictionRecord],
    ) -> Result<Vec<MarketGroup>> {
        self.cluster_calls.fetch_add(1, Ordering::SeqCst);
        self.check_credential(credential)?;

        if let Some(bad) = records.iter().find(|r| self.failing_convictions.contains(&r.id)) {
            return Err(MarketKeeperError::Classifier(format!(
                "MockClassifier: malformed output for {}",
                bad.id
            )));
        }
        if let Some(groups) = records.iter().find_map(|r| self.groupings.get(&r.id)) {
            return Ok(groups.clone());
        }
        Ok(match records.first() {
            Some(first) => vec![MarketGroup {
                conviction_ids: records.iter().map(|r| r.id.clone()).collect(),
                question: format!("Will it be true that {}?", first.fact),
            }],
            None => Vec::new(),
        })
    }

    async fn resolve(
        &self,
        credential: &str,
        evidence_ref: &str,
        claim: &str,
        support: &[ConvictionRecord],
    ) -> Result<Verdict> {
        self.check_credential(credential)?;
        self.resolve_calls.lock().unwrap().push(ResolveCall {
            evidence_ref: evidence_ref.to_string(),
            claim: claim.to_string(),
            support_ids: support.iter().map(|r| r.id.clone()).collect(),
        });
        if self.failing_claims.contains(claim) {
            return Err(MarketKeeperError::Classifier(format!(
                "MockClassifier: no verdict for {claim:?}"
            )));
        }
        Ok(self.verdicts.get(claim).cloned().unwrap_or(Verdict {
            outcome: true,
            reasoning: "MockClassifier: default verdict".into(),
        }))
    }
}

// ---------------------------------------------------------------------------
// MockTransport
// ---------------------------------------------------------------------------

/// Fails the first `fail_first` sends (all of them when `None`), then delivers.
pub struct MockTransport {
    fail_first: Option<u32>,
    attempts: AtomicU32,
    delivered: Mutex<Vec<EventEnvelope>>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    pub fn new() -> Self {
        Self::failing_times(0)
    }

    pub fn failing_times(n: u32) -> Self {
        Self {
            fail_first: Some(n),
            attempts: AtomicU32::new(0),
            delivered: Mutex::new(Vec::new()),
        }
    }

    pub fn always_failing() -> Self {
        Self {
            fail_first: None,
            attempts: AtomicU32::new(0),
            delivered: Mutex::new(Vec::new()),
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn delivered(&self) -> Vec<EventEnvelope> {
        self.delivered.lock().unwrap().clone()
    }

    pub fn delivered_of_type(&self, event_type: &str) -> Vec<EventEnvelope> {
        self.delivered()
            .into_iter()
            .filter(|e| e.event_type == event_type)
            .collect()
    }
}

#[async_trait]
impl EventTransport for MockTransport {
    async fn send(&self, envelope: &EventEnvelope) -> Result<TxId> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        let fails = match self.fail_first {
            None => true,
            Some(n) => attempt <= n,
        };
        if fails {
            return Err(MarketKeeperError::Transport(format!(
                "MockTransport: stream unreachable (attempt {attempt})"
            )));
        }
        let mut delivered = self.delivered.lock().unwrap();
        delivered.push(envelope.clone());
        Ok(format!("0xevent{}", delivered.len()))
    }
}
