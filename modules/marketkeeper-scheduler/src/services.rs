//! Explicit lifecycle for the scheduler's shared services.
//!
//! Built once at startup and handed to whoever triggers ticks. There is no
//! global state: tests build their own `Services` around mocks.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use marketkeeper_common::config::{PublisherConfig, WindowConfig};
use marketkeeper_common::{Config, Result, TickSummary};

use crate::dedup::DedupCache;
use crate::infra::{ClaudeClassifier, GatewayStore, HttpBlobStore, WebhookTransport};
use crate::orchestrator::{PollOrchestrator, PollWindows};
use crate::publisher::EventPublisher;
use crate::retry::KeyRotator;
use crate::traits::{BlobStore, Classifier, EventTransport, MarketStore};

const HTTP_TIMEOUT: Duration = Duration::from_secs(60);

/// External systems the orchestrator talks to.
pub struct Collaborators {
    pub store: Arc<dyn MarketStore>,
    pub blobs: Arc<dyn BlobStore>,
    pub classifier: Arc<dyn Classifier>,
    /// `None` runs the publisher offline.
    pub transport: Option<Arc<dyn EventTransport>>,
}

impl Collaborators {
    /// HTTP adapters for every collaborator named in the config.
    pub fn from_config(config: &Config) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build HTTP client: {e}"))?;

        let transport: Option<Arc<dyn EventTransport>> =
            config.event_stream_url.as_ref().map(|url| {
                Arc::new(WebhookTransport::new(
                    url.clone(),
                    config.event_stream_token.clone(),
                    http.clone(),
                )) as Arc<dyn EventTransport>
            });

        Ok(Self {
            store: Arc::new(GatewayStore::new(
                &config.store_gateway_url,
                config.store_gateway_token.clone(),
                http.clone(),
            )),
            blobs: Arc::new(HttpBlobStore::new(&config.blob_aggregator_url, http.clone())),
            classifier: Arc::new(ClaudeClassifier::new(config.classifier_model.clone(), http)),
            transport,
        })
    }
}

pub struct Services {
    pub dedup: Arc<DedupCache>,
    pub rotator: Arc<KeyRotator>,
    pub publisher: Arc<EventPublisher>,
    pub orchestrator: Arc<PollOrchestrator>,
    sweep_every: Duration,
}

impl Services {
    pub fn new(
        collaborators: Collaborators,
        credentials: Vec<String>,
        windows: &WindowConfig,
        publisher: &PublisherConfig,
    ) -> Result<Self> {
        let dedup = Arc::new(DedupCache::new(windows.retention));
        let rotator = Arc::new(KeyRotator::new(credentials)?);
        let publisher = Arc::new(EventPublisher::new(collaborators.transport, publisher));

        let orchestrator = Arc::new(PollOrchestrator::new(
            collaborators.store,
            collaborators.blobs,
            collaborators.classifier,
            rotator.clone(),
            dedup.clone(),
            publisher.clone(),
            PollWindows::from(windows),
        ));

        Ok(Self {
            dedup,
            rotator,
            publisher,
            orchestrator,
            sweep_every: windows.sweep_every,
        })
    }

    /// Wire the HTTP adapters from config. Does not start background work.
    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(
            Collaborators::from_config(config)?,
            config.anthropic_api_keys.clone(),
            &config.windows,
            &config.publisher,
        )
    }

    /// Start the dedup sweeper. Must be called inside a tokio runtime.
    pub fn start(&self) {
        self.dedup.start_sweeper(self.sweep_every);
        info!(
            credentials = self.rotator.pool_size(),
            publisher_online = self.publisher.is_online(),
            "Scheduler services started"
        );
    }

    pub async fn tick(&self) -> TickSummary {
        self.orchestrator.tick().await
    }

    /// Stop background work. Idempotent.
    pub fn shutdown(&self) {
        self.dedup.shutdown();
        info!("Scheduler services stopped");
    }
}
