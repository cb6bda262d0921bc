//! HTTP adapters behind the scheduler's trait seams.

mod blob_store;
mod classifier;
mod gateway_store;
mod webhook;

pub use blob_store::HttpBlobStore;
pub use classifier::ClaudeClassifier;
pub use gateway_store::GatewayStore;
pub use webhook::WebhookTransport;

/// Trim a base URL so paths can be appended with a leading slash.
pub(crate) fn base_url(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}
