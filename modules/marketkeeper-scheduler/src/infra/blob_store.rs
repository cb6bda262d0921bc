use async_trait::async_trait;
use reqwest::StatusCode;

use marketkeeper_common::{MarketKeeperError, Result};

use super::base_url;
use crate::traits::BlobStore;

/// Reads blobs through an aggregator: `GET {aggregator}/v1/blobs/{ref}`.
pub struct HttpBlobStore {
    aggregator: String,
    http: reqwest::Client,
}

impl HttpBlobStore {
    pub fn new(aggregator: &str, http: reqwest::Client) -> Self {
        Self {
            aggregator: base_url(aggregator),
            http,
        }
    }
}

#[async_trait]
impl BlobStore for HttpBlobStore {
    async fn download(&self, blob_ref: &str) -> Result<Vec<u8>> {
        let url = format!("{}/v1/blobs/{blob_ref}", self.aggregator);
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| MarketKeeperError::Unavailable(format!("blob {blob_ref}: {e}")))?;

        match resp.status() {
            StatusCode::NOT_FOUND => Err(MarketKeeperError::NotFound(format!("blob {blob_ref}"))),
            status if !status.is_success() => Err(MarketKeeperError::Unavailable(format!(
                "blob {blob_ref}: aggregator returned {status}"
            ))),
            _ => resp
                .bytes()
                .await
                .map(|b| b.to_vec())
                .map_err(|e| MarketKeeperError::Unavailable(format!("blob {blob_ref}: {e}"))),
        }
    }
}
