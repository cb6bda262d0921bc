use async_trait::async_trait;
use serde::Deserialize;
use tracing::warn;
use uuid::Uuid;

use marketkeeper_common::{EventEnvelope, MarketKeeperError, Result, TxId};

use crate::traits::EventTransport;

/// Posts each envelope as JSON to the event stream endpoint.
pub struct WebhookTransport {
    url: String,
    token: Option<String>,
    http: reqwest::Client,
}

#[derive(Deserialize)]
struct StreamReceipt {
    #[serde(alias = "txId")]
    tx_id: Option<String>,
}

impl WebhookTransport {
    pub fn new(url: impl Into<String>, token: Option<String>, http: reqwest::Client) -> Self {
        Self {
            url: url.into(),
            token,
            http,
        }
    }
}

#[async_trait]
impl EventTransport for WebhookTransport {
    async fn send(&self, envelope: &EventEnvelope) -> Result<TxId> {
        let mut req = self.http.post(&self.url).json(envelope);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| MarketKeeperError::Transport(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            warn!(status = %status, body = %body, "Event stream returned non-success");
            return Err(MarketKeeperError::Transport(format!(
                "event stream returned {status}"
            )));
        }

        // Streams that do not echo a receipt get a locally generated id.
        let receipt = resp.json::<StreamReceipt>().await.ok().and_then(|r| r.tx_id);
        Ok(receipt.unwrap_or_else(|| Uuid::new_v4().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use marketkeeper_common::LifecycleEvent;

    #[test]
    fn receipt_accepts_either_casing() {
        let a: StreamReceipt = serde_json::from_str(r#"{"tx_id":"0x1"}"#).unwrap();
        let b: StreamReceipt = serde_json::from_str(r#"{"txId":"0x2"}"#).unwrap();
        let c: StreamReceipt = serde_json::from_str(r#"{}"#).unwrap();
        assert_eq!(a.tx_id.as_deref(), Some("0x1"));
        assert_eq!(b.tx_id.as_deref(), Some("0x2"));
        assert!(c.tx_id.is_none());
    }

    #[tokio::test]
    async fn unreachable_stream_is_transport_error() {
        let transport =
            WebhookTransport::new("http://127.0.0.1:9/events", None, reqwest::Client::new());
        let event = LifecycleEvent::PointsAwarded {
            user: "u1".into(),
            points: 10,
            reason: "early conviction".into(),
        };
        let err = transport
            .send(&EventEnvelope::new(&event, Utc::now()))
            .await
            .unwrap_err();
        assert!(matches!(err, MarketKeeperError::Transport(_)));
    }
}
