use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use marketkeeper_common::{InputRef, Market, MarketKeeperError, Result, TxId, Video};

use super::base_url;
use crate::traits::MarketStore;

/// `MarketStore` over the REST gateway that fronts the market contract.
///
/// Routes:
/// - `GET  /videos/pending-markets` → `["<video id>", ...]`
/// - `GET  /markets/pending-resolution` → `[Market, ...]`
/// - `GET  /videos/{id}`, `/videos/{id}/markets`, `/videos/{id}/convictions`
/// - `GET  /markets/{id}`
/// - `POST /markets` `{video_id, question, conviction_ids}` → `{tx_id}`
/// - `POST /markets/{id}/resolve` `{outcome}` → `{tx_id}`
pub struct GatewayStore {
    base_url: String,
    token: Option<String>,
    http: reqwest::Client,
}

#[derive(Serialize)]
struct CreateMarketRequest<'a> {
    video_id: &'a str,
    question: &'a str,
    conviction_ids: &'a [String],
}

#[derive(Serialize)]
struct ResolveMarketRequest {
    outcome: bool,
}

#[derive(Deserialize)]
struct WriteReceipt {
    tx_id: TxId,
}

impl GatewayStore {
    pub fn new(base: &str, token: Option<String>, http: reqwest::Client) -> Self {
        Self {
            base_url: base_url(base),
            token,
            http,
        }
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let req = self.http.request(method, format!("{}{path}", self.base_url));
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let resp = self.send(self.request(Method::GET, path), "GET", path).await?;
        decode(resp, "GET", path).await
    }

    /// 404 is `None`.
    async fn get_optional<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>> {
        let resp = self.send(self.request(Method::GET, path), "GET", path).await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        decode(resp, "GET", path).await.map(Some)
    }

    async fn post<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        let resp = self
            .send(self.request(Method::POST, path).json(body), "POST", path)
            .await?;
        decode(resp, "POST", path).await
    }

    async fn send(&self, req: RequestBuilder, method: &str, path: &str) -> Result<Response> {
        req.send()
            .await
            .map_err(|e| MarketKeeperError::Store(format!("{method} {path}: {e}")))
    }
}

async fn decode<T: DeserializeOwned>(resp: Response, method: &str, path: &str) -> Result<T> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(MarketKeeperError::Store(format!(
            "{method} {path} returned {status}: {body}"
        )));
    }
    resp.json::<T>()
        .await
        .map_err(|e| MarketKeeperError::Parse(format!("{method} {path}: {e}")))
}

#[async_trait]
impl MarketStore for GatewayStore {
    async fn list_videos_needing_markets(&self) -> Result<Vec<String>> {
        self.get("/videos/pending-markets").await
    }

    async fn list_markets_needing_resolution(&self) -> Result<Vec<Market>> {
        self.get("/markets/pending-resolution").await
    }

    async fn markets_for_video(&self, video_id: &str) -> Result<Vec<Market>> {
        self.get(&format!("/videos/{video_id}/markets")).await
    }

    async fn conviction_refs(&self, video_id: &str) -> Result<Vec<InputRef>> {
        self.get(&format!("/videos/{video_id}/convictions")).await
    }

    async fn video(&self, video_id: &str) -> Result<Option<Video>> {
        self.get_optional(&format!("/videos/{video_id}")).await
    }

    async fn market(&self, market_id: &str) -> Result<Option<Market>> {
        self.get_optional(&format!("/markets/{market_id}")).await
    }

    async fn create_market(
        &self,
        video_id: &str,
        question: &str,
        conviction_ids: &[String],
    ) -> Result<TxId> {
        let body = CreateMarketRequest {
            video_id,
            question,
            conviction_ids,
        };
        let receipt: WriteReceipt = self.post("/markets", &body).await?;
        Ok(receipt.tx_id)
    }

    async fn resolve_market(&self, market_id: &str, outcome: bool) -> Result<TxId> {
        let receipt: WriteReceipt = self
            .post(
                &format!("/markets/{market_id}/resolve"),
                &ResolveMarketRequest { outcome },
            )
            .await?;
        Ok(receipt.tx_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unreachable_gateway_is_store_error() {
        let store = GatewayStore::new("http://127.0.0.1:9/", None, reqwest::Client::new());
        let err = store.list_videos_needing_markets().await.unwrap_err();
        assert!(matches!(err, MarketKeeperError::Store(_)));
        assert!(err.to_string().contains("/videos/pending-markets"));
    }

    #[test]
    fn create_request_shape() {
        let ids = vec!["c1".to_string()];
        let body = CreateMarketRequest {
            video_id: "v1",
            question: "Will the bridge open?",
            conviction_ids: &ids,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["conviction_ids"][0], "c1");
        assert_eq!(json["video_id"], "v1");
    }
}
