use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Json},
};
use serde::Serialize;
use serde_json::json;
use tracing::{error, info, warn};

use marketkeeper_common::{LifecycleEvent, TickSummary};

use crate::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TickResponse {
    pub success: bool,
    pub markets_created: u32,
    pub markets_resolved: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TickResponse {
    fn completed(summary: TickSummary) -> Self {
        Self {
            success: true,
            markets_created: summary.markets_created,
            markets_resolved: summary.markets_resolved,
            error: None,
        }
    }

    /// Failure envelope. Counts are always zero, never partial.
    fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            markets_created: 0,
            markets_resolved: 0,
            error: Some(error.into()),
        }
    }
}

fn authorized(headers: &HeaderMap, secret: Option<&str>) -> bool {
    let Some(secret) = secret else {
        return true;
    };
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .is_some_and(|token| token == secret)
}

/// Run one poll tick. The tick runs on its own task so a panic inside it
/// becomes a failure envelope instead of a dropped connection.
pub async fn api_cron_markets(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    if !authorized(&headers, state.cron_secret.as_deref()) {
        warn!("Rejected cron trigger without valid bearer");
        return (
            StatusCode::UNAUTHORIZED,
            Json(TickResponse::failed("unauthorized")),
        )
            .into_response();
    }

    let services = state.services.clone();
    match tokio::spawn(async move { services.tick().await }).await {
        Ok(summary) => {
            info!(%summary, "Cron tick finished");
            Json(TickResponse::completed(summary)).into_response()
        }
        Err(e) => {
            error!(error = %e, "Poll tick aborted");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(TickResponse::failed(e.to_string())),
            )
                .into_response()
        }
    }
}

pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stats = state.services.dedup.stats();
    Json(json!({
        "status": "ok",
        "dedup_entries": stats.entries,
        "dedup_admitted": stats.admitted,
        "dedup_suppressed": stats.suppressed,
        "publisher_online": state.services.publisher.is_online(),
    }))
}

/// Fire-and-forget publish. Delivery problems only show up in the logs.
pub async fn api_publish_event(
    State(state): State<Arc<AppState>>,
    Json(event): Json<LifecycleEvent>,
) -> impl IntoResponse {
    let publisher = state.services.publisher.clone();
    tokio::spawn(async move {
        publisher.publish(event).await;
    });
    (StatusCode::ACCEPTED, Json(json!({ "accepted": true })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn bearer(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}")).unwrap(),
        );
        headers
    }

    #[test]
    fn open_trigger_without_secret() {
        assert!(authorized(&HeaderMap::new(), None));
    }

    #[test]
    fn secret_requires_matching_bearer() {
        assert!(authorized(&bearer("s3cret"), Some("s3cret")));
        assert!(!authorized(&bearer("wrong"), Some("s3cret")));
        assert!(!authorized(&HeaderMap::new(), Some("s3cret")));
    }

    #[test]
    fn failure_envelope_has_zero_counts() {
        let json = serde_json::to_value(TickResponse::failed("boom")).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["marketsCreated"], 0);
        assert_eq!(json["marketsResolved"], 0);
        assert_eq!(json["error"], "boom");
    }

    #[test]
    fn success_envelope_omits_error() {
        let summary = TickSummary {
            markets_created: 3,
            markets_resolved: 1,
        };
        let json = serde_json::to_value(TickResponse::completed(summary)).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["marketsCreated"], 3);
        assert!(json.get("error").is_none());
    }
}
