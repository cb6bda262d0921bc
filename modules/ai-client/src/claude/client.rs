use tracing::debug;

use super::types::{MessagesResponse, ToolRequest};
use crate::error::AiError;

const DEFAULT_ENDPOINT: &str = "https://api.anthropic.com/v1";
const API_VERSION: &str = "2023-06-01";

/// One Messages call against `endpoint`, authenticated with `api_key`.
pub(crate) async fn post_messages(
    http: &reqwest::Client,
    endpoint: Option<&str>,
    api_key: &str,
    request: &ToolRequest<'_>,
) -> Result<MessagesResponse, AiError> {
    let url = format!("{}/messages", endpoint.unwrap_or(DEFAULT_ENDPOINT));

    let response = http
        .post(&url)
        .header("x-api-key", api_key)
        .header("anthropic-version", API_VERSION)
        .json(request)
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(AiError::from_status(status.as_u16(), &body));
    }

    let parsed: MessagesResponse = response.json().await?;
    debug!(
        model = request.model(),
        stop_reason = parsed.stop_reason.as_deref().unwrap_or("-"),
        input_tokens = parsed.usage.input_tokens,
        output_tokens = parsed.usage.output_tokens,
        "Claude call complete"
    );
    Ok(parsed)
}
