use thiserror::Error;

/// Body fragments that providers use to signal throttling or quota exhaustion
/// without (or in addition to) a 429 status.
const RATE_LIMIT_SIGNATURES: &[&str] = &[
    "rate limit",
    "rate_limit",
    "ratelimit",
    "too many requests",
    "quota",
    "resource_exhausted",
    "overloaded",
];

#[derive(Debug, Error)]
pub enum AiError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

impl AiError {
    /// Classify a non-success provider response.
    ///
    /// 429 and 529 are always rate limits. Other statuses are rate limits only
    /// when the body carries a known throttling signature.
    pub fn from_status(status: u16, body: &str) -> Self {
        let detail = format!("({status}) {body}");
        if status == 429 || status == 529 || is_rate_limit_message(body) {
            AiError::RateLimited(detail)
        } else {
            AiError::Api(detail)
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, AiError::RateLimited(_))
    }
}

/// Substring heuristic for throttling messages. Case-insensitive.
pub fn is_rate_limit_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    RATE_LIMIT_SIGNATURES.iter().any(|sig| lower.contains(sig))
}

impl From<reqwest::Error> for AiError {
    fn from(e: reqwest::Error) -> Self {
        AiError::Network(e.to_string())
    }
}

impl From<serde_json::Error> for AiError {
    fn from(e: serde_json::Error) -> Self {
        AiError::Parse(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_429_is_rate_limited() {
        assert!(AiError::from_status(429, "").is_rate_limited());
    }

    #[test]
    fn overloaded_status_is_rate_limited() {
        assert!(AiError::from_status(529, "{}").is_rate_limited());
    }

    #[test]
    fn quota_message_on_403_is_rate_limited() {
        let err = AiError::from_status(403, r#"{"error":"Quota exceeded for key"}"#);
        assert!(err.is_rate_limited());
    }

    #[test]
    fn plain_server_error_is_api() {
        let err = AiError::from_status(500, "internal error");
        assert!(matches!(err, AiError::Api(_)));
    }

    #[test]
    fn signature_match_ignores_case() {
        assert!(is_rate_limit_message("RESOURCE_EXHAUSTED: try later"));
        assert!(!is_rate_limit_message("invalid x-api-key"));
    }
}
