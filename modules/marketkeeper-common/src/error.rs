use thiserror::Error;

#[derive(Error, Debug)]
pub enum MarketKeeperError {
    /// Quota exhaustion or an explicit throttle signal. The only transient kind.
    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unavailable: {0}")]
    Unavailable(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Classifier error: {0}")]
    Classifier(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl MarketKeeperError {
    /// Whether retrying with a different credential may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, MarketKeeperError::RateLimited(_))
    }
}

pub type Result<T, E = MarketKeeperError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_rate_limits_are_transient() {
        assert!(MarketKeeperError::RateLimited("429".into()).is_transient());
        assert!(!MarketKeeperError::Unavailable("503".into()).is_transient());
        assert!(!MarketKeeperError::Classifier("bad schema".into()).is_transient());
        assert!(!MarketKeeperError::from(anyhow::anyhow!("quota")).is_transient());
    }
}
