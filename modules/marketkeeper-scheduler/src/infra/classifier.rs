use std::collections::HashSet;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use tracing::debug;

use ai_client::{AiError, Claude};
use marketkeeper_common::{ConvictionRecord, MarketGroup, MarketKeeperError, Result, Verdict};

use crate::traits::Classifier;

const MAX_FIELD_CHARS: usize = 1_000;

const CLUSTER_SYSTEM: &str = "You turn viewer convictions about a video into prediction markets. \
Group convictions that predict the same outcome. Write one clear yes/no question per group. \
Every conviction id you return must come from the input.";

const RESOLVE_SYSTEM: &str = "You resolve a yes/no prediction market against video evidence \
and the convictions that support it. Answer true only if the evidence shows the question \
resolved YES.";

#[derive(Debug, Deserialize, JsonSchema)]
struct ClusterResponse {
    markets: Vec<ProposedMarket>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct ProposedMarket {
    /// Ids of the convictions this market groups together.
    conviction_ids: Vec<String>,
    /// A yes/no question a viewer could bet on.
    question: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct VerdictResponse {
    /// True if the question resolved YES.
    outcome: bool,
    reasoning: String,
}

/// `Classifier` backed by Claude structured output. One client per call,
/// bound to the credential the rotator picked.
pub struct ClaudeClassifier {
    model: String,
    base_url: Option<String>,
    http: reqwest::Client,
}

impl ClaudeClassifier {
    pub fn new(model: impl Into<String>, http: reqwest::Client) -> Self {
        Self {
            model: model.into(),
            base_url: None,
            http,
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    fn client(&self, credential: &str) -> Claude {
        let claude = Claude::new(credential, &self.model).with_http(self.http.clone());
        match &self.base_url {
            Some(url) => claude.with_base_url(url),
            None => claude,
        }
    }
}

fn map_ai_error(e: AiError) -> MarketKeeperError {
    if e.is_rate_limited() {
        MarketKeeperError::RateLimited(e.to_string())
    } else {
        MarketKeeperError::Classifier(e.to_string())
    }
}

fn clip(text: &str) -> &str {
    match text.char_indices().nth(MAX_FIELD_CHARS) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

fn render_records(records: &[ConvictionRecord]) -> String {
    records
        .iter()
        .map(|r| format!("- id: {}\n  fact: {}\n  proof: {}", r.id, clip(&r.fact), clip(&r.proof)))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Drop unknown ids and groups left empty by that.
fn into_groups(response: ClusterResponse, records: &[ConvictionRecord]) -> Vec<MarketGroup> {
    let known: HashSet<&str> = records.iter().map(|r| r.id.as_str()).collect();
    response
        .markets
        .into_iter()
        .filter_map(|m| {
            let ids: Vec<String> = m
                .conviction_ids
                .into_iter()
                .filter(|id| known.contains(id.as_str()))
                .collect();
            let question = m.question.trim().to_string();
            if ids.is_empty() || question.is_empty() {
                return None;
            }
            Some(MarketGroup {
                conviction_ids: ids,
                question,
            })
        })
        .collect()
}

#[async_trait]
impl Classifier for ClaudeClassifier {
    async fn cluster(
        &self,
        credential: &str,
        records: &[ConvictionRecord],
    ) -> Result<Vec<MarketGroup>> {
        let prompt = format!("Convictions:\n{}", render_records(records));
        let response: ClusterResponse = self
            .client(credential)
            .extract(CLUSTER_SYSTEM, prompt)
            .await
            .map_err(map_ai_error)?;

        let proposed = response.markets.len();
        let groups = into_groups(response, records);
        debug!(proposed, kept = groups.len(), "Clustered convictions");
        Ok(groups)
    }

    async fn resolve(
        &self,
        credential: &str,
        evidence_ref: &str,
        claim: &str,
        support: &[ConvictionRecord],
    ) -> Result<Verdict> {
        let prompt = format!(
            "Question: {}\nVideo evidence: {evidence_ref}\nSupporting convictions:\n{}",
            clip(claim),
            render_records(support)
        );
        let response: VerdictResponse = self
            .client(credential)
            .extract(RESOLVE_SYSTEM, prompt)
            .await
            .map_err(map_ai_error)?;

        Ok(Verdict {
            outcome: response.outcome,
            reasoning: response.reasoning,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, fact: &str) -> ConvictionRecord {
        ConvictionRecord {
            id: id.into(),
            fact: fact.into(),
            proof: String::new(),
        }
    }

    #[test]
    fn rate_limit_maps_to_transient() {
        assert!(map_ai_error(AiError::from_status(429, "")).is_transient());
        assert!(map_ai_error(AiError::from_status(400, "quota exceeded")).is_transient());
        assert!(!map_ai_error(AiError::Parse("bad tool input".into())).is_transient());
        assert!(!map_ai_error(AiError::from_status(500, "internal")).is_transient());
    }

    #[test]
    fn groups_drop_unknown_ids() {
        let records = vec![record("c1", "the bridge opens"), record("c2", "crowds gather")];
        let response = ClusterResponse {
            markets: vec![
                ProposedMarket {
                    conviction_ids: vec!["c1".into(), "ghost".into()],
                    question: " Will the bridge open? ".into(),
                },
                ProposedMarket {
                    conviction_ids: vec!["ghost".into()],
                    question: "Will ghosts appear?".into(),
                },
                ProposedMarket {
                    conviction_ids: vec!["c2".into()],
                    question: "  ".into(),
                },
            ],
        };
        let groups = into_groups(response, &records);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].conviction_ids, vec!["c1"]);
        assert_eq!(groups[0].question, "Will the bridge open?");
    }

    #[test]
    fn clip_respects_char_boundaries() {
        let long = "é".repeat(MAX_FIELD_CHARS + 10);
        assert_eq!(clip(&long).chars().count(), MAX_FIELD_CHARS);
        assert_eq!(clip("short"), "short");
    }

    #[test]
    fn cluster_schema_is_closed() {
        use ai_client::StructuredOutput;
        let schema = ClusterResponse::tool_schema();
        assert_eq!(schema["additionalProperties"], false);
        assert_eq!(schema["required"][0], "markets");
    }

    #[tokio::test]
    async fn unreachable_provider_is_not_transient() {
        let classifier =
            ClaudeClassifier::new("claude-haiku-4-5-20251001", reqwest::Client::new())
                .with_base_url("http://127.0.0.1:9");
        let err = classifier
            .cluster("sk-test", &[record("c1", "the bridge opens")])
            .await
            .unwrap_err();
        assert!(matches!(err, MarketKeeperError::Classifier(_)));
    }
}
