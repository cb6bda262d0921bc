use std::fmt;

use serde::{Deserialize, Serialize};

/// Transaction hash (or equivalent receipt id) returned by an authoritative write.
pub type TxId = String;

// --- Authoritative store records ---

/// A video whose conviction window has closed. Parent item of its markets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Video {
    pub id: String,
    /// Blob reference of the video evidence used for resolution.
    pub evidence_ref: String,
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Market {
    pub id: String,
    pub video_id: String,
    pub question: String,
    #[serde(default)]
    pub conviction_ids: Vec<String>,
    #[serde(default)]
    pub resolved: bool,
}

/// Pointer to one conviction submitted against a video.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputRef {
    pub conviction_id: String,
    pub blob_ref: String,
}

// --- Classifier inputs and outputs ---

/// A conviction as stored in the blob store. Read once per pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvictionRecord {
    pub id: String,
    pub fact: String,
    #[serde(default)]
    pub proof: String,
}

/// Blob body of a conviction; the id comes from the `InputRef`.
#[derive(Debug, Deserialize)]
struct ConvictionBlob {
    fact: String,
    #[serde(default)]
    proof: String,
}

impl ConvictionRecord {
    /// Parse a downloaded conviction blob. Blank facts are rejected.
    pub fn from_blob(id: &str, bytes: &[u8]) -> crate::Result<Self> {
        let blob: ConvictionBlob = serde_json::from_slice(bytes)
            .map_err(|e| crate::MarketKeeperError::Parse(format!("conviction {id}: {e}")))?;
        if blob.fact.trim().is_empty() {
            return Err(crate::MarketKeeperError::Parse(format!(
                "conviction {id}: empty fact"
            )));
        }
        Ok(Self {
            id: id.to_string(),
            fact: blob.fact,
            proof: blob.proof,
        })
    }
}

/// One cluster of convictions that becomes one market.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketGroup {
    pub conviction_ids: Vec<String>,
    pub question: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    /// Winning side: `true` means the market question resolved YES.
    pub outcome: bool,
    pub reasoning: String,
}

// --- Scheduling ---

/// A unit of schedulable work. Re-derived from the store on every tick.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum WorkItem {
    VideoReadyForMarket { video_id: String },
    MarketReadyForResolution { market_id: String },
}

impl WorkItem {
    pub fn creation(video_id: impl Into<String>) -> Self {
        WorkItem::VideoReadyForMarket {
            video_id: video_id.into(),
        }
    }

    pub fn resolution(market_id: impl Into<String>) -> Self {
        WorkItem::MarketReadyForResolution {
            market_id: market_id.into(),
        }
    }

    /// Key used in the dedup cache.
    pub fn dedup_key(&self) -> String {
        match self {
            WorkItem::VideoReadyForMarket { video_id } => format!("market-create-{video_id}"),
            WorkItem::MarketReadyForResolution { market_id } => {
                format!("market-resolve-{market_id}")
            }
        }
    }
}

/// Counts from one poll tick. Informational only.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TickSummary {
    pub markets_created: u32,
    pub markets_resolved: u32,
}

impl fmt::Display for TickSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "markets_created={} markets_resolved={}",
            self.markets_created, self.markets_resolved
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedup_keys_are_scoped_by_phase() {
        assert_eq!(WorkItem::creation("v1").dedup_key(), "market-create-v1");
        assert_eq!(WorkItem::resolution("M1").dedup_key(), "market-resolve-M1");
    }

    #[test]
    fn conviction_blob_parses() {
        let blob = br#"{"fact":"Bridge opens by May","proof":"ipfs://x"}"#;
        let record = ConvictionRecord::from_blob("c1", blob).unwrap();
        assert_eq!(record.id, "c1");
        assert_eq!(record.fact, "Bridge opens by May");
    }

    #[test]
    fn conviction_blob_without_fact_is_rejected() {
        assert!(ConvictionRecord::from_blob("c1", br#"{"fact":"  "}"#).is_err());
        assert!(ConvictionRecord::from_blob("c1", b"not json").is_err());
    }

    #[test]
    fn summary_serializes_camel_case() {
        let summary = TickSummary {
            markets_created: 2,
            markets_resolved: 1,
        };
        let json = serde_json::to_value(summary).unwrap();
        assert_eq!(json["marketsCreated"], 2);
        assert_eq!(json["marketsResolved"], 1);
    }
}
