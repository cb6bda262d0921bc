//! Lifecycle events broadcast to the front end and indexers.
//!
//! The `type` tag is the wire event name. Everything else is the payload.
//! Events are transient: they exist only for the duration of a publish.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::TxId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum LifecycleEvent {
    VideoIndexed {
        video_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
    },

    ConvictionSubmitted {
        video_id: String,
        conviction_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        submitter: Option<String>,
    },

    MarketCreated {
        video_id: String,
        question: String,
        conviction_ids: Vec<String>,
        tx_id: TxId,
    },

    MarketVote {
        market_id: String,
        voter: String,
        /// `true` votes YES.
        side: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        amount: Option<u64>,
    },

    MarketResolved {
        market_id: String,
        winning_side: bool,
        reasoning: String,
        tx_id: TxId,
    },

    PointsAwarded {
        user: String,
        points: u64,
        reason: String,
    },

    ProcessingUpdate {
        video_id: String,
        stage: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
}

impl LifecycleEvent {
    /// Wire name, identical to the serialized `type` tag.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::VideoIndexed { .. } => "video-indexed",
            Self::ConvictionSubmitted { .. } => "conviction-submitted",
            Self::MarketCreated { .. } => "market-created",
            Self::MarketVote { .. } => "market-vote",
            Self::MarketResolved { .. } => "market-resolved",
            Self::PointsAwarded { .. } => "points-awarded",
            Self::ProcessingUpdate { .. } => "processing-update",
        }
    }

    /// Payload fields without the tag.
    pub fn payload(&self) -> serde_json::Value {
        let mut value = serde_json::to_value(self).unwrap_or_default();
        if let Some(obj) = value.as_object_mut() {
            obj.remove("type");
        }
        value
    }
}

/// What the transport receives: the event name plus a timestamped payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventEnvelope {
    pub event_type: String,
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl EventEnvelope {
    pub fn new(event: &LifecycleEvent, timestamp: DateTime<Utc>) -> Self {
        Self {
            event_type: event.event_type().to_string(),
            payload: event.payload(),
            timestamp,
        }
    }
}
