//! Decode event stream.
//!
//! Everything a downstream consumer learns about a session arrives through
//! [`DecodeEvent`]: provisional steps, explicit retractions, finalized
//! utterances, dispatch results, and warnings for every degraded condition.
//!
//! Ordering is part of the contract: a retracted provisional step is always
//! preceded by a [`DecodeEvent::Retract`] naming its step index before any
//! replacement step is emitted — downstream consumers never see silent
//! overwrites. Events serialize with a `type` tag for wire transport.

use serde::{Deserialize, Serialize};

use crate::ids::{SessionId, UtteranceId};
use crate::types::{DecodingStep, Utterance};

/// Common fields for all decode events.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BaseEvent {
    /// Session this event belongs to.
    pub session_id: SessionId,
    /// ISO 8601 timestamp.
    pub timestamp: String,
}

impl BaseEvent {
    /// Create a new base event with the current UTC timestamp.
    #[must_use]
    pub fn now(session_id: SessionId) -> Self {
        Self {
            session_id,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Category of a warning event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    /// Samples older than the retention horizon were evicted unread.
    StaleDrop,
    /// A sensor batch violated timestamp monotonicity and was rejected.
    OutOfOrderBatch,
    /// A window failed feature extraction and was discarded.
    MalformedWindow,
    /// A single decode-model call failed; the step was treated as a gap.
    DecodeStepFailed,
    /// The decoder exceeded its per-step real-time budget and degraded to
    /// greedy extension for that step.
    StepBudgetExceeded,
    /// Three consecutive decode failures forced finalization of the
    /// current hypothesis.
    ForcedFinalize,
    /// The dispatcher's pending queue overflowed and the oldest utterance
    /// was dropped. Emitted exactly once per drop.
    QueueOverflow,
    /// Translation failed; dispatch proceeded with the original text.
    TranslationFailed,
    /// Speech synthesis failed outright; the utterance was dropped.
    SynthesisFailed,
    /// The caller pushed faster than ingestion could accept.
    IngestSaturated,
}

/// Tagged events emitted by a decoding session, in order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DecodeEvent {
    /// A provisional step extending the current best hypothesis.
    #[serde(rename = "provisional")]
    Provisional {
        /// Common fields.
        base: BaseEvent,
        /// The provisional step.
        step: DecodingStep,
    },

    /// A previously emitted provisional step was withdrawn.
    ///
    /// Always emitted before the replacement step for that index.
    #[serde(rename = "retract")]
    Retract {
        /// Common fields.
        base: BaseEvent,
        /// Index of the withdrawn step.
        #[serde(rename = "stepIndex")]
        step_index: u32,
    },

    /// An utterance was finalized and is now immutable.
    #[serde(rename = "final")]
    Final {
        /// Common fields.
        base: BaseEvent,
        /// The finalized utterance.
        utterance: Utterance,
    },

    /// An utterance's text was handed to the synthesis service.
    #[serde(rename = "dispatched")]
    Dispatched {
        /// Common fields.
        base: BaseEvent,
        /// Source utterance.
        #[serde(rename = "utteranceId")]
        utterance_id: UtteranceId,
        /// Text as dispatched (post-translation when translation ran).
        text: String,
        /// Language of the dispatched text.
        language: String,
        /// Downstream policy tags (`low-confidence`, `translation-failed`).
        tags: Vec<String>,
    },

    /// A degraded condition the caller should know about.
    #[serde(rename = "warning")]
    Warning {
        /// Common fields.
        base: BaseEvent,
        /// Warning category.
        kind: WarningKind,
        /// Human-readable detail.
        detail: String,
    },

    /// The session ended; no further events follow.
    #[serde(rename = "closed")]
    Closed {
        /// Common fields.
        base: BaseEvent,
    },
}

impl DecodeEvent {
    /// The session this event belongs to.
    #[must_use]
    pub fn session_id(&self) -> SessionId {
        match self {
            Self::Provisional { base, .. }
            | Self::Retract { base, .. }
            | Self::Final { base, .. }
            | Self::Dispatched { base, .. }
            | Self::Warning { base, .. }
            | Self::Closed { base } => base.session_id,
        }
    }

    /// Stable event type string, matching the serde tag.
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Provisional { .. } => "provisional",
            Self::Retract { .. } => "retract",
            Self::Final { .. } => "final",
            Self::Dispatched { .. } => "dispatched",
            Self::Warning { .. } => "warning",
            Self::Closed { .. } => "closed",
        }
    }
}
