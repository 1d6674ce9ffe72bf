//! Pipeline data types.
//!
//! These flow through the stages in order: [`SampleBatch`] (sensor input)
//! → [`AlignedWindow`] → [`FeatureVector`] → [`FusedRepresentation`]
//! → [`DecodingStep`] → [`Utterance`].
//!
//! Sample batches and windows hold their samples as `ndarray` matrices of
//! shape `[channels × time]`. All timestamps are [`Duration`] offsets on the
//! monotonic session clock established at session open (the ingestion stage
//! rebases raw device timestamps onto it).

use std::sync::Arc;
use std::time::Duration;

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::ids::UtteranceId;

// ─────────────────────────────────────────────────────────────────────────────
// Modality and time
// ─────────────────────────────────────────────────────────────────────────────

/// Biosignal modality.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    /// Electroencephalography — imagined-speech cortical activity.
    Eeg,
    /// Electromyography — silent-articulation muscle activity.
    Emg,
}

impl Modality {
    /// Lowercase name, used in log fields and event payloads.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Eeg => "eeg",
            Self::Emg => "emg",
        }
    }
}

impl std::fmt::Display for Modality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Half-open time span `[start, end)` on the session clock.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    /// Span start.
    pub start: Duration,
    /// Span end. Always `>= start`.
    pub end: Duration,
}

impl TimeRange {
    /// Construct a range. `end` is clamped to `start` if it precedes it.
    #[must_use]
    pub fn new(start: Duration, end: Duration) -> Self {
        Self {
            start,
            end: end.max(start),
        }
    }

    /// Span length.
    #[must_use]
    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    /// Length of the overlap with `other` (zero when disjoint).
    #[must_use]
    pub fn overlap(&self, other: &Self) -> Duration {
        let start = self.start.max(other.start);
        let end = self.end.min(other.end);
        end.saturating_sub(start)
    }

    /// Union of two ranges (smallest range covering both).
    #[must_use]
    pub fn union(&self, other: &Self) -> Self {
        Self {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Sensor input and windows
// ─────────────────────────────────────────────────────────────────────────────

/// One timestamped batch of raw samples from the acquisition layer.
///
/// Immutable once created; consumed and discarded by the ingestion buffer
/// after windowing. `start_time` is on the *device* clock — the ingestion
/// stage rebases it onto the session clock.
#[derive(Clone, Debug)]
pub struct SampleBatch {
    /// Acquisition channel group identifier.
    pub channel_id: u32,
    /// Which modality produced this batch.
    pub modality: Modality,
    /// Declared fixed sample rate in Hz.
    pub sample_rate: u32,
    /// Batch start on the device clock.
    pub start_time: Duration,
    /// Samples, shape `[channels × time]`.
    pub samples: Array2<f32>,
}

impl SampleBatch {
    /// Number of channels in this batch.
    #[must_use]
    pub fn channels(&self) -> usize {
        self.samples.nrows()
    }

    /// Number of samples per channel.
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.ncols()
    }

    /// Whether the batch carries no samples.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.ncols() == 0
    }

    /// Wall duration covered by this batch at its declared sample rate.
    #[must_use]
    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.len() as f64 / f64::from(self.sample_rate))
    }
}

/// A fixed-duration slice of aligned samples, the unit of feature extraction.
///
/// Invariant: `range.duration()` equals the configured window length (the
/// ingestion buffer only emits complete windows).
#[derive(Clone, Debug)]
pub struct AlignedWindow {
    /// Source modality.
    pub modality: Modality,
    /// Window span on the session clock.
    pub range: TimeRange,
    /// Samples, shape `[channels × time]`.
    pub samples: Array2<f32>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Features and fusion
// ─────────────────────────────────────────────────────────────────────────────

/// Fixed-length feature vector extracted from one window.
///
/// Invariant: `values.len()` is constant per modality for the lifetime of a
/// session.
#[derive(Clone, Debug)]
pub struct FeatureVector {
    /// Source modality.
    pub modality: Modality,
    /// Window span the features describe.
    pub range: TimeRange,
    /// Feature values.
    pub values: Vec<f32>,
}

/// Combined per-step representation fed to the sequence decoder.
///
/// Per-modality confidence is in `[0, 1]`; `0.0` means that modality was
/// unavailable for this step.
#[derive(Clone, Debug)]
pub struct FusedRepresentation {
    /// Span covered by the contributing windows.
    pub range: TimeRange,
    /// Concatenated, reliability-weighted feature values.
    pub values: Vec<f32>,
    /// EEG contribution confidence.
    pub eeg_confidence: f32,
    /// EMG contribution confidence.
    pub emg_confidence: f32,
    /// Overall step confidence used by the decoder's activation gate.
    pub confidence: f32,
}

// ─────────────────────────────────────────────────────────────────────────────
// Decoding output
// ─────────────────────────────────────────────────────────────────────────────

/// Identifier of one linguistic unit in the decoding vocabulary.
///
/// Cheap to clone (shared string). Ordering is lexicographic on the
/// identifier text, which the beam search relies on for deterministic
/// tie-breaking.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnitId(Arc<str>);

impl UnitId {
    /// Wrap a unit identifier.
    #[must_use]
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    /// The identifier text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UnitId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Commitment status of a decoding step.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    /// May still be retracted or rewritten by later rescoring.
    Provisional,
    /// Immutable once emitted.
    Final,
}

/// One output of the sequence decoder.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DecodingStep {
    /// Predicted unit.
    pub unit: UnitId,
    /// Unit-level probability in `[0, 1]`.
    pub probability: f32,
    /// Utterance-local step index (0-based). Retract events reference this.
    pub index: u32,
    /// Provisional or final.
    pub status: StepStatus,
}

/// A finalized, immutable sequence of decoded units.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Utterance {
    /// Utterance ID.
    pub id: UtteranceId,
    /// Final steps in order. Every step has [`StepStatus::Final`].
    pub steps: Vec<DecodingStep>,
    /// Span from first to last contributing fused representation.
    pub range: TimeRange,
}

impl Utterance {
    /// Mean step probability, `0.0` for an empty utterance.
    ///
    /// The transcript assembler gates on this.
    #[must_use]
    pub fn mean_probability(&self) -> f32 {
        if self.steps.is_empty() {
            return 0.0;
        }
        let sum: f32 = self.steps.iter().map(|s| s.probability).sum();
        sum / self.steps.len() as f32
    }

    /// Units in order.
    pub fn units(&self) -> impl Iterator<Item = &UnitId> {
        self.steps.iter().map(|s| &s.unit)
    }
}
