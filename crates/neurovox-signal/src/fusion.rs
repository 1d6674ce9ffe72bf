//! Modality fusion.
//!
//! Each decode step classifies the available feature vectors into an
//! explicit tagged variant (`Both` / `EegOnly` / `EmgOnly` / `Neither`)
//! and fuses them into one fixed-length representation. Fusion weight per
//! modality is proportional to a reliability score fed back from decoding
//! confidence; weighting starts equal at session open.
//!
//! Degradation rules:
//! - a missing modality contributes zeros and confidence `0.0`;
//! - `Neither` produces no representation at all (a gap, which the decoder
//!   treats as "no new evidence", not as silence);
//! - two windows that overlap less than the configured minimum are treated
//!   as single-modality, keeping the fresher window.

use std::time::Duration;

use tracing::trace;

use neurovox_core::types::{FeatureVector, FusedRepresentation};

/// Reliability smoothing factor for the decode-confidence feedback.
const RELIABILITY_ALPHA: f32 = 0.2;

/// Classified per-step fusion input.
#[derive(Debug)]
pub enum FusionInput {
    /// Both modalities present with sufficient overlap.
    Both(FeatureVector, FeatureVector),
    /// Only EEG evidence for this step.
    EegOnly(FeatureVector),
    /// Only EMG evidence for this step.
    EmgOnly(FeatureVector),
    /// No evidence for this step.
    Neither,
}

impl FusionInput {
    /// Classify a pair of optional feature vectors.
    ///
    /// Both-present inputs whose windows overlap by less than
    /// `min_overlap * window_len` degrade to the single fresher modality.
    #[must_use]
    pub fn classify(
        eeg: Option<FeatureVector>,
        emg: Option<FeatureVector>,
        min_overlap: f32,
        window_len: Duration,
    ) -> Self {
        match (eeg, emg) {
            (Some(e), Some(m)) => {
                let required = window_len.mul_f64(f64::from(min_overlap));
                if e.range.overlap(&m.range) >= required {
                    Self::Both(e, m)
                } else if e.range.end >= m.range.end {
                    trace!(overlap_ms = e.range.overlap(&m.range).as_millis() as u64, "insufficient overlap, keeping eeg");
                    Self::EegOnly(e)
                } else {
                    trace!(overlap_ms = e.range.overlap(&m.range).as_millis() as u64, "insufficient overlap, keeping emg");
                    Self::EmgOnly(m)
                }
            }
            (Some(e), None) => Self::EegOnly(e),
            (None, Some(m)) => Self::EmgOnly(m),
            (None, None) => Self::Neither,
        }
    }
}

/// Reliability-weighted feature fusion for one session.
pub struct ModalityFusion {
    eeg_len: usize,
    emg_len: usize,
    eeg_reliability: f32,
    emg_reliability: f32,
}

impl ModalityFusion {
    /// Build fusion state for the session's fixed feature lengths.
    ///
    /// Both reliabilities start at `1.0`: equal weighting, and full trust
    /// until decoding evidence says otherwise.
    #[must_use]
    pub fn new(eeg_len: usize, emg_len: usize) -> Self {
        Self {
            eeg_len,
            emg_len,
            eeg_reliability: 1.0,
            emg_reliability: 1.0,
        }
    }

    /// Fused vector length, constant for the session lifetime.
    #[must_use]
    pub fn fused_len(&self) -> usize {
        self.eeg_len + self.emg_len
    }

    /// Current EEG reliability in `[0, 1]`.
    #[must_use]
    pub fn eeg_reliability(&self) -> f32 {
        self.eeg_reliability
    }

    /// Current EMG reliability in `[0, 1]`.
    #[must_use]
    pub fn emg_reliability(&self) -> f32 {
        self.emg_reliability
    }

    /// Fuse one step of classified input. Returns `None` for a gap.
    #[must_use]
    pub fn fuse(&self, input: FusionInput) -> Option<FusedRepresentation> {
        match input {
            FusionInput::Both(eeg, emg) => {
                let (w_eeg, w_emg) = self.weights();
                let mut values = Vec::with_capacity(self.fused_len());
                values.extend(eeg.values.iter().map(|v| v * w_eeg));
                values.extend(emg.values.iter().map(|v| v * w_emg));
                Some(FusedRepresentation {
                    range: eeg.range.union(&emg.range),
                    values,
                    eeg_confidence: self.eeg_reliability,
                    emg_confidence: self.emg_reliability,
                    confidence: f32::midpoint(self.eeg_reliability, self.emg_reliability),
                })
            }
            FusionInput::EegOnly(eeg) => {
                let mut values = eeg.values.clone();
                values.resize(self.fused_len(), 0.0);
                Some(FusedRepresentation {
                    range: eeg.range,
                    values,
                    eeg_confidence: self.eeg_reliability,
                    emg_confidence: 0.0,
                    confidence: self.eeg_reliability,
                })
            }
            FusionInput::EmgOnly(emg) => {
                let mut values = vec![0.0; self.eeg_len];
                values.extend_from_slice(&emg.values);
                Some(FusedRepresentation {
                    range: emg.range,
                    values,
                    eeg_confidence: 0.0,
                    emg_confidence: self.emg_reliability,
                    confidence: self.emg_reliability,
                })
            }
            FusionInput::Neither => None,
        }
    }

    /// Fold one decode-step probability back into the reliability of the
    /// modalities that contributed to that step.
    pub fn record_step_confidence(&mut self, probability: f32, eeg_present: bool, emg_present: bool) {
        let p = probability.clamp(0.0, 1.0);
        if eeg_present {
            self.eeg_reliability += RELIABILITY_ALPHA * (p - self.eeg_reliability);
        }
        if emg_present {
            self.emg_reliability += RELIABILITY_ALPHA * (p - self.emg_reliability);
        }
    }

    fn weights(&self) -> (f32, f32) {
        let total = self.eeg_reliability + self.emg_reliability;
        if total <= f32::EPSILON {
            (0.5, 0.5)
        } else {
            (self.eeg_reliability / total, self.emg_reliability / total)
        }
    }
}
