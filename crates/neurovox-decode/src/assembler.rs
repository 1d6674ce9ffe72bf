//! Transcript assembly.
//!
//! Deterministic rendering of a finalized utterance to text via the
//! vocabulary's unit-to-text table, plus the confidence gate. The gate
//! tags rather than drops: whether a low-confidence utterance is actually
//! spoken is downstream policy, not this component's.

use std::sync::Arc;

use tracing::debug;

use neurovox_core::config::SessionConfig;
use neurovox_core::ids::UtteranceId;
use neurovox_core::types::{TimeRange, Utterance};

use crate::model::Vocabulary;

/// Assembled, dispatchable text for one utterance.
#[derive(Clone, Debug, PartialEq)]
pub struct Transcript {
    /// Source utterance.
    pub utterance_id: UtteranceId,
    /// Rendered text.
    pub text: String,
    /// Mean step probability of the source utterance.
    pub mean_probability: f32,
    /// Set when the mean probability fell below the configured gate.
    pub low_confidence: bool,
    /// Time span of the source utterance.
    pub range: TimeRange,
}

/// Unit-sequence to text renderer with a confidence gate.
pub struct TranscriptAssembler {
    vocabulary: Arc<Vocabulary>,
    confidence_gate: f32,
}

impl TranscriptAssembler {
    /// Build an assembler over the model's vocabulary.
    #[must_use]
    pub fn new(vocabulary: Arc<Vocabulary>, config: &SessionConfig) -> Self {
        Self {
            vocabulary,
            confidence_gate: config.confidence_gate,
        }
    }

    /// Render a finalized utterance.
    ///
    /// Units are joined with single spaces, no space before trailing
    /// punctuation, and the first letter is capitalized. A unit missing
    /// from the rendering table falls back to its raw identifier so a
    /// vocabulary mismatch degrades visibly instead of dropping words.
    #[must_use]
    pub fn assemble(&self, utterance: &Utterance) -> Transcript {
        let mut text = String::new();
        for step in &utterance.steps {
            let piece = self
                .vocabulary
                .render(&step.unit)
                .unwrap_or_else(|| step.unit.as_str());
            if piece.is_empty() {
                continue;
            }
            if !text.is_empty() && !piece.starts_with(['.', ',', '!', '?']) {
                text.push(' ');
            }
            text.push_str(piece);
        }
        if let Some(first) = text.chars().next()
            && first.is_lowercase()
        {
            let upper: String = first.to_uppercase().collect();
            text.replace_range(..first.len_utf8(), &upper);
        }

        let mean_probability = utterance.mean_probability();
        let low_confidence = mean_probability < self.confidence_gate;
        if low_confidence {
            debug!(
                utterance_id = %utterance.id,
                mean_probability,
                gate = self.confidence_gate,
                "utterance tagged low-confidence"
            );
        }
        Transcript {
            utterance_id: utterance.id,
            text,
            mean_probability,
            low_confidence,
            range: utterance.range,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use neurovox_core::types::{DecodingStep, StepStatus, UnitId};
    use std::time::Duration;

    fn utterance(units: &[(&str, f32)]) -> Utterance {
        Utterance {
            id: UtteranceId::new(),
            steps: units
                .iter()
                .enumerate()
                .map(|(i, (unit, p))| DecodingStep {
                    unit: UnitId::new(unit),
                    probability: *p,
                    index: i as u32,
                    status: StepStatus::Final,
                })
                .collect(),
            range: TimeRange::new(Duration::ZERO, Duration::from_millis(500)),
        }
    }

    fn assembler(gate: f32) -> TranscriptAssembler {
        TranscriptAssembler::new(
            Arc::new(Vocabulary::default_phrases()),
            &SessionConfig {
                confidence_gate: gate,
                ..SessionConfig::default()
            },
        )
    }

    #[test]
    fn renders_single_phrase() {
        let t = assembler(0.7).assemble(&utterance(&[("i_need_help", 0.9)]));
        assert_eq!(t.text, "I need help");
        assert!(!t.low_confidence);
    }

    #[test]
    fn joins_units_with_spaces_and_capitalizes() {
        let t = assembler(0.1).assemble(&utterance(&[("yes", 0.9), ("thank_you", 0.9)]));
        assert_eq!(t.text, "Yes Thank you");
    }

    #[test]
    fn unknown_unit_falls_back_to_identifier() {
        let t = assembler(0.1).assemble(&utterance(&[("blorp", 0.9)]));
        assert_eq!(t.text, "Blorp");
    }

    #[test]
    fn gate_tags_but_never_drops() {
        let t = assembler(0.7).assemble(&utterance(&[("hello", 0.4), ("goodbye", 0.5)]));
        assert!(t.low_confidence);
        assert_eq!(t.text, "Hello Goodbye");
        assert!((t.mean_probability - 0.45).abs() < 1e-6);
    }

    #[test]
    fn empty_utterance_renders_empty_low_confidence() {
        let t = assembler(0.7).assemble(&utterance(&[]));
        assert_eq!(t.text, "");
        assert!(t.low_confidence);
    }

    #[test]
    fn rendering_is_deterministic() {
        let u = utterance(&[("i_am_happy", 0.8), ("yes", 0.9)]);
        let a = assembler(0.7);
        assert_eq!(a.assemble(&u), a.assemble(&u));
    }
}
