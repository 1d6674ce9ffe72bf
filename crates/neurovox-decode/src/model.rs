//! Decoding model boundary.
//!
//! The model is a pretrained artifact consumed as a fixed function: given
//! the current hypothesis prefix and one fused representation, it returns
//! log-probabilities over plausible next units. How those scores are
//! produced (and whether units are phonemes or words) is the model's
//! business; the pipeline only consumes the returned map and the model's
//! vocabulary.

use std::collections::HashMap;

use neurovox_core::types::{FusedRepresentation, UnitId};

/// Reserved unit identifier that ends an utterance.
pub const END_OF_UTTERANCE: &str = "<eou>";

/// Log-probability scores over candidate next units.
pub type UnitScores = Vec<(UnitId, f64)>;

/// Errors from a decoding model call.
///
/// All of these are transient at the pipeline level: a failed step is
/// treated as a gap, never as session death.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    /// The fused representation did not match the model's input shape.
    #[error("bad input shape: expected {expected} values, got {got}")]
    BadInputShape {
        /// Model's expected input length.
        expected: usize,
        /// Observed input length.
        got: usize,
    },

    /// Any other inference failure.
    #[error("inference error: {0}")]
    Inference(String),
}

/// A pretrained streaming decoding model.
///
/// Loaded once per process and shared read-only across sessions; all
/// methods take `&self` and implementations must be safe for concurrent
/// invocation.
pub trait DecodingModel: Send + Sync {
    /// Score plausible next units given the hypothesis prefix and one
    /// fused representation.
    fn score_next(
        &self,
        prefix: &[UnitId],
        fused: &FusedRepresentation,
    ) -> Result<UnitScores, ModelError>;

    /// The unit vocabulary this model predicts over.
    fn vocabulary(&self) -> &Vocabulary;
}

/// Unit vocabulary with its deterministic unit-to-text rendering table.
#[derive(Clone, Debug)]
pub struct Vocabulary {
    entries: Vec<(UnitId, String)>,
    by_id: HashMap<UnitId, usize>,
    end_unit: UnitId,
}

impl Vocabulary {
    /// Build a vocabulary from `(unit, rendered text)` pairs. The
    /// end-of-utterance unit is implicit and renders to nothing.
    #[must_use]
    pub fn new(entries: Vec<(UnitId, String)>) -> Self {
        let by_id = entries
            .iter()
            .enumerate()
            .map(|(i, (id, _))| (id.clone(), i))
            .collect();
        Self {
            entries,
            by_id,
            end_unit: UnitId::new(END_OF_UTTERANCE),
        }
    }

    /// The end-of-utterance control unit.
    #[must_use]
    pub fn end_unit(&self) -> &UnitId {
        &self.end_unit
    }

    /// Rendered text for `unit`, if it is in the table.
    #[must_use]
    pub fn render(&self, unit: &UnitId) -> Option<&str> {
        self.by_id.get(unit).map(|&i| self.entries[i].1.as_str())
    }

    /// All non-control units, in table order.
    pub fn units(&self) -> impl Iterator<Item = &UnitId> {
        self.entries.iter().map(|(id, _)| id)
    }

    /// Number of non-control units.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Default word-level vocabulary: the common non-verbal communication
    /// phrases the reference decoder shipped with.
    #[must_use]
    pub fn default_phrases() -> Self {
        const PHRASES: &[&str] = &[
            "I need help",
            "I am hungry",
            "I am thirsty",
            "I am in pain",
            "I need to use the restroom",
            "Yes",
            "No",
            "Please",
            "Thank you",
            "Hello",
            "Goodbye",
            "I love you",
            "I am tired",
            "I am happy",
            "I am sad",
            "I am uncomfortable",
            "I am cold",
            "I am hot",
            "I am scared",
            "I am confused",
        ];
        let entries = PHRASES
            .iter()
            .map(|p| {
                let id = p
                    .to_lowercase()
                    .chars()
                    .map(|c| if c.is_alphanumeric() { c } else { '_' })
                    .collect::<String>();
                (UnitId::new(id), (*p).to_owned())
            })
            .collect();
        Self::new(entries)
    }
}
