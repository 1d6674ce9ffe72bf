//! Shared test models.
//!
//! Used by this crate's decoder tests and by the runtime integration
//! tests, so they live in a public module rather than being copy-pasted
//! per test module.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use parking_lot::Mutex;

use neurovox_core::types::{FusedRepresentation, UnitId};

use crate::model::{DecodingModel, ModelError, UnitScores, Vocabulary};

enum ScriptEntry {
    Scores(UnitScores),
    Fail,
}

/// A decoding model driven by a prepared script.
///
/// Each `score_next` call consumes one entry: prefix-keyed entries first
/// (for exercising specific beam slots), then the global queue. With the
/// script exhausted the model simply has no opinion (`Ok(vec![])`), which
/// lets a beam wind down without fabricating evidence.
pub struct ScriptedModel {
    vocabulary: Vocabulary,
    global: Mutex<VecDeque<ScriptEntry>>,
    by_prefix: Mutex<HashMap<Vec<String>, VecDeque<ScriptEntry>>>,
    delay: Mutex<Option<Duration>>,
}

impl ScriptedModel {
    /// New model over the default phrase vocabulary.
    #[must_use]
    pub fn new() -> Self {
        Self {
            vocabulary: Vocabulary::default_phrases(),
            global: Mutex::new(VecDeque::new()),
            by_prefix: Mutex::new(HashMap::new()),
            delay: Mutex::new(None),
        }
    }

    /// Queue scores for the next unkeyed `score_next` call.
    pub fn push_scores(&self, scores: &[(&str, f64)]) {
        self.global
            .lock()
            .push_back(ScriptEntry::Scores(to_scores(scores)));
    }

    /// Queue scores for the next call whose hypothesis prefix is exactly
    /// `prefix`.
    pub fn push_scores_for_prefix(&self, prefix: &[&str], scores: &[(&str, f64)]) {
        self.by_prefix
            .lock()
            .entry(prefix.iter().map(|s| (*s).to_owned()).collect())
            .or_default()
            .push_back(ScriptEntry::Scores(to_scores(scores)));
    }

    /// Queue an inference failure.
    pub fn push_failure(&self) {
        self.global.lock().push_back(ScriptEntry::Fail);
    }

    /// Make every call sleep, for exercising the step budget.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }
}

impl Default for ScriptedModel {
    fn default() -> Self {
        Self::new()
    }
}

impl DecodingModel for ScriptedModel {
    fn score_next(
        &self,
        prefix: &[UnitId],
        _fused: &FusedRepresentation,
    ) -> Result<UnitScores, ModelError> {
        if let Some(delay) = *self.delay.lock() {
            std::thread::sleep(delay);
        }

        let key: Vec<String> = prefix.iter().map(|u| u.as_str().to_owned()).collect();
        let entry = self
            .by_prefix
            .lock()
            .get_mut(&key)
            .and_then(VecDeque::pop_front)
            .or_else(|| self.global.lock().pop_front());

        match entry {
            Some(ScriptEntry::Scores(scores)) => Ok(scores),
            Some(ScriptEntry::Fail) => Err(ModelError::Inference("scripted failure".into())),
            None => Ok(Vec::new()),
        }
    }

    fn vocabulary(&self) -> &Vocabulary {
        &self.vocabulary
    }
}

/// A model that returns the same scores on every call.
///
/// Handy for streaming scenarios where the number of decode steps depends
/// on timing rather than on the test script.
pub struct ConstantModel {
    vocabulary: Vocabulary,
    scores: UnitScores,
}

impl ConstantModel {
    /// Model returning `scores` for every call.
    #[must_use]
    pub fn new(scores: &[(&str, f64)]) -> Self {
        Self {
            vocabulary: Vocabulary::default_phrases(),
            scores: to_scores(scores),
        }
    }
}

impl DecodingModel for ConstantModel {
    fn score_next(
        &self,
        _prefix: &[UnitId],
        _fused: &FusedRepresentation,
    ) -> Result<UnitScores, ModelError> {
        Ok(self.scores.clone())
    }

    fn vocabulary(&self) -> &Vocabulary {
        &self.vocabulary
    }
}

fn to_scores(scores: &[(&str, f64)]) -> UnitScores {
    scores
        .iter()
        .map(|(unit, lp)| (UnitId::new(unit), *lp))
        .collect()
}
