//! Beam arena.
//!
//! A fixed, bounded array of hypothesis slots indexed by beam rank. The
//! decoder builds extended candidates each step and hands them to
//! [`Beam::apply`], which sorts deterministically, deduplicates, truncates
//! to the beam width, and margin-prunes — pruning is an index-compaction
//! step, not garbage collection.
//!
//! Ordering is fully deterministic so two runs over identical inputs
//! produce identical finalized utterances: higher cumulative
//! log-probability first, ties broken by shorter sequence, then by
//! lexicographic order of the unit identifiers.

use std::cmp::Ordering;

use neurovox_core::types::UnitId;

/// One candidate unit sequence with its running score.
#[derive(Clone, Debug, PartialEq)]
pub struct Hypothesis {
    /// Units decoded so far, in order.
    pub units: Vec<UnitId>,
    /// Per-step unit probability, parallel to `units`.
    pub step_probs: Vec<f32>,
    /// Cumulative log-probability.
    pub score: f64,
}

impl Hypothesis {
    /// The empty root hypothesis.
    #[must_use]
    pub fn root() -> Self {
        Self {
            units: Vec::new(),
            step_probs: Vec::new(),
            score: 0.0,
        }
    }

    /// Extend by one unit.
    #[must_use]
    pub fn extend(&self, unit: UnitId, log_prob: f64, probability: f32) -> Self {
        let mut units = self.units.clone();
        units.push(unit);
        let mut step_probs = self.step_probs.clone();
        step_probs.push(probability);
        Self {
            units,
            step_probs,
            score: self.score + log_prob,
        }
    }
}

/// Deterministic candidate ordering: best first.
pub(crate) fn rank(a: &Hypothesis, b: &Hypothesis) -> Ordering {
    // NaN scores sink to the end rather than poisoning the sort.
    b.score
        .partial_cmp(&a.score)
        .unwrap_or_else(|| a.score.is_nan().cmp(&b.score.is_nan()))
        .then_with(|| a.units.len().cmp(&b.units.len()))
        .then_with(|| a.units.cmp(&b.units))
}

/// Bounded top-K hypothesis arena.
pub struct Beam {
    slots: Vec<Hypothesis>,
    width: usize,
    prune_margin: f64,
}

impl Beam {
    /// Create a beam of `width` slots seeded with the root hypothesis.
    #[must_use]
    pub fn new(width: usize, prune_margin: f64) -> Self {
        Self {
            slots: vec![Hypothesis::root()],
            width: width.max(1),
            prune_margin,
        }
    }

    /// Surviving hypotheses, best first.
    #[must_use]
    pub fn hypotheses(&self) -> &[Hypothesis] {
        &self.slots
    }

    /// The current best hypothesis.
    #[must_use]
    pub fn best(&self) -> &Hypothesis {
        // Invariant: at least one slot survives every compaction.
        &self.slots[0]
    }

    /// Number of live slots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether only the root hypothesis is present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.len() == 1 && self.slots[0].units.is_empty()
    }

    /// Replace the arena with the top candidates of this step.
    ///
    /// Compaction: sort deterministically, drop duplicate unit sequences
    /// (keeping the better-scored copy), truncate to the beam width, then
    /// prune everything scoring more than the margin below the best.
    /// An empty candidate set leaves the beam untouched.
    pub fn apply(&mut self, mut candidates: Vec<Hypothesis>) {
        if candidates.is_empty() {
            return;
        }
        candidates.sort_by(rank);
        let mut seen = std::collections::HashSet::new();
        candidates.retain(|h| seen.insert(h.units.clone()));
        candidates.truncate(self.width);

        let floor = candidates[0].score - self.prune_margin;
        candidates.retain(|h| h.score >= floor);
        self.slots = candidates;
    }

    /// Reset to the root hypothesis (utterance boundary).
    pub fn reset(&mut self) {
        self.slots.clear();
        self.slots.push(Hypothesis::root());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn hyp(units: &[&str], score: f64) -> Hypothesis {
        Hypothesis {
            units: units.iter().map(UnitId::new).collect(),
            step_probs: vec![0.5; units.len()],
            score,
        }
    }

    #[test]
    fn apply_keeps_top_k_by_score() {
        let mut beam = Beam::new(2, 100.0);
        beam.apply(vec![
            hyp(&["a"], -3.0),
            hyp(&["b"], -1.0),
            hyp(&["c"], -2.0),
        ]);
        assert_eq!(beam.len(), 2);
        assert_eq!(beam.best().units[0].as_str(), "b");
        assert_eq!(beam.hypotheses()[1].units[0].as_str(), "c");
    }

    #[test]
    fn ties_break_by_length_then_lexicographic() {
        let mut beam = Beam::new(3, 100.0);
        beam.apply(vec![
            hyp(&["b"], -1.0),
            hyp(&["a", "a"], -1.0),
            hyp(&["a"], -1.0),
        ]);
        // Equal scores: shorter first, then lexicographic.
        assert_eq!(beam.hypotheses()[0].units[0].as_str(), "a");
        assert_eq!(beam.hypotheses()[1].units[0].as_str(), "b");
        assert_eq!(beam.hypotheses()[2].units.len(), 2);
    }

    #[test]
    fn margin_prunes_far_hypotheses() {
        let mut beam = Beam::new(5, 2.0);
        beam.apply(vec![hyp(&["a"], -1.0), hyp(&["b"], -2.0), hyp(&["c"], -9.0)]);
        assert_eq!(beam.len(), 2);
    }

    #[test]
    fn duplicate_sequences_are_merged() {
        let mut beam = Beam::new(5, 100.0);
        beam.apply(vec![hyp(&["a"], -2.0), hyp(&["a"], -1.0)]);
        assert_eq!(beam.len(), 1);
        assert_eq!(beam.best().score, -1.0);
    }

    #[test]
    fn empty_apply_is_a_no_op() {
        let mut beam = Beam::new(2, 1.0);
        beam.apply(vec![hyp(&["a"], -1.0)]);
        beam.apply(vec![]);
        assert_eq!(beam.best().units[0].as_str(), "a");
    }

    #[test]
    fn reset_returns_to_root() {
        let mut beam = Beam::new(2, 1.0);
        beam.apply(vec![hyp(&["a"], -1.0)]);
        assert!(!beam.is_empty());
        beam.reset();
        assert!(beam.is_empty());
        assert_eq!(beam.best().score, 0.0);
    }

    proptest! {
        /// Identical candidate sets yield identical arenas regardless of
        /// the candidates' input order.
        #[test]
        fn ordering_is_input_order_independent(
            scores in proptest::collection::vec((0usize..6, -10.0f64..0.0), 1..20),
            seed in 0u64..1000,
        ) {
            let names = ["a", "b", "c", "d", "e", "f"];
            let mut candidates: Vec<Hypothesis> = scores
                .iter()
                // Quantize scores so permuted float summation can't differ.
                .map(|&(i, s)| hyp(&[names[i]], (s * 16.0).round() / 16.0))
                .collect();

            let mut beam_a = Beam::new(3, 5.0);
            beam_a.apply(candidates.clone());

            // Deterministic shuffle of the same candidates.
            let mut state = seed.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1);
            for i in (1..candidates.len()).rev() {
                state = state.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1);
                let j = (state >> 33) as usize % (i + 1);
                candidates.swap(i, j);
            }
            let mut beam_b = Beam::new(3, 5.0);
            beam_b.apply(candidates);

            prop_assert_eq!(beam_a.hypotheses(), beam_b.hypotheses());
        }
    }
}
