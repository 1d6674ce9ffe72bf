//! Streaming sequence decoder.
//!
//! A per-session state machine: `Idle` (no utterance in progress) →
//! `Decoding` (accumulating a provisional hypothesis) → finalization →
//! back to `Idle`. Activation out of `Idle` is debounced against noise;
//! finalization is triggered by the model predicting the end-of-utterance
//! unit, by a silence gap with no fused evidence, or by the defensive
//! utterance-length bound.
//!
//! Failure semantics: a single failed model call marks the step "no
//! evidence" (same as a fusion gap) — it never terminates an in-progress
//! utterance. Three consecutive failures force finalization of whatever
//! hypothesis exists, so a broken model degrades to output rather than a
//! silent hang. A step that exceeds its real-time budget keeps only the
//! cheapest available candidate and carries on.
//!
//! Every rewrite of provisional output is explicit: a retract event
//! referencing the step index precedes any replacement step.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use neurovox_core::config::SessionConfig;
use neurovox_core::events::WarningKind;
use neurovox_core::ids::UtteranceId;
use neurovox_core::types::{
    DecodingStep, FusedRepresentation, StepStatus, TimeRange, UnitId, Utterance,
};

use crate::beam::{Beam, rank};
use crate::model::{DecodingModel, ModelError, UnitScores};

/// Decode failures tolerated before forced finalization.
const MAX_CONSECUTIVE_FAILURES: u32 = 3;

/// Observable decoder state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecoderPhase {
    /// No utterance in progress.
    Idle,
    /// Accumulating a provisional hypothesis.
    Decoding,
}

/// Ordered outputs of one decoder advance.
#[derive(Debug)]
pub enum DecoderOutput {
    /// A new provisional step of the current best hypothesis.
    Provisional(DecodingStep),
    /// A previously emitted provisional step was withdrawn. Always
    /// precedes the replacement for that index.
    Retract {
        /// Index of the withdrawn step.
        step_index: u32,
    },
    /// An utterance was finalized; the decoder is back in `Idle`.
    Finalized(Utterance),
    /// A degraded condition worth surfacing.
    Warning {
        /// Warning category.
        kind: WarningKind,
        /// Human-readable detail.
        detail: String,
    },
}

/// Per-session streaming decoder.
pub struct SequenceDecoder {
    model: Arc<dyn DecodingModel>,
    beam: Beam,
    phase: DecoderPhase,
    activation_threshold: f32,
    debounce_steps: u32,
    max_silence: Duration,
    max_units: usize,
    step_budget: Duration,
    activation_run: u32,
    consecutive_failures: u32,
    /// End time of the last step that carried evidence.
    last_evidence: Option<Duration>,
    utterance_range: Option<TimeRange>,
    /// Mirror of provisional steps already emitted downstream.
    emitted: Vec<UnitId>,
}

impl SequenceDecoder {
    /// Build a decoder for one session.
    #[must_use]
    pub fn new(model: Arc<dyn DecodingModel>, config: &SessionConfig) -> Self {
        Self {
            model,
            beam: Beam::new(config.beam_width, config.prune_margin),
            phase: DecoderPhase::Idle,
            activation_threshold: config.activation_threshold,
            debounce_steps: config.activation_debounce_steps,
            max_silence: Duration::from_millis(config.max_silence_ms),
            max_units: config.max_utterance_units,
            step_budget: Duration::from_millis(config.step_budget_ms),
            activation_run: 0,
            consecutive_failures: 0,
            last_evidence: None,
            utterance_range: None,
            emitted: Vec::new(),
        }
    }

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> DecoderPhase {
        self.phase
    }

    /// Advance on one fused representation.
    pub fn on_fused(&mut self, fused: &FusedRepresentation, out: &mut Vec<DecoderOutput>) {
        if self.phase == DecoderPhase::Idle {
            if fused.confidence > self.activation_threshold {
                self.activation_run += 1;
            } else {
                self.activation_run = 0;
                return;
            }
            if self.activation_run < self.debounce_steps {
                return;
            }
            debug!(confidence = fused.confidence, "activation threshold held, decoding");
            self.phase = DecoderPhase::Decoding;
            self.last_evidence = Some(fused.range.end);
        }
        self.decode_step(fused, out);
    }

    /// Advance on a step with no fused representation (a gap).
    ///
    /// Gaps are "no new evidence", not silence per se — but enough of them
    /// in a row is exactly what a silence boundary looks like.
    pub fn on_gap(&mut self, now: Duration, out: &mut Vec<DecoderOutput>) {
        if self.phase != DecoderPhase::Decoding {
            return;
        }
        if let Some(last) = self.last_evidence
            && now.saturating_sub(last) >= self.max_silence
        {
            debug!(silence_ms = now.saturating_sub(last).as_millis() as u64, "silence gap");
            self.finalize(out, "silence gap");
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Internals
    // ─────────────────────────────────────────────────────────────────────

    fn decode_step(&mut self, fused: &FusedRepresentation, out: &mut Vec<DecoderOutput>) {
        let started = Instant::now();
        let mut candidates = Vec::new();
        let mut over_budget = false;

        let slots = self.beam.hypotheses().to_vec();
        for (slot, hypo) in slots.iter().enumerate() {
            // The best slot is always scored so a degraded step still has
            // its cheapest-available candidate.
            if slot > 0 && started.elapsed() > self.step_budget {
                over_budget = true;
                break;
            }
            match self.model.score_next(&hypo.units, fused) {
                Ok(scores) => {
                    if scores.is_empty() {
                        continue;
                    }
                    let probs = step_probabilities(&scores);
                    for ((unit, log_prob), prob) in scores.into_iter().zip(probs) {
                        candidates.push(hypo.extend(unit, log_prob, prob));
                    }
                }
                Err(e) => {
                    self.step_failed(&e, out);
                    return;
                }
            }
        }

        self.consecutive_failures = 0;
        self.last_evidence = Some(fused.range.end);
        self.utterance_range = Some(match self.utterance_range {
            Some(r) => r.union(&fused.range),
            None => fused.range,
        });

        if over_budget {
            warn!(budget_ms = self.step_budget.as_millis() as u64, "step budget exceeded");
            out.push(DecoderOutput::Warning {
                kind: WarningKind::StepBudgetExceeded,
                detail: format!(
                    "step exceeded {} ms budget, degraded to greedy extension",
                    self.step_budget.as_millis()
                ),
            });
            candidates.sort_by(rank);
            candidates.truncate(1);
        }
        self.beam.apply(candidates);

        let eou = self.model.vocabulary().end_unit().clone();
        let best_ended = self.beam.best().units.last() == Some(&eou);
        self.reconcile(&eou, out);

        if best_ended {
            self.finalize(out, "end-of-utterance unit");
            return;
        }
        if self.beam.best().units.len() >= self.max_units {
            warn!(max_units = self.max_units, "utterance length bound hit");
            self.finalize(out, "max utterance length");
        }
    }

    fn step_failed(&mut self, error: &ModelError, out: &mut Vec<DecoderOutput>) {
        self.consecutive_failures += 1;
        warn!(
            failures = self.consecutive_failures,
            error = %error,
            "decode step failed, treated as no evidence"
        );
        out.push(DecoderOutput::Warning {
            kind: WarningKind::DecodeStepFailed,
            detail: error.to_string(),
        });
        if self.consecutive_failures >= MAX_CONSECUTIVE_FAILURES {
            out.push(DecoderOutput::Warning {
                kind: WarningKind::ForcedFinalize,
                detail: format!(
                    "{MAX_CONSECUTIVE_FAILURES} consecutive decode failures, finalizing current hypothesis"
                ),
            });
            self.finalize(out, "consecutive decode failures");
        }
    }

    /// Bring emitted provisional steps in line with the current best
    /// hypothesis: retract (deepest first) everything past the common
    /// prefix, then emit the replacements.
    fn reconcile(&mut self, eou: &UnitId, out: &mut Vec<DecoderOutput>) {
        let best = self.beam.best();
        let mut target = best.units.as_slice();
        if target.last() == Some(eou) {
            target = &target[..target.len() - 1];
        }
        let target: Vec<UnitId> = target.to_vec();
        let probs = best.step_probs.clone();

        let common = self
            .emitted
            .iter()
            .zip(&target)
            .take_while(|(a, b)| a == b)
            .count();
        for index in (common..self.emitted.len()).rev() {
            out.push(DecoderOutput::Retract {
                step_index: index as u32,
            });
        }
        self.emitted.truncate(common);
        for index in common..target.len() {
            out.push(DecoderOutput::Provisional(DecodingStep {
                unit: target[index].clone(),
                probability: probs[index],
                index: index as u32,
                status: StepStatus::Provisional,
            }));
            self.emitted.push(target[index].clone());
        }
    }

    fn finalize(&mut self, out: &mut Vec<DecoderOutput>, reason: &str) {
        let best = self.beam.best().clone();
        let eou = self.model.vocabulary().end_unit().clone();
        let mut units = best.units;
        let mut probs = best.step_probs;
        if units.last() == Some(&eou) {
            let _ = units.pop();
            let _ = probs.pop();
        }

        // Emitted steps the final hypothesis does not contain must be
        // retracted before the utterance is emitted.
        let common = self
            .emitted
            .iter()
            .zip(&units)
            .take_while(|(a, b)| a == b)
            .count();
        for index in (common..self.emitted.len()).rev() {
            out.push(DecoderOutput::Retract {
                step_index: index as u32,
            });
        }

        if units.is_empty() {
            debug!(reason, "discarding empty hypothesis at finalization");
        } else {
            let steps = units
                .into_iter()
                .zip(probs)
                .enumerate()
                .map(|(index, (unit, probability))| DecodingStep {
                    unit,
                    probability,
                    index: index as u32,
                    status: StepStatus::Final,
                })
                .collect::<Vec<_>>();
            let range = self
                .utterance_range
                .unwrap_or_else(|| TimeRange::new(Duration::ZERO, Duration::ZERO));
            info!(reason, steps = steps.len(), "utterance finalized");
            out.push(DecoderOutput::Finalized(Utterance {
                id: UtteranceId::new(),
                steps,
                range,
            }));
        }
        self.reset_utterance();
    }

    fn reset_utterance(&mut self) {
        self.beam.reset();
        self.emitted.clear();
        self.phase = DecoderPhase::Idle;
        self.activation_run = 0;
        self.consecutive_failures = 0;
        self.last_evidence = None;
        self.utterance_range = None;
    }
}

/// Per-step unit probability: normalized mass of each unit over the
/// scores the model returned for this extension.
fn step_probabilities(scores: &UnitScores) -> Vec<f32> {
    let max = scores
        .iter()
        .map(|(_, lp)| *lp)
        .fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = scores.iter().map(|(_, lp)| (lp - max).exp()).collect();
    let total: f64 = exps.iter().sum();
    exps.iter().map(|e| (e / total) as f32).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::ScriptedModel;
    use assert_matches::assert_matches;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    fn fused(start_ms: u64, confidence: f32) -> FusedRepresentation {
        FusedRepresentation {
            range: TimeRange::new(ms(start_ms), ms(start_ms + 250)),
            values: vec![0.0; 4],
            eeg_confidence: confidence,
            emg_confidence: 0.0,
            confidence,
        }
    }

    fn config() -> SessionConfig {
        SessionConfig::default()
    }

    fn units(out: &[DecoderOutput]) -> Vec<String> {
        out.iter()
            .filter_map(|o| match o {
                DecoderOutput::Provisional(s) => Some(s.unit.as_str().to_owned()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn stays_idle_below_activation_threshold() {
        let model = Arc::new(ScriptedModel::new());
        let mut dec = SequenceDecoder::new(model, &config());
        let mut out = Vec::new();
        dec.on_fused(&fused(0, 0.3), &mut out);
        assert!(out.is_empty());
        assert_eq!(dec.phase(), DecoderPhase::Idle);
    }

    #[test]
    fn debounce_requires_consecutive_high_confidence() {
        let model = Arc::new(ScriptedModel::new());
        model.push_scores(&[("yes", -0.1)]);
        let cfg = SessionConfig {
            activation_debounce_steps: 2,
            ..config()
        };
        let mut dec = SequenceDecoder::new(model, &cfg);
        let mut out = Vec::new();

        dec.on_fused(&fused(0, 0.9), &mut out);
        assert!(out.is_empty());
        assert_eq!(dec.phase(), DecoderPhase::Idle);

        // A low step resets the run.
        dec.on_fused(&fused(250, 0.2), &mut out);
        dec.on_fused(&fused(500, 0.9), &mut out);
        assert!(out.is_empty());

        dec.on_fused(&fused(750, 0.9), &mut out);
        assert_eq!(dec.phase(), DecoderPhase::Decoding);
        assert_eq!(units(&out), vec!["yes"]);
    }

    #[test]
    fn activates_on_first_step_with_default_debounce() {
        let model = Arc::new(ScriptedModel::new());
        model.push_scores(&[("hello", -0.1)]);
        let mut dec = SequenceDecoder::new(model, &config());
        let mut out = Vec::new();
        dec.on_fused(&fused(0, 0.9), &mut out);
        assert_eq!(dec.phase(), DecoderPhase::Decoding);
        assert_eq!(units(&out), vec!["hello"]);
    }

    #[test]
    fn rescoring_emits_retract_before_replacement() {
        let model = Arc::new(ScriptedModel::new());
        // Step 1: "hello" narrowly beats "help".
        model.push_scores(&[("hello", -0.5), ("help", -0.6)]);
        // Step 2: the "help" branch overtakes; "hello" branch collapses.
        model.push_scores_for_prefix(&["hello"], &[("goodbye", -5.0)]);
        model.push_scores_for_prefix(&["help"], &[("please", -0.1)]);

        let mut dec = SequenceDecoder::new(model, &config());
        let mut out = Vec::new();
        dec.on_fused(&fused(0, 0.9), &mut out);
        assert_eq!(units(&out), vec!["hello"]);

        out.clear();
        dec.on_fused(&fused(250, 0.9), &mut out);

        // Retract of step 0 must precede its replacement.
        assert_matches!(out[0], DecoderOutput::Retract { step_index: 0 });
        let emitted = units(&out);
        assert_eq!(emitted, vec!["help", "please"]);
    }

    #[test]
    fn end_of_utterance_unit_finalizes() {
        let model = Arc::new(ScriptedModel::new());
        model.push_scores(&[("thank_you", -0.1)]);
        model.push_scores(&[("<eou>", -0.05)]);
        let mut dec = SequenceDecoder::new(model, &config());
        let mut out = Vec::new();

        dec.on_fused(&fused(0, 0.9), &mut out);
        out.clear();
        dec.on_fused(&fused(250, 0.9), &mut out);

        let utterance = out
            .iter()
            .find_map(|o| match o {
                DecoderOutput::Finalized(u) => Some(u.clone()),
                _ => None,
            })
            .expect("finalized utterance");
        assert_eq!(utterance.steps.len(), 1);
        assert_eq!(utterance.steps[0].unit.as_str(), "thank_you");
        assert_eq!(utterance.steps[0].status, StepStatus::Final);
        assert_eq!(dec.phase(), DecoderPhase::Idle);
    }

    #[test]
    fn silence_gap_finalizes_current_hypothesis() {
        let model = Arc::new(ScriptedModel::new());
        model.push_scores(&[("i_am_tired", -0.1)]);
        let mut dec = SequenceDecoder::new(model, &config());
        let mut out = Vec::new();

        dec.on_fused(&fused(0, 0.9), &mut out);
        out.clear();

        // Gaps accumulate; finalization at >= max_silence_ms (1200).
        dec.on_gap(ms(900), &mut out);
        assert!(out.is_empty());
        dec.on_gap(ms(1_500), &mut out);
        assert_matches!(out.last(), Some(DecoderOutput::Finalized(u)) if u.steps.len() == 1);
        assert_eq!(dec.phase(), DecoderPhase::Idle);
    }

    #[test]
    fn gap_before_activation_is_ignored() {
        let model = Arc::new(ScriptedModel::new());
        let mut dec = SequenceDecoder::new(model, &config());
        let mut out = Vec::new();
        dec.on_gap(ms(60_000), &mut out);
        assert!(out.is_empty());
    }

    #[test]
    fn three_consecutive_failures_force_finalization() {
        let model = Arc::new(ScriptedModel::new());
        model.push_scores(&[("i_need_help", -0.1)]);
        model.push_failure();
        model.push_failure();
        model.push_failure();
        let mut dec = SequenceDecoder::new(model, &config());
        let mut out = Vec::new();

        dec.on_fused(&fused(0, 0.9), &mut out);
        assert_eq!(units(&out), vec!["i_need_help"]);
        out.clear();

        dec.on_fused(&fused(250, 0.9), &mut out);
        dec.on_fused(&fused(500, 0.9), &mut out);
        // Two failures: warnings only, utterance still alive.
        assert!(!out.iter().any(|o| matches!(o, DecoderOutput::Finalized(_))));
        assert_eq!(
            out.iter()
                .filter(|o| matches!(
                    o,
                    DecoderOutput::Warning {
                        kind: WarningKind::DecodeStepFailed,
                        ..
                    }
                ))
                .count(),
            2
        );
        out.clear();

        dec.on_fused(&fused(750, 0.9), &mut out);
        assert!(out.iter().any(|o| matches!(
            o,
            DecoderOutput::Warning {
                kind: WarningKind::ForcedFinalize,
                ..
            }
        )));
        let utterance = out
            .iter()
            .find_map(|o| match o {
                DecoderOutput::Finalized(u) => Some(u),
                _ => None,
            })
            .expect("forced finalization preserves the hypothesis");
        assert_eq!(utterance.steps[0].unit.as_str(), "i_need_help");
    }

    #[test]
    fn single_failure_recovers_and_continues() {
        let model = Arc::new(ScriptedModel::new());
        model.push_scores(&[("hello", -0.1)]);
        model.push_failure();
        model.push_scores_for_prefix(&["hello"], &[("<eou>", -0.1)]);
        let mut dec = SequenceDecoder::new(model, &config());
        let mut out = Vec::new();

        dec.on_fused(&fused(0, 0.9), &mut out);
        dec.on_fused(&fused(250, 0.9), &mut out); // fails, no evidence
        assert_eq!(dec.phase(), DecoderPhase::Decoding);
        out.clear();
        dec.on_fused(&fused(500, 0.9), &mut out);
        assert!(out.iter().any(|o| matches!(o, DecoderOutput::Finalized(_))));
    }

    #[test]
    fn utterance_length_bound_finalizes() {
        let model = Arc::new(ScriptedModel::new());
        let cfg = SessionConfig {
            max_utterance_units: 3,
            ..config()
        };
        let mut dec = SequenceDecoder::new(model.clone(), &cfg);
        let mut out = Vec::new();
        for step in 0..3 {
            model.push_scores(&[("yes", -0.1)]);
            dec.on_fused(&fused(step * 250, 0.9), &mut out);
        }
        let utterance = out
            .iter()
            .find_map(|o| match o {
                DecoderOutput::Finalized(u) => Some(u),
                _ => None,
            })
            .expect("length bound finalizes");
        assert_eq!(utterance.steps.len(), 3);
    }

    #[test]
    fn step_budget_overrun_degrades_to_greedy() {
        let model = Arc::new(ScriptedModel::new());
        // Step 1 builds a two-slot beam.
        model.push_scores(&[("hello", -0.5), ("help", -0.6)]);
        // Step 2 is slow enough to blow a 1 ms budget between slots.
        model.push_scores_for_prefix(&["hello"], &[("please", -0.1)]);
        model.push_scores_for_prefix(&["help"], &[("please", -0.1)]);
        model.set_delay(ms(5));

        let cfg = SessionConfig {
            step_budget_ms: 1,
            ..config()
        };
        let mut dec = SequenceDecoder::new(model, &cfg);
        let mut out = Vec::new();
        dec.on_fused(&fused(0, 0.9), &mut out);
        out.clear();
        dec.on_fused(&fused(250, 0.9), &mut out);

        assert!(out.iter().any(|o| matches!(
            o,
            DecoderOutput::Warning {
                kind: WarningKind::StepBudgetExceeded,
                ..
            }
        )));
        // Degraded step still extended the best hypothesis.
        assert_eq!(units(&out), vec!["please"]);
    }

    #[test]
    fn deterministic_across_runs() {
        let run = || {
            let model = Arc::new(ScriptedModel::new());
            model.push_scores(&[("a", -1.0), ("b", -1.0), ("c", -1.0)]);
            model.push_scores(&[("<eou>", -0.1)]);
            let mut dec = SequenceDecoder::new(model, &config());
            let mut out = Vec::new();
            dec.on_fused(&fused(0, 0.9), &mut out);
            dec.on_fused(&fused(250, 0.9), &mut out);
            out.iter()
                .find_map(|o| match o {
                    DecoderOutput::Finalized(u) => {
                        Some(u.units().map(|u| u.as_str().to_owned()).collect::<Vec<_>>())
                    }
                    _ => None,
                })
                .expect("finalized")
        };
        let a = run();
        let b = run();
        assert_eq!(a, b);
        // Tie among equal scores resolves lexicographically.
        assert_eq!(a, vec!["a"]);
    }
}
