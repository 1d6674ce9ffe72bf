//! Per-session configuration.
//!
//! Validation is fail-fast: an invalid value is fatal to session creation
//! and never silently defaulted. Defaults follow the reference acquisition
//! setup (256 Hz EEG, 1000 Hz EMG).

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Configuration for one decoding session.
///
/// Constructed by the caller at `open_session` time and immutable for the
/// session's lifetime. All duration fields are in milliseconds.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct SessionConfig {
    /// Aligned window length in ms.
    pub window_length_ms: u64,
    /// Minimum cross-modal window overlap, as a fraction of window length,
    /// for a step to count as bimodal. Range `(0, 1]`.
    pub min_overlap: f32,
    /// Ingestion retention horizon in ms; older samples are evicted.
    pub retention_horizon_ms: u64,
    /// EEG channel count.
    pub eeg_channels: usize,
    /// EMG channel count.
    pub emg_channels: usize,
    /// EEG sample rate in Hz.
    pub eeg_sample_rate: u32,
    /// EMG sample rate in Hz.
    pub emg_sample_rate: u32,
    /// Beam width K.
    pub beam_width: usize,
    /// Hypotheses scoring more than this many nats below the best are pruned.
    pub prune_margin: f64,
    /// Fused confidence the activation gate requires. Range `[0, 1]`.
    pub activation_threshold: f32,
    /// Consecutive above-threshold steps required before decoding starts.
    pub activation_debounce_steps: u32,
    /// Silence (no fused evidence) that ends an utterance, in ms.
    pub max_silence_ms: u64,
    /// Hard bound on units per utterance.
    pub max_utterance_units: usize,
    /// Mean-probability threshold below which an utterance is tagged
    /// low-confidence. Range `[0, 1]`.
    pub confidence_gate: f32,
    /// Output dispatcher pending-queue depth.
    pub output_queue_depth: usize,
    /// Real-time budget per decode step, in ms.
    pub step_budget_ms: u64,
    /// Source language code of the decoded text.
    pub source_lang: String,
    /// Target language for translation. `None` (or equal to the source)
    /// skips translation.
    pub target_lang: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            window_length_ms: 250,
            min_overlap: 0.8,
            retention_horizon_ms: 5_000,
            eeg_channels: 8,
            emg_channels: 4,
            eeg_sample_rate: 256,
            emg_sample_rate: 1_000,
            beam_width: 5,
            prune_margin: 6.0,
            activation_threshold: 0.5,
            activation_debounce_steps: 1,
            max_silence_ms: 1_200,
            max_utterance_units: 24,
            confidence_gate: 0.7,
            output_queue_depth: 4,
            step_budget_ms: 50,
            source_lang: "en".to_owned(),
            target_lang: None,
        }
    }
}

impl SessionConfig {
    /// Validate every field, returning the first violation.
    pub fn validate(&self) -> Result<(), ConfigError> {
        fn positive(field: &'static str, value: u64) -> Result<(), ConfigError> {
            if value == 0 {
                return Err(ConfigError::OutOfRange {
                    field,
                    reason: "must be greater than zero".into(),
                });
            }
            Ok(())
        }
        fn unit_interval(field: &'static str, value: f32) -> Result<(), ConfigError> {
            if !value.is_finite() || !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::OutOfRange {
                    field,
                    reason: format!("{value} is outside [0, 1]"),
                });
            }
            Ok(())
        }

        positive("window_length_ms", self.window_length_ms)?;
        positive("retention_horizon_ms", self.retention_horizon_ms)?;
        positive("max_silence_ms", self.max_silence_ms)?;
        positive("step_budget_ms", self.step_budget_ms)?;
        positive("eeg_channels", self.eeg_channels as u64)?;
        positive("emg_channels", self.emg_channels as u64)?;
        positive("eeg_sample_rate", u64::from(self.eeg_sample_rate))?;
        positive("emg_sample_rate", u64::from(self.emg_sample_rate))?;
        positive("beam_width", self.beam_width as u64)?;
        positive("max_utterance_units", self.max_utterance_units as u64)?;
        positive("output_queue_depth", self.output_queue_depth as u64)?;
        positive("activation_debounce_steps", u64::from(self.activation_debounce_steps))?;

        unit_interval("activation_threshold", self.activation_threshold)?;
        unit_interval("confidence_gate", self.confidence_gate)?;

        if !self.min_overlap.is_finite() || self.min_overlap <= 0.0 || self.min_overlap > 1.0 {
            return Err(ConfigError::OutOfRange {
                field: "min_overlap",
                reason: format!("{} is outside (0, 1]", self.min_overlap),
            });
        }
        if !self.prune_margin.is_finite() || self.prune_margin <= 0.0 {
            return Err(ConfigError::OutOfRange {
                field: "prune_margin",
                reason: "must be a positive finite value".into(),
            });
        }
        if self.retention_horizon_ms < self.window_length_ms {
            return Err(ConfigError::OutOfRange {
                field: "retention_horizon_ms",
                reason: "must be at least one window length".into(),
            });
        }
        if self.source_lang.is_empty() {
            return Err(ConfigError::OutOfRange {
                field: "source_lang",
                reason: "must not be empty".into(),
            });
        }
        if let Some(target) = &self.target_lang
            && target.is_empty()
        {
            return Err(ConfigError::OutOfRange {
                field: "target_lang",
                reason: "must not be empty when set".into(),
            });
        }
        Ok(())
    }

    /// Window length as a [`std::time::Duration`].
    #[must_use]
    pub fn window_length(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.window_length_ms)
    }

    /// Decode step cadence: windows advance by half a window per step.
    #[must_use]
    pub fn step_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis((self.window_length_ms / 2).max(1))
    }

    /// Expected samples per window for `modality`'s configured rate.
    #[must_use]
    pub fn samples_per_window(&self, modality: crate::types::Modality) -> usize {
        let rate = match modality {
            crate::types::Modality::Eeg => self.eeg_sample_rate,
            crate::types::Modality::Emg => self.emg_sample_rate,
        };
        (u64::from(rate) * self.window_length_ms / 1_000) as usize
    }

    /// Configured channel count for `modality`.
    #[must_use]
    pub fn channels(&self, modality: crate::types::Modality) -> usize {
        match modality {
            crate::types::Modality::Eeg => self.eeg_channels,
            crate::types::Modality::Emg => self.emg_channels,
        }
    }

    /// Whether translation is requested (target set and different from source).
    #[must_use]
    pub fn wants_translation(&self) -> bool {
        self.target_lang
            .as_deref()
            .is_some_and(|t| t != self.source_lang)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Modality;
    use assert_matches::assert_matches;

    #[test]
    fn default_config_is_valid() {
        assert_matches!(SessionConfig::default().validate(), Ok(()));
    }

    #[test]
    fn zero_window_is_rejected() {
        let cfg = SessionConfig {
            window_length_ms: 0,
            ..SessionConfig::default()
        };
        assert_matches!(
            cfg.validate(),
            Err(ConfigError::OutOfRange {
                field: "window_length_ms",
                ..
            })
        );
    }

    #[test]
    fn threshold_above_one_is_rejected() {
        let cfg = SessionConfig {
            activation_threshold: 1.5,
            ..SessionConfig::default()
        };
        assert_matches!(
            cfg.validate(),
            Err(ConfigError::OutOfRange {
                field: "activation_threshold",
                ..
            })
        );
    }

    #[test]
    fn nan_overlap_is_rejected() {
        let cfg = SessionConfig {
            min_overlap: f32::NAN,
            ..SessionConfig::default()
        };
        assert_matches!(cfg.validate(), Err(ConfigError::OutOfRange { field: "min_overlap", .. }));
    }

    #[test]
    fn retention_shorter_than_window_is_rejected() {
        let cfg = SessionConfig {
            window_length_ms: 500,
            retention_horizon_ms: 250,
            ..SessionConfig::default()
        };
        assert_matches!(
            cfg.validate(),
            Err(ConfigError::OutOfRange {
                field: "retention_horizon_ms",
                ..
            })
        );
    }

    #[test]
    fn empty_target_lang_is_rejected() {
        let cfg = SessionConfig {
            target_lang: Some(String::new()),
            ..SessionConfig::default()
        };
        assert_matches!(cfg.validate(), Err(ConfigError::OutOfRange { field: "target_lang", .. }));
    }

    #[test]
    fn samples_per_window_follows_rates() {
        let cfg = SessionConfig::default();
        // 250 ms at 256 Hz / 1000 Hz.
        assert_eq!(cfg.samples_per_window(Modality::Eeg), 64);
        assert_eq!(cfg.samples_per_window(Modality::Emg), 250);
    }

    #[test]
    fn wants_translation_requires_distinct_target() {
        let mut cfg = SessionConfig::default();
        assert!(!cfg.wants_translation());
        cfg.target_lang = Some("en".into());
        assert!(!cfg.wants_translation());
        cfg.target_lang = Some("es".into());
        assert!(cfg.wants_translation());
    }

    #[test]
    fn deserializes_with_defaults() {
        let cfg: SessionConfig = serde_json::from_str(r#"{"beam_width": 3}"#).unwrap();
        assert_eq!(cfg.beam_width, 3);
        assert_eq!(cfg.window_length_ms, 250);
    }
}
