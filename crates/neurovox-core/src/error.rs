//! Shared error types.
//!
//! Two families, matching the pipeline's recovery taxonomy:
//!
//! - [`ConfigError`] — invalid configuration at session open. Fatal to
//!   session creation, surfaced immediately, never silently defaulted.
//! - [`SignalError`] — data-path errors from ingestion and feature
//!   extraction. Recovered locally (discard, warn, continue); these never
//!   terminate a session.

use crate::types::Modality;

/// Configuration rejected at session open.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A field value is outside its allowed range.
    #[error("invalid config: {field} {reason}")]
    OutOfRange {
        /// Offending field name.
        field: &'static str,
        /// Human-readable constraint violation.
        reason: String,
    },
}

/// Recoverable data-path error.
#[derive(Debug, thiserror::Error)]
pub enum SignalError {
    /// Window shape does not match the session configuration. The caller
    /// must discard the window and re-request; retrying the same window
    /// cannot succeed.
    #[error(
        "malformed {modality} window: expected {expected_channels}x{expected_samples}, \
         got {channels}x{samples}"
    )]
    MalformedWindow {
        /// Window modality.
        modality: Modality,
        /// Configured channel count.
        expected_channels: usize,
        /// Configured samples per window.
        expected_samples: usize,
        /// Observed channel count.
        channels: usize,
        /// Observed sample count.
        samples: usize,
    },

    /// Batch shape or rate disagrees with the session configuration.
    #[error("mismatched {modality} batch: {reason}")]
    MismatchedBatch {
        /// Batch modality.
        modality: Modality,
        /// What disagreed.
        reason: String,
    },

    /// Batch timestamp regressed against the per-modality stream.
    /// The sensor contract requires monotonically non-decreasing timestamps.
    #[error("out-of-order {modality} batch: timestamp regressed by {regression_ms} ms")]
    OutOfOrderBatch {
        /// Batch modality.
        modality: Modality,
        /// How far the timestamp went backwards.
        regression_ms: u64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_names_the_field() {
        let e = ConfigError::OutOfRange {
            field: "beam_width",
            reason: "must be greater than zero".into(),
        };
        assert!(e.to_string().contains("beam_width"));
    }

    #[test]
    fn malformed_window_reports_shapes() {
        let e = SignalError::MalformedWindow {
            modality: Modality::Eeg,
            expected_channels: 8,
            expected_samples: 64,
            channels: 4,
            samples: 64,
        };
        let msg = e.to_string();
        assert!(msg.contains("8x64"));
        assert!(msg.contains("4x64"));
        assert!(msg.contains("eeg"));
    }
}
