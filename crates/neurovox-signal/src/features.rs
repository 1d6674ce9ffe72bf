//! Per-modality feature extraction.
//!
//! `extract` is a pure function of one window: no cross-window smoothing,
//! so a given window always yields the same raw features and extraction is
//! testable in isolation. The only session-scoped state is the EEG running
//! normalization, which adapts forward with every window and never revises
//! already-emitted vectors.
//!
//! EEG features are band powers (delta through gamma, single-bin Goertzel
//! at each band's center frequency) plus temporal statistics per channel.
//! EMG features reflect articulation-muscle activity: segment RMS envelope,
//! onset count, and amplitude statistics per channel.

use neurovox_core::error::SignalError;
use neurovox_core::types::{AlignedWindow, FeatureVector, Modality};

/// EEG analysis bands in Hz: delta, theta, alpha, beta, gamma.
const EEG_BANDS: [(f32, f32); 5] = [
    (1.0, 4.0),
    (4.0, 8.0),
    (8.0, 13.0),
    (13.0, 30.0),
    (30.0, 45.0),
];

/// EMG envelope segments per window.
const EMG_SEGMENTS: usize = 4;

/// Moving-average envelope width in samples.
const EMG_ENVELOPE_SPAN: usize = 25;

// ─────────────────────────────────────────────────────────────────────────────
// Shared helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Single-bin Goertzel power at `freq`, normalized by window length.
fn goertzel_power(samples: &[f32], sample_rate: f32, freq: f32) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let omega = 2.0 * std::f32::consts::PI * freq / sample_rate;
    let coeff = 2.0 * omega.cos();
    let (mut s_prev, mut s_prev2) = (0.0f32, 0.0f32);
    for &x in samples {
        let s = x + coeff * s_prev - s_prev2;
        s_prev2 = s_prev;
        s_prev = s;
    }
    let power = s_prev2.mul_add(s_prev2, s_prev * s_prev) - coeff * s_prev * s_prev2;
    (power / samples.len() as f32).max(0.0)
}

fn mean(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.iter().sum::<f32>() / samples.len() as f32
}

fn variance(samples: &[f32], mean: f32) -> f32 {
    if samples.len() < 2 {
        return 0.0;
    }
    samples.iter().map(|&x| (x - mean).powi(2)).sum::<f32>() / (samples.len() - 1) as f32
}

fn check_shape(
    window: &AlignedWindow,
    modality: Modality,
    channels: usize,
    samples_per_window: usize,
) -> Result<(), SignalError> {
    if window.samples.nrows() != channels || window.samples.ncols() != samples_per_window {
        return Err(SignalError::MalformedWindow {
            modality,
            expected_channels: channels,
            expected_samples: samples_per_window,
            channels: window.samples.nrows(),
            samples: window.samples.ncols(),
        });
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Running normalization
// ─────────────────────────────────────────────────────────────────────────────

/// Per-dimension running mean/variance (Welford), forward-only.
struct RunningNorm {
    count: u64,
    mean: Vec<f64>,
    m2: Vec<f64>,
}

impl RunningNorm {
    fn new(dim: usize) -> Self {
        Self {
            count: 0,
            mean: vec![0.0; dim],
            m2: vec![0.0; dim],
        }
    }

    /// Fold `values` into the statistics, then normalize in place to
    /// zero mean and unit variance under the updated statistics.
    fn update_and_normalize(&mut self, values: &mut [f32]) {
        debug_assert_eq!(values.len(), self.mean.len());
        self.count += 1;
        for (i, v) in values.iter_mut().enumerate() {
            let x = f64::from(*v);
            let delta = x - self.mean[i];
            self.mean[i] += delta / self.count as f64;
            self.m2[i] += delta * (x - self.mean[i]);

            let var = if self.count > 1 {
                self.m2[i] / (self.count - 1) as f64
            } else {
                0.0
            };
            *v = ((x - self.mean[i]) / (var + 1e-9).sqrt()) as f32;
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// EEG
// ─────────────────────────────────────────────────────────────────────────────

/// EEG band-power and temporal-coefficient extractor.
pub struct EegFeatureExtractor {
    channels: usize,
    samples_per_window: usize,
    sample_rate: f32,
    norm: RunningNorm,
}

impl EegFeatureExtractor {
    /// Features per channel: five band powers, mean, variance, line length.
    const PER_CHANNEL: usize = EEG_BANDS.len() + 3;

    /// Build an extractor for the configured EEG shape.
    #[must_use]
    pub fn new(channels: usize, samples_per_window: usize, sample_rate: u32) -> Self {
        Self {
            channels,
            samples_per_window,
            sample_rate: sample_rate as f32,
            norm: RunningNorm::new(channels * Self::PER_CHANNEL),
        }
    }

    /// Output vector length, constant for the session lifetime.
    #[must_use]
    pub fn feature_len(&self) -> usize {
        self.channels * Self::PER_CHANNEL
    }

    /// Extract normalized features from one EEG window.
    pub fn extract(&mut self, window: &AlignedWindow) -> Result<FeatureVector, SignalError> {
        check_shape(window, Modality::Eeg, self.channels, self.samples_per_window)?;

        let mut values = Vec::with_capacity(self.feature_len());
        for row in window.samples.rows() {
            let samples = row.as_slice().map_or_else(|| row.to_vec(), <[f32]>::to_vec);
            for (lo, hi) in EEG_BANDS {
                let center = (lo * hi).sqrt();
                values.push(goertzel_power(&samples, self.sample_rate, center).ln_1p());
            }
            let m = mean(&samples);
            values.push(m);
            values.push(variance(&samples, m));
            let line_length: f32 = samples.windows(2).map(|w| (w[1] - w[0]).abs()).sum();
            values.push(line_length / samples.len() as f32);
        }

        self.norm.update_and_normalize(&mut values);
        Ok(FeatureVector {
            modality: Modality::Eeg,
            range: window.range,
            values,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// EMG
// ─────────────────────────────────────────────────────────────────────────────

/// EMG envelope/onset extractor.
pub struct EmgFeatureExtractor {
    channels: usize,
    samples_per_window: usize,
}

impl EmgFeatureExtractor {
    /// Features per channel: segment RMS envelope, onset count, mean
    /// absolute value, peak.
    const PER_CHANNEL: usize = EMG_SEGMENTS + 3;

    /// Build an extractor for the configured EMG shape.
    #[must_use]
    pub fn new(channels: usize, samples_per_window: usize) -> Self {
        Self {
            channels,
            samples_per_window,
        }
    }

    /// Output vector length, constant for the session lifetime.
    #[must_use]
    pub fn feature_len(&self) -> usize {
        self.channels * Self::PER_CHANNEL
    }

    /// Extract features from one EMG window.
    pub fn extract(&self, window: &AlignedWindow) -> Result<FeatureVector, SignalError> {
        check_shape(window, Modality::Emg, self.channels, self.samples_per_window)?;

        let mut values = Vec::with_capacity(self.feature_len());
        for row in window.samples.rows() {
            let samples = row.as_slice().map_or_else(|| row.to_vec(), <[f32]>::to_vec);

            // Segment RMS envelope.
            let seg_len = (samples.len() / EMG_SEGMENTS).max(1);
            for seg in 0..EMG_SEGMENTS {
                let lo = seg * seg_len;
                let hi = ((seg + 1) * seg_len).min(samples.len());
                let chunk = samples.get(lo..hi).unwrap_or(&[]);
                let rms = if chunk.is_empty() {
                    0.0
                } else {
                    (chunk.iter().map(|&x| x * x).sum::<f32>() / chunk.len() as f32).sqrt()
                };
                values.push(rms);
            }

            values.push(onset_count(&samples) as f32);
            values.push(mean(&samples.iter().map(|x| x.abs()).collect::<Vec<_>>()));
            values.push(samples.iter().fold(0.0f32, |acc, &x| acc.max(x.abs())));
        }

        Ok(FeatureVector {
            modality: Modality::Emg,
            range: window.range,
            values,
        })
    }
}

/// Count activation onsets: upward crossings of the rectified
/// moving-average envelope over twice its window mean.
fn onset_count(samples: &[f32]) -> usize {
    if samples.len() < EMG_ENVELOPE_SPAN {
        return 0;
    }
    let rectified: Vec<f32> = samples.iter().map(|x| x.abs()).collect();
    let envelope: Vec<f32> = rectified
        .windows(EMG_ENVELOPE_SPAN)
        .map(|w| w.iter().sum::<f32>() / EMG_ENVELOPE_SPAN as f32)
        .collect();
    let threshold = 2.0 * mean(&envelope);
    let mut count = 0;
    let mut above = false;
    for &e in &envelope {
        if e > threshold && !above {
            count += 1;
            above = true;
        } else if e <= threshold {
            above = false;
        }
    }
    count
}
