//! Shared test fixtures for the runtime crate and its integration tests.

use std::f32::consts::TAU;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ndarray::Array2;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use neurovox_core::config::SessionConfig;
use neurovox_core::types::{Modality, SampleBatch};

use crate::services::{ServiceError, SpeechSynthesizer, Translator};

/// Deterministic generator of plausible EEG/EMG sample batches.
///
/// EEG is a mixture of alpha (8 Hz), beta (15 Hz), and theta (4 Hz)
/// sinusoids plus gaussian noise; EMG is low-amplitude noise with
/// occasional burst activity. Matches the synthetic acquisition setup the
/// reference decoder was demoed against.
pub struct MockSignalSource {
    rng: StdRng,
    eeg_channels: usize,
    emg_channels: usize,
    eeg_rate: u32,
    emg_rate: u32,
    eeg_cursor: Duration,
    emg_cursor: Duration,
}

impl MockSignalSource {
    /// Source matching `config`'s channel counts and sample rates.
    #[must_use]
    pub fn new(config: &SessionConfig, seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            eeg_channels: config.eeg_channels,
            emg_channels: config.emg_channels,
            eeg_rate: config.eeg_sample_rate,
            emg_rate: config.emg_sample_rate,
            eeg_cursor: Duration::ZERO,
            emg_cursor: Duration::ZERO,
        }
    }

    /// Next contiguous EEG batch spanning `span` of device time.
    pub fn next_eeg_batch(&mut self, span: Duration) -> SampleBatch {
        let n = (span.as_secs_f64() * f64::from(self.eeg_rate)) as usize;
        let t0 = self.eeg_cursor.as_secs_f32();
        let dt = 1.0 / self.eeg_rate as f32;
        let samples = Array2::from_shape_fn((self.eeg_channels, n), |(_, i)| {
            let t = t0 + i as f32 * dt;
            (TAU * 8.0 * t).sin()
                + 0.5 * (TAU * 15.0 * t).sin()
                + 0.3 * (TAU * 4.0 * t).sin()
                + 0.1 * (self.rng.random::<f32>() - 0.5)
        });
        let batch = SampleBatch {
            channel_id: 0,
            modality: Modality::Eeg,
            sample_rate: self.eeg_rate,
            start_time: self.eeg_cursor,
            samples,
        };
        self.eeg_cursor += span;
        batch
    }

    /// Next contiguous EMG batch spanning `span` of device time, with one
    /// activation burst in the middle.
    pub fn next_emg_batch(&mut self, span: Duration) -> SampleBatch {
        let n = (span.as_secs_f64() * f64::from(self.emg_rate)) as usize;
        let burst_start = n / 3;
        let burst_len = (n / 4).max(1);
        let amplitude = self.rng.random_range(1.0..3.0_f32);
        let samples = Array2::from_shape_fn((self.emg_channels, n), |(_, i)| {
            let noise = 0.5 * (self.rng.random::<f32>() - 0.5);
            if (burst_start..burst_start + burst_len).contains(&i) {
                let phase = (i - burst_start) as f32 / burst_len as f32;
                noise + amplitude * (TAU * phase).sin()
            } else {
                noise
            }
        });
        let batch = SampleBatch {
            channel_id: 0,
            modality: Modality::Emg,
            sample_rate: self.emg_rate,
            start_time: self.emg_cursor,
            samples,
        };
        self.emg_cursor += span;
        batch
    }
}

/// Synthesizer that records every spoken `(text, language)` pair, with an
/// optional number of leading `Busy` refusals.
pub struct RecordingSynthesizer {
    spoken: Mutex<Vec<(String, String)>>,
    busy_remaining: Mutex<u32>,
}

impl RecordingSynthesizer {
    /// Always-ready recording sink.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Self::busy_for(0)
    }

    /// Sink that refuses the first `calls` speak attempts with `Busy`.
    #[must_use]
    pub fn busy_for(calls: u32) -> Arc<Self> {
        Arc::new(Self {
            spoken: Mutex::new(Vec::new()),
            busy_remaining: Mutex::new(calls),
        })
    }

    /// Everything spoken so far, in order.
    #[must_use]
    pub fn spoken(&self) -> Vec<(String, String)> {
        self.spoken.lock().clone()
    }
}

#[async_trait]
impl SpeechSynthesizer for RecordingSynthesizer {
    async fn speak(&self, text: &str, language: &str) -> Result<(), ServiceError> {
        {
            let mut busy = self.busy_remaining.lock();
            if *busy > 0 {
                *busy -= 1;
                return Err(ServiceError::Busy);
            }
        }
        self.spoken
            .lock()
            .push((text.to_owned(), language.to_owned()));
        Ok(())
    }
}

/// Translator that fails every call.
pub struct FailingTranslator;

#[async_trait]
impl Translator for FailingTranslator {
    async fn translate(&self, _: &str, _: &str, _: &str) -> Result<String, ServiceError> {
        Err(ServiceError::Failed("translation backend offline".into()))
    }
}
