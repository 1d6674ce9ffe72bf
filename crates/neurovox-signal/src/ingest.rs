//! Signal ingestion buffer.
//!
//! One bounded, timestamp-keyed buffer per modality. `push` is non-blocking
//! and never fatal: malformed or out-of-order batches are rejected with a
//! recoverable error in the returned report, and samples older than the
//! retention horizon are evicted (reported as stale drops, surfaced as
//! warning events by the pipeline).
//!
//! Clock skew between modalities is corrected by rebasing each batch's
//! device timestamp against the shared monotonic session clock: the offset
//! is established from the first batch of each modality and applied to all
//! subsequent ones.

use std::collections::VecDeque;
use std::time::Duration;

use ndarray::{Array2, s};
use tracing::{debug, trace};

use neurovox_core::config::SessionConfig;
use neurovox_core::error::SignalError;
use neurovox_core::types::{AlignedWindow, Modality, SampleBatch, TimeRange};

/// Result of a window pull.
#[derive(Debug)]
pub enum WindowPull {
    /// A complete window.
    Ready(AlignedWindow),
    /// Not enough contiguous samples have arrived yet.
    NotReady,
}

/// Outcome of one `push` call.
///
/// `push` never returns `Err`; degradations are carried here so the caller
/// can surface them as warning events without breaking the stream.
#[derive(Debug, Default)]
pub struct PushReport {
    /// Why the batch was rejected, if it was. Rejected batches leave the
    /// buffer untouched.
    pub rejected: Option<SignalError>,
    /// Samples evicted past the retention horizon without being windowed.
    pub stale_samples: usize,
}

/// A contiguous run of samples on the session clock.
struct Segment {
    /// Rebased start, microseconds on the session clock.
    start_us: i64,
    samples: Array2<f32>,
}

impl Segment {
    fn len(&self) -> usize {
        self.samples.ncols()
    }

    fn end_us(&self, rate: u32) -> i64 {
        self.start_us + cols_to_us(self.len(), rate)
    }
}

fn cols_to_us(cols: usize, rate: u32) -> i64 {
    (cols as i64) * 1_000_000 / i64::from(rate)
}

fn duration_us(d: Duration) -> i64 {
    d.as_micros() as i64
}

/// Per-modality lane: shape expectations, clock offset, and segments.
struct ModalityLane {
    modality: Modality,
    channels: usize,
    sample_rate: u32,
    /// Device clock minus session clock, from the first batch.
    offset_us: Option<i64>,
    /// Last accepted device-clock start, for monotonicity enforcement.
    last_device_start_us: Option<i64>,
    segments: VecDeque<Segment>,
}

impl ModalityLane {
    fn new(modality: Modality, channels: usize, sample_rate: u32) -> Self {
        Self {
            modality,
            channels,
            sample_rate,
            offset_us: None,
            last_device_start_us: None,
            segments: VecDeque::new(),
        }
    }

    fn check_shape(&self, batch: &SampleBatch) -> Result<(), SignalError> {
        if batch.channels() != self.channels {
            return Err(SignalError::MismatchedBatch {
                modality: self.modality,
                reason: format!(
                    "expected {} channels, got {}",
                    self.channels,
                    batch.channels()
                ),
            });
        }
        if batch.sample_rate != self.sample_rate {
            return Err(SignalError::MismatchedBatch {
                modality: self.modality,
                reason: format!(
                    "expected {} Hz, got {} Hz",
                    self.sample_rate, batch.sample_rate
                ),
            });
        }
        Ok(())
    }

    fn push(&mut self, batch: &SampleBatch, session_now: Duration) -> Result<(), SignalError> {
        self.check_shape(batch)?;

        let device_start_us = duration_us(batch.start_time);
        if let Some(last) = self.last_device_start_us
            && device_start_us < last
        {
            return Err(SignalError::OutOfOrderBatch {
                modality: self.modality,
                regression_ms: ((last - device_start_us) / 1_000) as u64,
            });
        }
        self.last_device_start_us = Some(device_start_us);

        let offset = *self
            .offset_us
            .get_or_insert(device_start_us - duration_us(session_now));
        let start_us = device_start_us - offset;

        trace!(
            modality = %self.modality,
            start_us,
            samples = batch.len(),
            "batch accepted"
        );
        self.segments.push_back(Segment {
            start_us,
            samples: batch.samples.clone(),
        });
        Ok(())
    }

    /// Evict segments that end before `horizon_start`. Returns evicted
    /// sample count.
    fn evict(&mut self, horizon_start_us: i64) -> usize {
        let mut evicted = 0;
        while let Some(front) = self.segments.front() {
            if front.end_us(self.sample_rate) >= horizon_start_us {
                break;
            }
            evicted += front.len();
            let _ = self.segments.pop_front();
        }
        evicted
    }

    fn data_end_us(&self) -> Option<i64> {
        self.segments.back().map(|s| s.end_us(self.sample_rate))
    }

    /// Assemble the window of `window_samples` columns ending at the most
    /// recent sample, provided it ends at or after `at_us` and the span is
    /// contiguously covered.
    fn pull_window(&self, at_us: i64, window_us: i64, window_samples: usize) -> WindowPull {
        let Some(end_us) = self.data_end_us() else {
            return WindowPull::NotReady;
        };
        if end_us < at_us {
            return WindowPull::NotReady;
        }
        let span_start_us = end_us - window_us;

        let mut out = Array2::<f32>::zeros((self.channels, window_samples));
        let mut filled = 0usize;

        for seg in &self.segments {
            // Column index of this segment's first sample within the window.
            let rel_us = seg.start_us - span_start_us;
            let seg_first =
                (rel_us * i64::from(self.sample_rate) + 500_000).div_euclid(1_000_000);
            let cols = seg.len() as i64;
            let out_lo = seg_first.max(0);
            let out_hi = (seg_first + cols).min(window_samples as i64);
            if out_lo >= out_hi {
                continue;
            }
            let src_lo = (out_lo - seg_first) as usize;
            let src_hi = (out_hi - seg_first) as usize;
            out.slice_mut(s![.., out_lo as usize..out_hi as usize])
                .assign(&seg.samples.slice(s![.., src_lo..src_hi]));
            filled += (out_hi - out_lo) as usize;
        }

        if filled < window_samples {
            // Gap inside the span: a discontiguous window would smear
            // features across missing time.
            debug!(
                modality = %self.modality,
                filled,
                needed = window_samples,
                "window span not contiguous"
            );
            return WindowPull::NotReady;
        }

        let start = Duration::from_micros(span_start_us.max(0) as u64);
        let end = Duration::from_micros(end_us.max(0) as u64);
        WindowPull::Ready(AlignedWindow {
            modality: self.modality,
            range: TimeRange::new(start, end),
            samples: out,
        })
    }
}

/// Bounded per-modality ingestion buffer (spec'd contract of stage one).
pub struct IngestionBuffer {
    eeg: ModalityLane,
    emg: ModalityLane,
    retention: Duration,
    window_len: Duration,
}

impl IngestionBuffer {
    /// Build the buffer from a validated session configuration.
    #[must_use]
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            eeg: ModalityLane::new(Modality::Eeg, config.eeg_channels, config.eeg_sample_rate),
            emg: ModalityLane::new(Modality::Emg, config.emg_channels, config.emg_sample_rate),
            retention: Duration::from_millis(config.retention_horizon_ms),
            window_len: config.window_length(),
        }
    }

    fn lane_mut(&mut self, modality: Modality) -> &mut ModalityLane {
        match modality {
            Modality::Eeg => &mut self.eeg,
            Modality::Emg => &mut self.emg,
        }
    }

    fn lane(&self, modality: Modality) -> &ModalityLane {
        match modality {
            Modality::Eeg => &self.eeg,
            Modality::Emg => &self.emg,
        }
    }

    /// Accept a batch from either modality, in arbitrary interleaving.
    ///
    /// Non-blocking and never fatal; see [`PushReport`]. `session_now` is
    /// the caller's reading of the monotonic session clock, used for clock
    /// rebasing and retention eviction.
    pub fn push(&mut self, batch: &SampleBatch, session_now: Duration) -> PushReport {
        let retention = self.retention;
        let lane = self.lane_mut(batch.modality);

        let mut report = PushReport::default();
        if let Err(e) = lane.push(batch, session_now) {
            report.rejected = Some(e);
            return report;
        }

        let horizon_start_us = duration_us(session_now) - duration_us(retention);
        report.stale_samples = lane.evict(horizon_start_us);
        report
    }

    /// Most recent complete window for `modality` ending at or after
    /// `at_time`, or [`WindowPull::NotReady`].
    #[must_use]
    pub fn pull_window(&self, modality: Modality, at_time: Duration) -> WindowPull {
        let lane = self.lane(modality);
        let window_us = duration_us(self.window_len);
        let window_samples =
            (window_us * i64::from(lane.sample_rate) / 1_000_000) as usize;
        lane.pull_window(duration_us(at_time), window_us, window_samples)
    }

    /// Latest rebased sample time for `modality`, if any data has arrived.
    #[must_use]
    pub fn data_end(&self, modality: Modality) -> Option<Duration> {
        self.lane(modality)
            .data_end_us()
            .map(|us| Duration::from_micros(us.max(0) as u64))
    }
}
