//! Per-session pipeline stage workers.
//!
//! Three tasks per session, connected by bounded channels so a slow stage
//! applies back-pressure upstream instead of growing memory:
//!
//! ```text
//! push_samples ─▶ [ingest + extract] ─▶ [fuse + decode] ─▶ [assemble + dispatch]
//!    (batches)        StepFrame              Utterance
//! ```
//!
//! The ingest stage owns the session clock and a step ticker at half the
//! window length; every tick produces one `StepFrame`, with or without
//! evidence, so the decoder observes silence as well as speech. Teardown
//! is cooperative via a shared `CancellationToken`; an in-progress
//! hypothesis at cancellation is discarded, never finalized.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use neurovox_core::config::SessionConfig;
use neurovox_core::error::SignalError;
use neurovox_core::events::WarningKind;
use neurovox_core::ids::SessionId;
use neurovox_core::types::{FeatureVector, Modality, SampleBatch, Utterance};
use neurovox_decode::decoder::DecoderOutput;
use neurovox_decode::{DecodingModel, SequenceDecoder, TranscriptAssembler};
use neurovox_signal::{
    EegFeatureExtractor, EmgFeatureExtractor, FusionInput, IngestionBuffer, ModalityFusion,
    WindowPull,
};

use crate::dispatch::OutputDispatcher;
use crate::emitter::SessionEmitter;
use crate::services::{SpeechSynthesizer, Translator};

/// Capacity of the caller-facing sample-batch queue. `push_samples` fails
/// with `IngestSaturated` once this is full.
pub(crate) const BATCH_QUEUE_DEPTH: usize = 64;
/// Capacity of each inter-stage queue; small so back-pressure is prompt.
const STAGE_QUEUE_DEPTH: usize = 2;
/// How often a parked dispatcher retries a busy synthesizer.
const DRAIN_RETRY: Duration = Duration::from_millis(50);

/// Everything a session pipeline needs, gathered by the registry.
pub(crate) struct PipelineSpec {
    pub session_id: SessionId,
    pub config: SessionConfig,
    pub model: Arc<dyn DecodingModel>,
    pub translator: Arc<dyn Translator>,
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
    pub emitter: Arc<SessionEmitter>,
    pub cancel: CancellationToken,
}

/// One decode step's worth of extracted evidence.
struct StepFrame {
    /// Session clock at the tick that produced this frame.
    at: Duration,
    eeg: Option<FeatureVector>,
    emg: Option<FeatureVector>,
}

/// Spawn the three stage workers. Returns the batch sender for the
/// session handle plus the task handles for teardown.
pub(crate) fn spawn(spec: PipelineSpec) -> (mpsc::Sender<SampleBatch>, Vec<JoinHandle<()>>) {
    let (batch_tx, batch_rx) = mpsc::channel(BATCH_QUEUE_DEPTH);
    let (frame_tx, frame_rx) = mpsc::channel(STAGE_QUEUE_DEPTH);
    let (utterance_tx, utterance_rx) = mpsc::channel(STAGE_QUEUE_DEPTH);

    let eeg_len = EegFeatureExtractor::new(
        spec.config.eeg_channels,
        spec.config.samples_per_window(Modality::Eeg),
        spec.config.eeg_sample_rate,
    )
    .feature_len();
    let emg_len = EmgFeatureExtractor::new(
        spec.config.emg_channels,
        spec.config.samples_per_window(Modality::Emg),
    )
    .feature_len();

    let assembler = TranscriptAssembler::new(
        Arc::new(spec.model.vocabulary().clone()),
        &spec.config,
    );
    let dispatcher = OutputDispatcher::new(
        &spec.config,
        spec.translator,
        spec.synthesizer,
        Arc::clone(&spec.emitter),
    );

    let ingest = tokio::spawn(ingest_stage(
        spec.session_id,
        spec.config.clone(),
        Arc::clone(&spec.emitter),
        spec.cancel.clone(),
        batch_rx,
        frame_tx,
    ));
    let decode = tokio::spawn(decode_stage(
        spec.session_id,
        spec.config,
        spec.model,
        eeg_len,
        emg_len,
        Arc::clone(&spec.emitter),
        spec.cancel.clone(),
        frame_rx,
        utterance_tx,
    ));
    let output = tokio::spawn(output_stage(
        spec.session_id,
        assembler,
        dispatcher,
        spec.cancel,
        utterance_rx,
    ));

    (batch_tx, vec![ingest, decode, output])
}

// ─────────────────────────────────────────────────────────────────────────
// Stage one: ingestion and feature extraction
// ─────────────────────────────────────────────────────────────────────────

async fn ingest_stage(
    session_id: SessionId,
    config: SessionConfig,
    emitter: Arc<SessionEmitter>,
    cancel: CancellationToken,
    mut batches: mpsc::Receiver<SampleBatch>,
    frames: mpsc::Sender<StepFrame>,
) {
    let mut buffer = IngestionBuffer::new(&config);
    let mut eeg_extractor = EegFeatureExtractor::new(
        config.eeg_channels,
        config.samples_per_window(Modality::Eeg),
        config.eeg_sample_rate,
    );
    let emg_extractor = EmgFeatureExtractor::new(
        config.emg_channels,
        config.samples_per_window(Modality::Emg),
    );

    let started = Instant::now();
    let hop = config.step_interval();
    let mut ticker = time::interval(hop);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // Earliest acceptable end of the next window, per modality.
    let mut next_eeg_end = config.window_length();
    let mut next_emg_end = config.window_length();

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            batch = batches.recv() => {
                let Some(batch) = batch else { break };
                let report = buffer.push(&batch, started.elapsed());
                if let Some(rejected) = report.rejected {
                    let kind = match rejected {
                        SignalError::OutOfOrderBatch { .. } => WarningKind::OutOfOrderBatch,
                        SignalError::MalformedWindow { .. }
                        | SignalError::MismatchedBatch { .. } => WarningKind::MalformedWindow,
                    };
                    let _ = emitter.warning(kind, rejected.to_string());
                }
                if report.stale_samples > 0 {
                    let _ = emitter.warning(
                        WarningKind::StaleDrop,
                        format!("{} samples evicted past retention horizon", report.stale_samples),
                    );
                }
            }
            _ = ticker.tick() => {
                let now = started.elapsed();
                let eeg = take_window(
                    &buffer, Modality::Eeg, &mut next_eeg_end, hop,
                    |w| eeg_extractor.extract(w),
                    &emitter,
                );
                let emg = take_window(
                    &buffer, Modality::Emg, &mut next_emg_end, hop,
                    |w| emg_extractor.extract(w),
                    &emitter,
                );
                let frame = StepFrame { at: now, eeg, emg };
                tokio::select! {
                    () = cancel.cancelled() => break,
                    sent = frames.send(frame) => {
                        if sent.is_err() {
                            break;
                        }
                    }
                }
            }
        }
    }
    debug!(session_id = %session_id, "ingest stage stopped");
}

/// Pull and extract the next unseen window for one modality. Advances the
/// window cursor only past windows actually consumed, so a late modality
/// catches up rather than skipping evidence.
fn take_window(
    buffer: &IngestionBuffer,
    modality: Modality,
    next_end: &mut Duration,
    hop: Duration,
    extract: impl FnOnce(
        &neurovox_core::types::AlignedWindow,
    ) -> Result<FeatureVector, SignalError>,
    emitter: &SessionEmitter,
) -> Option<FeatureVector> {
    match buffer.pull_window(modality, *next_end) {
        WindowPull::Ready(window) => {
            *next_end = window.range.end + hop;
            match extract(&window) {
                Ok(features) => Some(features),
                Err(e) => {
                    let _ = emitter.warning(WarningKind::MalformedWindow, e.to_string());
                    None
                }
            }
        }
        WindowPull::NotReady => None,
    }
}

// ─────────────────────────────────────────────────────────────────────────
// Stage two: fusion and sequence decoding
// ─────────────────────────────────────────────────────────────────────────

async fn decode_stage(
    session_id: SessionId,
    config: SessionConfig,
    model: Arc<dyn DecodingModel>,
    eeg_len: usize,
    emg_len: usize,
    emitter: Arc<SessionEmitter>,
    cancel: CancellationToken,
    mut frames: mpsc::Receiver<StepFrame>,
    utterances: mpsc::Sender<Utterance>,
) {
    let mut fusion = ModalityFusion::new(eeg_len, emg_len);
    let mut decoder = SequenceDecoder::new(model, &config);
    let mut outputs = Vec::new();

    'stage: loop {
        let frame = tokio::select! {
            () = cancel.cancelled() => break,
            frame = frames.recv() => {
                let Some(frame) = frame else { break };
                frame
            }
        };

        let input = FusionInput::classify(
            frame.eeg,
            frame.emg,
            config.min_overlap,
            config.window_length(),
        );
        // Which modalities actually contribute, post-classification.
        let (eeg_used, emg_used) = match &input {
            FusionInput::Both(..) => (true, true),
            FusionInput::EegOnly(_) => (true, false),
            FusionInput::EmgOnly(_) => (false, true),
            FusionInput::Neither => (false, false),
        };

        outputs.clear();
        match fusion.fuse(input) {
            Some(fused) => decoder.on_fused(&fused, &mut outputs),
            None => decoder.on_gap(frame.at, &mut outputs),
        }

        for output in outputs.drain(..) {
            match output {
                DecoderOutput::Provisional(step) => {
                    fusion.record_step_confidence(step.probability, eeg_used, emg_used);
                    let _ = emitter.provisional(step);
                }
                DecoderOutput::Retract { step_index } => {
                    let _ = emitter.retract(step_index);
                }
                DecoderOutput::Warning { kind, detail } => {
                    let _ = emitter.warning(kind, detail);
                }
                DecoderOutput::Finalized(utterance) => {
                    let _ = emitter.finalized(utterance.clone());
                    tokio::select! {
                        () = cancel.cancelled() => break 'stage,
                        sent = utterances.send(utterance) => {
                            if sent.is_err() {
                                break 'stage;
                            }
                        }
                    }
                }
            }
        }
    }
    debug!(session_id = %session_id, "decode stage stopped");
}

// ─────────────────────────────────────────────────────────────────────────
// Stage three: assembly and dispatch
// ─────────────────────────────────────────────────────────────────────────

async fn output_stage(
    session_id: SessionId,
    assembler: TranscriptAssembler,
    mut dispatcher: OutputDispatcher,
    cancel: CancellationToken,
    mut utterances: mpsc::Receiver<Utterance>,
) {
    let mut retry = time::interval(DRAIN_RETRY);
    retry.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            utterance = utterances.recv() => {
                let Some(utterance) = utterance else { break };
                let transcript = assembler.assemble(&utterance);
                info!(
                    session_id = %session_id,
                    utterance_id = %transcript.utterance_id,
                    low_confidence = transcript.low_confidence,
                    "dispatching utterance"
                );
                dispatcher.dispatch(transcript).await;
            }
            _ = retry.tick() => {
                if dispatcher.has_pending() {
                    dispatcher.drain().await;
                }
            }
        }
    }
    debug!(session_id = %session_id, "output stage stopped");
}
