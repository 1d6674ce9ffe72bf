//! # neurovox-signal
//!
//! Front half of the decoding pipeline: sample ingestion, per-modality
//! feature extraction, and modality fusion.
//!
//! ```text
//! SampleBatch ──push──▶ IngestionBuffer ──pull_window──▶ AlignedWindow
//!   ──extract──▶ FeatureVector ──fuse──▶ FusedRepresentation
//! ```
//!
//! Everything here is synchronous and session-scoped; the runtime crate
//! owns the async stage workers that drive it.
//!
//! ## Crate Position
//!
//! Depends on: neurovox-core.
//! Depended on by: neurovox-runtime.

#![deny(unsafe_code)]

pub mod features;
pub mod fusion;
pub mod ingest;

pub use features::{EegFeatureExtractor, EmgFeatureExtractor};
pub use fusion::{FusionInput, ModalityFusion};
pub use ingest::{IngestionBuffer, PushReport, WindowPull};
