//! # neurovox-decode
//!
//! Back half of the decoding pipeline: the streaming sequence decoder and
//! the transcript assembler.
//!
//! - [`model`] — the [`model::DecodingModel`] trait boundary (a pretrained
//!   artifact, loaded once per process and shared read-only across
//!   sessions) and the unit [`model::Vocabulary`].
//! - [`beam`] — fixed-arena top-K hypothesis tracking with deterministic
//!   tie-breaking and margin pruning.
//! - [`decoder`] — the `Idle → Decoding → Finalizing` state machine that
//!   turns fused representations into provisional/retract/final outputs.
//! - [`assembler`] — finalized units to well-formed text with a
//!   confidence gate.
//! - [`testutil`] — scripted/constant models shared by this crate's tests
//!   and the runtime integration tests.
//!
//! ## Crate Position
//!
//! Depends on: neurovox-core.
//! Depended on by: neurovox-runtime.

#![deny(unsafe_code)]

pub mod assembler;
pub mod beam;
pub mod decoder;
pub mod model;
pub mod testutil;

pub use assembler::{Transcript, TranscriptAssembler};
pub use beam::{Beam, Hypothesis};
pub use decoder::{DecoderOutput, DecoderPhase, SequenceDecoder};
pub use model::{DecodingModel, ModelError, UnitScores, Vocabulary};
