//! # neurovox-runtime
//!
//! Session lifecycle and the async half of the decoding pipeline.
//!
//! - [`session`] — [`session::SessionRegistry`] (open/close/shutdown with
//!   a concurrent-session bound) and [`session::SessionHandle`]
//!   (non-blocking sample pushes in, broadcast events out).
//! - [`pipeline`] — the three per-session stage workers connected by
//!   bounded channels: ingest+extract, fuse+decode, assemble+dispatch.
//! - [`dispatch`] — FIFO output dispatcher with translation fallback and
//!   bounded synthesis queueing.
//! - [`services`] — [`services::Translator`] and
//!   [`services::SpeechSynthesizer`] boundaries plus the stock
//!   [`services::PairTableTranslator`].
//! - [`emitter`] — [`emitter::SessionEmitter`], the single construction
//!   point for a session's decode-event stream.
//! - [`testutil`] — deterministic mock signal source and scripted output
//!   services, shared with the integration tests.
//!
//! ## Crate Position
//!
//! Top of the workspace. Depends on: neurovox-core, neurovox-signal,
//! neurovox-decode.

#![deny(unsafe_code)]

pub mod dispatch;
pub mod emitter;
pub mod errors;
pub mod pipeline;
pub mod services;
pub mod session;
pub mod testutil;

pub use dispatch::OutputDispatcher;
pub use emitter::SessionEmitter;
pub use errors::RuntimeError;
pub use services::{PairTableTranslator, ServiceError, SpeechSynthesizer, Translator};
pub use session::{SessionHandle, SessionRegistry};
