//! # neurovox-core
//!
//! Foundation types, errors, session configuration, and decode events for
//! the neurovox signal-to-speech pipeline.
//!
//! This crate provides the shared vocabulary that all other neurovox crates
//! depend on:
//!
//! - **Branded IDs**: [`ids::SessionId`], [`ids::UtteranceId`] as newtypes
//! - **Pipeline data**: [`types::SampleBatch`], [`types::AlignedWindow`],
//!   [`types::FeatureVector`], [`types::FusedRepresentation`],
//!   [`types::DecodingStep`], [`types::Utterance`]
//! - **Configuration**: [`config::SessionConfig`] with fail-fast validation
//! - **Errors**: [`error::ConfigError`] and [`error::SignalError`] via `thiserror`
//! - **Events**: [`events::DecodeEvent`] tagged event stream consumed by
//!   downstream stages and external callers
//!
//! ## Crate Position
//!
//! Foundation crate. Depended on by all other neurovox crates.

#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod events;
pub mod ids;
pub mod logging;
pub mod types;
