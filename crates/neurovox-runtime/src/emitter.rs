//! Session-scoped decode-event stream.
//!
//! One [`SessionEmitter`] per session is the single place events are
//! constructed: it stamps the session id and timestamp, so stage workers
//! and the dispatcher never build a [`BaseEvent`] themselves. Emission is
//! non-blocking; a slow subscriber lags and misses events rather than
//! applying back-pressure to the pipeline.

use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::broadcast;

use neurovox_core::events::{BaseEvent, DecodeEvent, WarningKind};
use neurovox_core::ids::{SessionId, UtteranceId};
use neurovox_core::types::{DecodingStep, Utterance};

/// Event backlog per subscriber before the oldest events are lost.
const EVENT_BACKLOG: usize = 256;

/// Constructs and broadcasts one session's [`DecodeEvent`] stream.
#[derive(Debug)]
pub struct SessionEmitter {
    session_id: SessionId,
    events: broadcast::Sender<DecodeEvent>,
    emitted: AtomicU64,
}

impl SessionEmitter {
    /// Emitter for `session_id` with the default subscriber backlog.
    #[must_use]
    pub fn new(session_id: SessionId) -> Self {
        Self::with_backlog(session_id, EVENT_BACKLOG)
    }

    /// Emitter with an explicit subscriber backlog.
    #[must_use]
    pub fn with_backlog(session_id: SessionId, backlog: usize) -> Self {
        let (events, _) = broadcast::channel(backlog);
        Self {
            session_id,
            events,
            emitted: AtomicU64::new(0),
        }
    }

    /// The session this emitter stamps onto every event.
    #[must_use]
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// A provisional step extending the current best hypothesis.
    pub fn provisional(&self, step: DecodingStep) -> usize {
        self.send(DecodeEvent::Provisional {
            base: self.base(),
            step,
        })
    }

    /// Withdraw the provisional step at `step_index`. Must precede the
    /// replacement step for that index.
    pub fn retract(&self, step_index: u32) -> usize {
        self.send(DecodeEvent::Retract {
            base: self.base(),
            step_index,
        })
    }

    /// An utterance is finalized and immutable.
    pub fn finalized(&self, utterance: Utterance) -> usize {
        self.send(DecodeEvent::Final {
            base: self.base(),
            utterance,
        })
    }

    /// An utterance's text was handed to synthesis.
    pub fn dispatched(
        &self,
        utterance_id: UtteranceId,
        text: String,
        language: String,
        tags: Vec<String>,
    ) -> usize {
        self.send(DecodeEvent::Dispatched {
            base: self.base(),
            utterance_id,
            text,
            language,
            tags,
        })
    }

    /// A degraded condition the caller should know about.
    pub fn warning(&self, kind: WarningKind, detail: impl Into<String>) -> usize {
        self.send(DecodeEvent::Warning {
            base: self.base(),
            kind,
            detail: detail.into(),
        })
    }

    /// Terminal event: the session ended, nothing follows.
    pub fn closed(&self) -> usize {
        self.send(DecodeEvent::Closed { base: self.base() })
    }

    /// Subscribe; the receiver sees every event emitted after this call.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<DecodeEvent> {
        self.events.subscribe()
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.events.receiver_count()
    }

    /// Total events emitted over the session lifetime.
    #[must_use]
    pub fn emit_count(&self) -> u64 {
        self.emitted.load(Ordering::Relaxed)
    }

    fn base(&self) -> BaseEvent {
        BaseEvent::now(self.session_id)
    }

    fn send(&self, event: DecodeEvent) -> usize {
        let _ = self.emitted.fetch_add(1, Ordering::Relaxed);
        // Zero receivers is fine; the event simply goes unobserved.
        self.events.send(event).unwrap_or(0)
    }
}
