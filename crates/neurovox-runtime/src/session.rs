//! Session lifecycle.
//!
//! The registry is the process-wide entry point: it validates configs,
//! enforces the concurrent-session bound, spawns the per-session pipeline
//! workers, and tears them down on close. Callers interact with a running
//! session only through its [`SessionHandle`]: non-blocking sample pushes
//! in, a broadcast event stream out.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use neurovox_core::config::SessionConfig;
use neurovox_core::events::{DecodeEvent, WarningKind};
use neurovox_core::ids::SessionId;
use neurovox_core::types::SampleBatch;
use neurovox_decode::DecodingModel;

use crate::emitter::SessionEmitter;
use crate::errors::RuntimeError;
use crate::pipeline::{self, PipelineSpec};
use crate::services::{SpeechSynthesizer, Translator};

struct SessionEntry {
    emitter: Arc<SessionEmitter>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

/// Caller-facing handle to one open session.
#[derive(Debug)]
pub struct SessionHandle {
    id: SessionId,
    user_id: String,
    batches: mpsc::Sender<SampleBatch>,
    emitter: Arc<SessionEmitter>,
}

impl SessionHandle {
    /// The session's id.
    #[must_use]
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Opaque caller identity this session was opened for.
    #[must_use]
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Push one sensor batch. Non-blocking: a full ingest queue fails with
    /// [`RuntimeError::IngestSaturated`] (and a warning event) rather than
    /// stalling the caller's acquisition loop.
    pub fn push_samples(&self, batch: SampleBatch) -> Result<(), RuntimeError> {
        self.batches.try_send(batch).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                warn!(session_id = %self.id, "ingest queue full, batch refused");
                let _ = self.emitter.warning(
                    WarningKind::IngestSaturated,
                    "sample batch refused: ingest queue full",
                );
                RuntimeError::IngestSaturated(self.id)
            }
            mpsc::error::TrySendError::Closed(_) => RuntimeError::SessionClosed(self.id),
        })
    }

    /// Subscribe to the session's event stream. Events emitted before this
    /// call are not replayed.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<DecodeEvent> {
        self.emitter.subscribe()
    }
}

/// Process-wide registry of open decoding sessions.
///
/// The model and output services are injected once and shared read-only by
/// every session.
pub struct SessionRegistry {
    model: Arc<dyn DecodingModel>,
    translator: Arc<dyn Translator>,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    max_sessions: usize,
    sessions: DashMap<SessionId, SessionEntry>,
    /// Serializes open-session admission so the bound is exact.
    admission: Mutex<()>,
}

impl SessionRegistry {
    /// Build a registry bounded to `max_sessions` concurrent sessions.
    #[must_use]
    pub fn new(
        model: Arc<dyn DecodingModel>,
        translator: Arc<dyn Translator>,
        synthesizer: Arc<dyn SpeechSynthesizer>,
        max_sessions: usize,
    ) -> Self {
        Self {
            model,
            translator,
            synthesizer,
            max_sessions: max_sessions.max(1),
            sessions: DashMap::new(),
            admission: Mutex::new(()),
        }
    }

    /// Number of open sessions.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Whether `id` refers to an open session.
    #[must_use]
    pub fn is_open(&self, id: SessionId) -> bool {
        self.sessions.contains_key(&id)
    }

    /// Open a session for `user_id`: validate the config, spawn its
    /// pipeline workers, and return the handle. The user id is opaque to
    /// the pipeline (identity lives with the caller); it is carried for
    /// logging and handle introspection only. Must be called within a
    /// tokio runtime.
    pub fn open_session(
        &self,
        user_id: impl Into<String>,
        config: SessionConfig,
    ) -> Result<SessionHandle, RuntimeError> {
        config.validate()?;
        let user_id = user_id.into();

        let _admission = self.admission.lock();
        let current = self.sessions.len();
        if current >= self.max_sessions {
            return Err(RuntimeError::ServerBusy {
                current,
                max: self.max_sessions,
            });
        }

        let session_id = SessionId::new();
        let emitter = Arc::new(SessionEmitter::new(session_id));
        let cancel = CancellationToken::new();
        let (batches, tasks) = pipeline::spawn(PipelineSpec {
            session_id,
            config,
            model: Arc::clone(&self.model),
            translator: Arc::clone(&self.translator),
            synthesizer: Arc::clone(&self.synthesizer),
            emitter: Arc::clone(&emitter),
            cancel: cancel.clone(),
        });
        let _ = self.sessions.insert(
            session_id,
            SessionEntry {
                emitter: Arc::clone(&emitter),
                cancel,
                tasks,
            },
        );
        info!(session_id = %session_id, user_id, open = current + 1, "session opened");
        Ok(SessionHandle {
            id: session_id,
            user_id,
            batches,
            emitter,
        })
    }

    /// Close a session: cancel its workers, await their shutdown, and emit
    /// the terminal `closed` event. Any in-progress hypothesis is
    /// discarded, not finalized.
    pub async fn close_session(&self, id: SessionId) -> Result<(), RuntimeError> {
        let Some((_, entry)) = self.sessions.remove(&id) else {
            return Err(RuntimeError::SessionNotFound(id));
        };
        entry.cancel.cancel();
        for task in entry.tasks {
            let _ = task.await;
        }
        let _ = entry.emitter.closed();
        info!(session_id = %id, "session closed");
        Ok(())
    }

    /// Close every open session.
    pub async fn shutdown(&self) {
        let ids: Vec<SessionId> = self.sessions.iter().map(|e| *e.key()).collect();
        for id in ids {
            let _ = self.close_session(id).await;
        }
    }
}
