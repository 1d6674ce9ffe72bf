//! Output dispatcher.
//!
//! The tail of the pipeline: takes assembled transcripts in finalization
//! order, runs optional translation, and hands text to the speech
//! synthesizer. Dispatch order is strictly FIFO per session.
//!
//! Degradation rules:
//! - translation failure falls back to the original text, tagged
//!   `translation-failed`, and never blocks dispatch;
//! - a busy synthesizer parks utterances in a bounded pending queue;
//! - a full pending queue drops the oldest utterance, with exactly one
//!   `queue_overflow` warning per drop;
//! - a synthesis failure that is not back-pressure drops that utterance
//!   with a warning instead of wedging the queue.

use std::collections::VecDeque;
use std::sync::Arc;

use tracing::{debug, warn};

use neurovox_core::config::SessionConfig;
use neurovox_core::events::WarningKind;
use neurovox_core::ids::UtteranceId;
use neurovox_decode::Transcript;

use crate::emitter::SessionEmitter;
use crate::services::{ServiceError, SpeechSynthesizer, Translator};

/// Tag attached when the confidence gate fired.
pub const TAG_LOW_CONFIDENCE: &str = "low-confidence";
/// Tag attached when dispatch fell back to untranslated text.
pub const TAG_TRANSLATION_FAILED: &str = "translation-failed";

struct Pending {
    utterance_id: UtteranceId,
    text: String,
    language: String,
    tags: Vec<String>,
}

/// Per-session FIFO dispatcher from transcripts to speech.
pub struct OutputDispatcher {
    source_lang: String,
    /// Set only when translation is wanted (target differs from source).
    target_lang: Option<String>,
    queue_depth: usize,
    translator: Arc<dyn Translator>,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    emitter: Arc<SessionEmitter>,
    pending: VecDeque<Pending>,
}

impl OutputDispatcher {
    /// Build a dispatcher for one session; the emitter carries the
    /// session identity.
    #[must_use]
    pub fn new(
        config: &SessionConfig,
        translator: Arc<dyn Translator>,
        synthesizer: Arc<dyn SpeechSynthesizer>,
        emitter: Arc<SessionEmitter>,
    ) -> Self {
        let target_lang = config
            .target_lang
            .clone()
            .filter(|t| *t != config.source_lang);
        Self {
            source_lang: config.source_lang.clone(),
            target_lang,
            queue_depth: config.output_queue_depth,
            translator,
            synthesizer,
            emitter,
            pending: VecDeque::new(),
        }
    }

    /// Whether utterances are parked waiting on the synthesizer.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Accept one transcript: translate, enqueue, and drain what the
    /// synthesizer will take.
    pub async fn dispatch(&mut self, transcript: Transcript) {
        let mut tags = Vec::new();
        if transcript.low_confidence {
            tags.push(TAG_LOW_CONFIDENCE.to_owned());
        }

        let (text, language) = match &self.target_lang {
            Some(target) => {
                match self
                    .translator
                    .translate(&transcript.text, &self.source_lang, target)
                    .await
                {
                    Ok(translated) => (translated, target.clone()),
                    Err(e) => {
                        warn!(error = %e, target, "translation failed, using original text");
                        let _ = self.emitter.warning(
                            WarningKind::TranslationFailed,
                            format!("{e}; dispatching original text"),
                        );
                        tags.push(TAG_TRANSLATION_FAILED.to_owned());
                        (transcript.text.clone(), self.source_lang.clone())
                    }
                }
            }
            None => (transcript.text.clone(), self.source_lang.clone()),
        };

        self.pending.push_back(Pending {
            utterance_id: transcript.utterance_id,
            text,
            language,
            tags,
        });
        if self.pending.len() > self.queue_depth
            && let Some(dropped) = self.pending.pop_front()
        {
            warn!(utterance_id = %dropped.utterance_id, "pending queue full, dropped oldest");
            let _ = self.emitter.warning(
                WarningKind::QueueOverflow,
                format!("dropped oldest pending utterance {}", dropped.utterance_id),
            );
        }
        self.drain().await;
    }

    /// Retry the pending queue head against the synthesizer. Stops at the
    /// first `Busy`; never reorders.
    pub async fn drain(&mut self) {
        loop {
            let Some(front) = self.pending.front() else {
                break;
            };
            let result = self.synthesizer.speak(&front.text, &front.language).await;
            if matches!(result, Err(ServiceError::Busy)) {
                debug!(pending = self.pending.len(), "synthesizer busy, queue parked");
                break;
            }
            let Some(item) = self.pending.pop_front() else {
                break;
            };
            match result {
                Ok(()) => {
                    let _ = self.emitter.dispatched(
                        item.utterance_id,
                        item.text,
                        item.language,
                        item.tags,
                    );
                }
                Err(e) => {
                    warn!(utterance_id = %item.utterance_id, error = %e, "synthesis failed");
                    let _ = self.emitter.warning(
                        WarningKind::SynthesisFailed,
                        format!("utterance {} dropped: {e}", item.utterance_id),
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{MockSpeechSynthesizer, MockTranslator};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use neurovox_core::events::DecodeEvent;
    use neurovox_core::ids::SessionId;
    use neurovox_core::types::TimeRange;

    fn transcript(text: &str, low_confidence: bool) -> Transcript {
        Transcript {
            utterance_id: UtteranceId::new(),
            text: text.to_owned(),
            mean_probability: if low_confidence { 0.4 } else { 0.9 },
            low_confidence,
            range: TimeRange::new(Duration::ZERO, Duration::from_millis(500)),
        }
    }

    fn config() -> SessionConfig {
        SessionConfig::default()
    }

    fn recording_synth(log: Arc<Mutex<Vec<String>>>) -> MockSpeechSynthesizer {
        let mut synth = MockSpeechSynthesizer::new();
        let _ = synth.expect_speak().returning(move |text, _| {
            log.lock().unwrap().push(text.to_owned());
            Ok(())
        });
        synth
    }

    fn no_translation() -> Arc<MockTranslator> {
        Arc::new(MockTranslator::new())
    }

    fn drain_events(rx: &mut tokio::sync::broadcast::Receiver<DecodeEvent>) -> Vec<DecodeEvent> {
        let mut events = Vec::new();
        while let Ok(e) = rx.try_recv() {
            events.push(e);
        }
        events
    }

    #[tokio::test]
    async fn dispatches_in_finalization_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let emitter = Arc::new(SessionEmitter::new(SessionId::new()));
        let mut rx = emitter.subscribe();
        let mut d = OutputDispatcher::new(
            &config(),
            no_translation(),
            Arc::new(recording_synth(log.clone())),
            emitter,
        );

        d.dispatch(transcript("First", false)).await;
        d.dispatch(transcript("Second", false)).await;
        d.dispatch(transcript("Third", false)).await;

        assert_eq!(*log.lock().unwrap(), vec!["First", "Second", "Third"]);
        let texts: Vec<String> = drain_events(&mut rx)
            .into_iter()
            .filter_map(|e| match e {
                DecodeEvent::Dispatched { text, .. } => Some(text),
                _ => None,
            })
            .collect();
        assert_eq!(texts, vec!["First", "Second", "Third"]);
    }

    #[tokio::test]
    async fn busy_synthesizer_parks_then_drains() {
        let calls = Arc::new(AtomicUsize::new(0));
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut synth = MockSpeechSynthesizer::new();
        {
            let calls = calls.clone();
            let log = log.clone();
            let _ = synth.expect_speak().returning(move |text, _| {
                // First two attempts hit a busy sink.
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    return Err(ServiceError::Busy);
                }
                log.lock().unwrap().push(text.to_owned());
                Ok(())
            });
        }
        let emitter = Arc::new(SessionEmitter::new(SessionId::new()));
        let mut d = OutputDispatcher::new(
            &config(),
            no_translation(),
            Arc::new(synth),
            emitter,
        );

        d.dispatch(transcript("Hello", false)).await;
        assert!(d.has_pending());
        d.drain().await;
        assert!(d.has_pending());
        d.drain().await;
        assert!(!d.has_pending());
        assert_eq!(*log.lock().unwrap(), vec!["Hello"]);
    }

    #[tokio::test]
    async fn overflow_drops_oldest_with_one_warning() {
        let mut synth = MockSpeechSynthesizer::new();
        let ready = Arc::new(AtomicUsize::new(0));
        let log = Arc::new(Mutex::new(Vec::new()));
        {
            let ready = ready.clone();
            let log = log.clone();
            let _ = synth.expect_speak().returning(move |text, _| {
                if ready.load(Ordering::SeqCst) == 0 {
                    return Err(ServiceError::Busy);
                }
                log.lock().unwrap().push(text.to_owned());
                Ok(())
            });
        }
        let emitter = Arc::new(SessionEmitter::new(SessionId::new()));
        let mut rx = emitter.subscribe();
        let cfg = SessionConfig {
            output_queue_depth: 2,
            ..config()
        };
        let mut d = OutputDispatcher::new(
            &cfg,
            no_translation(),
            Arc::new(synth),
            emitter,
        );

        d.dispatch(transcript("One", false)).await;
        d.dispatch(transcript("Two", false)).await;
        d.dispatch(transcript("Three", false)).await;

        let overflow_warnings = drain_events(&mut rx)
            .into_iter()
            .filter(|e| {
                matches!(
                    e,
                    DecodeEvent::Warning {
                        kind: WarningKind::QueueOverflow,
                        ..
                    }
                )
            })
            .count();
        assert_eq!(overflow_warnings, 1);

        ready.store(1, Ordering::SeqCst);
        d.drain().await;
        // The oldest utterance was the one dropped.
        assert_eq!(*log.lock().unwrap(), vec!["Two", "Three"]);
    }

    #[tokio::test]
    async fn translation_failure_falls_back_to_original_text() {
        let mut translator = MockTranslator::new();
        let _ = translator
            .expect_translate()
            .returning(|_, _, _| Err(ServiceError::Failed("model unavailable".into())));
        let log = Arc::new(Mutex::new(Vec::new()));
        let emitter = Arc::new(SessionEmitter::new(SessionId::new()));
        let mut rx = emitter.subscribe();
        let cfg = SessionConfig {
            target_lang: Some("es".into()),
            ..config()
        };
        let mut d = OutputDispatcher::new(
            &cfg,
            Arc::new(translator),
            Arc::new(recording_synth(log.clone())),
            emitter,
        );

        d.dispatch(transcript("Hello", false)).await;

        assert_eq!(*log.lock().unwrap(), vec!["Hello"]);
        let events = drain_events(&mut rx);
        assert!(events.iter().any(|e| matches!(
            e,
            DecodeEvent::Warning {
                kind: WarningKind::TranslationFailed,
                ..
            }
        )));
        let (language, tags) = events
            .iter()
            .find_map(|e| match e {
                DecodeEvent::Dispatched { language, tags, .. } => {
                    Some((language.clone(), tags.clone()))
                }
                _ => None,
            })
            .unwrap();
        assert_eq!(language, "en");
        assert!(tags.contains(&TAG_TRANSLATION_FAILED.to_owned()));
    }

    #[tokio::test]
    async fn successful_translation_switches_language() {
        let mut translator = MockTranslator::new();
        let _ = translator
            .expect_translate()
            .withf(|text, source, target| text == "Hello" && source == "en" && target == "es")
            .returning(|_, _, _| Ok("Hola".to_owned()));
        let log = Arc::new(Mutex::new(Vec::new()));
        let emitter = Arc::new(SessionEmitter::new(SessionId::new()));
        let mut rx = emitter.subscribe();
        let cfg = SessionConfig {
            target_lang: Some("es".into()),
            ..config()
        };
        let mut d = OutputDispatcher::new(
            &cfg,
            Arc::new(translator),
            Arc::new(recording_synth(log.clone())),
            emitter,
        );

        d.dispatch(transcript("Hello", false)).await;

        assert_eq!(*log.lock().unwrap(), vec!["Hola"]);
        let dispatched = drain_events(&mut rx)
            .into_iter()
            .find_map(|e| match e {
                DecodeEvent::Dispatched { text, language, .. } => Some((text, language)),
                _ => None,
            })
            .unwrap();
        assert_eq!(dispatched, ("Hola".to_owned(), "es".to_owned()));
    }

    #[tokio::test]
    async fn target_equal_to_source_skips_translation() {
        // A translator with no expectations panics if called.
        let translator = Arc::new(MockTranslator::new());
        let log = Arc::new(Mutex::new(Vec::new()));
        let cfg = SessionConfig {
            target_lang: Some("en".into()),
            ..config()
        };
        let mut d = OutputDispatcher::new(
            &cfg,
            translator,
            Arc::new(recording_synth(log.clone())),
            Arc::new(SessionEmitter::new(SessionId::new())),
        );
        d.dispatch(transcript("Hello", false)).await;
        assert_eq!(*log.lock().unwrap(), vec!["Hello"]);
    }

    #[tokio::test]
    async fn low_confidence_tag_is_carried() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let emitter = Arc::new(SessionEmitter::new(SessionId::new()));
        let mut rx = emitter.subscribe();
        let mut d = OutputDispatcher::new(
            &config(),
            no_translation(),
            Arc::new(recording_synth(log)),
            emitter,
        );

        d.dispatch(transcript("Maybe", true)).await;

        let tags = drain_events(&mut rx)
            .into_iter()
            .find_map(|e| match e {
                DecodeEvent::Dispatched { tags, .. } => Some(tags),
                _ => None,
            })
            .unwrap();
        assert_eq!(tags, vec![TAG_LOW_CONFIDENCE.to_owned()]);
    }

    #[tokio::test]
    async fn synthesis_failure_drops_with_warning() {
        let mut synth = MockSpeechSynthesizer::new();
        let _ = synth
            .expect_speak()
            .returning(|_, _| Err(ServiceError::Failed("device gone".into())));
        let emitter = Arc::new(SessionEmitter::new(SessionId::new()));
        let mut rx = emitter.subscribe();
        let mut d = OutputDispatcher::new(
            &config(),
            no_translation(),
            Arc::new(synth),
            emitter,
        );

        d.dispatch(transcript("Hello", false)).await;

        assert!(!d.has_pending());
        let events = drain_events(&mut rx);
        assert!(events.iter().any(|e| matches!(
            e,
            DecodeEvent::Warning {
                kind: WarningKind::SynthesisFailed,
                ..
            }
        )));
        assert!(
            !events
                .iter()
                .any(|e| matches!(e, DecodeEvent::Dispatched { .. }))
        );
    }
}
