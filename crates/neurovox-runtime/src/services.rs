//! Output-side service boundaries: translation and speech synthesis.
//!
//! Both are trait objects injected at registry construction so sessions
//! share one instance process-wide. Implementations must be safe for
//! concurrent use; the dispatcher serializes calls per session but many
//! sessions may call at once.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use tracing::debug;

/// Language codes the stock pair table covers, besides English.
pub const SUPPORTED_LANGUAGES: &[&str] = &[
    "en", "es", "fr", "de", "it", "pt", "ru", "ar", "hi", "zh",
];

/// Errors from a translation or synthesis call.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// The service cannot take more work right now; retry later.
    #[error("service busy")]
    Busy,

    /// The language pair has no model.
    #[error("unsupported language pair {source_lang}-{target}")]
    UnsupportedPair {
        /// Source language code.
        source_lang: String,
        /// Target language code.
        target: String,
    },

    /// The call failed for this input.
    #[error("{0}")]
    Failed(String),
}

/// Text translation between a configured language pair.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Translator: Send + Sync {
    /// Translate `text` from `source` to `target`.
    async fn translate(
        &self,
        text: &str,
        source: &str,
        target: &str,
    ) -> Result<String, ServiceError>;
}

/// Terminal speech sink for dispatched utterances.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Speak `text` in `language`. [`ServiceError::Busy`] means the
    /// utterance should be queued and retried, any other error that it
    /// cannot be spoken at all.
    async fn speak(&self, text: &str, language: &str) -> Result<(), ServiceError>;
}

/// Table-backed translator over the stock English-pivoted pair set
/// (en↔es, en↔fr, en↔de, en↔it, en↔pt, en↔ru, en↔ar, en↔hi, en↔zh).
///
/// Entries are exact-text lookups seeded at construction. A supported pair
/// with no entry for the text fails the call, which the dispatcher turns
/// into original-text fallback with a `translation-failed` tag.
pub struct PairTableTranslator {
    pairs: HashSet<(String, String)>,
    entries: HashMap<(String, String, String), String>,
}

impl PairTableTranslator {
    /// Translator over the stock pair set with no entries.
    #[must_use]
    pub fn new() -> Self {
        let mut pairs = HashSet::new();
        for lang in SUPPORTED_LANGUAGES.iter().filter(|l| **l != "en") {
            let _ = pairs.insert(("en".to_owned(), (*lang).to_owned()));
            let _ = pairs.insert(((*lang).to_owned(), "en".to_owned()));
        }
        Self {
            pairs,
            entries: HashMap::new(),
        }
    }

    /// Whether the pair has a model.
    #[must_use]
    pub fn supports_pair(&self, source: &str, target: &str) -> bool {
        self.pairs
            .contains(&(source.to_owned(), target.to_owned()))
    }

    /// Add one exact-text entry; builder style.
    #[must_use]
    pub fn with_entry(mut self, source: &str, target: &str, text: &str, translated: &str) -> Self {
        let _ = self.entries.insert(
            (source.to_owned(), target.to_owned(), text.to_owned()),
            translated.to_owned(),
        );
        self
    }
}

impl Default for PairTableTranslator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Translator for PairTableTranslator {
    async fn translate(
        &self,
        text: &str,
        source: &str,
        target: &str,
    ) -> Result<String, ServiceError> {
        if !self.supports_pair(source, target) {
            return Err(ServiceError::UnsupportedPair {
                source_lang: source.to_owned(),
                target: target.to_owned(),
            });
        }
        self.entries
            .get(&(source.to_owned(), target.to_owned(), text.to_owned()))
            .cloned()
            .ok_or_else(|| {
                ServiceError::Failed(format!("no {source}-{target} translation for this text"))
            })
    }
}

/// Synthesizer that accepts everything and speaks nothing.
///
/// The default sink when no audio backend is wired up; dispatch semantics
/// (ordering, queueing, events) are fully exercised without one.
pub struct NullSynthesizer;

#[async_trait]
impl SpeechSynthesizer for NullSynthesizer {
    async fn speak(&self, text: &str, language: &str) -> Result<(), ServiceError> {
        debug!(language, chars = text.len(), "null synthesizer consumed utterance");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[tokio::test]
    async fn stock_pairs_are_english_pivoted() {
        let t = PairTableTranslator::new();
        assert!(t.supports_pair("en", "es"));
        assert!(t.supports_pair("hi", "en"));
        assert!(!t.supports_pair("es", "fr"));
        assert!(!t.supports_pair("en", "en"));
    }

    #[tokio::test]
    async fn entry_lookup_translates() {
        let t = PairTableTranslator::new().with_entry("en", "es", "Hello", "Hola");
        assert_eq!(t.translate("Hello", "en", "es").await.unwrap(), "Hola");
    }

    #[tokio::test]
    async fn missing_entry_fails_supported_pair() {
        let t = PairTableTranslator::new();
        assert_matches!(
            t.translate("Hello", "en", "fr").await,
            Err(ServiceError::Failed(_))
        );
    }

    #[tokio::test]
    async fn unsupported_pair_is_distinct() {
        let t = PairTableTranslator::new();
        assert_matches!(
            t.translate("Hola", "es", "fr").await,
            Err(ServiceError::UnsupportedPair { .. })
        );
    }

    #[tokio::test]
    async fn null_synthesizer_always_accepts() {
        assert_matches!(NullSynthesizer.speak("Hello", "en").await, Ok(()));
    }
}
