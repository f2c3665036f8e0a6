//! Speech synthesis with caching and request deduplication.
//!
//! [`SpeechService::synthesize`] is the single entry point used both for
//! on-demand playback and by the prefetch pool:
//! 1. Normalize the text; blank input yields `None`
//! 2. Serve from the [`AudioCache`] when possible
//! 3. Join the in-flight request for the same text, or start one that runs
//!    the [`VoiceRotator`]

pub mod audio;
pub mod cache;
pub mod rotator;

pub use cache::AudioCache;
pub use rotator::VoiceRotator;

use std::sync::Arc;

use anyhow::Result;
use tracing::debug;

use crate::concurrency::InFlight;
use crate::config::{RetryConfig, SpeechConfig};
use crate::error::UpstreamError;
use crate::provider::SpeechSynthesizer;
use crate::utils::normalize_text;

/// Synthesized audio for one exact text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioArtifact {
    /// Normalized source text; also the cache key.
    pub text: String,
    /// Voice that produced the audio.
    pub voice: String,
    /// Base64 of 16-bit little-endian mono PCM.
    pub audio_base64: Arc<str>,
}

impl AudioArtifact {
    pub fn decode_pcm(&self) -> Result<Vec<i16>> {
        audio::decode_pcm(&self.audio_base64)
    }
}

pub struct SpeechService {
    cache: Arc<AudioCache>,
    inflight: InFlight<AudioArtifact, UpstreamError>,
    rotator: Arc<VoiceRotator>,
}

impl SpeechService {
    pub fn new(
        synthesizer: Arc<dyn SpeechSynthesizer>,
        speech: &SpeechConfig,
        retry: &RetryConfig,
    ) -> Self {
        let cache = Arc::new(AudioCache::new());
        let rotator = VoiceRotator::new(
            synthesizer,
            Arc::clone(&cache),
            speech.voices.clone(),
            retry.policy(speech.attempts_per_voice),
            speech.voice_switch_delay,
        );
        Self {
            cache,
            inflight: InFlight::new(),
            rotator: Arc::new(rotator),
        }
    }

    /// Audio for `text`, synthesizing it at most once across concurrent callers.
    pub async fn synthesize(&self, text: &str) -> Result<Option<AudioArtifact>, UpstreamError> {
        let Some(key) = normalize_text(text) else {
            return Ok(None);
        };

        if let Some(hit) = self.cache.get(key) {
            debug!(key, "audio cache hit");
            return Ok(Some(hit));
        }

        let rotator = Arc::clone(&self.rotator);
        let owned_key = key.to_string();
        let flight = self.inflight.join_or_start(
            key,
            || self.cache.get(key),
            move || async move { rotator.synthesize(&owned_key).await },
        );

        if flight.is_started() {
            debug!(key, "speech request started");
        }
        flight.wait().await.map(Some)
    }

    /// Whether audio for `text` is already cached.
    pub fn is_cached(&self, text: &str) -> bool {
        normalize_text(text).is_some_and(|key| self.cache.contains(key))
    }

    pub fn cache(&self) -> &AudioCache {
        &self.cache
    }

    /// Number of texts with a synthesis currently in flight.
    pub fn pending_requests(&self) -> usize {
        self.inflight.len()
    }
}
