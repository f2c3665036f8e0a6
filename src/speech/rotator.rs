//! Voice fallback rotation for speech synthesis.
//!
//! Voices are tried in priority order, each wrapped in a small retry
//! budget. A recoverable failure moves on to the next voice after a short
//! pause; a rate-limit failure aborts the whole rotation because further
//! voices would only add quota pressure.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{info, warn};

use super::{AudioArtifact, AudioCache};
use crate::concurrency::RetryPolicy;
use crate::error::UpstreamError;
use crate::provider::{SpeechOutcome, SpeechSynthesizer};
use crate::utils::{contains_terminal, ends_with_terminal, preview};

/// Inputs at most this many characters long are repeated before dispatch.
const SHORT_INPUT_CHARS: usize = 4;

/// Text sent upstream for a normalized input.
///
/// Very short inputs tend to come back silent, so a lone word is spoken
/// twice. Anything else gets a sentence terminator if it lacks one.
pub fn prompt_text(text: &str) -> String {
    let is_short = text.chars().count() <= SHORT_INPUT_CHARS
        && !text.chars().any(char::is_whitespace)
        && !contains_terminal(text);

    if is_short {
        format!("{text}。 {text}")
    } else if ends_with_terminal(text) {
        text.to_string()
    } else {
        format!("{text}。")
    }
}

pub struct VoiceRotator {
    synthesizer: Arc<dyn SpeechSynthesizer>,
    cache: Arc<AudioCache>,
    voices: Vec<String>,
    retry: RetryPolicy,
    switch_delay: Duration,
}

impl VoiceRotator {
    pub fn new(
        synthesizer: Arc<dyn SpeechSynthesizer>,
        cache: Arc<AudioCache>,
        voices: Vec<String>,
        retry: RetryPolicy,
        switch_delay: Duration,
    ) -> Self {
        Self {
            synthesizer,
            cache,
            voices,
            retry,
            switch_delay,
        }
    }

    /// Synthesize `key` and cache the result under `key` itself.
    pub async fn synthesize(&self, key: &str) -> Result<AudioArtifact, UpstreamError> {
        let prompt = prompt_text(key);
        let mut last_error = None;

        for (index, voice) in self.voices.iter().enumerate() {
            match self.try_voice(&prompt, voice).await {
                Ok(audio_base64) => {
                    let artifact = AudioArtifact {
                        text: key.to_string(),
                        voice: voice.clone(),
                        audio_base64: audio_base64.into(),
                    };
                    self.cache.insert(key, artifact.clone());
                    info!(text = %preview(key, 24), voice = %voice, "speech synthesized");
                    return Ok(artifact);
                }
                Err(e) if e.is_rate_limited() => {
                    warn!(voice = %voice, error = %e, "speech quota exhausted, aborting rotation");
                    return Err(e);
                }
                Err(e) => {
                    warn!(voice = %voice, error = %e, "voice failed, switching");
                    last_error = Some(e);
                    if index + 1 < self.voices.len() {
                        sleep(self.switch_delay).await;
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| UpstreamError::Other("no voices configured".to_string())))
    }

    async fn try_voice(&self, prompt: &str, voice: &str) -> Result<String, UpstreamError> {
        let synthesizer = &self.synthesizer;
        self.retry
            .run("speech", UpstreamError::is_retryable, || async move {
                match synthesizer.synthesize(prompt, voice).await? {
                    SpeechOutcome::Audio(data) => Ok(data),
                    SpeechOutcome::SafetyBlocked => Err(UpstreamError::SafetyBlocked {
                        voice: voice.to_string(),
                    }),
                    SpeechOutcome::Empty => Err(UpstreamError::NoAudio {
                        voice: voice.to_string(),
                    }),
                }
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::mock::MockSpeechSynthesizer;

    fn rotator(synth: Arc<MockSpeechSynthesizer>, voices: &[&str]) -> (VoiceRotator, Arc<AudioCache>) {
        let cache = Arc::new(AudioCache::new());
        let rotator = VoiceRotator::new(
            synth,
            cache.clone(),
            voices.iter().map(|v| v.to_string()).collect(),
            RetryPolicy {
                max_attempts: 2,
                base_delay: Duration::from_millis(10),
                max_jitter: Duration::ZERO,
                max_delay: Duration::from_secs(1),
            },
            Duration::from_millis(300),
        );
        (rotator, cache)
    }

    #[test]
    fn short_word_is_repeated() {
        assert_eq!(prompt_text("你好"), "你好。 你好");
        assert_eq!(prompt_text("谢谢你们"), "谢谢你们。 谢谢你们");
    }

    #[test]
    fn longer_text_gets_terminator() {
        assert_eq!(prompt_text("我喜欢喝茶"), "我喜欢喝茶。");
        assert_eq!(prompt_text("我 好"), "我 好。");
    }

    #[test]
    fn punctuated_text_unchanged() {
        assert_eq!(prompt_text("你好吗？"), "你好吗？");
        assert_eq!(prompt_text("我喜欢喝茶。"), "我喜欢喝茶。");
    }

    #[tokio::test(start_paused = true)]
    async fn empty_outcome_rotates_to_next_voice() {
        let synth = Arc::new(MockSpeechSynthesizer::new());
        synth.push_response(Ok(SpeechOutcome::Empty));
        let (rotator, cache) = rotator(synth.clone(), &["Kore", "Aoede"]);

        let artifact = rotator.synthesize("你好").await.unwrap();
        assert_eq!(artifact.voice, "Aoede");
        assert_eq!(artifact.text, "你好");
        assert!(cache.contains("你好"));
        assert!(!cache.contains("你好。 你好"));

        let voices: Vec<_> = synth.calls().into_iter().map(|c| c.voice).collect();
        assert_eq!(voices, vec!["Kore", "Aoede"]);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_voices_return_last_error() {
        let synth = Arc::new(MockSpeechSynthesizer::new());
        synth.push_response(Ok(SpeechOutcome::SafetyBlocked));
        synth.push_response(Ok(SpeechOutcome::Empty));
        let (rotator, cache) = rotator(synth.clone(), &["Kore", "Aoede"]);

        let err = rotator.synthesize("你好").await.unwrap_err();
        assert_eq!(err, UpstreamError::NoAudio { voice: "Aoede".into() });
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failure_retried_on_same_voice() {
        let synth = Arc::new(MockSpeechSynthesizer::new());
        synth.push_response(Err(UpstreamError::Transport("connection reset".into())));
        let (rotator, _cache) = rotator(synth.clone(), &["Kore", "Aoede"]);

        let artifact = rotator.synthesize("我喜欢喝茶").await.unwrap();
        assert_eq!(artifact.voice, "Kore");
        assert_eq!(synth.call_count(), 2);
        assert!(synth.calls().iter().all(|c| c.text == "我喜欢喝茶。"));
    }

    #[tokio::test]
    async fn no_voices_is_an_error() {
        let synth = Arc::new(MockSpeechSynthesizer::new());
        let (rotator, _cache) = rotator(synth.clone(), &[]);
        assert!(matches!(
            rotator.synthesize("你好").await,
            Err(UpstreamError::Other(_))
        ));
        assert_eq!(synth.call_count(), 0);
    }
}
