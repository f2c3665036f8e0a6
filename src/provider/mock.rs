//! Scripted mock providers for testing.
//!
//! Both mocks record every call they receive and answer from a queue of
//! scripted responses, falling back to a deterministic success once the
//! script is exhausted. Useful for exercising retry, rotation and prefetch
//! behaviour without a network.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use tokio::time::sleep;

use super::{ContentGenerator, SpeechOutcome, SpeechSynthesizer};
use crate::error::UpstreamError;
use crate::lesson::{LessonPayload, VocabularyItem, WORDS_PER_LESSON};

/// Samples of silence per character in the default mock audio (10 ms at 24 kHz).
const SAMPLES_PER_CHAR: usize = 240;

// ── Content ──────────────────────────────────────────────────────

/// Mock lesson generator.
#[derive(Default)]
pub struct MockContentGenerator {
    script: Mutex<VecDeque<Result<LessonPayload, UpstreamError>>>,
    calls: Mutex<Vec<(u32, String)>>,
    latency: Duration,
}

impl MockContentGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response for the next call.
    pub fn push_response(&self, response: Result<LessonPayload, UpstreamError>) {
        lock(&self.script).push_back(response);
    }

    /// Set simulated generation latency.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// `(day, topic_hint)` for every call so far.
    pub fn calls(&self) -> Vec<(u32, String)> {
        lock(&self.calls).clone()
    }

    pub fn call_count(&self) -> usize {
        lock(&self.calls).len()
    }

    /// Deterministic lesson used once the script runs dry.
    pub fn default_payload(day: u32) -> LessonPayload {
        LessonPayload {
            theme: format!("Generated day {}", day),
            words: (0..WORDS_PER_LESSON)
                .map(|i| VocabularyItem {
                    word: format!("词{}_{}", day, i),
                    phonetic: format!("ci {} {}", day, i),
                    gloss: format!("từ {} {}", day, i),
                    sentence: format!("这是第{}天的第{}句。", day, i),
                    sentence_phonetic: format!("zhe shi di {} tian de di {} ju.", day, i),
                    sentence_gloss: format!("Câu {} của ngày {}.", i, day),
                })
                .collect(),
        }
    }
}

#[async_trait]
impl ContentGenerator for MockContentGenerator {
    async fn generate(&self, day: u32, topic_hint: &str) -> Result<LessonPayload, UpstreamError> {
        lock(&self.calls).push((day, topic_hint.to_string()));

        if !self.latency.is_zero() {
            sleep(self.latency).await;
        }

        let scripted = lock(&self.script).pop_front();
        scripted.unwrap_or_else(|| Ok(Self::default_payload(day)))
    }

    fn name(&self) -> &str {
        "mock"
    }
}

// ── Speech ───────────────────────────────────────────────────────

/// A synthesis call as seen by the mock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeechCall {
    pub text: String,
    pub voice: String,
}

/// Mock speech synthesizer.
#[derive(Default)]
pub struct MockSpeechSynthesizer {
    script: Mutex<VecDeque<Result<SpeechOutcome, UpstreamError>>>,
    /// Per-text failures: text → (remaining failures, error to return).
    text_failures: Mutex<HashMap<String, (usize, UpstreamError)>>,
    calls: Mutex<Vec<SpeechCall>>,
    latency: Duration,
}

impl MockSpeechSynthesizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response for the next call, whatever its text.
    pub fn push_response(&self, response: Result<SpeechOutcome, UpstreamError>) {
        lock(&self.script).push_back(response);
    }

    /// Fail the next `times` calls whose upstream text is `text`.
    pub fn fail_text(&self, text: &str, times: usize, error: UpstreamError) {
        lock(&self.text_failures).insert(text.to_string(), (times, error));
    }

    /// Set simulated synthesis latency.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn calls(&self) -> Vec<SpeechCall> {
        lock(&self.calls).clone()
    }

    pub fn call_count(&self) -> usize {
        lock(&self.calls).len()
    }

    /// Base64 silence whose length depends on the text.
    pub fn default_audio(text: &str) -> String {
        let samples = text.chars().count().max(1) * SAMPLES_PER_CHAR;
        STANDARD.encode(vec![0u8; samples * 2])
    }

    fn take_text_failure(&self, text: &str) -> Option<UpstreamError> {
        let mut failures = lock(&self.text_failures);
        let (remaining, error) = failures.get_mut(text)?;
        if *remaining == 0 {
            return None;
        }
        *remaining -= 1;
        Some(error.clone())
    }
}

#[async_trait]
impl SpeechSynthesizer for MockSpeechSynthesizer {
    async fn synthesize(&self, text: &str, voice: &str) -> Result<SpeechOutcome, UpstreamError> {
        lock(&self.calls).push(SpeechCall {
            text: text.to_string(),
            voice: voice.to_string(),
        });

        if !self.latency.is_zero() {
            sleep(self.latency).await;
        }

        if let Some(error) = self.take_text_failure(text) {
            return Err(error);
        }

        let scripted = lock(&self.script).pop_front();
        scripted.unwrap_or_else(|| Ok(SpeechOutcome::Audio(Self::default_audio(text))))
    }

    fn name(&self) -> &str {
        "mock"
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}
