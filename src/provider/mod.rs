//! Upstream generative API capabilities.
//!
//! Lesson generation and speech synthesis are opaque remote functions that
//! can fail transiently or permanently. Everything above this module talks
//! to them only through these traits.

pub mod gemini;
pub mod mock;

pub use gemini::GeminiClient;

use async_trait::async_trait;

use crate::error::UpstreamError;
use crate::lesson::LessonPayload;

/// Generates one day's lesson content.
#[async_trait]
pub trait ContentGenerator: Send + Sync {
    async fn generate(&self, day: u32, topic_hint: &str) -> Result<LessonPayload, UpstreamError>;

    /// Human-readable provider name.
    fn name(&self) -> &str;
}

/// What a single synthesis call produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpeechOutcome {
    /// Base64-encoded audio payload.
    Audio(String),
    /// The response was withheld by the upstream safety filters.
    SafetyBlocked,
    /// The response carried no audio payload.
    Empty,
}

/// Text-to-speech with a selectable voice identity.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, text: &str, voice: &str) -> Result<SpeechOutcome, UpstreamError>;

    /// Human-readable provider name.
    fn name(&self) -> &str;
}
