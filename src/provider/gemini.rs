//! Gemini REST provider for lesson generation and speech synthesis.
//!
//! Both capabilities go through `POST /v1beta/models/{model}:generateContent`:
//! 1. Lessons: JSON response mode with a schema → `candidates[0]` text → JSON
//! 2. Speech: AUDIO response modality with a prebuilt voice →
//!    `candidates[0].content.parts[0].inlineData.data` (base64 PCM)
//!
//! Non-success responses carry `{"error":{"code","status","message"}}`,
//! which is mapped onto [`UpstreamError::Http`] for the retry classifier.

use std::time::Instant;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use super::{ContentGenerator, SpeechOutcome, SpeechSynthesizer};
use crate::config::GeminiConfig;
use crate::error::UpstreamError;
use crate::lesson::LessonPayload;
use crate::lesson::curriculum::lesson_prompt;

const SAFETY_CATEGORIES: &[&str] = &[
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    "HARM_CATEGORY_HARASSMENT",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
];

// ── Wire types ───────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<Content>,
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    text: Option<String>,
    inline_data: Option<InlineData>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    #[allow(dead_code)]
    mime_type: Option<String>,
    data: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    status: Option<String>,
}

// ── Client ───────────────────────────────────────────────────────

/// Gemini API client implementing both upstream capabilities.
pub struct GeminiClient {
    config: GeminiConfig,
    client: reqwest::Client,
}

impl GeminiClient {
    pub fn new(config: GeminiConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { config, client })
    }

    fn url(&self, model: &str) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.config.endpoint.trim_end_matches('/'),
            model
        )
    }

    async fn generate_content(
        &self,
        model: &str,
        body: &Value,
    ) -> Result<GenerateResponse, UpstreamError> {
        let response = self
            .client
            .post(self.url(model))
            .header("x-goog-api-key", &self.config.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| UpstreamError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(error_from_body(status.as_u16(), &body));
        }

        response
            .json::<GenerateResponse>()
            .await
            .map_err(|e| UpstreamError::Malformed(e.to_string()))
    }
}

#[async_trait]
impl ContentGenerator for GeminiClient {
    async fn generate(&self, day: u32, topic_hint: &str) -> Result<LessonPayload, UpstreamError> {
        let body = lesson_request(&lesson_prompt(day, topic_hint));
        let started = Instant::now();
        let response = self
            .generate_content(&self.config.content_model, &body)
            .await?;
        debug!(day, elapsed_ms = started.elapsed().as_millis() as u64, "lesson generated");
        lesson_from_response(response)
    }

    fn name(&self) -> &str {
        "gemini"
    }
}

#[async_trait]
impl SpeechSynthesizer for GeminiClient {
    async fn synthesize(&self, text: &str, voice: &str) -> Result<SpeechOutcome, UpstreamError> {
        let body = speech_request(text, voice);
        let response = self
            .generate_content(&self.config.speech_model, &body)
            .await?;
        Ok(speech_from_response(response))
    }

    fn name(&self) -> &str {
        "gemini"
    }
}

impl std::fmt::Debug for GeminiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiClient")
            .field("endpoint", &self.config.endpoint)
            .field("timeout", &self.config.timeout)
            .finish_non_exhaustive()
    }
}

// ── Request / response mapping ───────────────────────────────────

fn lesson_request(prompt: &str) -> Value {
    let string = json!({ "type": "STRING" });
    json!({
        "contents": [{ "parts": [{ "text": prompt }] }],
        "generationConfig": {
            "responseMimeType": "application/json",
            "responseSchema": {
                "type": "OBJECT",
                "properties": {
                    "topic_vietnamese": { "type": "STRING", "description": "Theme of the day in Vietnamese" },
                    "words": {
                        "type": "ARRAY",
                        "items": {
                            "type": "OBJECT",
                            "properties": {
                                "hanzi": string,
                                "pinyin": string,
                                "meaning_vietnamese": string,
                                "example_sentence": string,
                                "sentence_pinyin": string,
                                "sentence_meaning_vietnamese": string,
                            },
                            "required": [
                                "hanzi", "pinyin", "meaning_vietnamese",
                                "example_sentence", "sentence_pinyin", "sentence_meaning_vietnamese"
                            ]
                        }
                    }
                },
                "required": ["topic_vietnamese", "words"]
            }
        }
    })
}

fn speech_request(text: &str, voice: &str) -> Value {
    let safety: Vec<Value> = SAFETY_CATEGORIES
        .iter()
        .map(|category| json!({ "category": category, "threshold": "BLOCK_NONE" }))
        .collect();
    json!({
        "contents": [{ "parts": [{ "text": text }] }],
        "generationConfig": {
            "responseModalities": ["AUDIO"],
            "speechConfig": {
                "voiceConfig": { "prebuiltVoiceConfig": { "voiceName": voice } }
            }
        },
        "safetySettings": safety,
    })
}

fn first_part(response: &GenerateResponse) -> Option<&Part> {
    response
        .candidates
        .first()
        .and_then(|c| c.content.as_ref())
        .and_then(|c| c.parts.first())
}

fn lesson_from_response(response: GenerateResponse) -> Result<LessonPayload, UpstreamError> {
    let text = first_part(&response)
        .and_then(|p| p.text.as_deref())
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| UpstreamError::Malformed("no response text from AI".to_string()))?;

    serde_json::from_str(text).map_err(|e| UpstreamError::Malformed(e.to_string()))
}

fn speech_from_response(response: GenerateResponse) -> SpeechOutcome {
    let blocked = response
        .candidates
        .first()
        .and_then(|c| c.finish_reason.as_deref())
        == Some("SAFETY");
    if blocked {
        return SpeechOutcome::SafetyBlocked;
    }

    match first_part(&response)
        .and_then(|p| p.inline_data.as_ref())
        .and_then(|d| d.data.clone())
    {
        Some(data) if !data.is_empty() => SpeechOutcome::Audio(data),
        _ => SpeechOutcome::Empty,
    }
}

fn error_from_body(code: u16, body: &str) -> UpstreamError {
    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(envelope) => UpstreamError::Http {
            code,
            status: envelope.error.status,
            message: envelope.error.message,
        },
        Err(_) => UpstreamError::Http {
            code,
            status: None,
            message: crate::utils::preview(body.trim(), 200),
        },
    }
}
