//! Error taxonomy for upstream calls and lesson resolution.
//!
//! [`UpstreamError`] carries enough of the transport-specific error shape
//! (numeric status, nested status string, message) for the retry engine's
//! classifier to decide between transient and permanent failures.

use thiserror::Error;

/// HTTP status codes that indicate a transient upstream condition.
const RETRYABLE_CODES: &[u16] = &[429, 500, 502, 503, 504];

/// Nested `error.status` values that indicate a transient upstream condition.
const RETRYABLE_STATUSES: &[&str] = &["INTERNAL", "UNAVAILABLE", "RESOURCE_EXHAUSTED"];

/// Lower-case message fragments that indicate a transient upstream condition.
const RETRYABLE_HINTS: &[&str] = &[
    "internal error",
    "500",
    "503",
    "overloaded",
    "capacity",
    "unavailable",
    "fetch failed",
    "quota",
    "429",
];

/// A failure reported by (or while talking to) the generative API.
///
/// `Clone` so a single settled synthesis can be handed to every caller
/// that was waiting on the same in-flight request.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum UpstreamError {
    /// Non-success HTTP response, optionally with a nested status string.
    #[error("upstream returned {code}: {message}")]
    Http {
        code: u16,
        status: Option<String>,
        message: String,
    },

    /// The request never produced a response (connect, timeout, reset).
    #[error("fetch failed: {0}")]
    Transport(String),

    /// The response arrived but could not be interpreted.
    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("TTS blocked by safety filters (voice: {voice})")]
    SafetyBlocked { voice: String },

    #[error("no audio data in response (voice: {voice})")]
    NoAudio { voice: String },

    #[error("{0}")]
    Other(String),
}

impl UpstreamError {
    /// Transient failures worth retrying with backoff.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http { code, status, .. } => {
                if RETRYABLE_CODES.contains(code) {
                    return true;
                }
                if status
                    .as_deref()
                    .is_some_and(|s| RETRYABLE_STATUSES.contains(&s))
                {
                    return true;
                }
            }
            Self::Transport(_) => return true,
            _ => {}
        }

        let message = self.to_string().to_lowercase();
        RETRYABLE_HINTS.iter().any(|hint| message.contains(hint))
    }

    /// Quota or rate-limit exhaustion. Further calls only add pressure.
    pub fn is_rate_limited(&self) -> bool {
        if let Self::Http { code, status, .. } = self {
            if *code == 429 || status.as_deref() == Some("RESOURCE_EXHAUSTED") {
                return true;
            }
        }
        self.to_string().contains("429")
    }

    /// Localized, cause-specific text for the foreground lesson view.
    pub fn user_message(&self) -> String {
        let message = self.to_string();
        let internal = matches!(self, Self::Http { code: 500, .. })
            || matches!(self, Self::Http { status: Some(s), .. } if s == "INTERNAL")
            || message.contains("500")
            || message.contains("Internal");

        if internal {
            "Hệ thống AI đang bận (Lỗi 500). Vui lòng thử lại sau giây lát.".to_string()
        } else if matches!(self, Self::Http { code: 503, .. }) || message.contains("503") {
            "Dịch vụ đang quá tải. Vui lòng thử lại.".to_string()
        } else {
            format!("Lỗi: {}", message)
        }
    }
}

impl From<tokio::task::JoinError> for UpstreamError {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::Other(format!("synthesis task failed: {}", e))
    }
}

/// Failure of the foreground lesson resolution path.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum LessonError {
    #[error("day {day} is outside the course (1..={max_day})")]
    DayOutOfRange { day: u32, max_day: u32 },

    #[error(transparent)]
    Upstream(#[from] UpstreamError),
}

impl LessonError {
    pub fn user_message(&self) -> String {
        match self {
            Self::DayOutOfRange { day, max_day } => {
                format!("Ngày {} không tồn tại (1 - {}).", day, max_day)
            }
            Self::Upstream(e) => e.user_message(),
        }
    }
}
