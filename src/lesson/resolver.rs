//! Three-tier lesson resolution: bundled → durable store → remote generator.
//!
//! A remote lesson is written through to the durable store before it is
//! returned, so the next resolution of the same day never reaches the
//! generator. Write failures are logged and swallowed.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use super::curriculum::topic_hint;
use super::{LessonPayload, LessonTopic, StaticLessons};
use crate::concurrency::RetryPolicy;
use crate::config::LessonsConfig;
use crate::error::{LessonError, UpstreamError};
use crate::provider::ContentGenerator;
use crate::store::LessonStore;

/// Resolves one day's lesson through the cache tiers.
pub struct LessonResolver {
    statics: StaticLessons,
    store: Arc<dyn LessonStore>,
    generator: Arc<dyn ContentGenerator>,
    lessons: LessonsConfig,
    retry: RetryPolicy,
}

impl LessonResolver {
    pub fn new(
        statics: StaticLessons,
        store: Arc<dyn LessonStore>,
        generator: Arc<dyn ContentGenerator>,
        lessons: LessonsConfig,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            statics,
            store,
            generator,
            lessons,
            retry,
        }
    }

    pub fn max_day(&self) -> u32 {
        self.lessons.max_day
    }

    /// Resolve `day`, generating and persisting it if no local tier has it.
    pub async fn resolve(&self, day: u32) -> Result<LessonTopic, LessonError> {
        if day == 0 || day > self.lessons.max_day {
            return Err(LessonError::DayOutOfRange {
                day,
                max_day: self.lessons.max_day,
            });
        }

        if let Some(lesson) = self.statics.lookup(day) {
            info!(day, "lesson served from bundled data");
            return Ok(lesson);
        }

        let key = self.lessons.storage_key(day);
        if let Some(payload) = self.read_durable(&key) {
            info!(day, "lesson served from durable store");
            return Ok(payload.into_topic(day));
        }

        let hint = topic_hint(day);
        info!(day, topic = %hint, generator = self.generator.name(), "generating lesson");
        let payload = self
            .retry
            .run("lesson", UpstreamError::is_retryable, || {
                self.generator.generate(day, &hint)
            })
            .await?;

        if payload.words.is_empty() {
            return Err(UpstreamError::Malformed("lesson has no vocabulary".to_string()).into());
        }
        warn_incomplete(&key, &payload);

        self.write_durable(&key, &payload);
        Ok(payload.into_topic(day))
    }

    /// Whether `day` can be served without a remote call.
    pub fn is_cached(&self, day: u32) -> bool {
        self.statics.contains(day) || self.read_durable(&self.lessons.storage_key(day)).is_some()
    }

    /// Drop every durable entry. Bundled lessons are unaffected.
    pub fn clear_durable(&self) -> anyhow::Result<()> {
        self.store.clear()?;
        info!("durable lesson store cleared");
        Ok(())
    }

    /// A stored entry counts only if it parses and has vocabulary.
    fn read_durable(&self, key: &str) -> Option<LessonPayload> {
        let raw = match self.store.get(key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!(key, error = %e, "durable store read failed");
                return None;
            }
        };

        match serde_json::from_str::<LessonPayload>(&raw) {
            Ok(payload) if !payload.words.is_empty() => {
                warn_incomplete(key, &payload);
                Some(payload)
            }
            Ok(_) => {
                warn!(key, "durable entry has no vocabulary, ignoring");
                None
            }
            Err(e) => {
                warn!(key, error = %e, "durable entry is malformed, ignoring");
                None
            }
        }
    }

    fn write_durable(&self, key: &str, payload: &LessonPayload) {
        let raw = match serde_json::to_string(payload) {
            Ok(raw) => raw,
            Err(e) => {
                error!(key, error = %e, "failed to serialize lesson");
                return;
            }
        };

        match self.store.set(key, &raw) {
            Ok(()) => debug!(key, bytes = raw.len(), "lesson persisted"),
            Err(e) => error!(key, error = %e, "failed to persist lesson"),
        }
    }
}

/// Blank fields are served as-is; they only show up as empty text.
fn warn_incomplete(key: &str, payload: &LessonPayload) {
    let incomplete = payload.incomplete_items();
    if incomplete > 0 {
        warn!(key, incomplete, words = payload.words.len(), "lesson has items with blank fields");
    }
}
