//! Static lesson table shipped inside the binary.
//!
//! These lessons are authoritative: a day present here is never looked up
//! in the durable store or regenerated.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use tracing::error;

use super::{LessonPayload, LessonTopic};

const BUNDLED_JSON: &str = include_str!("../../data/static_lessons.json");

static BUNDLED: Lazy<HashMap<u32, LessonPayload>> = Lazy::new(|| {
    serde_json::from_str(BUNDLED_JSON).unwrap_or_else(|e| {
        error!(error = %e, "bundled lesson table is corrupt, ignoring it");
        HashMap::new()
    })
});

/// Exact-match, infallible lookup of pre-written lessons.
#[derive(Debug, Clone, Default)]
pub struct StaticLessons {
    lessons: HashMap<u32, LessonPayload>,
}

impl StaticLessons {
    /// The lessons embedded at build time.
    pub fn bundled() -> Self {
        Self {
            lessons: BUNDLED.clone(),
        }
    }

    /// An empty table, so every day goes through the other tiers.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_map(lessons: HashMap<u32, LessonPayload>) -> Self {
        Self { lessons }
    }

    pub fn lookup(&self, day: u32) -> Option<LessonTopic> {
        self.lessons
            .get(&day)
            .map(|payload| payload.clone().into_topic(day))
    }

    pub fn contains(&self, day: u32) -> bool {
        self.lessons.contains_key(&day)
    }

    pub fn len(&self) -> usize {
        self.lessons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lessons.is_empty()
    }
}
