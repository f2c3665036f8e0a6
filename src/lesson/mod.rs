//! Lesson data model and content resolution.
//!
//! A lesson is one day of the course: a theme plus ten vocabulary items,
//! each with a word, its pinyin, a Vietnamese gloss and one example
//! sentence carrying the same three renderings.

pub mod bundled;
pub mod curriculum;
pub mod resolver;

pub use bundled::StaticLessons;
pub use resolver::LessonResolver;

use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// Lessons resolved during this session, by day.
pub type LessonMemo = DashMap<u32, Arc<LessonTopic>>;

/// Number of vocabulary items in a well-formed lesson.
pub const WORDS_PER_LESSON: usize = 10;

/// One vocabulary item. Field names on the wire match the stored JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VocabularyItem {
    #[serde(rename = "hanzi")]
    pub word: String,
    #[serde(rename = "pinyin")]
    pub phonetic: String,
    #[serde(rename = "meaning_vietnamese")]
    pub gloss: String,
    #[serde(rename = "example_sentence")]
    pub sentence: String,
    #[serde(rename = "sentence_pinyin")]
    pub sentence_phonetic: String,
    #[serde(rename = "sentence_meaning_vietnamese")]
    pub sentence_gloss: String,
}

impl VocabularyItem {
    /// All six fields carry non-blank text.
    pub fn is_well_formed(&self) -> bool {
        [
            &self.word,
            &self.phonetic,
            &self.gloss,
            &self.sentence,
            &self.sentence_phonetic,
            &self.sentence_gloss,
        ]
        .iter()
        .all(|field| !field.trim().is_empty())
    }
}

/// Lesson body as produced by the generator and kept in the durable store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LessonPayload {
    #[serde(rename = "topic_vietnamese")]
    pub theme: String,
    pub words: Vec<VocabularyItem>,
}

impl LessonPayload {
    /// Vocabulary items with at least one blank field.
    pub fn incomplete_items(&self) -> usize {
        self.words.iter().filter(|w| !w.is_well_formed()).count()
    }

    pub fn into_topic(self, day: u32) -> LessonTopic {
        LessonTopic {
            day,
            theme: self.theme,
            words: self.words,
        }
    }
}

/// One day's complete vocabulary unit. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LessonTopic {
    pub day: u32,
    pub theme: String,
    pub words: Vec<VocabularyItem>,
}

impl LessonTopic {
    /// Texts to synthesize, words first, then example sentences.
    pub fn speech_texts(&self) -> Vec<String> {
        self.words
            .iter()
            .map(|w| w.word.clone())
            .chain(self.words.iter().map(|w| w.sentence.clone()))
            .collect()
    }
}
