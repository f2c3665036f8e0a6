//! Durable key-value storage for generated lessons.
//!
//! Only lesson content is persisted; synthesized audio lives for the
//! process lifetime in [`crate::speech::AudioCache`].

pub mod memory;
pub mod sqlite;

pub use memory::MemoryLessonStore;
pub use sqlite::SqliteLessonStore;

use anyhow::Result;

/// Persistent get/set/clear capability keyed by versioned strings.
#[cfg_attr(test, mockall::automock)]
pub trait LessonStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// May fail, e.g. when a storage quota is exceeded.
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Remove every stored entry.
    fn clear(&self) -> Result<()>;
}
