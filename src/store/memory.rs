//! In-memory lesson store.

use anyhow::Result;
use dashmap::DashMap;

use super::LessonStore;

/// Non-persistent store. Useful for tests and `--ephemeral` runs.
#[derive(Debug, Default)]
pub struct MemoryLessonStore {
    entries: DashMap<String, String>,
}

impl MemoryLessonStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl LessonStore for MemoryLessonStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.get(key).map(|r| r.value().clone()))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.entries.clear();
        Ok(())
    }
}
