//! Process-lifetime audio cache keyed by normalized text.

use dashmap::DashMap;

use super::AudioArtifact;

/// Text → synthesized audio. Unbounded; lives until the session ends.
///
/// Concurrent writes for the same key are last-write-wins.
#[derive(Debug, Default)]
pub struct AudioCache {
    entries: DashMap<String, AudioArtifact>,
}

impl AudioCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<AudioArtifact> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn insert(&self, key: &str, artifact: AudioArtifact) {
        self.entries.insert(key.to_string(), artifact);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artifact(voice: &str) -> AudioArtifact {
        AudioArtifact {
            text: "你好".to_string(),
            voice: voice.to_string(),
            audio_base64: "AAAA".into(),
        }
    }

    #[test]
    fn last_write_wins() {
        let cache = AudioCache::new();
        cache.insert("你好", artifact("Kore"));
        cache.insert("你好", artifact("Puck"));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("你好").unwrap().voice, "Puck");
    }

    #[test]
    fn clear_empties() {
        let cache = AudioCache::new();
        cache.insert("a", artifact("Kore"));
        assert!(cache.contains("a"));
        cache.clear();
        assert!(cache.is_empty());
        assert!(cache.get("a").is_none());
    }
}
