//! Configuration loading.
//!
//! `config.toml` is optional; every section falls back to defaults that
//! match the behaviour of the hosted app. Durations are written as human
//! strings (`"600ms"`, `"5s"`).

pub mod schema;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::Deserialize;
use tracing::debug;

use crate::concurrency::retry::RetryPolicy;
use schema::deserialize_duration;

const CONFIG_FILE: &str = "config.toml";
const DB_FILE: &str = "lessons.db";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub gemini: GeminiConfig,
    pub lessons: LessonsConfig,
    pub speech: SpeechConfig,
    pub retry: RetryConfig,
    pub prefetch: PrefetchConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GeminiConfig {
    pub endpoint: String,
    pub api_key: String,
    pub content_model: String,
    pub speech_model: String,
    #[serde(deserialize_with = "deserialize_duration")]
    pub timeout: Duration,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://generativelanguage.googleapis.com".to_string(),
            api_key: String::new(),
            content_model: "gemini-2.5-flash".to_string(),
            speech_model: "gemini-2.5-flash-preview-tts".to_string(),
            timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LessonsConfig {
    /// Last day of the course.
    pub max_day: u32,
    /// Prefix for durable cache keys.
    pub storage_namespace: String,
    /// Bumped whenever the stored lesson shape changes.
    pub schema_version: u32,
    /// Attempts for one remote lesson generation.
    pub max_attempts: u32,
}

impl Default for LessonsConfig {
    fn default() -> Self {
        Self {
            max_day: 100,
            storage_namespace: "chinese_app".to_string(),
            schema_version: 2,
            max_attempts: 4,
        }
    }
}

impl LessonsConfig {
    /// Versioned durable-store key for a day.
    pub fn storage_key(&self, day: u32) -> String {
        format!(
            "{}_lesson_v{}_{}",
            self.storage_namespace, self.schema_version, day
        )
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SpeechConfig {
    /// Voices in priority order.
    pub voices: Vec<String>,
    /// Attempts per voice before rotating to the next one.
    pub attempts_per_voice: u32,
    #[serde(deserialize_with = "deserialize_duration")]
    pub voice_switch_delay: Duration,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            voices: ["Kore", "Aoede", "Puck", "Charon", "Fenrir"]
                .into_iter()
                .map(String::from)
                .collect(),
            attempts_per_voice: 2,
            voice_switch_delay: Duration::from_millis(300),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    #[serde(deserialize_with = "deserialize_duration")]
    pub base_delay: Duration,
    #[serde(deserialize_with = "deserialize_duration")]
    pub max_jitter: Duration,
    #[serde(deserialize_with = "deserialize_duration")]
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(300),
            max_jitter: Duration::from_millis(200),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl RetryConfig {
    pub fn policy(&self, max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: self.base_delay,
            max_jitter: self.max_jitter,
            max_delay: self.max_delay,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PrefetchConfig {
    /// Concurrent audio prefetch workers.
    pub workers: usize,
    /// Quiet period after a lesson appears before workers start.
    #[serde(deserialize_with = "deserialize_duration")]
    pub startup_delay: Duration,
    /// Pause after each successful fetch.
    #[serde(deserialize_with = "deserialize_duration")]
    pub success_pause: Duration,
    /// Pause after a failed fetch. Stalls the failing worker only, but with
    /// every worker hitting the same outage the whole pool backs off.
    #[serde(deserialize_with = "deserialize_duration")]
    pub failure_backoff: Duration,
    /// Debounce before warming the next day's lesson.
    #[serde(deserialize_with = "deserialize_duration")]
    pub lookahead_debounce: Duration,
    /// Failed attempts per text after which a caller waiting for the pool
    /// to drain stops it instead.
    pub give_up_after: usize,
}

impl Default for PrefetchConfig {
    fn default() -> Self {
        Self {
            workers: 3,
            startup_delay: Duration::from_secs(1),
            success_pause: Duration::from_millis(600),
            failure_backoff: Duration::from_secs(5),
            lookahead_debounce: Duration::from_secs(2),
            give_up_after: 3,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite file for durable lesson data. Empty means the platform data dir.
    pub path: String,
    /// Cap on stored lesson bytes; writes past it fail and are skipped.
    pub max_bytes: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// `pretty` or `json`.
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl Config {
    /// Load from `path`, or from the platform config dir when `None`.
    ///
    /// A missing default file is not an error; a missing explicit file is.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => match default_config_path() {
                Some(p) if p.exists() => Self::from_file(&p)?,
                _ => Self::default(),
            },
        };

        if config.gemini.api_key.is_empty() {
            config.gemini.api_key = std::env::var("GEMINI_API_KEY")
                .or_else(|_| std::env::var("API_KEY"))
                .unwrap_or_default();
        }

        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config = Self::from_toml(&raw)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        debug!(path = %path.display(), "loaded config");
        Ok(config)
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Resolved path of the durable lesson database.
    pub fn storage_path(&self) -> Result<PathBuf> {
        if !self.storage.path.is_empty() {
            let expanded = shellexpand::tilde(&self.storage.path);
            return Ok(PathBuf::from(expanded.as_ref()));
        }
        let dirs = project_dirs().context("could not determine a data directory")?;
        Ok(dirs.data_dir().join(DB_FILE))
    }
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("app", "hanzi-daily", "hanzi-daily")
}

fn default_config_path() -> Option<PathBuf> {
    project_dirs().map(|d| d.config_dir().join(CONFIG_FILE))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_hosted_app() {
        let config = Config::default();
        assert_eq!(config.lessons.max_day, 100);
        assert_eq!(config.speech.voices[0], "Kore");
        assert_eq!(config.speech.voices.len(), 5);
        assert_eq!(config.prefetch.workers, 3);
        assert_eq!(config.prefetch.success_pause, Duration::from_millis(600));
        assert_eq!(config.prefetch.failure_backoff, Duration::from_secs(5));
        assert_eq!(config.prefetch.give_up_after, 3);
        assert_eq!(config.retry.max_delay, Duration::from_secs(8));
    }

    #[test]
    fn storage_key_is_versioned_per_day() {
        let lessons = LessonsConfig::default();
        assert_eq!(lessons.storage_key(7), "chinese_app_lesson_v2_7");
    }

    #[test]
    fn partial_toml_keeps_other_defaults() {
        let config = Config::from_toml(
            r#"
            [prefetch]
            workers = 5
            failure_backoff = "10s"

            [speech]
            voices = ["Puck"]
            "#,
        )
        .unwrap();
        assert_eq!(config.prefetch.workers, 5);
        assert_eq!(config.prefetch.failure_backoff, Duration::from_secs(10));
        assert_eq!(config.prefetch.success_pause, Duration::from_millis(600));
        assert_eq!(config.speech.voices, vec!["Puck".to_string()]);
        assert_eq!(config.lessons.schema_version, 2);
    }

    #[test]
    fn bad_duration_is_rejected() {
        let result = Config::from_toml(
            r#"
            [retry]
            base_delay = "fast"
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn retry_policy_from_config() {
        let policy = RetryConfig::default().policy(3);
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.base_delay, Duration::from_millis(300));
    }

    #[test]
    fn storage_quota_is_optional() {
        assert_eq!(Config::default().storage.max_bytes, None);
        let config = Config::from_toml("[storage]\nmax_bytes = 5000000\n").unwrap();
        assert_eq!(config.storage.max_bytes, Some(5_000_000));
    }

    #[test]
    fn explicit_storage_path_wins() {
        let mut config = Config::default();
        config.storage.path = "/tmp/hanzi/lessons.db".to_string();
        assert_eq!(
            config.storage_path().unwrap(),
            PathBuf::from("/tmp/hanzi/lessons.db")
        );
    }

    #[test]
    fn missing_explicit_file_is_error() {
        assert!(Config::load(Some(Path::new("/nonexistent/hanzi/config.toml"))).is_err());
    }
}
