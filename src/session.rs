//! Session coordinator for the active lesson.
//!
//! Owns every piece of shared state (lesson memo, audio cache, in-flight
//! speech requests) and the lifecycle of the background work tied to the
//! active day. Activating a day supersedes the previous day's audio
//! prefetch and lookahead.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::Result;
use tracing::{debug, info};

use crate::config::{Config, PrefetchConfig};
use crate::error::{LessonError, UpstreamError};
use crate::lesson::{LessonMemo, LessonResolver, LessonTopic, StaticLessons};
use crate::prefetch::{LookaheadScheduler, PrefetchHandle, PrefetchPool, PrefetchReport};
use crate::provider::{ContentGenerator, SpeechSynthesizer};
use crate::speech::{AudioArtifact, SpeechService};
use crate::store::LessonStore;

pub struct LessonSession {
    resolver: Arc<LessonResolver>,
    speech: Arc<SpeechService>,
    memo: Arc<LessonMemo>,
    lookahead: LookaheadScheduler,
    prefetch: PrefetchConfig,
    /// Bumped on every activation; a load that finishes under an older
    /// value was superseded and must not start background work.
    generation: AtomicU64,
    active: Mutex<Option<PrefetchHandle>>,
}

impl LessonSession {
    pub fn new(
        resolver: Arc<LessonResolver>,
        speech: Arc<SpeechService>,
        prefetch: PrefetchConfig,
    ) -> Self {
        let memo = Arc::new(LessonMemo::new());
        let lookahead = LookaheadScheduler::new(
            Arc::clone(&resolver),
            Arc::clone(&memo),
            prefetch.lookahead_debounce,
        );
        Self {
            resolver,
            speech,
            memo,
            lookahead,
            prefetch,
            generation: AtomicU64::new(0),
            active: Mutex::new(None),
        }
    }

    /// Wire a session from configuration and the upstream capabilities.
    pub fn from_config(
        config: &Config,
        store: Arc<dyn LessonStore>,
        generator: Arc<dyn ContentGenerator>,
        synthesizer: Arc<dyn SpeechSynthesizer>,
    ) -> Self {
        let resolver = LessonResolver::new(
            StaticLessons::bundled(),
            store,
            generator,
            config.lessons.clone(),
            config.retry.policy(config.lessons.max_attempts),
        );
        let speech = SpeechService::new(synthesizer, &config.speech, &config.retry);
        Self::new(Arc::new(resolver), Arc::new(speech), config.prefetch.clone())
    }

    /// Make `day` the active lesson.
    ///
    /// On success the audio prefetch pool starts for the lesson and the
    /// next day is scheduled for lookahead. On failure nothing is started.
    pub async fn activate(&self, day: u32) -> Result<Arc<LessonTopic>, LessonError> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.lookahead.cancel();
        self.stop_prefetch();

        let lesson = self.lesson(day).await?;

        if self.generation.load(Ordering::SeqCst) != generation {
            debug!(day, "activation superseded during load");
            return Ok(lesson);
        }

        info!(day, theme = %lesson.theme, words = lesson.words.len(), "lesson active");
        let handle = PrefetchPool::start(Arc::clone(&self.speech), &lesson, &self.prefetch);
        if let Some(previous) = self.active().replace(handle) {
            previous.stop();
        }
        self.lookahead.schedule_after(day);
        Ok(lesson)
    }

    /// Resolve `day` through the memo without starting background work.
    pub async fn lesson(&self, day: u32) -> Result<Arc<LessonTopic>, LessonError> {
        if let Some(lesson) = self.memo.get(&day).map(|entry| Arc::clone(entry.value())) {
            debug!(day, "lesson served from session memo");
            return Ok(lesson);
        }
        let lesson = Arc::new(self.resolver.resolve(day).await?);
        self.memo.insert(day, Arc::clone(&lesson));
        Ok(lesson)
    }

    /// On-demand audio for one text, sharing any in-flight request.
    pub async fn speak(&self, text: &str) -> Result<Option<AudioArtifact>, UpstreamError> {
        self.speech.synthesize(text).await
    }

    /// Day whose audio is currently being prefetched.
    pub fn active_day(&self) -> Option<u32> {
        self.active().as_ref().map(PrefetchHandle::day)
    }

    /// Wait for the active day's audio prefetch to finish, giving up once
    /// only texts that keep failing are left.
    pub async fn wait_for_prefetch(&self) -> Option<PrefetchReport> {
        let handle = self.active().take()?;
        Some(handle.join_or_give_up(self.prefetch.give_up_after).await)
    }

    /// Stop all background work.
    pub fn shutdown(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.lookahead.cancel();
        self.stop_prefetch();
    }

    /// Forget every cached lesson and audio clip. Bundled lessons remain.
    pub fn reset_cache(&self) -> Result<()> {
        self.shutdown();
        self.memo.clear();
        self.speech.cache().clear();
        self.resolver.clear_durable()?;
        info!("session caches reset");
        Ok(())
    }

    pub fn memoized(&self, day: u32) -> bool {
        self.memo.contains_key(&day)
    }

    pub fn speech(&self) -> &SpeechService {
        &self.speech
    }

    fn stop_prefetch(&self) {
        if let Some(handle) = self.active().take() {
            handle.stop();
        }
    }

    fn active(&self) -> MutexGuard<'_, Option<PrefetchHandle>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for LessonSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use tokio::time::sleep;

    use crate::provider::mock::{MockContentGenerator, MockSpeechSynthesizer};
    use crate::store::MemoryLessonStore;

    struct Fixture {
        generator: Arc<MockContentGenerator>,
        synth: Arc<MockSpeechSynthesizer>,
        store: Arc<MemoryLessonStore>,
        session: LessonSession,
    }

    fn fixture() -> Fixture {
        let generator = Arc::new(MockContentGenerator::new());
        let synth = Arc::new(MockSpeechSynthesizer::new());
        let store = Arc::new(MemoryLessonStore::new());
        let session = LessonSession::from_config(
            &Config::default(),
            store.clone(),
            generator.clone(),
            synth.clone(),
        );
        Fixture {
            generator,
            synth,
            store,
            session,
        }
    }

    fn generated_days(generator: &MockContentGenerator) -> Vec<u32> {
        generator.calls().into_iter().map(|(day, _)| day).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn bundled_day_prefetches_all_audio() {
        let f = fixture();

        let lesson = f.session.activate(1).await.unwrap();
        assert_eq!(lesson.words.len(), 10);
        assert_eq!(f.session.active_day(), Some(1));

        let report = f.session.wait_for_prefetch().await.unwrap();
        assert_eq!(report.fetched + report.skipped, 20);
        assert_eq!(report.remaining, 0);
        for text in lesson.speech_texts() {
            assert!(f.session.speech().is_cached(&text));
        }
        // Day 2 is bundled too, so nothing was generated.
        assert_eq!(f.generator.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn waiting_for_prefetch_gives_up_on_unspeakable_text() {
        let f = fixture();
        let lesson = f.session.activate(1).await.unwrap();
        let stuck = lesson.words[0].sentence.clone();
        f.synth.fail_text(
            &stuck,
            usize::MAX,
            UpstreamError::SafetyBlocked {
                voice: "Kore".into(),
            },
        );

        let report = f.session.wait_for_prefetch().await.unwrap();

        assert!(report.cancelled);
        assert_eq!(report.unfetched, vec![stuck.clone()]);
        assert_eq!(report.fetched + report.skipped, 19);
        assert!(!f.session.speech().is_cached(&stuck));
        assert_eq!(f.session.active_day(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn lookahead_warms_next_day() {
        let f = fixture();

        f.session.activate(7).await.unwrap();
        sleep(Duration::from_secs(3)).await;

        assert_eq!(generated_days(&f.generator), vec![7, 8]);
        assert!(f.session.memoized(8));
        assert!(f.store.get("chinese_app_lesson_v2_8").unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn switching_days_uses_memo() {
        let f = fixture();

        f.session.activate(7).await.unwrap();
        f.session.activate(8).await.unwrap();
        f.session.activate(7).await.unwrap();
        sleep(Duration::from_secs(3)).await;

        // Day 7 came from the memo the second time; 8 was already memoized
        // when the lookahead from day 7 was scheduled again.
        assert_eq!(generated_days(&f.generator), vec![7, 8]);
        assert_eq!(f.session.active_day(), Some(7));
    }

    #[tokio::test(start_paused = true)]
    async fn new_day_stops_previous_prefetch() {
        let f = fixture();

        f.session.activate(7).await.unwrap();
        f.session.activate(30).await.unwrap();
        f.session.wait_for_prefetch().await.unwrap();

        let day7_texts = MockContentGenerator::default_payload(7)
            .into_topic(7)
            .speech_texts();
        assert!(day7_texts.iter().all(|t| !f.session.speech().is_cached(t)));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_load_starts_nothing() {
        let f = fixture();
        f.generator.push_response(Err(UpstreamError::Http {
            code: 400,
            status: Some("INVALID_ARGUMENT".into()),
            message: "bad request".into(),
        }));

        let err = f.session.activate(7).await.unwrap_err();
        assert!(matches!(err, LessonError::Upstream(_)));
        assert_eq!(f.session.active_day(), None);

        sleep(Duration::from_secs(5)).await;
        assert_eq!(f.generator.call_count(), 1);
        assert_eq!(f.synth.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn plain_lookup_starts_no_background_work() {
        let f = fixture();

        f.session.lesson(7).await.unwrap();
        f.session.lesson(7).await.unwrap();
        sleep(Duration::from_secs(5)).await;

        assert_eq!(generated_days(&f.generator), vec![7]);
        assert_eq!(f.session.active_day(), None);
        assert_eq!(f.synth.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn out_of_range_day_rejected() {
        let f = fixture();
        assert_eq!(
            f.session.activate(101).await.unwrap_err(),
            LessonError::DayOutOfRange { day: 101, max_day: 100 }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn speak_shares_cache_with_prefetch() {
        let f = fixture();

        let artifact = f.session.speak("你好").await.unwrap().unwrap();
        assert_eq!(artifact.voice, "Kore");
        f.session.speak("你好").await.unwrap();
        assert_eq!(f.synth.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn reset_cache_forces_regeneration() {
        let f = fixture();

        f.session.activate(7).await.unwrap();
        f.session.reset_cache().unwrap();
        assert!(!f.session.memoized(7));
        assert!(f.store.is_empty());
        assert!(f.session.speech().cache().is_empty());

        f.session.activate(7).await.unwrap();
        assert_eq!(generated_days(&f.generator), vec![7, 7]);
    }
}
