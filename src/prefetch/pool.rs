//! Background audio prefetch for the active lesson.
//!
//! A fixed number of workers drain one shared queue of texts, words first
//! and then example sentences. A failed text goes to the back of the queue
//! and the worker that failed it backs off before taking the next item.
//! Every pause races the pool's cancellation token, so superseding or
//! dropping the pool stops all workers promptly, even mid-backoff.
//!
//! The pool itself never gives up on a text. A caller that needs to finish
//! waits with [`PrefetchHandle::join_or_give_up`], which stops the pool once
//! every outstanding text has failed a given number of times.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::PrefetchConfig;
use crate::lesson::LessonTopic;
use crate::speech::SpeechService;
use crate::utils::preview;

/// Outcome counters for one pool run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrefetchReport {
    /// Texts synthesized by this pool.
    pub fetched: usize,
    /// Texts already in the audio cache when popped.
    pub skipped: usize,
    /// Failed attempts; each one requeued its text.
    pub failed: usize,
    /// Texts still queued when the pool stopped.
    pub remaining: usize,
    /// The queued texts themselves, in queue order.
    pub unfetched: Vec<String>,
    pub cancelled: bool,
}

#[derive(Default)]
struct PoolState {
    queue: Mutex<VecDeque<String>>,
    /// Failed attempts per text.
    failures: Mutex<HashMap<String, usize>>,
    /// Texts popped and not yet settled back into the queue or the cache.
    in_flight: AtomicUsize,
    /// Signalled after every settled text.
    progress: Notify,
    fetched: AtomicUsize,
    skipped: AtomicUsize,
    failed: AtomicUsize,
}

impl PoolState {
    fn queue(&self) -> MutexGuard<'_, VecDeque<String>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn failures(&self) -> MutexGuard<'_, HashMap<String, usize>> {
        self.failures.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Pop the next text and count it in flight under the same lock, so an
    /// observer never sees it in neither place.
    fn take_next(&self) -> Option<String> {
        let mut queue = self.queue();
        let text = queue.pop_front()?;
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        Some(text)
    }

    fn settle(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.progress.notify_waiters();
    }

    fn record_failure(&self, text: String) {
        *self.failures().entry(text.clone()).or_default() += 1;
        self.failed.fetch_add(1, Ordering::Relaxed);
        self.queue().push_back(text);
    }

    /// Nothing is in flight and every queued text has failed at least
    /// `max_failures` times.
    fn exhausted(&self, max_failures: usize) -> bool {
        let queue = self.queue();
        if queue.is_empty() || self.in_flight.load(Ordering::SeqCst) > 0 {
            return false;
        }
        let failures = self.failures();
        queue
            .iter()
            .all(|text| failures.get(text).is_some_and(|&n| n >= max_failures))
    }

    fn report(&self, cancelled: bool) -> PrefetchReport {
        let unfetched: Vec<String> = self.queue().iter().cloned().collect();
        PrefetchReport {
            fetched: self.fetched.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            remaining: unfetched.len(),
            unfetched,
            cancelled,
        }
    }
}

/// Starts prefetch runs.
pub struct PrefetchPool;

impl PrefetchPool {
    /// Prefetch every word, then every example sentence, of `lesson`.
    pub fn start(
        speech: Arc<SpeechService>,
        lesson: &LessonTopic,
        config: &PrefetchConfig,
    ) -> PrefetchHandle {
        Self::start_with_texts(speech, lesson.day, lesson.speech_texts(), config)
    }

    pub fn start_with_texts(
        speech: Arc<SpeechService>,
        day: u32,
        texts: Vec<String>,
        config: &PrefetchConfig,
    ) -> PrefetchHandle {
        let state = Arc::new(PoolState {
            queue: Mutex::new(texts.into()),
            ..Default::default()
        });
        let cancel = CancellationToken::new();
        let pauses = Pauses {
            success: config.success_pause,
            failure: config.failure_backoff,
        };

        let supervisor = tokio::spawn(supervise(
            speech,
            Arc::clone(&state),
            cancel.clone(),
            config.workers.max(1),
            config.startup_delay,
            pauses,
            day,
        ));

        PrefetchHandle {
            day,
            state,
            cancel,
            supervisor: Some(supervisor),
        }
    }
}

/// Owner of a running pool. Dropping it cancels the pool.
pub struct PrefetchHandle {
    day: u32,
    state: Arc<PoolState>,
    cancel: CancellationToken,
    supervisor: Option<JoinHandle<()>>,
}

impl PrefetchHandle {
    pub fn day(&self) -> u32 {
        self.day
    }

    /// Signal every worker to stop at its next suspension point.
    pub fn stop(&self) {
        if !self.cancel.is_cancelled() {
            debug!(day = self.day, "stopping audio prefetch");
            self.cancel.cancel();
        }
    }

    /// Texts still waiting in the queue.
    pub fn pending(&self) -> usize {
        self.state.queue().len()
    }

    /// Wait for the pool to drain or stop.
    pub async fn join(mut self) -> PrefetchReport {
        if let Some(supervisor) = self.supervisor.take() {
            self.await_supervisor(supervisor).await;
        }
        self.state.report(self.cancel.is_cancelled())
    }

    /// Like [`join`](Self::join), but stop the pool once nothing is in
    /// flight and every queued text has failed `max_failures` times. The
    /// texts given up on are left in [`PrefetchReport::unfetched`].
    pub async fn join_or_give_up(mut self, max_failures: usize) -> PrefetchReport {
        let Some(mut supervisor) = self.supervisor.take() else {
            return self.state.report(self.cancel.is_cancelled());
        };
        let max_failures = max_failures.max(1);

        loop {
            let progress = self.state.progress.notified();
            tokio::pin!(progress);
            progress.as_mut().enable();

            if self.state.exhausted(max_failures) {
                warn!(
                    day = self.day,
                    max_failures,
                    remaining = self.pending(),
                    "every remaining text keeps failing, giving up"
                );
                self.stop();
                break;
            }

            tokio::select! {
                result = &mut supervisor => {
                    if let Err(e) = result {
                        warn!(day = self.day, error = %e, "prefetch supervisor failed");
                    }
                    return self.state.report(self.cancel.is_cancelled());
                }
                _ = &mut progress => {}
            }
        }

        self.await_supervisor(supervisor).await;
        self.state.report(true)
    }

    async fn await_supervisor(&self, supervisor: JoinHandle<()>) {
        if let Err(e) = supervisor.await {
            warn!(day = self.day, error = %e, "prefetch supervisor failed");
        }
    }
}

impl Drop for PrefetchHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[derive(Clone, Copy)]
struct Pauses {
    success: Duration,
    failure: Duration,
}

async fn supervise(
    speech: Arc<SpeechService>,
    state: Arc<PoolState>,
    cancel: CancellationToken,
    workers: usize,
    startup_delay: Duration,
    pauses: Pauses,
    day: u32,
) {
    tokio::select! {
        _ = cancel.cancelled() => return,
        _ = sleep(startup_delay) => {}
    }

    info!(day, workers, queued = state.queue().len(), "audio prefetch started");

    let mut set = JoinSet::new();
    for id in 0..workers {
        set.spawn(run_worker(
            id,
            Arc::clone(&speech),
            Arc::clone(&state),
            cancel.clone(),
            pauses,
        ));
    }
    while let Some(result) = set.join_next().await {
        if let Err(e) = result {
            warn!(day, error = %e, "prefetch worker panicked");
        }
    }

    let report = state.report(cancel.is_cancelled());
    info!(
        day,
        fetched = report.fetched,
        skipped = report.skipped,
        failed = report.failed,
        remaining = report.remaining,
        cancelled = report.cancelled,
        "audio prefetch finished"
    );
}

async fn run_worker(
    id: usize,
    speech: Arc<SpeechService>,
    state: Arc<PoolState>,
    cancel: CancellationToken,
    pauses: Pauses,
) {
    while !cancel.is_cancelled() {
        let Some(text) = state.take_next() else {
            break;
        };

        if speech.is_cached(&text) {
            state.skipped.fetch_add(1, Ordering::Relaxed);
            state.settle();
            continue;
        }

        let result = tokio::select! {
            _ = cancel.cancelled() => None,
            result = speech.synthesize(&text) => Some(result),
        };
        let Some(result) = result else {
            // The request itself keeps running and still fills the cache.
            state.queue().push_front(text);
            state.settle();
            break;
        };

        let pause = match result {
            Ok(_) => {
                state.fetched.fetch_add(1, Ordering::Relaxed);
                pauses.success
            }
            Err(e) => {
                warn!(worker = id, text = %preview(&text, 24), error = %e, "prefetch failed, requeueing");
                state.record_failure(text);
                pauses.failure
            }
        };
        state.settle();

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = sleep(pause) => {}
        }
    }
    debug!(worker = id, "prefetch worker exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    use crate::config::{RetryConfig, SpeechConfig};
    use crate::error::UpstreamError;
    use crate::lesson::test_support::payload;
    use crate::provider::mock::MockSpeechSynthesizer;
    use crate::speech::rotator::prompt_text;

    fn speech(synth: Arc<MockSpeechSynthesizer>) -> Arc<SpeechService> {
        Arc::new(SpeechService::new(
            synth,
            &SpeechConfig::default(),
            &RetryConfig::default(),
        ))
    }

    fn rate_limited() -> UpstreamError {
        UpstreamError::Http {
            code: 429,
            status: Some("RESOURCE_EXHAUSTED".into()),
            message: "quota".into(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn full_lesson_is_cached() {
        let synth = Arc::new(MockSpeechSynthesizer::new());
        let speech = speech(synth.clone());
        let lesson = payload(1).into_topic(1);

        let handle = PrefetchPool::start(speech.clone(), &lesson, &PrefetchConfig::default());
        let report = handle.join().await;

        assert_eq!(report.fetched, 20);
        assert_eq!(report.failed, 0);
        assert_eq!(report.remaining, 0);
        assert!(!report.cancelled);
        assert_eq!(speech.cache().len(), 20);
        for text in lesson.speech_texts() {
            assert!(speech.is_cached(&text));
        }
        assert_eq!(synth.call_count(), 20);
    }

    #[tokio::test(start_paused = true)]
    async fn startup_is_delayed() {
        let synth = Arc::new(MockSpeechSynthesizer::new());
        let lesson = payload(1).into_topic(1);

        let _handle = PrefetchPool::start(speech(synth.clone()), &lesson, &PrefetchConfig::default());
        sleep(Duration::from_millis(900)).await;
        assert_eq!(synth.call_count(), 0);

        sleep(Duration::from_millis(200)).await;
        assert!(synth.call_count() > 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cached_texts_are_skipped() {
        let synth = Arc::new(MockSpeechSynthesizer::new());
        let speech = speech(synth.clone());
        speech.synthesize("w1_0").await.unwrap();
        speech.synthesize("s1_0。").await.unwrap();

        let lesson = payload(1).into_topic(1);
        let report = PrefetchPool::start(speech.clone(), &lesson, &PrefetchConfig::default())
            .join()
            .await;

        assert_eq!(report.skipped, 2);
        assert_eq!(report.fetched, 18);
        assert_eq!(synth.call_count(), 20);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_item_is_requeued_at_back() {
        let synth = Arc::new(MockSpeechSynthesizer::new());
        // Two attempts on the first voice, then rotation aborts.
        synth.fail_text("a。", 2, rate_limited());
        let speech = speech(synth.clone());
        let config = PrefetchConfig {
            workers: 1,
            ..Default::default()
        };

        let texts = vec!["a。".to_string(), "b。".to_string(), "c。".to_string()];
        let report = PrefetchPool::start_with_texts(speech.clone(), 1, texts, &config)
            .join()
            .await;

        let order: Vec<_> = synth.calls().into_iter().map(|c| c.text).collect();
        assert_eq!(order, vec!["a。", "a。", "b。", "c。", "a。"]);
        assert_eq!(report.failed, 1);
        assert_eq!(report.fetched, 3);
        assert!(speech.is_cached("a。"));
    }

    #[tokio::test(start_paused = true)]
    async fn item_failing_once_is_never_lost() {
        let synth = Arc::new(MockSpeechSynthesizer::new());
        synth.fail_text("s1_3。", 2, rate_limited());
        let speech = speech(synth.clone());
        let lesson = payload(1).into_topic(1);

        let report = PrefetchPool::start(speech.clone(), &lesson, &PrefetchConfig::default())
            .join()
            .await;

        assert_eq!(report.failed, 1);
        assert_eq!(report.remaining, 0);
        assert_eq!(speech.cache().len(), 20);
        assert!(speech.is_cached("s1_3。"));
    }

    #[tokio::test(start_paused = true)]
    async fn give_up_stops_when_only_failing_texts_remain() {
        let synth = Arc::new(MockSpeechSynthesizer::new());
        synth.fail_text(
            "坏句子。",
            usize::MAX,
            UpstreamError::NoAudio {
                voice: "Kore".into(),
            },
        );
        let speech = speech(synth.clone());

        let texts = vec!["坏句子。".to_string(), "好。".to_string()];
        let report =
            PrefetchPool::start_with_texts(speech.clone(), 1, texts, &PrefetchConfig::default())
                .join_or_give_up(2)
                .await;

        assert!(report.cancelled);
        assert_eq!(report.fetched, 1);
        assert_eq!(report.failed, 2);
        assert_eq!(report.unfetched, vec!["坏句子。".to_string()]);
        assert!(speech.is_cached("好。"));

        let calls = synth.call_count();
        sleep(Duration::from_secs(60)).await;
        assert_eq!(synth.call_count(), calls);
    }

    #[tokio::test(start_paused = true)]
    async fn give_up_waits_for_recoverable_texts() {
        let synth = Arc::new(MockSpeechSynthesizer::new());
        synth.fail_text("a。", 2, rate_limited());
        let speech = speech(synth.clone());

        let texts = vec!["a。".to_string(), "b。".to_string(), "c。".to_string()];
        let report =
            PrefetchPool::start_with_texts(speech.clone(), 1, texts, &PrefetchConfig::default())
                .join_or_give_up(2)
                .await;

        assert!(!report.cancelled);
        assert_eq!(report.failed, 1);
        assert_eq!(report.fetched, 3);
        assert!(report.unfetched.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_during_backoff_is_prompt() {
        let synth = Arc::new(MockSpeechSynthesizer::new());
        let lesson = payload(1).into_topic(1);
        for text in lesson.speech_texts() {
            synth.fail_text(&prompt_text(&text), usize::MAX, rate_limited());
        }
        let speech = speech(synth.clone());

        let handle = PrefetchPool::start(speech.clone(), &lesson, &PrefetchConfig::default());
        // Startup plus one failed round; every worker is now backing off.
        sleep(Duration::from_secs(3)).await;
        let calls_at_stop = synth.call_count();
        assert!(calls_at_stop > 0);

        let stopped_at = Instant::now();
        handle.stop();
        let report = handle.join().await;

        assert!(stopped_at.elapsed() < Duration::from_secs(1));
        assert!(report.cancelled);
        assert_eq!(report.remaining, 20);
        assert_eq!(report.fetched, 0);

        sleep(Duration::from_secs(30)).await;
        assert_eq!(synth.call_count(), calls_at_stop);
        assert!(speech.cache().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_handle_cancels_pool() {
        let synth = Arc::new(MockSpeechSynthesizer::new());
        let lesson = payload(1).into_topic(1);

        let handle = PrefetchPool::start(speech(synth.clone()), &lesson, &PrefetchConfig::default());
        assert_eq!(handle.pending(), 20);
        drop(handle);

        sleep(Duration::from_secs(30)).await;
        assert_eq!(synth.call_count(), 0);
    }
}
