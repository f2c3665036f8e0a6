//! Debounced warm-up of the next day's lesson.
//!
//! After a day loads, the following day is resolved silently once the
//! active day has stayed put for the debounce interval. Any new schedule
//! or an explicit cancel supersedes the pending one; a result that lands
//! after being superseded is dropped. Failures never leave this module.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::lesson::{LessonMemo, LessonResolver};

pub struct LookaheadScheduler {
    resolver: Arc<LessonResolver>,
    memo: Arc<LessonMemo>,
    debounce: Duration,
    pending: Mutex<Option<CancellationToken>>,
}

impl LookaheadScheduler {
    pub fn new(resolver: Arc<LessonResolver>, memo: Arc<LessonMemo>, debounce: Duration) -> Self {
        Self {
            resolver,
            memo,
            debounce,
            pending: Mutex::new(None),
        }
    }

    /// Schedule resolution of `day + 1`, replacing any pending schedule.
    ///
    /// Returns `false` when there is nothing to warm: the next day is past
    /// the end of the course or is already available locally.
    pub fn schedule_after(&self, day: u32) -> bool {
        let mut pending = self.pending();
        if let Some(previous) = pending.take() {
            previous.cancel();
        }

        let next = day.saturating_add(1);
        if next > self.resolver.max_day() {
            return false;
        }
        if self.memo.contains_key(&next) || self.resolver.is_cached(next) {
            debug!(day = next, "next lesson already available");
            return false;
        }

        let token = CancellationToken::new();
        *pending = Some(token.clone());
        drop(pending);

        let resolver = Arc::clone(&self.resolver);
        let memo = Arc::clone(&self.memo);
        let debounce = self.debounce;
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = sleep(debounce) => {}
            }

            debug!(day = next, "warming next lesson");
            let result = resolver.resolve(next).await;
            if token.is_cancelled() {
                debug!(day = next, "lookahead superseded, result dropped");
                return;
            }

            match result {
                Ok(lesson) => {
                    info!(day = next, "next lesson ready");
                    memo.insert(next, Arc::new(lesson));
                }
                Err(e) => warn!(day = next, error = %e, "lookahead failed"),
            }
        });
        true
    }

    /// Drop the pending schedule, if any.
    pub fn cancel(&self) {
        if let Some(token) = self.pending().take() {
            token.cancel();
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending()
            .as_ref()
            .is_some_and(|token| !token.is_cancelled())
    }

    fn pending(&self) -> MutexGuard<'_, Option<CancellationToken>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for LookaheadScheduler {
    fn drop(&mut self) {
        self.cancel();
    }
}
