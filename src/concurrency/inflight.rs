//! At most one in-flight upstream call per key.
//!
//! Callers asking for a key that is already being fetched share the same
//! pending result instead of issuing a second call. The work for a key runs
//! in its own task, so a caller that gives up does not abort it, and the
//! key is deregistered before the result becomes visible to any waiter.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::task::JoinError;
use tracing::debug;

/// A pending result that any number of callers can await.
type SharedFlight<V, E> = Shared<BoxFuture<'static, Result<V, E>>>;

type PendingMap<V, E> = Arc<Mutex<HashMap<String, SharedFlight<V, E>>>>;

/// How a request was satisfied by [`InFlight::join_or_start`].
pub enum Flight<V, E> {
    /// The readiness check produced a value; nothing was registered.
    Ready(V),
    /// Another caller's request for the same key was already pending.
    Joined(SharedFlight<V, E>),
    /// A new request was registered and spawned.
    Started(SharedFlight<V, E>),
}

impl<V, E> Flight<V, E>
where
    V: Clone,
    E: Clone,
{
    pub async fn wait(self) -> Result<V, E> {
        match self {
            Self::Ready(value) => Ok(value),
            Self::Joined(shared) | Self::Started(shared) => shared.await,
        }
    }

    pub fn is_started(&self) -> bool {
        matches!(self, Self::Started(_))
    }
}

/// Keyed registry of pending requests.
pub struct InFlight<V, E> {
    pending: PendingMap<V, E>,
}

impl<V, E> InFlight<V, E>
where
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + From<JoinError> + 'static,
{
    pub fn new() -> Self {
        Self {
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Join the pending request for `key`, or start one with `start`.
    ///
    /// `ready` runs under the registry lock before anything is registered,
    /// so a value published by a request that settled a moment ago is seen
    /// here instead of triggering a second call.
    pub fn join_or_start<R, S, Fut>(&self, key: &str, ready: R, start: S) -> Flight<V, E>
    where
        R: FnOnce() -> Option<V>,
        S: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        let mut pending = lock(&self.pending);

        if let Some(existing) = pending.get(key) {
            debug!(key, "joining in-flight request");
            return Flight::Joined(existing.clone());
        }

        if let Some(value) = ready() {
            return Flight::Ready(value);
        }

        let work = start();
        let deregister = Deregister {
            pending: Arc::clone(&self.pending),
            key: key.to_string(),
        };
        let handle = tokio::spawn(async move {
            let _deregister = deregister;
            work.await
        });

        let shared = async move {
            match handle.await {
                Ok(result) => result,
                Err(e) => Err(E::from(e)),
            }
        }
        .boxed()
        .shared();

        pending.insert(key.to_string(), shared.clone());
        Flight::Started(shared)
    }

    pub fn contains(&self, key: &str) -> bool {
        lock(&self.pending).contains_key(key)
    }

    pub fn len(&self) -> usize {
        lock(&self.pending).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<V, E> Default for InFlight<V, E>
where
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + From<JoinError> + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Removes the key when the spawned request finishes, panics included.
struct Deregister<V, E> {
    pending: PendingMap<V, E>,
    key: String,
}

impl<V, E> Drop for Deregister<V, E> {
    fn drop(&mut self) {
        lock(&self.pending).remove(&self.key);
    }
}
