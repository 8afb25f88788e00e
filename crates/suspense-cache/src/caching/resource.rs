use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::pin::Pin;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::task::{Context, Poll};
use std::time::Instant;

use futures::channel::oneshot;
use futures::future::{FutureExt, Shared};
use sentry::{Hub, SentryFutureExt};

use super::{CacheContents, CacheError};
use crate::suspense::Interrupt;
use crate::utils::futures::CallOnDrop;

/// The terminal outcome of a production.
///
/// Both sides are wrapped in [`Arc`]s, so every reader observes the very same value or error.
pub type ProductionResult<V> = Result<Arc<V>, Arc<CacheError>>;

// The channel carries no data. The outcome is stored in the entry before the sender goes away, so
// a resolved channel always means the outcome can be read synchronously.
type CompletionChannel = Shared<oneshot::Receiver<()>>;

type EntryMap<K, V> = Arc<Mutex<HashMap<K, Arc<CacheEntry<V>>>>>;

/// The lifecycle state of a [`CacheEntry`].
///
/// An entry starts out as `Pending` and transitions exactly once into one of the terminal states.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryState {
    /// The production is still running.
    Pending,
    /// The production finished with a value.
    Resolved,
    /// The production failed, the error is retained.
    Rejected,
}

/// The per-key record of a production and its outcome.
pub struct CacheEntry<V> {
    outcome: OnceLock<ProductionResult<V>>,
    completion: CompletionChannel,
    created: Instant,
}

impl<V> CacheEntry<V> {
    fn new() -> (Self, oneshot::Sender<()>) {
        let (sender, receiver) = oneshot::channel();
        let entry = CacheEntry {
            outcome: OnceLock::new(),
            completion: receiver.shared(),
            created: Instant::now(),
        };
        (entry, sender)
    }

    /// Returns the current lifecycle state of this entry.
    pub fn state(&self) -> EntryState {
        match self.outcome.get() {
            None => EntryState::Pending,
            Some(Ok(_)) => EntryState::Resolved,
            Some(Err(_)) => EntryState::Rejected,
        }
    }

    /// Stores the terminal outcome.
    ///
    /// Returns `false` if the entry was already completed, in which case the outcome is discarded.
    fn complete(&self, outcome: ProductionResult<V>) -> bool {
        self.outcome.set(outcome).is_ok()
    }
}

impl<V> fmt::Debug for CacheEntry<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheEntry")
            .field("state", &self.state())
            .field("age", &self.created.elapsed())
            .finish()
    }
}

/// A store of memoized asynchronous productions.
///
/// Calling [`prefetch`](Self::prefetch) eagerly spawns the production of a value onto the
/// runtime, and hands out a [`ResourceHandle`] which can be [`read`](ResourceHandle::read)
/// synchronously at any time.
///
/// Productions are deduplicated by key: a producer is invoked at most once per distinct key over
/// the whole lifetime of the cache, and its outcome, be it a value or an error, is retained.
/// Nothing is ever evicted. Dropping the last clone of the cache releases all entries, while
/// handles that are still alive keep their own entry.
pub struct ResourceCache<K, V> {
    /// The name of the cache, used to tag metrics and logs.
    name: Arc<str>,

    /// All entries, pending or completed.
    entries: EntryMap<K, V>,

    /// The runtime productions are spawned on.
    runtime: tokio::runtime::Handle,
}

impl<K, V> Clone for ResourceCache<K, V> {
    fn clone(&self) -> Self {
        // https://github.com/rust-lang/rust/issues/26925
        ResourceCache {
            name: Arc::clone(&self.name),
            entries: Arc::clone(&self.entries),
            runtime: self.runtime.clone(),
        }
    }
}

impl<K, V> fmt::Debug for ResourceCache<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries = self
            .entries
            .try_lock()
            .map(|entries| entries.len())
            .unwrap_or_default();
        f.debug_struct("ResourceCache")
            .field("name", &self.name)
            .field("entries", &entries)
            .finish()
    }
}

impl<K, V> ResourceCache<K, V>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// Creates an empty cache which spawns its productions on the given `runtime`.
    pub fn new(name: impl Into<Arc<str>>, runtime: tokio::runtime::Handle) -> Self {
        ResourceCache {
            name: name.into(),
            entries: Default::default(),
            runtime,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The number of entries, pending or completed.
    pub fn len(&self) -> usize {
        self.lock_entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns a handle to the entry for `key`, or starts producing it.
    ///
    /// If there is no entry for `key` yet, `producer(key)` is invoked and the returned future is
    /// spawned onto the runtime right away, even if the handle is never read. Otherwise the
    /// existing entry is returned and `producer` is dropped without being called.
    ///
    /// This never blocks on the production itself.
    pub fn prefetch<F, Fut>(&self, producer: F, key: K) -> ResourceHandle<K, V>
    where
        F: FnOnce(K) -> Fut,
        Fut: Future<Output = CacheContents<V>> + Send + 'static,
    {
        let name = self.name();
        metric!(counter("caches.access") += 1, "cache" => name);

        let (entry, sender) = {
            let mut entries = self.lock_entries();
            match entries.entry(key.clone()) {
                Entry::Occupied(occupied) => {
                    metric!(counter("caches.memory.hit") += 1, "cache" => name);
                    let entry = Arc::clone(occupied.get());
                    return ResourceHandle { key, entry };
                }
                Entry::Vacant(vacant) => {
                    let (entry, sender) = CacheEntry::new();
                    let entry = Arc::new(entry);
                    vacant.insert(Arc::clone(&entry));
                    metric!(gauge("caches.entries") = entries.len() as u64, "cache" => name);
                    (entry, sender)
                }
            }
        };

        metric!(counter("caches.computation") += 1, "cache" => name);

        // The token is armed before the producer is called, so a panicking producer still
        // completes its entry instead of leaving it pending forever.
        let done_token = {
            let entry = Arc::clone(&entry);
            let name = Arc::clone(&self.name);
            let key = key.clone();
            CallOnDrop::new(move || {
                if entry.complete(Err(Arc::new(CacheError::InternalError))) {
                    tracing::error!(cache = %name, key = ?key, "Production aborted before completion");
                    metric!(counter("caches.production") += 1, "cache" => &name, "status" => "aborted");
                }
                sender.send(()).ok();
            })
        };

        let production = producer(key.clone());
        self.spawn_production(key.clone(), Arc::clone(&entry), production, done_token);

        ResourceHandle { key, entry }
    }

    /// Returns a handle to an existing entry.
    ///
    /// This never starts a production.
    pub fn get(&self, key: &K) -> Option<ResourceHandle<K, V>> {
        let entries = self.lock_entries();
        entries.get(key).map(|entry| ResourceHandle {
            key: key.clone(),
            entry: Arc::clone(entry),
        })
    }

    /// Spawns the production as a separate task.
    ///
    /// The `done_token` is moved into the task and signals completion to all waiting readers
    /// once the outcome has been stored.
    fn spawn_production<Fut>(
        &self,
        key: K,
        entry: Arc<CacheEntry<V>>,
        production: Fut,
        done_token: CallOnDrop,
    ) where
        Fut: Future<Output = CacheContents<V>> + Send + 'static,
    {
        let name = Arc::clone(&self.name);

        tracing::trace!(cache = %name, key = ?key, "Spawning production");

        let task = async move {
            let _done_token = done_token; // move into the future

            let outcome = match production.await {
                Ok(value) => Ok(Arc::new(value)),
                Err(err) => Err(Arc::new(err)),
            };

            let status = match &outcome {
                Ok(_) => "resolved",
                Err(err) => err.metrics_tag(),
            };
            metric!(
                timer("caches.production.duration") = entry.created.elapsed(),
                "cache" => &name,
                "status" => status,
            );
            metric!(counter("caches.production") += 1, "cache" => &name, "status" => status);

            match &outcome {
                Ok(_) => tracing::trace!(cache = %name, key = ?key, "Production resolved"),
                Err(err) => tracing::debug!(
                    cache = %name,
                    key = ?key,
                    error = err.as_ref() as &dyn std::error::Error,
                    "Production rejected",
                ),
            }

            entry.complete(outcome);
        };

        self.runtime
            .spawn(task.bind_hub(Hub::new_from_top(Hub::current())));
    }

    fn lock_entries(&self) -> std::sync::MutexGuard<'_, HashMap<K, Arc<CacheEntry<V>>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A handle to a single entry of a [`ResourceCache`].
pub struct ResourceHandle<K, V> {
    key: K,
    entry: Arc<CacheEntry<V>>,
}

impl<K: Clone, V> Clone for ResourceHandle<K, V> {
    fn clone(&self) -> Self {
        ResourceHandle {
            key: self.key.clone(),
            entry: Arc::clone(&self.entry),
        }
    }
}

impl<K: fmt::Debug, V> fmt::Debug for ResourceHandle<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceHandle")
            .field("key", &self.key)
            .field("entry", &self.entry)
            .finish()
    }
}

impl<K, V> ResourceHandle<K, V> {
    /// The key this handle is bound to.
    pub fn key(&self) -> &K {
        &self.key
    }

    pub fn state(&self) -> EntryState {
        self.entry.state()
    }

    /// Reads the entry without blocking.
    ///
    /// - A resolved entry returns its value.
    /// - A pending entry returns a [`Suspension`], which the caller is expected to await before
    ///   reading again.
    /// - A rejected entry returns the stored error, the same one on every call.
    pub fn read(&self) -> ReadResult<V> {
        match self.entry.outcome.get() {
            Some(Ok(value)) => ReadResult::Ready(Arc::clone(value)),
            Some(Err(err)) => ReadResult::Failed(Arc::clone(err)),
            None => ReadResult::Suspended(Suspension {
                completion: self.entry.completion.clone(),
            }),
        }
    }

    /// Waits for the production to finish and returns its outcome.
    pub async fn get(&self) -> ProductionResult<V> {
        loop {
            match self.read() {
                ReadResult::Ready(value) => return Ok(value),
                ReadResult::Failed(err) => return Err(err),
                ReadResult::Suspended(suspension) => suspension.await,
            }
        }
    }
}

/// The outcome of a single [`ResourceHandle::read`].
#[derive(Debug)]
pub enum ReadResult<V> {
    /// The value is available.
    Ready(Arc<V>),
    /// The value is still being produced.
    Suspended(Suspension),
    /// The production failed.
    Failed(Arc<CacheError>),
}

impl<V> ReadResult<V> {
    /// Converts into a [`Result`], so that suspensions and failures can be propagated with `?`.
    pub fn into_result(self) -> Result<Arc<V>, Interrupt> {
        match self {
            ReadResult::Ready(value) => Ok(value),
            ReadResult::Suspended(suspension) => Err(Interrupt::Suspended(suspension)),
            ReadResult::Failed(err) => Err(Interrupt::Failed(err)),
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, ReadResult::Ready(_))
    }

    pub fn is_suspended(&self) -> bool {
        matches!(self, ReadResult::Suspended(_))
    }
}

/// Resolves once the production of a pending entry has finished.
///
/// The production may have succeeded, failed, or been aborted. In every case the entry can be
/// read synchronously afterwards.
#[must_use = "suspensions do nothing unless awaited"]
#[derive(Clone)]
pub struct Suspension {
    completion: CompletionChannel,
}

impl Future for Suspension {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        // A cancelled channel means the sender was dropped, which also happens after completion.
        self.completion.poll_unpin(cx).map(|_| ())
    }
}

impl fmt::Debug for Suspension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Suspension")
            .field("completed", &self.completion.peek().is_some())
            .finish()
    }
}
