//! # Resource caching
//!
//! This module contains the [`ResourceCache`], which memoizes asynchronous productions by key,
//! and our central [`CacheError`] type.
//!
//! ## Productions
//!
//! A production is started by [`ResourceCache::prefetch`], which takes a *producer* and a key.
//! The producer is a function from the key to a future resolving to a [`CacheContents`]. It is
//! called at most once per distinct key over the whole lifetime of the cache, and the future it
//! returns is spawned onto the runtime immediately, so the value is being fetched even before
//! anybody asks for it.
//!
//! Concurrent and later calls for the same key get a [`ResourceHandle`] to the very same
//! [`CacheEntry`], and the producer they pass in is dropped without being called.
//!
//! ## Entries
//!
//! Each [`CacheEntry`] goes through the following states, see [`EntryState`]:
//!
//! - `Pending` while the production is running.
//! - `Resolved` once the production finished with a value.
//! - `Rejected` once the production failed.
//!
//! The two terminal states are final. Entries are never reset, refreshed, or evicted, and there is
//! no way to cancel a running production.
//!
//! ## Reading
//!
//! [`ResourceHandle::read`] never blocks, and never takes the cache lock. It returns a
//! [`ReadResult`]:
//!
//! - [`ReadResult::Ready`] with the value of a resolved entry.
//! - [`ReadResult::Failed`] with the error of a rejected entry. This is the same
//!   [`Arc`](std::sync::Arc) every time, a failed production is never retried.
//! - [`ReadResult::Suspended`] for a pending entry. The contained [`Suspension`] is a future
//!   that resolves once the production finishes, after which the entry can be read again.
//!
//! The [`suspense`](crate::suspense) module implements the retry loop on top of that.
//!
//! ## [`CacheError`]
//!
//! [`CacheError`] describes why a production failed. Producers return it directly as part of their
//! [`CacheContents`]. The most important variants are [`CacheError::NotFound`] and
//! [`CacheError::DownloadError`], which is used for all kinds of network failures.
//!
//! [`CacheError::InternalError`] is a catch-all for unexpected errors. The cache itself records it
//! when a production panics, or when the runtime is shut down before the production finished, so
//! that no entry stays pending forever.
//!
//! ## Metrics
//!
//! We collect a couple of metrics, each of those is tagged with a `cache` field that corresponds to
//! the name of the cache:
//!
//! - `caches.access`: All calls to `prefetch`.
//! - `caches.memory.hit`: Calls served by an existing entry.
//! - `caches.computation`: Actual productions being started.
//! - `caches.entries`: The number of entries, reported whenever one is added.
//! - `caches.production`: Finished productions, tagged by `status`.
//! - `caches.production.duration`: Time from starting a production until it finished.

mod cache_error;
mod resource;
#[cfg(test)]
mod tests;

pub use cache_error::{CacheContents, CacheError};
pub use resource::{
    CacheEntry, EntryState, ProductionResult, ReadResult, ResourceCache, ResourceHandle,
    Suspension,
};
