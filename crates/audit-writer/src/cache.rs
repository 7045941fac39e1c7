//! Idle-evicted cache of open handles, keyed by destination path.

use crate::error::{Error, Result};
use crate::opener::{AppendHandle, AppendOpener};
use crate::stats::WriterStats;
use crate::worker::panic_message;

use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Position of an entry in the expiry index. The sequence number keeps keys unique
/// when two writes land on the same instant.
type ExpiryKey = (Instant, u64);

struct CacheEntry<H> {
    handle: H,
    expiry_key: ExpiryKey,
}

/// Cache of open handles that closes any handle not written to for `idle_timeout`.
///
/// Owned by the worker task. Nothing else touches it, so it needs no locking.
pub struct HandleCache<O: AppendOpener> {
    opener: Arc<O>,
    idle_timeout: Duration,
    stats: Arc<WriterStats>,
    entries: HashMap<String, CacheEntry<O::Handle>>,
    expiry: BTreeMap<ExpiryKey, String>,
    next_seq: u64,
}

impl<O: AppendOpener> HandleCache<O> {
    /// Creates an empty cache.
    pub fn new(opener: Arc<O>, idle_timeout: Duration, stats: Arc<WriterStats>) -> Self {
        Self {
            opener,
            idle_timeout,
            stats,
            entries: HashMap::new(),
            expiry: BTreeMap::new(),
            next_seq: 0,
        }
    }

    /// Number of cached handles.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no handles are cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether a handle for `path` is cached.
    #[must_use]
    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    /// Get the handle for `path`, opening it on a miss, and mark it as written now.
    ///
    /// A cached handle that has already been idle for the full timeout is released
    /// first and reopened, the same as if a sweep had run.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Open`] if the opener fails. Nothing is cached in that case, so
    /// the next call retries the open.
    pub async fn get(&mut self, path: &str) -> Result<&mut O::Handle> {
        if self.is_expired(path, Instant::now()) {
            debug!(path, "cached handle expired before reuse");
            self.release(path).await;
        }

        let seq = self.next_seq;
        self.next_seq += 1;

        let entry = match self.entries.entry(path.to_string()) {
            Entry::Occupied(occupied) => {
                let entry = occupied.into_mut();
                self.expiry.remove(&entry.expiry_key);
                entry.expiry_key = (Instant::now(), seq);
                entry
            }
            Entry::Vacant(vacant) => {
                info!(path, "opening handle");

                let handle = self
                    .opener
                    .open_for_append(path)
                    .await
                    .map_err(|source| {
                        WriterStats::incr(&self.stats.open_failures);
                        Error::Open {
                            path: path.to_string(),
                            source,
                        }
                    })?;
                WriterStats::incr(&self.stats.opened);

                vacant.insert(CacheEntry {
                    handle,
                    expiry_key: (Instant::now(), seq),
                })
            }
        };

        self.expiry.insert(entry.expiry_key, path.to_string());

        Ok(&mut entry.handle)
    }

    /// Evict and close every handle idle for at least the timeout.
    ///
    /// Close failures are logged and counted; the sweep itself never fails.
    pub async fn maintenance(&mut self) -> usize {
        let now = Instant::now();
        let mut expired = Vec::new();

        while let Some(oldest) = self.expiry.first_entry() {
            let (last_write, _) = *oldest.key();
            if now.duration_since(last_write) < self.idle_timeout {
                break;
            }
            expired.push(oldest.remove());
        }

        for path in &expired {
            if let Some(entry) = self.entries.remove(path) {
                Self::close_handle(&self.stats, path, entry.handle).await;
            }
        }

        debug!(
            evicted = expired.len(),
            remaining = self.entries.len(),
            "cache maintenance complete"
        );

        expired.len()
    }

    /// Close every cached handle regardless of age.
    pub async fn close_all(&mut self) -> usize {
        self.expiry.clear();

        let entries: Vec<_> = self.entries.drain().collect();
        let count = entries.len();

        for (path, entry) in entries {
            Self::close_handle(&self.stats, &path, entry.handle).await;
        }

        count
    }

    fn is_expired(&self, path: &str, now: Instant) -> bool {
        self.entries.get(path).is_some_and(|entry| {
            let (last_write, _) = entry.expiry_key;
            now.duration_since(last_write) >= self.idle_timeout
        })
    }

    async fn release(&mut self, path: &str) {
        if let Some(entry) = self.entries.remove(path) {
            self.expiry.remove(&entry.expiry_key);
            Self::close_handle(&self.stats, path, entry.handle).await;
        }
    }

    /// Release step. Runs on the worker and never fails or unwinds: a panicking
    /// handle is reported the same way as a failed close.
    async fn close_handle(stats: &WriterStats, path: &str, handle: O::Handle) {
        info!(path, "closing handle");
        WriterStats::incr(&stats.evicted);

        match AssertUnwindSafe(handle.close()).catch_unwind().await {
            Ok(Ok(())) => {}
            Ok(Err(source)) => {
                WriterStats::incr(&stats.close_failures);
                let error = Error::Close {
                    path: path.to_string(),
                    source,
                };
                warn!(%error, "failed to release handle");
            }
            Err(panic) => {
                WriterStats::incr(&stats.unknown_failures);
                let error = Error::Unknown(panic_message(panic.as_ref()));
                error!(%error, path, "panic while releasing handle");
            }
        }
    }
}
