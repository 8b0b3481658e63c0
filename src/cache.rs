#![forbid(unsafe_code)]

//! Short-lived cache for resolved streams.
//!
//! Direct audio URLs expire upstream after a few minutes, so entries carry a
//! five minute TTL and are revalidated lazily on lookup. The cache also
//! deduplicates concurrent resolutions for the same ID: the second caller
//! waits on a per-key gate and reuses the first caller's result instead of
//! spawning another extraction.

use std::{
    collections::HashMap,
    future::Future,
    sync::Arc,
    time::{Duration, Instant},
};

use parking_lot::RwLock;
use tokio::sync::Mutex as AsyncMutex;

use crate::resolver::{ExtractError, ResolvedStream};

pub const RESOLUTION_TTL: Duration = Duration::from_secs(5 * 60);
pub const MAX_ENTRIES: usize = 1024;

/// Time source, swapped for a manual clock in tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

struct CacheEntry {
    stream: ResolvedStream,
    expires_at: Instant,
}

pub struct ResolutionCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    in_flight: AsyncMutex<HashMap<String, Arc<AsyncMutex<()>>>>,
    ttl: Duration,
    max_entries: usize,
    clock: Arc<dyn Clock>,
}

impl ResolutionCache {
    pub fn new() -> Self {
        Self::with_clock(RESOLUTION_TTL, MAX_ENTRIES, Arc::new(SystemClock))
    }

    pub fn with_clock(ttl: Duration, max_entries: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            in_flight: AsyncMutex::new(HashMap::new()),
            ttl,
            max_entries,
            clock,
        }
    }

    /// Returns the cached stream while it is still fresh. Expired entries act
    /// as a miss and stay in place until the next insert sweeps them.
    pub fn get(&self, video_id: &str) -> Option<ResolvedStream> {
        let now = self.clock.now();
        let entries = self.entries.read();
        entries
            .get(video_id)
            .filter(|entry| now < entry.expires_at)
            .map(|entry| entry.stream.clone())
    }

    /// Stores a stream with a fresh expiry, overwriting any prior entry. When
    /// the map is full, expired entries are dropped first and then whichever
    /// live entries expire soonest.
    pub fn insert(&self, video_id: &str, stream: ResolvedStream) {
        let now = self.clock.now();
        let mut entries = self.entries.write();
        if entries.len() >= self.max_entries && !entries.contains_key(video_id) {
            entries.retain(|_, entry| entry.expires_at > now);
            while entries.len() >= self.max_entries {
                let victim = entries
                    .iter()
                    .min_by_key(|(_, entry)| entry.expires_at)
                    .map(|(key, _)| key.clone());
                match victim {
                    Some(key) => {
                        entries.remove(&key);
                    }
                    None => break,
                }
            }
        }
        entries.insert(
            video_id.to_string(),
            CacheEntry {
                stream,
                expires_at: now + self.ttl,
            },
        );
    }

    /// Cache-or-resolve with per-key single-flight. Failed resolutions are
    /// never cached, so the next request retries from scratch.
    pub async fn get_or_resolve<F, Fut>(
        &self,
        video_id: &str,
        resolve: F,
    ) -> Result<ResolvedStream, ExtractError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<ResolvedStream, ExtractError>>,
    {
        if let Some(hit) = self.get(video_id) {
            return Ok(hit);
        }

        let gate = {
            let mut in_flight = self.in_flight.lock().await;
            in_flight
                .entry(video_id.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };

        let result = {
            let _guard = gate.lock().await;
            // A concurrent holder may have populated the entry while we
            // waited on the gate.
            if let Some(hit) = self.get(video_id) {
                Ok(hit)
            } else {
                let result = resolve().await;
                if let Ok(stream) = &result {
                    self.insert(video_id, stream.clone());
                }
                result
            }
        };

        let mut in_flight = self.in_flight.lock().await;
        if let Some(entry) = in_flight.get(video_id)
            && Arc::strong_count(entry) <= 2
        {
            // Only the map and our local clone still reference the gate.
            in_flight.remove(video_id);
        }

        result
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.read().len()
    }
}
