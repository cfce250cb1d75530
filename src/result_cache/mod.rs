//! Fingerprint-addressed cache of parse results
//!
//! Entries expire lazily: an expired entry behaves as absent and is removed
//! by the lookup that finds it. A periodic sweep and an optional
//! capacity-bounded LRU keep memory bounded. The cache is advisory; a miss
//! always falls through to a real parse.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use log::{debug, info};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::CacheConfig;
use crate::page_extractor::schema::ParseResult;
use crate::utils::timestamp_utils::instant_to_nanos;
use crate::utils::url_utils::Fingerprint;

struct CacheEntry {
    result: Arc<ParseResult>,
    cached_at: DateTime<Utc>,
    expires_at: Instant,
    /// Lock-free LRU timestamp, nanoseconds since the process epoch
    last_accessed: AtomicU64,
}

impl CacheEntry {
    fn touch(&self) {
        self.last_accessed
            .store(instant_to_nanos(std::time::Instant::now()), Ordering::Relaxed);
    }
}

/// Counters describing cache effectiveness
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub expired: u64,
    pub evictions: u64,
}

pub struct ResultCache {
    entries: DashMap<Fingerprint, CacheEntry>,
    default_ttl: Duration,
    max_entries: Option<usize>,
    hits: AtomicU64,
    misses: AtomicU64,
    expired: AtomicU64,
    evictions: AtomicU64,
}

impl ResultCache {
    #[must_use]
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            entries: DashMap::new(),
            default_ttl: config.ttl(),
            max_entries: config.max_entries,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            expired: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub const fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Look up a live entry
    ///
    /// Expired entries are removed here and reported as absent.
    #[must_use]
    pub fn get(&self, fingerprint: &Fingerprint) -> Option<Arc<ParseResult>> {
        let now = Instant::now();
        match self.entries.get(fingerprint) {
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
            Some(entry) if entry.expires_at > now => {
                entry.touch();
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Some(Arc::clone(&entry.result));
            }
            Some(_) => {}
        }

        // Another writer may have refreshed the entry since the read above
        if self
            .entries
            .remove_if(fingerprint, |_, entry| entry.expires_at <= now)
            .is_some()
        {
            self.expired.fetch_add(1, Ordering::Relaxed);
            debug!("Purged expired cache entry {fingerprint}");
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// When the live entry for `fingerprint` was written
    #[must_use]
    pub fn cached_at(&self, fingerprint: &Fingerprint) -> Option<DateTime<Utc>> {
        self.entries
            .get(fingerprint)
            .filter(|entry| entry.expires_at > Instant::now())
            .map(|entry| entry.cached_at)
    }

    /// Store or overwrite the entry for `fingerprint`
    pub fn put(&self, fingerprint: Fingerprint, result: Arc<ParseResult>, ttl: Duration) {
        let entry = CacheEntry {
            result,
            cached_at: Utc::now(),
            expires_at: Instant::now() + ttl,
            last_accessed: AtomicU64::new(instant_to_nanos(std::time::Instant::now())),
        };
        let replaced = self.entries.insert(fingerprint.clone(), entry).is_some();
        debug!("Cached result {fingerprint} for {ttl:?} (overwrite: {replaced})");

        if let Some(max) = self.max_entries {
            while self.entries.len() > max {
                if !self.evict_lru(&fingerprint) {
                    break;
                }
            }
        }
    }

    /// Remove the entry for `fingerprint`, returning whether one existed
    pub fn invalidate(&self, fingerprint: &Fingerprint) -> bool {
        let removed = self.entries.remove(fingerprint).is_some();
        if removed {
            debug!("Invalidated cache entry {fingerprint}");
        }
        removed
    }

    /// Remove every expired entry, returning how many were dropped
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            self.expired.fetch_add(removed as u64, Ordering::Relaxed);
            info!("Cache sweep removed {removed} expired entries");
        }
        removed
    }

    /// Spawn the periodic expired-entry sweep
    pub fn start_cleanup_task(self: Arc<Self>, period: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                self.purge_expired();
            }
        })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            expired: self.expired.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }

    /// Evict the least recently read entry other than `keep`
    fn evict_lru(&self, keep: &Fingerprint) -> bool {
        let oldest = self
            .entries
            .iter()
            .filter(|entry| entry.key() != keep)
            .min_by_key(|entry| entry.value().last_accessed.load(Ordering::Relaxed))
            .map(|entry| entry.key().clone());

        match oldest {
            Some(key) => {
                self.entries.remove(&key);
                self.evictions.fetch_add(1, Ordering::Relaxed);
                debug!(
                    "Evicted LRU cache entry {key} (limit: {})",
                    self.max_entries.unwrap_or_default()
                );
                true
            }
            None => false,
        }
    }
}
