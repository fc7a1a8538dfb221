//! Short-TTL quote cache.
//!
//! Maps symbol to the most recent normalized quote to avoid redundant
//! upstream calls. Expiry is evaluated lazily at read time; an optional
//! sweep bounds memory for symbols that are looked up once and never
//! again. The cache is in-memory and resets on application restart.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use log::{debug, warn};

use crate::models::Quote;

/// Default time a cached quote stays servable.
const DEFAULT_TTL: Duration = Duration::from_secs(60);

/// A cached quote plus its insertion time.
#[derive(Debug)]
struct CacheEntry {
    quote: Quote,
    inserted_at: Instant,
}

impl CacheEntry {
    fn is_valid(&self, ttl: Duration) -> bool {
        self.inserted_at.elapsed() < ttl
    }
}

/// TTL-based quote cache keyed by canonical symbol.
///
/// Thread-safe; both the REST path and streaming reader tasks write to it
/// concurrently. Writes resolve by observation timestamp so a slow REST
/// result cannot clobber a fresher streaming tick.
pub struct QuoteCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    ttl: Duration,
}

impl QuoteCache {
    /// Create a cache with the default 60 second TTL.
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_TTL)
    }

    /// Create a cache with a custom TTL.
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Lock the entries mutex, recovering from poison if necessary.
    ///
    /// Worst case after recovery is one stale or missing cache entry,
    /// which the TTL already allows for.
    fn lock_entries(&self) -> MutexGuard<'_, HashMap<String, CacheEntry>> {
        self.entries.lock().unwrap_or_else(|poisoned| {
            warn!("Quote cache mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Look up the cached quote for a symbol.
    ///
    /// An expired entry is removed and treated as absent; it is never
    /// served.
    pub fn get(&self, symbol: &str) -> Option<Quote> {
        let mut entries = self.lock_entries();

        match entries.get(symbol) {
            Some(entry) if entry.is_valid(self.ttl) => {
                debug!("Cache hit for '{}'", symbol);
                Some(entry.quote.clone())
            }
            Some(_) => {
                debug!("Cache entry for '{}' expired, removing", symbol);
                entries.remove(symbol);
                None
            }
            None => None,
        }
    }

    /// Store a quote under its symbol.
    ///
    /// Last write wins by observation timestamp: an incoming quote older
    /// than a still-valid stored one is dropped.
    pub fn put(&self, quote: Quote) {
        let mut entries = self.lock_entries();

        if let Some(existing) = entries.get(&quote.symbol) {
            if existing.is_valid(self.ttl) && existing.quote.timestamp > quote.timestamp {
                debug!(
                    "Dropping stale write for '{}' ({} behind cached quote)",
                    quote.symbol,
                    existing.quote.timestamp - quote.timestamp
                );
                return;
            }
        }

        entries.insert(
            quote.symbol.clone(),
            CacheEntry {
                quote,
                inserted_at: Instant::now(),
            },
        );
    }

    /// Remove every expired entry and return how many were dropped.
    ///
    /// Optional maintenance; reads already treat expired entries as
    /// absent.
    pub fn purge_expired(&self) -> usize {
        let mut entries = self.lock_entries();
        let before = entries.len();
        entries.retain(|_, entry| entry.is_valid(self.ttl));
        let removed = before - entries.len();
        if removed > 0 {
            debug!("Purged {} expired quote(s)", removed);
        }
        removed
    }

    /// Number of entries currently held, expired or not.
    pub fn len(&self) -> usize {
        self.lock_entries().len()
    }

    /// Whether the cache holds no entries at all.
    pub fn is_empty(&self) -> bool {
        self.lock_entries().is_empty()
    }
}

impl Default for QuoteCache {
    fn default() -> Self {
        Self::new()
    }
}
