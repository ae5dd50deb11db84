//! In-memory translation cache.
//!
//! Caches [`SqlTranslationResult`]s keyed by the canonical mapped entity set
//! (see [`CacheKey`]). Concurrent requests for the same key share one
//! computation.
//!
//! # Design
//!
//! - Singleflight: the first caller for a key leads, later callers wait on a
//!   `watch` channel for its outcome. A failed computation is handed to every
//!   waiter and is not stored. A leader that is cancelled or dropped
//!   publishes `Abandoned` and one of the waiters takes over.
//! - Tiered TTL: results whose time range reaches today (or that have no
//!   range) are `live` and expire quickly, purely historical results are
//!   kept longer.
//! - Bounded: at capacity, expired entries go first, then the least recently
//!   used live entry, then the least recently used historical entry.
//!
//! # Key Format
//!
//! ```text
//! sha256(json({scope, metrics, dimensions, filters, sort, limit, time_range, comparisons}))
//! ```

mod clock;
mod hash;
mod key;

pub use clock::{Clock, ManualClock, SystemClock};
pub use hash::compute_hash;
pub use key::CacheKey;

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry as SlotEntry;
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::CacheSettings;
use crate::entities::MappedQueryEntities;
use crate::error::{TranslateError, TranslateResult};
use crate::translation::SqlTranslationResult;

/// Expiry class of a cached translation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheTier {
    Live,
    Historical,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheEntryStats {
    pub key: String,
    pub tier: CacheTier,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub last_access: DateTime<Utc>,
}

/// Cache statistics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
    pub capacity: usize,
    pub keys: Vec<CacheEntryStats>,
}

#[derive(Debug)]
struct Entry {
    value: Arc<SqlTranslationResult>,
    tier: CacheTier,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    last_access: DateTime<Utc>,
}

/// Outcome published to callers waiting on a leader.
#[derive(Debug, Clone)]
enum Flight {
    Done(TranslateResult<Arc<SqlTranslationResult>>),
    Abandoned,
}

enum Role {
    Leader(watch::Sender<Option<Flight>>),
    Follower(watch::Receiver<Option<Flight>>),
}

pub struct TranslationCache {
    settings: CacheSettings,
    clock: Arc<dyn Clock>,
    entries: Mutex<HashMap<String, Entry>>,
    inflight: DashMap<String, watch::Receiver<Option<Flight>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl TranslationCache {
    pub fn new(settings: CacheSettings, clock: Arc<dyn Clock>) -> Self {
        Self {
            settings,
            clock,
            entries: Mutex::new(HashMap::new()),
            inflight: DashMap::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.settings.enabled
    }

    /// Expiry class for a mapped request as of the clock's today.
    pub fn tier_for(&self, mapped: &MappedQueryEntities) -> CacheTier {
        match mapped.time_range {
            Some(range) if !range.touches(self.clock.today()) => CacheTier::Historical,
            _ => CacheTier::Live,
        }
    }

    /// Return the cached translation for `mapped`, or compute it exactly once.
    ///
    /// Callers that find a computation already running wait for it and
    /// count as hits. A compute error reaches every waiter as
    /// [`TranslateError::CacheComputeFailed`]. Cancelling `cancel` ends only
    /// this caller's wait; if this caller was computing, a waiter takes over.
    pub async fn get_or_compute<F, Fut>(
        &self,
        mapped: &MappedQueryEntities,
        scope: &str,
        cancel: &CancellationToken,
        compute: F,
    ) -> TranslateResult<Arc<SqlTranslationResult>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = TranslateResult<SqlTranslationResult>>,
    {
        if !self.settings.enabled {
            return run_cancellable(cancel, compute()).await.map(Arc::new);
        }

        let key = match CacheKey::for_mapped(mapped, scope) {
            Ok(key) => key,
            Err(e) => {
                warn!(error = %e, "Failed to derive cache key, computing uncached");
                return run_cancellable(cancel, compute()).await.map(Arc::new);
            }
        };
        let tier = self.tier_for(mapped);
        let mut compute = Some(compute);

        loop {
            if let Some(hit) = self.lookup(&key) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!(key = %short(&key), "Cache hit");
                return Ok(hit);
            }

            let role = match self.inflight.entry(key.clone()) {
                SlotEntry::Occupied(slot) => Role::Follower(slot.get().clone()),
                SlotEntry::Vacant(slot) => {
                    let (tx, rx) = watch::channel(None);
                    slot.insert(rx);
                    Role::Leader(tx)
                }
            };

            match role {
                Role::Follower(mut rx) => {
                    let outcome = tokio::select! {
                        _ = cancel.cancelled() => return Err(TranslateError::Cancelled),
                        seen = rx.wait_for(Option::is_some) => seen.map(|flight| (*flight).clone()),
                    };
                    match outcome {
                        Ok(Some(Flight::Done(Ok(value)))) => {
                            self.hits.fetch_add(1, Ordering::Relaxed);
                            debug!(key = %short(&key), "Joined in-flight translation");
                            return Ok(value);
                        }
                        Ok(Some(Flight::Done(Err(e)))) => return Err(e),
                        // Leader went away; race for leadership again.
                        Ok(Some(Flight::Abandoned)) | Ok(None) | Err(_) => continue,
                    }
                }
                Role::Leader(tx) => {
                    let mut flight = FlightGuard {
                        inflight: &self.inflight,
                        key: &key,
                        tx: Some(tx),
                    };

                    // An entry may have landed between the lookup and taking the slot.
                    if let Some(hit) = self.lookup(&key) {
                        self.hits.fetch_add(1, Ordering::Relaxed);
                        flight.publish(Flight::Done(Ok(hit.clone())));
                        return Ok(hit);
                    }

                    let Some(compute) = compute.take() else {
                        return Err(TranslateError::Cancelled);
                    };
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    debug!(key = %short(&key), ?tier, "Cache miss, computing");

                    let result = tokio::select! {
                        _ = cancel.cancelled() => {
                            drop(flight);
                            return Err(TranslateError::Cancelled);
                        }
                        result = compute() => result,
                    };

                    return match result {
                        Ok(value) => {
                            let value = Arc::new(value);
                            self.store(&key, value.clone(), tier);
                            flight.publish(Flight::Done(Ok(value.clone())));
                            Ok(value)
                        }
                        Err(e) => {
                            let err = TranslateError::CacheComputeFailed(Box::new(e));
                            flight.publish(Flight::Done(Err(err.clone())));
                            Err(err)
                        }
                    };
                }
            }
        }
    }

    /// Remove one entry. Returns whether it existed.
    pub fn invalidate(&self, key: &str) -> bool {
        self.lock().remove(key).is_some()
    }

    /// Remove every entry. Counters are kept.
    pub fn clear(&self) {
        let mut entries = self.lock();
        let removed = entries.len();
        entries.clear();
        debug!(removed, "Cleared translation cache");
    }

    pub fn stats(&self) -> CacheStats {
        let now = self.clock.now();
        let entries = self.lock();
        let mut keys: Vec<CacheEntryStats> = entries
            .iter()
            .filter(|(_, e)| e.expires_at > now)
            .map(|(key, e)| CacheEntryStats {
                key: key.clone(),
                tier: e.tier,
                created_at: e.created_at,
                expires_at: e.expires_at,
                last_access: e.last_access,
            })
            .collect();
        keys.sort_by(|a, b| a.key.cmp(&b.key));

        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: keys.len(),
            capacity: self.settings.capacity,
            keys,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lookup(&self, key: &str) -> Option<Arc<SqlTranslationResult>> {
        let now = self.clock.now();
        let mut entries = self.lock();
        let entry = entries.get_mut(key)?;
        if entry.expires_at <= now {
            entries.remove(key);
            return None;
        }
        entry.last_access = now;
        Some(entry.value.clone())
    }

    fn store(&self, key: &str, value: Arc<SqlTranslationResult>, tier: CacheTier) {
        if self.settings.capacity == 0 {
            return;
        }
        let now = self.clock.now();
        let ttl = match tier {
            CacheTier::Live => self.settings.live_ttl(),
            CacheTier::Historical => self.settings.historical_ttl(),
        };

        let mut entries = self.lock();
        if !entries.contains_key(key) {
            while entries.len() >= self.settings.capacity {
                if !evict_one(&mut entries, now) {
                    break;
                }
            }
        }
        entries.insert(
            key.to_string(),
            Entry {
                value,
                tier,
                created_at: now,
                expires_at: expiry(now, ttl),
                last_access: now,
            },
        );
    }
}

/// Make room for one entry. Returns false if nothing could be removed.
fn evict_one(entries: &mut HashMap<String, Entry>, now: DateTime<Utc>) -> bool {
    let before = entries.len();
    entries.retain(|_, e| e.expires_at > now);
    if entries.len() < before {
        return true;
    }

    let victim = entries
        .iter()
        .min_by(|(ka, a), (kb, b)| {
            a.tier
                .cmp(&b.tier)
                .then(a.last_access.cmp(&b.last_access))
                .then(ka.cmp(kb))
        })
        .map(|(k, _)| k.clone());

    match victim {
        Some(key) => {
            debug!(key = %short(&key), "Evicted least recently used entry");
            entries.remove(&key).is_some()
        }
        None => false,
    }
}

fn expiry(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|d| now.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn short(key: &str) -> &str {
    key.get(..12).unwrap_or(key)
}

async fn run_cancellable<Fut>(
    cancel: &CancellationToken,
    fut: Fut,
) -> TranslateResult<SqlTranslationResult>
where
    Fut: Future<Output = TranslateResult<SqlTranslationResult>>,
{
    tokio::select! {
        _ = cancel.cancelled() => Err(TranslateError::Cancelled),
        result = fut => result,
    }
}

/// Owns a key's in-flight slot. Dropping it unpublished tells waiters the
/// leader is gone.
struct FlightGuard<'a> {
    inflight: &'a DashMap<String, watch::Receiver<Option<Flight>>>,
    key: &'a str,
    tx: Option<watch::Sender<Option<Flight>>>,
}

impl FlightGuard<'_> {
    fn publish(&mut self, flight: Flight) {
        if let Some(tx) = self.tx.take() {
            self.inflight.remove(self.key);
            tx.send_replace(Some(flight));
        }
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.publish(Flight::Abandoned);
    }
}
