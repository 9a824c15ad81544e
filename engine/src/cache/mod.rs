//! Content-addressed context cache
//!
//! Prompts, rubrics, scenarios and context files are fetched once and stored
//! under the SHA-256 of their normalized bytes. Identical content reached
//! through different references collapses to a single entry.
//!
//! # Concurrency
//!
//! Concurrent `get()` calls for the same uncached reference share one fetch:
//! each reference has its own async gate, and callers that wait on it re-check
//! the index before fetching. Bookkeeping lives behind a short-lived std mutex
//! that is never held across an await point.
//!
//! # Lifetime
//!
//! Every successful `get()` takes a reference on the entry. `release()` drops
//! it again. `evict_stale()` removes entries whose TTL has passed, but never
//! one that is still referenced.
//!
//! # Fallback
//!
//! When a fetch fails (after retrying transient failures) the caller gets the
//! configured placeholder text flagged as degraded, and the failure is kept
//! for diagnostics (the most recent [`MAX_RECORDED_FAILURES`] only).
//! Placeholders are never stored as entries.

pub mod key;
pub mod loader;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use sdk::errors::{DuelErrorExt, EngineError, ErrorClass};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::config::CacheConfig;
use crate::retry::{RetryDecision, RetryPolicy};

pub use key::{content_key, normalize};
pub use loader::{ContentLoader, Fetched, FsLoader, HttpLoader, WorkspaceLoader};

/// Fetch failures kept for diagnostics; older ones are dropped first
pub const MAX_RECORDED_FAILURES: usize = 256;

/// One stored piece of content
#[derive(Debug, Clone, Serialize)]
pub struct CacheEntry {
    pub key: String,
    #[serde(skip)]
    pub payload: Arc<[u8]>,
    pub media_type: String,
    pub size_bytes: usize,
    pub first_fetched_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
    pub ref_count: usize,
    pub ttl_expires_at: DateTime<Utc>,
}

/// What a caller gets back from [`ContentCache::get`]
#[derive(Debug, Clone)]
pub struct CacheHandle {
    /// Reference the caller asked for
    pub reference: String,
    /// Key of the content. For degraded handles this is the key of the
    /// placeholder text, which is not stored.
    pub key: String,
    pub media_type: String,
    pub payload: Arc<[u8]>,
    /// True when the payload is placeholder text standing in for a failed fetch
    pub degraded: bool,
}

impl CacheHandle {
    /// Payload as text, replacing invalid UTF-8
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }

    pub fn size_bytes(&self) -> usize {
        self.payload.len()
    }
}

/// A fetch that fell back to placeholder content
#[derive(Debug, Clone, Serialize)]
pub struct FetchFailure {
    pub reference: String,
    pub message: String,
    pub class: ErrorClass,
    pub attempts: u32,
    pub at: DateTime<Utc>,
}

/// Cache counters
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub total_bytes: usize,
    pub referenced_entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub fetches: u64,
    pub degraded: u64,
    pub evicted: u64,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<String, CacheEntry>,
    index: HashMap<String, String>,
    failures: VecDeque<FetchFailure>,
    stats: CacheStats,
}

pub struct ContentCache {
    loader: Arc<dyn ContentLoader>,
    retry: RetryPolicy,
    ttl: ChronoDuration,
    placeholder: Arc<[u8]>,
    placeholder_key: String,
    inner: Mutex<Inner>,
    gates: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl ContentCache {
    pub fn new(loader: Arc<dyn ContentLoader>, config: &CacheConfig, retry: RetryPolicy) -> Self {
        let placeholder = normalize(config.placeholder_text.as_bytes());
        Self {
            loader,
            retry,
            ttl: ChronoDuration::days(i64::from(config.ttl_days)),
            placeholder_key: content_key(&placeholder),
            placeholder: Arc::from(placeholder),
            inner: Mutex::new(Inner::default()),
            gates: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn gates(&self) -> MutexGuard<'_, HashMap<String, Arc<tokio::sync::Mutex<()>>>> {
        self.gates.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn gate(&self, reference: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.gates()
            .entry(reference.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Drop the gate for `reference` once no other caller holds or waits on it.
    ///
    /// Clones are only handed out under the map lock, so a count of two
    /// (the map and `gate`) means this caller is the last one.
    fn retire_gate(&self, reference: &str, gate: Arc<tokio::sync::Mutex<()>>) {
        let mut gates = self.gates();
        if Arc::strong_count(&gate) == 2 {
            gates.remove(reference);
        }
    }

    /// Take a reference on the entry indexed under `reference`, if any
    fn acquire_indexed(&self, reference: &str) -> Option<CacheHandle> {
        let mut inner = self.lock();
        let key = inner.index.get(reference)?.clone();
        let handle = {
            let entry = inner.entries.get_mut(&key)?;
            entry.ref_count += 1;
            entry.last_used_at = Utc::now();
            CacheHandle {
                reference: reference.to_string(),
                key: entry.key.clone(),
                media_type: entry.media_type.clone(),
                payload: entry.payload.clone(),
                degraded: false,
            }
        };
        inner.stats.hits += 1;
        Some(handle)
    }

    /// Fetch-or-reuse the content behind `reference`.
    ///
    /// Never fails: a fetch that cannot be completed yields a degraded handle
    /// carrying the placeholder text.
    pub async fn get(&self, reference: &str) -> CacheHandle {
        if let Some(handle) = self.acquire_indexed(reference) {
            debug!("Cache hit for {}", reference);
            return handle;
        }

        let gate = self.gate(reference);
        let handle = {
            let _in_flight = gate.lock().await;
            self.fill(reference).await
        };
        self.retire_gate(reference, gate);
        handle
    }

    /// Miss path, called with the reference's gate held
    async fn fill(&self, reference: &str) -> CacheHandle {
        // Another caller may have filled the entry while we waited
        if let Some(handle) = self.acquire_indexed(reference) {
            debug!("Cache hit for {} after waiting on in-flight fetch", reference);
            return handle;
        }

        self.lock().stats.misses += 1;

        match self.fetch_with_retry(reference).await {
            Ok(fetched) => self.store(reference, fetched),
            Err((err, attempts)) => self.degrade(reference, err, attempts),
        }
    }

    /// Store content that did not come from a loader (inline scenarios,
    /// tool output) under a synthetic reference and take a reference on it.
    pub fn insert(&self, reference: &str, fetched: Fetched) -> CacheHandle {
        self.store(reference, fetched)
    }

    async fn fetch_with_retry(&self, reference: &str) -> Result<Fetched, (EngineError, u32)> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            self.lock().stats.fetches += 1;
            match self.loader.fetch(reference).await {
                Ok(fetched) => return Ok(fetched),
                Err(err) => match self.retry.decide(err.class(), attempt) {
                    RetryDecision::Retry { delay } => {
                        warn!(
                            "Fetch of {} failed (attempt {}/{}): {}. Retrying in {:?}",
                            reference,
                            attempt,
                            self.retry.max_attempts(),
                            err,
                            delay
                        );
                        tokio::time::sleep(delay).await;
                    }
                    RetryDecision::GiveUp => return Err((err, attempt)),
                },
            }
        }
    }

    fn store(&self, reference: &str, fetched: Fetched) -> CacheHandle {
        let normalized = normalize(&fetched.bytes);
        let key = content_key(&normalized);
        let now = Utc::now();

        let mut inner = self.lock();
        let ttl = self.ttl;
        let entry = inner.entries.entry(key.clone()).or_insert_with(|| {
            debug!("Storing {} bytes under {}", normalized.len(), &key[..12]);
            CacheEntry {
                key: key.clone(),
                size_bytes: normalized.len(),
                payload: Arc::from(normalized),
                media_type: fetched.media_type.clone(),
                first_fetched_at: now,
                last_used_at: now,
                ref_count: 0,
                ttl_expires_at: now + ttl,
            }
        });
        entry.ref_count += 1;
        entry.last_used_at = now;

        let handle = CacheHandle {
            reference: reference.to_string(),
            key: key.clone(),
            media_type: entry.media_type.clone(),
            payload: entry.payload.clone(),
            degraded: false,
        };
        inner.index.insert(reference.to_string(), key);
        handle
    }

    fn degrade(&self, reference: &str, err: EngineError, attempts: u32) -> CacheHandle {
        warn!(
            "Falling back to placeholder for {} after {} attempt(s): {}",
            reference, attempts, err
        );
        let mut inner = self.lock();
        inner.stats.degraded += 1;
        if inner.failures.len() >= MAX_RECORDED_FAILURES {
            inner.failures.pop_front();
        }
        inner.failures.push_back(FetchFailure {
            reference: reference.to_string(),
            message: err.to_string(),
            class: err.class(),
            attempts,
            at: Utc::now(),
        });

        CacheHandle {
            reference: reference.to_string(),
            key: self.placeholder_key.clone(),
            media_type: "text/plain".to_string(),
            payload: self.placeholder.clone(),
            degraded: true,
        }
    }

    /// Drop one reference on `key`. Unknown keys (including placeholder keys)
    /// are ignored.
    pub fn release(&self, key: &str) {
        let mut inner = self.lock();
        if let Some(entry) = inner.entries.get_mut(key) {
            entry.ref_count = entry.ref_count.saturating_sub(1);
        }
    }

    /// Release every non-degraded handle in `handles`
    pub fn release_all<'a>(&self, handles: impl IntoIterator<Item = &'a CacheHandle>) {
        for handle in handles {
            if !handle.degraded {
                self.release(&handle.key);
            }
        }
    }

    /// Remove entries whose TTL expired before `now` and that nobody
    /// references. Returns the number of entries removed.
    pub fn evict_stale(&self, now: DateTime<Utc>) -> usize {
        let mut inner = self.lock();
        let before = inner.entries.len();
        inner
            .entries
            .retain(|_, entry| entry.ref_count > 0 || entry.ttl_expires_at > now);
        let removed = before - inner.entries.len();

        if removed > 0 {
            let Inner { entries, index, .. } = &mut *inner;
            index.retain(|_, key| entries.contains_key(key));
            inner.stats.evicted += removed as u64;
            info!("Evicted {} stale cache entries", removed);
        }
        removed
    }

    /// Inspect a stored entry
    pub fn entry(&self, key: &str) -> Option<CacheEntry> {
        self.lock().entries.get(key).cloned()
    }

    /// Key currently indexed for `reference`
    pub fn key_for(&self, reference: &str) -> Option<String> {
        self.lock().index.get(reference).cloned()
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.lock();
        CacheStats {
            entries: inner.entries.len(),
            total_bytes: inner.entries.values().map(|e| e.size_bytes).sum(),
            referenced_entries: inner.entries.values().filter(|e| e.ref_count > 0).count(),
            ..inner.stats.clone()
        }
    }

    /// Fetches that fell back to placeholder content, oldest first
    pub fn failures(&self) -> Vec<FetchFailure> {
        self.lock().failures.iter().cloned().collect()
    }

    /// References with a fetch currently in flight or waited on
    pub fn in_flight(&self) -> usize {
        self.gates().len()
    }
}
