//! Cache store: persisted entries keyed by (symbol, field, interval).
//!
//! Entries are discovered by enumerating the backend and decoding identifiers,
//! so the store keeps no index of its own. Several entries may exist for one
//! key; `lookup` picks one deterministically:
//!
//! 1. `Exact` beats `Contains`, which beats any overlap
//! 2. among overlaps, the smaller gap wins
//! 3. remaining ties go to the lexicographically smallest identifier
//!
//! Entries that fail to decode or validate are logged and skipped; they never
//! surface as errors from `lookup`.

pub mod backend;
pub mod entry;
mod locks;

pub use backend::{FsBackend, MemoryBackend, StorageBackend};
pub use entry::{CacheEntry, CorruptCacheEntry, EntryId, EntryRecord};
pub use locks::KeyGuard;

use crate::classify::{classify, MatchResult};
use crate::domain::{CacheKey, Interval, PriceSeries};
use chrono::{DateTime, Utc};
use locks::KeyLocks;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage I/O error on '{id}': {source}")]
    Io {
        id: String,
        #[source]
        source: std::io::Error,
    },

    #[error("no stored entry '{0}'")]
    Missing(String),

    #[error("invalid storage identifier '{0}'")]
    InvalidIdentifier(String),

    #[error("failed to encode entry '{id}': {reason}")]
    Encode { id: String, reason: String },

    #[error("series for {key} has a point dated {date} outside {interval}")]
    PointOutsideInterval {
        key: CacheKey,
        interval: Interval,
        date: chrono::NaiveDate,
    },
}

impl StoreError {
    pub(crate) fn io(id: &str, source: std::io::Error) -> Self {
        StoreError::Io {
            id: id.to_string(),
            source,
        }
    }
}

/// Result of a lookup: the chosen entry (if any) and how it matched.
#[derive(Debug, Clone)]
pub struct Lookup {
    pub entry: Option<CacheEntry>,
    pub matched: MatchResult,
}

impl Lookup {
    fn miss() -> Self {
        Self {
            entry: None,
            matched: MatchResult::Miss,
        }
    }
}

/// Per-item outcome of `clear`.
#[derive(Debug, Default)]
pub struct ClearReport {
    pub removed: usize,
    pub failures: Vec<(String, StoreError)>,
}

impl ClearReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// One row of `CacheStore::entries`.
#[derive(Debug)]
pub enum EntrySummary {
    Valid {
        storage_id: String,
        id: EntryId,
        point_count: usize,
        fetched_at: DateTime<Utc>,
    },
    Corrupt {
        storage_id: String,
        reason: CorruptCacheEntry,
    },
}

pub struct CacheStore {
    backend: Box<dyn StorageBackend>,
    locks: KeyLocks,
    span: tracing::Span,
}

impl CacheStore {
    pub fn new(backend: impl StorageBackend + 'static) -> Self {
        let span = tracing::info_span!("cache_store", backend = %backend.describe());
        Self {
            backend: Box::new(backend),
            locks: KeyLocks::default(),
            span,
        }
    }

    /// Filesystem store rooted at `dir` (created if missing).
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        Ok(Self::new(FsBackend::open(dir)?))
    }

    pub fn in_memory() -> Self {
        Self::new(MemoryBackend::new())
    }

    /// Replace the span all store events are recorded under.
    pub fn with_span(mut self, span: tracing::Span) -> Self {
        self.span = span;
        self
    }

    pub fn describe(&self) -> String {
        self.backend.describe()
    }

    /// Serialize read-modify-write sequences on one key across threads.
    pub fn lock_key(&self, key: &CacheKey) -> KeyGuard<'_> {
        self.locks.acquire(key)
    }

    /// Stored identifiers in stable (sorted) order, decoded where possible.
    fn scan(&self) -> Result<Vec<(String, Result<EntryId, CorruptCacheEntry>)>, StoreError> {
        let mut ids = self.backend.enumerate()?;
        ids.sort();
        Ok(ids
            .into_iter()
            .map(|raw| {
                let decoded = EntryId::decode(&raw);
                (raw, decoded)
            })
            .collect())
    }

    fn load(&self, storage_id: &str, id: &EntryId) -> Result<CacheEntry, CorruptCacheEntry> {
        let bytes = self
            .backend
            .read(storage_id)
            .map_err(|e| CorruptCacheEntry::Unreadable(e.to_string()))?;
        let record: EntryRecord = serde_json::from_slice(&bytes)
            .map_err(|e| CorruptCacheEntry::Undeserializable(e.to_string()))?;
        record.validate(id)
    }

    /// Find the best stored entry for `key` relative to `requested`.
    pub fn lookup(&self, key: &CacheKey, requested: &Interval) -> Lookup {
        let _enter = self.span.enter();

        let scanned = match self.scan() {
            Ok(scanned) => scanned,
            Err(e) => {
                tracing::warn!(error = %e, "cannot enumerate cache, treating as miss");
                return Lookup::miss();
            }
        };

        let mut candidates: Vec<(String, EntryId, MatchResult)> = Vec::new();
        for (raw, decoded) in scanned {
            match decoded {
                Ok(id) if &id.key == key => {
                    let matched = classify(&id.interval, requested);
                    if !matched.is_miss() {
                        candidates.push((raw, id, matched));
                    }
                }
                Ok(_) => {}
                Err(reason) => {
                    tracing::warn!(entry = %raw, %reason, "skipping corrupt cache entry");
                }
            }
        }

        // stable sort keeps identifier order for equal ranks
        candidates.sort_by_key(|(_, _, m)| (m.rank(), m.gap().map_or(0, |g| g.days())));

        for (raw, id, matched) in candidates {
            match self.load(&raw, &id) {
                Ok(entry) => {
                    tracing::debug!(entry = %raw, %matched, %requested, "cache lookup");
                    return Lookup {
                        entry: Some(entry),
                        matched,
                    };
                }
                Err(reason) => {
                    tracing::warn!(entry = %raw, %reason, "skipping corrupt cache entry");
                }
            }
        }

        tracing::debug!(%key, %requested, "cache miss");
        Lookup::miss()
    }

    /// Write `series` as the entry for (`key`, `interval`), replacing any entry
    /// with the same identifier. Other entries for the key are left alone.
    pub fn persist(
        &self,
        key: &CacheKey,
        interval: Interval,
        series: &PriceSeries,
        fetched_at: DateTime<Utc>,
    ) -> Result<EntryId, StoreError> {
        let _enter = self.span.enter();

        if let Some(p) = series.points().iter().find(|p| !interval.contains_date(p.date)) {
            return Err(StoreError::PointOutsideInterval {
                key: key.clone(),
                interval,
                date: p.date,
            });
        }

        let id = EntryId::new(key.clone(), interval);
        let storage_id = id.encode();
        let record = EntryRecord::build(&id, series.points(), fetched_at);
        let bytes = serde_json::to_vec(&record).map_err(|e| StoreError::Encode {
            id: storage_id.clone(),
            reason: e.to_string(),
        })?;
        self.backend.write(&storage_id, &bytes)?;

        tracing::debug!(entry = %storage_id, points = series.len(), "persisted cache entry");
        Ok(id)
    }

    /// Delete entries of `key` whose interval lies inside `interval`, except `keep`.
    /// Returns how many were removed.
    pub fn prune_subsumed(
        &self,
        key: &CacheKey,
        interval: &Interval,
        keep: &EntryId,
    ) -> Result<usize, StoreError> {
        let _enter = self.span.enter();

        let mut removed = 0;
        for (raw, decoded) in self.scan()? {
            let Ok(id) = decoded else { continue };
            if &id.key != key || &id == keep || !interval.covers(&id.interval) {
                continue;
            }
            self.backend.delete(&raw)?;
            tracing::debug!(entry = %raw, "pruned superseded cache entry");
            removed += 1;
        }
        Ok(removed)
    }

    /// Remove every stored entry, including corrupt ones.
    pub fn clear(&self) -> Result<ClearReport, StoreError> {
        let _enter = self.span.enter();

        let mut report = ClearReport::default();
        for (raw, _) in self.scan()? {
            match self.backend.delete(&raw) {
                Ok(()) => report.removed += 1,
                Err(e) => {
                    tracing::warn!(entry = %raw, error = %e, "failed to remove cache entry");
                    report.failures.push((raw, e));
                }
            }
        }
        tracing::info!(removed = report.removed, failed = report.failures.len(), "cache cleared");
        Ok(report)
    }

    /// Every stored entry with its validation outcome, in identifier order.
    pub fn entries(&self) -> Result<Vec<EntrySummary>, StoreError> {
        let _enter = self.span.enter();

        Ok(self
            .scan()?
            .into_iter()
            .map(|(storage_id, decoded)| {
                match decoded.and_then(|id| self.load(&storage_id, &id)) {
                    Ok(entry) => EntrySummary::Valid {
                        point_count: entry.point_count(),
                        fetched_at: entry.fetched_at(),
                        id: entry.id().clone(),
                        storage_id,
                    },
                    Err(reason) => EntrySummary::Corrupt { storage_id, reason },
                }
            })
            .collect())
    }
}
