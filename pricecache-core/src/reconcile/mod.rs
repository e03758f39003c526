//! Reconciler: answer a (symbol, field, range) request from the cache,
//! fetching only what the cache is missing.
//!
//! Per request:
//! 1. look up the best cached entry for the key
//! 2. `Exact`/`Contains`: slice the entry, no source call
//! 3. `OverlapAfter`/`OverlapBefore`: fetch the gap only, merge, persist the
//!    extended entry under the union interval
//! 4. `Miss`: fetch the whole range and persist it under the requested interval
//!
//! The store's per-key guard is held across the whole sequence, so concurrent
//! requests for the same key see each other's entries instead of racing.

pub mod batch;
pub mod merge;

pub use batch::{BatchProgress, BatchReport, SilentProgress, SymbolOutcome};
pub use merge::merge_points;

use crate::classify::MatchResult;
use crate::config::PriceCacheConfig;
use crate::domain::series::slice_points;
use crate::domain::{CacheKey, Interval, KeyError, PricePoint, PriceSeries};
use crate::source::{PriceSource, SourceError};
use crate::store::{CacheEntry, CacheStore, EntryId, Lookup, StoreError};
use chrono::Utc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Answer to a single request. `NotFound` is an outcome, not an error.
#[derive(Debug, Clone, PartialEq)]
pub enum Fetched {
    Found(PriceSeries),
    NotFound,
}

impl Fetched {
    fn from_points(key: &CacheKey, points: &[PricePoint]) -> Self {
        if points.is_empty() {
            Fetched::NotFound
        } else {
            Fetched::Found(PriceSeries::new(key.symbol(), key.field(), points.to_vec()))
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, Fetched::Found(_))
    }

    pub fn series(&self) -> Option<&PriceSeries> {
        match self {
            Fetched::Found(series) => Some(series),
            Fetched::NotFound => None,
        }
    }

    pub fn into_series(self) -> Option<PriceSeries> {
        match self {
            Fetched::Found(series) => Some(series),
            Fetched::NotFound => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("invalid request: {0}")]
    InvalidRequest(#[from] KeyError),

    #[error("field '{field}' is not available for {symbol}")]
    FieldNotAvailable { symbol: String, field: String },

    #[error("fetching {symbol} {interval} from {source_name} failed: {source}")]
    FetchFailure {
        symbol: String,
        interval: Interval,
        source_name: String,
        #[source]
        source: SourceError,
    },

    #[error("fetching {symbol} {interval} timed out after {timeout:?}")]
    FetchTimeout {
        symbol: String,
        interval: Interval,
        timeout: Duration,
    },

    #[error("fetched {}/{} but could not persist it: {source}", .series.symbol(), .series.field())]
    StoreWriteFailure {
        /// What the request would have returned; the fetch itself succeeded.
        series: PriceSeries,
        #[source]
        source: StoreError,
    },
}

impl ReconcileError {
    /// Data that was fetched before the failure, if any.
    pub fn into_series(self) -> Option<PriceSeries> {
        match self {
            ReconcileError::StoreWriteFailure { series, .. } => Some(series),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReconcilerOptions {
    /// Upper bound on one source call; `None` waits indefinitely.
    pub fetch_timeout: Option<Duration>,
    /// Delete entries of the same key made redundant by a newly persisted one.
    pub prune_superseded: bool,
}

impl Default for ReconcilerOptions {
    fn default() -> Self {
        Self {
            fetch_timeout: None,
            prune_superseded: true,
        }
    }
}

impl From<&PriceCacheConfig> for ReconcilerOptions {
    fn from(config: &PriceCacheConfig) -> Self {
        Self {
            fetch_timeout: config.fetch_timeout(),
            prune_superseded: config.prune_superseded,
        }
    }
}

pub struct Reconciler {
    store: Arc<CacheStore>,
    source: Arc<dyn PriceSource>,
    options: ReconcilerOptions,
    span: tracing::Span,
}

impl Reconciler {
    pub fn new(store: Arc<CacheStore>, source: Arc<dyn PriceSource>) -> Self {
        let span = tracing::info_span!("reconciler", source = source.name());
        Self {
            store,
            source,
            options: ReconcilerOptions::default(),
            span,
        }
    }

    pub fn with_options(mut self, options: ReconcilerOptions) -> Self {
        self.options = options;
        self
    }

    /// Replace the span all reconciler events are recorded under.
    pub fn with_span(mut self, span: tracing::Span) -> Self {
        self.span = span;
        self
    }

    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    pub fn source_name(&self) -> &str {
        self.source.name()
    }

    pub fn options(&self) -> &ReconcilerOptions {
        &self.options
    }

    /// Answer one request, consulting the source only for data the cache lacks.
    pub fn fetch_range(
        &self,
        symbol: &str,
        field: &str,
        requested: Interval,
    ) -> Result<Fetched, ReconcileError> {
        let key = CacheKey::new(symbol, field)?;
        let span = tracing::info_span!(parent: &self.span, "fetch_range", %key, %requested);
        let _enter = span.enter();

        let _guard = self.store.lock_key(&key);
        let Lookup { entry, matched } = self.store.lookup(&key, &requested);
        tracing::debug!(%matched, "classified request against cache");

        match (entry, matched) {
            (Some(entry), MatchResult::Exact | MatchResult::Contains) => {
                Ok(Fetched::from_points(&key, slice_points(entry.points(), &requested)))
            }
            (
                Some(entry),
                MatchResult::OverlapAfter { gap } | MatchResult::OverlapBefore { gap },
            ) => self.extend(&key, entry, gap, requested),
            _ => self.fill(&key, requested),
        }
    }

    /// Fetch the gap next to a cached entry and persist the extended entry.
    fn extend(
        &self,
        key: &CacheKey,
        entry: CacheEntry,
        gap: Interval,
        requested: Interval,
    ) -> Result<Fetched, ReconcileError> {
        let fetched = self.fetch_points(key, gap)?;
        if fetched.is_empty() {
            // Still recorded as covered, so a repeat request does not refetch it.
            tracing::debug!(%gap, "gap has no data");
        }

        let union = entry.interval().union(&requested);
        let series = PriceSeries::new(
            key.symbol(),
            key.field(),
            merge_points(entry.points(), &fetched),
        );
        let id = self.persist(key, union, &series, &requested)?;
        self.prune(key, &id);

        tracing::info!(
            %gap,
            fetched = fetched.len(),
            total = series.len(),
            interval = %union,
            "extended cache entry"
        );
        Ok(Fetched::from_points(key, slice_points(series.points(), &requested)))
    }

    /// Fetch the whole request and persist it as a new entry.
    fn fill(&self, key: &CacheKey, requested: Interval) -> Result<Fetched, ReconcileError> {
        let fetched = self.fetch_points(key, requested)?;
        if fetched.is_empty() {
            tracing::info!("source has no data in range");
            return Ok(Fetched::NotFound);
        }

        let series = PriceSeries::new(key.symbol(), key.field(), fetched);
        let id = self.persist(key, requested, &series, &requested)?;
        self.prune(key, &id);

        tracing::info!(points = series.len(), "cached new entry");
        Ok(Fetched::Found(series))
    }

    fn persist(
        &self,
        key: &CacheKey,
        interval: Interval,
        series: &PriceSeries,
        requested: &Interval,
    ) -> Result<EntryId, ReconcileError> {
        self.store
            .persist(key, interval, series, Utc::now())
            .map_err(|source| {
                tracing::error!(error = %source, "persist failed after successful fetch");
                ReconcileError::StoreWriteFailure {
                    series: series.slice(requested),
                    source,
                }
            })
    }

    fn prune(&self, key: &CacheKey, keep: &EntryId) {
        if !self.options.prune_superseded {
            return;
        }
        match self.store.prune_subsumed(key, &keep.interval, keep) {
            Ok(0) => {}
            Ok(removed) => tracing::debug!(removed, "pruned superseded entries"),
            // the new entry is already durable; a leftover entry is only redundant
            Err(e) => tracing::warn!(error = %e, "failed to prune superseded entries"),
        }
    }

    /// Call the source for `interval` and clean the result. A symbol the
    /// source does not know yields no points.
    fn fetch_points(
        &self,
        key: &CacheKey,
        interval: Interval,
    ) -> Result<Vec<PricePoint>, ReconcileError> {
        tracing::debug!(%interval, "calling source");
        let raw = match self.call_source(key, interval)? {
            Ok(points) => points,
            Err(SourceError::SymbolNotFound { .. }) => {
                tracing::info!("symbol not known to source");
                return Ok(Vec::new());
            }
            Err(SourceError::FieldNotAvailable { symbol, field }) => {
                return Err(ReconcileError::FieldNotAvailable { symbol, field });
            }
            Err(source) => {
                tracing::warn!(error = %source, "source fetch failed");
                return Err(self.fetch_failure(key, interval, source));
            }
        };

        let (points, dropped) = merge::sanitize(raw, &interval);
        if dropped > 0 {
            tracing::warn!(dropped, "discarded non-finite values from source");
        }
        Ok(points)
    }

    /// Run the source call, on a worker thread when a timeout is configured.
    fn call_source(
        &self,
        key: &CacheKey,
        interval: Interval,
    ) -> Result<Result<Vec<PricePoint>, SourceError>, ReconcileError> {
        let Some(timeout) = self.options.fetch_timeout else {
            return Ok(self.source.fetch(key.symbol(), key.field(), &interval));
        };

        let (tx, rx) = mpsc::channel();
        let source = Arc::clone(&self.source);
        let (symbol, field) = (key.symbol().to_string(), key.field().to_string());
        let span = tracing::Span::current();
        let spawned = std::thread::Builder::new()
            .name(format!("fetch-{symbol}"))
            .spawn(move || {
                let _enter = span.enter();
                // receiver is gone if the caller already timed out
                let _ = tx.send(source.fetch(&symbol, &field, &interval));
            });
        if let Err(e) = spawned {
            return Err(self.fetch_failure(
                key,
                interval,
                SourceError::Other(format!("cannot spawn fetch thread: {e}")),
            ));
        }

        match rx.recv_timeout(timeout) {
            Ok(result) => Ok(result),
            Err(RecvTimeoutError::Timeout) => {
                tracing::warn!(?timeout, "source fetch timed out");
                Err(ReconcileError::FetchTimeout {
                    symbol: key.symbol().to_string(),
                    interval,
                    timeout,
                })
            }
            Err(RecvTimeoutError::Disconnected) => Err(self.fetch_failure(
                key,
                interval,
                SourceError::Other("fetch thread exited without a result".into()),
            )),
        }
    }

    fn fetch_failure(&self, key: &CacheKey, interval: Interval, source: SourceError) -> ReconcileError {
        ReconcileError::FetchFailure {
            symbol: key.symbol().to_string(),
            interval,
            source_name: self.source.name().to_string(),
            source,
        }
    }

    /// Reconcile several symbols one after another. A failing symbol is
    /// recorded in the report and never stops the rest.
    pub fn fetch_many<S: AsRef<str>>(
        &self,
        symbols: &[S],
        field: &str,
        requested: Interval,
    ) -> BatchReport {
        self.fetch_many_with_progress(symbols, field, requested, &SilentProgress)
    }

    pub fn fetch_many_with_progress<S: AsRef<str>>(
        &self,
        symbols: &[S],
        field: &str,
        requested: Interval,
        progress: &dyn BatchProgress,
    ) -> BatchReport {
        let total = symbols.len();
        let mut report = BatchReport::default();

        for (i, symbol) in symbols.iter().enumerate() {
            let symbol = symbol.as_ref();
            progress.on_start(symbol, i, total);

            let outcome = SymbolOutcome::from(self.fetch_range(symbol, field, requested));
            if let SymbolOutcome::Failed(e) = &outcome {
                let _enter = self.span.enter();
                tracing::warn!(symbol, error = %e, "symbol failed");
            }
            progress.on_complete(symbol, i, total, &outcome);
            report.outcomes.push((symbol.to_string(), outcome));
        }

        {
            let _enter = self.span.enter();
            tracing::info!(
                total,
                found = report.found_count(),
                not_found = report.not_found_count(),
                failed = report.failed_count(),
                "batch complete"
            );
        }
        progress.on_batch_complete(&report);
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Flat {
        calls: AtomicUsize,
    }

    impl PriceSource for Flat {
        fn name(&self) -> &str {
            "flat"
        }

        fn fetch(
            &self,
            _symbol: &str,
            _field: &str,
            interval: &Interval,
        ) -> Result<Vec<PricePoint>, SourceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(interval
                .start()
                .iter_days()
                .take_while(|d| *d <= interval.end())
                .map(|d| PricePoint::new(d, 1.0))
                .collect())
        }
    }

    fn jan(a: u32, b: u32) -> Interval {
        Interval::new(
            NaiveDate::from_ymd_opt(2024, 1, a).unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, b).unwrap(),
        )
        .unwrap()
    }

    fn reconciler() -> (Reconciler, Arc<Flat>) {
        let source = Arc::new(Flat {
            calls: AtomicUsize::new(0),
        });
        let r = Reconciler::new(Arc::new(CacheStore::in_memory()), source.clone());
        (r, source)
    }

    #[test]
    fn empty_symbol_is_invalid_request() {
        let (r, _) = reconciler();
        assert!(matches!(
            r.fetch_range("  ", "Close", jan(1, 2)),
            Err(ReconcileError::InvalidRequest(_))
        ));
    }

    #[test]
    fn second_identical_request_is_served_from_cache() {
        let (r, source) = reconciler();
        let first = r.fetch_range("spy", "Close", jan(1, 10)).unwrap();
        let second = r.fetch_range("SPY", "Close", jan(1, 10)).unwrap();
        assert_eq!(first, second);
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn options_follow_config() {
        let config = PriceCacheConfig::from_toml("fetch_timeout_secs = 0\nprune_superseded = false").unwrap();
        let options = ReconcilerOptions::from(&config);
        assert_eq!(options.fetch_timeout, None);
        assert!(!options.prune_superseded);
    }

    #[test]
    fn timeout_path_returns_source_result() {
        let (r, source) = reconciler();
        let r = r.with_options(ReconcilerOptions {
            fetch_timeout: Some(Duration::from_secs(5)),
            prune_superseded: true,
        });
        let got = r.fetch_range("SPY", "Close", jan(1, 3)).unwrap();
        assert_eq!(got.series().map(PriceSeries::len), Some(3));
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }
}
