//! PriceCache Core — date-range cache reconciliation for daily price series.
//!
//! This crate contains:
//! - Domain types (intervals, cache keys, price series)
//! - Range classifier comparing a cached interval with a requested one
//! - Cache store over pluggable storage backends (directory, memory)
//! - Price sources (Yahoo Finance, CSV files, synthetic data)
//! - Reconciler that fetches only the missing part of a request and keeps the
//!   cache extended

pub mod classify;
pub mod config;
pub mod domain;
pub mod reconcile;
pub mod source;
pub mod store;

pub use classify::{classify, MatchResult};
pub use config::PriceCacheConfig;
pub use domain::{CacheKey, Interval, PricePoint, PriceSeries};
pub use reconcile::{BatchReport, Fetched, ReconcileError, Reconciler, ReconcilerOptions, SymbolOutcome};
pub use source::{PriceSource, SourceError};
pub use store::CacheStore;
