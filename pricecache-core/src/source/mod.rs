//! External price sources and their error type.
//!
//! The `PriceSource` trait abstracts over where data comes from (Yahoo Finance,
//! CSV files, synthetic data) so the reconciler can be tested against mocks.
//! Sources know nothing about the cache.

pub mod circuit_breaker;
pub mod csv_file;
pub mod synthetic;
pub mod yahoo;

pub use circuit_breaker::CircuitBreaker;
pub use csv_file::CsvSource;
pub use synthetic::SyntheticSource;
pub use yahoo::YahooSource;

use crate::domain::{Interval, PricePoint};
use thiserror::Error;

/// Field names understood by the built-in sources.
pub const STANDARD_FIELDS: [&str; 6] = ["Open", "High", "Low", "Close", "Adj Close", "Volume"];

/// Structured errors from a price source.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("rate limited by provider (retry after {retry_after_secs}s)")]
    RateLimited { retry_after_secs: u64 },

    #[error("response format changed: {0}")]
    ResponseFormatChanged(String),

    #[error("symbol not found: {symbol}")]
    SymbolNotFound { symbol: String },

    #[error("field '{field}' is not available for {symbol}")]
    FieldNotAvailable { symbol: String, field: String },

    #[error("hard stop: data provider has blocked requests (circuit breaker tripped)")]
    CircuitBreakerTripped,

    #[error("source I/O error: {0}")]
    Io(String),

    #[error("source error: {0}")]
    Other(String),
}

/// A source of daily observations for (symbol, field) over a date range.
///
/// An empty result is a valid answer (nothing traded in the range); errors are
/// reserved for failures and unknown fields.
pub trait PriceSource: Send + Sync {
    /// Human-readable name of this source.
    fn name(&self) -> &str;

    /// Fetch observations for `symbol`/`field` inside `interval` (inclusive).
    fn fetch(
        &self,
        symbol: &str,
        field: &str,
        interval: &Interval,
    ) -> Result<Vec<PricePoint>, SourceError>;

    /// Whether the source currently accepts requests (not rate-limited, not blocked).
    fn is_available(&self) -> bool {
        true
    }
}

/// Canonical lookup for standard field names, case-insensitive and tolerant of
/// `AdjClose`/`adj_close` spellings.
pub(crate) fn standard_field(field: &str) -> Option<&'static str> {
    let folded: String = field
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect();
    match folded.as_str() {
        "open" => Some("Open"),
        "high" => Some("High"),
        "low" => Some("Low"),
        "close" => Some("Close"),
        "adjclose" => Some("Adj Close"),
        "volume" => Some("Volume"),
        _ => None,
    }
}
