//! Entry identifiers and the persisted record format.
//!
//! Identifier layout: `{symbol}_{field}_{start}_{end}.json`. Symbol and field
//! are escaped so the `_` delimiter never occurs inside a component: every
//! byte outside `[A-Za-z0-9.=^-]` is written as `%XX`. Decoding is strict, so
//! an identifier either round-trips exactly or is rejected as corrupt.

use crate::domain::{CacheKey, Interval, PricePoint, PriceSeries};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Suffix of every entry identifier.
pub const ENTRY_SUFFIX: &str = ".json";

/// Bumped when the record layout changes incompatibly.
pub const FORMAT_VERSION: u32 = 1;

const DATE_FMT: &str = "%Y-%m-%d";

/// Why a stored entry could not be used. Always recovered locally by the
/// store: logged and skipped, never returned to callers of `lookup`.
#[derive(Debug, Error)]
pub enum CorruptCacheEntry {
    #[error("malformed identifier '{id}': {reason}")]
    BadIdentifier { id: String, reason: String },

    #[error("unreadable payload: {0}")]
    Unreadable(String),

    #[error("undeserializable payload: {0}")]
    Undeserializable(String),

    #[error("unsupported format version {0}")]
    UnsupportedVersion(u32),

    #[error("payload describes {found}, identifier says {expected}")]
    HeaderMismatch { expected: String, found: String },

    #[error("declared {declared} points but found {dates} dates and {values} values")]
    CountMismatch {
        declared: usize,
        dates: usize,
        values: usize,
    },

    #[error("dates not strictly ascending at index {0}")]
    Unsorted(usize),

    #[error("point dated {date} lies outside {interval}")]
    OutOfInterval { date: NaiveDate, interval: Interval },

    #[error("non-finite value at index {0}")]
    NonFinite(usize),

    #[error("checksum mismatch")]
    Checksum,
}

/// Decoded identifier of one entry: key plus covered interval.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntryId {
    pub key: CacheKey,
    pub interval: Interval,
}

impl EntryId {
    pub fn new(key: CacheKey, interval: Interval) -> Self {
        Self { key, interval }
    }

    /// Storage identifier for this entry.
    pub fn encode(&self) -> String {
        format!(
            "{}_{}_{}_{}{ENTRY_SUFFIX}",
            escape(self.key.symbol()),
            escape(self.key.field()),
            self.interval.start().format(DATE_FMT),
            self.interval.end().format(DATE_FMT),
        )
    }

    pub fn decode(id: &str) -> Result<Self, CorruptCacheEntry> {
        let bad = |reason: &str| CorruptCacheEntry::BadIdentifier {
            id: id.to_string(),
            reason: reason.to_string(),
        };

        let stem = id
            .strip_suffix(ENTRY_SUFFIX)
            .ok_or_else(|| bad("missing .json suffix"))?;
        let parts: Vec<&str> = stem.split('_').collect();
        let [symbol, field, start, end] = parts.as_slice() else {
            return Err(bad(&format!("expected 4 components, found {}", parts.len())));
        };

        let symbol = unescape(symbol).ok_or_else(|| bad("bad escape in symbol"))?;
        let field = unescape(field).ok_or_else(|| bad("bad escape in field"))?;
        let start = NaiveDate::parse_from_str(start, DATE_FMT).map_err(|e| bad(&format!("start date: {e}")))?;
        let end = NaiveDate::parse_from_str(end, DATE_FMT).map_err(|e| bad(&format!("end date: {e}")))?;

        let key = CacheKey::new(&symbol, &field).map_err(|e| bad(&e.to_string()))?;
        let interval = Interval::new(start, end).map_err(|e| bad(&e.to_string()))?;
        Ok(Self { key, interval })
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.key, self.interval)
    }
}

fn is_plain(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'.' | b'=' | b'^' | b'-')
}

/// Leading `.` is escaped as well: a component must never open a hidden file name.
fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for (i, b) in raw.bytes().enumerate() {
        if is_plain(b) && !(i == 0 && b == b'.') {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{b:02X}"));
        }
    }
    out
}

fn unescape(encoded: &str) -> Option<String> {
    if encoded.starts_with('.') {
        return None;
    }
    let bytes = encoded.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' => {
                let hex = encoded.get(i + 1..i + 3)?;
                if !hex.bytes().all(|h| h.is_ascii_hexdigit()) {
                    return None;
                }
                out.push(u8::from_str_radix(hex, 16).ok()?);
                i += 3;
            }
            b if is_plain(b) => {
                out.push(b);
                i += 1;
            }
            _ => return None,
        }
    }
    String::from_utf8(out).ok()
}

/// On-disk payload of one entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryRecord {
    pub format_version: u32,
    pub symbol: String,
    pub field: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub fetched_at: DateTime<Utc>,
    pub point_count: usize,
    pub dates: Vec<NaiveDate>,
    pub values: Vec<f64>,
    /// BLAKE3 over dates and values.
    pub checksum: String,
}

fn checksum(dates: &[NaiveDate], values: &[f64]) -> String {
    let mut hasher = blake3::Hasher::new();
    for (date, value) in dates.iter().zip(values) {
        hasher.update(date.format(DATE_FMT).to_string().as_bytes());
        hasher.update(&value.to_le_bytes());
    }
    hasher.finalize().to_hex().to_string()
}

impl EntryRecord {
    pub fn build(id: &EntryId, points: &[PricePoint], fetched_at: DateTime<Utc>) -> Self {
        let dates: Vec<NaiveDate> = points.iter().map(|p| p.date).collect();
        let values: Vec<f64> = points.iter().map(|p| p.value).collect();
        Self {
            format_version: FORMAT_VERSION,
            symbol: id.key.symbol().to_string(),
            field: id.key.field().to_string(),
            start: id.interval.start(),
            end: id.interval.end(),
            fetched_at,
            point_count: points.len(),
            checksum: checksum(&dates, &values),
            dates,
            values,
        }
    }

    /// Check every invariant against the identifier the record was stored under.
    pub fn validate(self, id: &EntryId) -> Result<CacheEntry, CorruptCacheEntry> {
        if self.format_version != FORMAT_VERSION {
            return Err(CorruptCacheEntry::UnsupportedVersion(self.format_version));
        }

        let header_matches = self.symbol == id.key.symbol()
            && self.field == id.key.field()
            && self.start == id.interval.start()
            && self.end == id.interval.end();
        if !header_matches {
            return Err(CorruptCacheEntry::HeaderMismatch {
                expected: id.to_string(),
                found: format!("{}/{} [{}, {}]", self.symbol, self.field, self.start, self.end),
            });
        }

        if self.point_count != self.dates.len() || self.point_count != self.values.len() {
            return Err(CorruptCacheEntry::CountMismatch {
                declared: self.point_count,
                dates: self.dates.len(),
                values: self.values.len(),
            });
        }

        if let Some(i) = self.dates.windows(2).position(|w| w[0] >= w[1]) {
            return Err(CorruptCacheEntry::Unsorted(i + 1));
        }
        if let Some(&date) = self.dates.iter().find(|d| !id.interval.contains_date(**d)) {
            return Err(CorruptCacheEntry::OutOfInterval {
                date,
                interval: id.interval,
            });
        }
        if let Some(i) = self.values.iter().position(|v| !v.is_finite()) {
            return Err(CorruptCacheEntry::NonFinite(i));
        }
        if checksum(&self.dates, &self.values) != self.checksum {
            return Err(CorruptCacheEntry::Checksum);
        }

        let points = self
            .dates
            .into_iter()
            .zip(self.values)
            .map(|(date, value)| PricePoint::new(date, value))
            .collect();

        Ok(CacheEntry {
            id: id.clone(),
            fetched_at: self.fetched_at,
            points,
        })
    }
}

/// A validated entry loaded from storage.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    id: EntryId,
    fetched_at: DateTime<Utc>,
    points: Vec<PricePoint>,
}

impl CacheEntry {
    pub fn id(&self) -> &EntryId {
        &self.id
    }

    pub fn key(&self) -> &CacheKey {
        &self.id.key
    }

    pub fn interval(&self) -> Interval {
        self.id.interval
    }

    pub fn fetched_at(&self) -> DateTime<Utc> {
        self.fetched_at
    }

    pub fn points(&self) -> &[PricePoint] {
        &self.points
    }

    pub fn point_count(&self) -> usize {
        self.points.len()
    }

    pub fn into_series(self) -> PriceSeries {
        PriceSeries::new(self.id.key.symbol(), self.id.key.field(), self.points)
    }
}
