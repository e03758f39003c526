//! Price series value object returned to callers.

use super::interval::Interval;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// One dated observation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub date: NaiveDate,
    pub value: f64,
}

impl PricePoint {
    pub fn new(date: NaiveDate, value: f64) -> Self {
        Self { date, value }
    }
}

/// Named daily series for one symbol and field.
///
/// Points are kept sorted ascending by date with one point per date.
/// Construction normalizes input; on duplicate dates the later point in the
/// input wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceSeries {
    symbol: String,
    field: String,
    points: Vec<PricePoint>,
}

impl PriceSeries {
    pub fn new(symbol: impl Into<String>, field: impl Into<String>, points: Vec<PricePoint>) -> Self {
        Self {
            symbol: symbol.into(),
            field: field.into(),
            points: normalize(points),
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn points(&self) -> &[PricePoint] {
        &self.points
    }

    pub fn into_points(self) -> Vec<PricePoint> {
        self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn dates(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.points.iter().map(|p| p.date)
    }

    pub fn values(&self) -> impl Iterator<Item = f64> + '_ {
        self.points.iter().map(|p| p.value)
    }

    pub fn first(&self) -> Option<&PricePoint> {
        self.points.first()
    }

    pub fn last(&self) -> Option<&PricePoint> {
        self.points.last()
    }

    /// Value on an exact date, if observed.
    pub fn value_on(&self, date: NaiveDate) -> Option<f64> {
        self.points
            .binary_search_by_key(&date, |p| p.date)
            .ok()
            .map(|i| self.points[i].value)
    }

    /// Date span actually observed (first to last point).
    pub fn observed_span(&self) -> Option<Interval> {
        let first = self.points.first()?;
        let last = self.points.last()?;
        Interval::new(first.date, last.date).ok()
    }

    /// Copy of the points falling inside `interval`.
    pub fn slice(&self, interval: &Interval) -> PriceSeries {
        PriceSeries {
            symbol: self.symbol.clone(),
            field: self.field.clone(),
            points: slice_points(&self.points, interval).to_vec(),
        }
    }

    /// last / first - 1. `None` for fewer than two points or a zero first value.
    pub fn total_return(&self) -> Option<f64> {
        if self.points.len() < 2 {
            return None;
        }
        let first = self.points.first()?.value;
        let last = self.points.last()?.value;
        if first == 0.0 {
            return None;
        }
        Some(last / first - 1.0)
    }

    /// Simple period-over-period returns; length is `len() - 1`.
    pub fn returns(&self) -> Vec<f64> {
        self.points
            .windows(2)
            .map(|w| w[1].value / w[0].value - 1.0)
            .collect()
    }
}

/// Sub-slice of sorted points inside `interval` (binary search on both ends).
pub(crate) fn slice_points<'a>(points: &'a [PricePoint], interval: &Interval) -> &'a [PricePoint] {
    let lo = points.partition_point(|p| p.date < interval.start());
    let hi = points.partition_point(|p| p.date <= interval.end());
    &points[lo..hi]
}

/// Sort ascending by date and keep the last occurrence of each date.
pub(crate) fn normalize(mut points: Vec<PricePoint>) -> Vec<PricePoint> {
    // stable sort keeps input order among equal dates
    points.sort_by_key(|p| p.date);
    let mut out: Vec<PricePoint> = Vec::with_capacity(points.len());
    for p in points {
        match out.last_mut() {
            Some(prev) if prev.date == p.date => *prev = p,
            _ => out.push(p),
        }
    }
    out
}
