//! Shared fixtures: a scripted in-memory price source that records its calls.

#![allow(dead_code)]

use chrono::{Datelike, NaiveDate, Weekday};
use pricecache_core::domain::{Interval, PricePoint};
use pricecache_core::source::{PriceSource, SourceError};
use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

pub fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

pub fn iv(a: (i32, u32, u32), b: (i32, u32, u32)) -> Interval {
    Interval::new(d(a.0, a.1, a.2), d(b.0, b.1, b.2)).unwrap()
}

/// One point per weekday in `interval`, valued by days since 2000-01-01 plus `offset`.
pub fn weekdays(interval: &Interval, offset: f64) -> Vec<PricePoint> {
    let base = d(2000, 1, 1);
    interval
        .start()
        .iter_days()
        .take_while(|day| *day <= interval.end())
        .filter(|day| !matches!(day.weekday(), Weekday::Sat | Weekday::Sun))
        .map(|day| PricePoint::new(day, (day - base).num_days() as f64 + offset))
        .collect()
}

/// Source backed by a fixed history per symbol. Every call is recorded.
#[derive(Default)]
pub struct ScriptedSource {
    history: BTreeMap<String, Vec<PricePoint>>,
    fields: Option<HashSet<String>>,
    failing: HashSet<String>,
    delay: Option<Duration>,
    calls: Mutex<Vec<(String, String, Interval)>>,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Give `symbol` a point on every weekday of `span`.
    pub fn with_history(mut self, symbol: &str, span: Interval) -> Self {
        self.history.insert(symbol.to_string(), weekdays(&span, 0.0));
        self
    }

    pub fn with_points(mut self, symbol: &str, points: Vec<PricePoint>) -> Self {
        self.history.insert(symbol.to_string(), points);
        self
    }

    /// Restrict the fields the source knows; others are `FieldNotAvailable`.
    pub fn with_fields(mut self, fields: &[&str]) -> Self {
        self.fields = Some(fields.iter().map(|f| f.to_string()).collect());
        self
    }

    /// Calls for `symbol` fail with a network error.
    pub fn failing(mut self, symbol: &str) -> Self {
        self.failing.insert(symbol.to_string());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<(String, String, Interval)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Intervals requested so far, in call order.
    pub fn requested(&self) -> Vec<Interval> {
        self.calls().into_iter().map(|(_, _, i)| i).collect()
    }
}

impl PriceSource for ScriptedSource {
    fn name(&self) -> &str {
        "scripted"
    }

    fn fetch(
        &self,
        symbol: &str,
        field: &str,
        interval: &Interval,
    ) -> Result<Vec<PricePoint>, SourceError> {
        self.calls
            .lock()
            .unwrap()
            .push((symbol.to_string(), field.to_string(), *interval));

        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        if self.failing.contains(symbol) {
            return Err(SourceError::NetworkUnreachable(format!("{symbol}: connection refused")));
        }
        if let Some(fields) = &self.fields {
            if !fields.contains(field) {
                return Err(SourceError::FieldNotAvailable {
                    symbol: symbol.to_string(),
                    field: field.to_string(),
                });
            }
        }
        let history = self.history.get(symbol).ok_or_else(|| SourceError::SymbolNotFound {
            symbol: symbol.to_string(),
        })?;
        Ok(history
            .iter()
            .filter(|p| interval.contains_date(p.date))
            .copied()
            .collect())
    }
}
