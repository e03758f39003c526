//! Deterministic synthetic source for offline demos and tests.
//!
//! Produces a weekday-only random walk per symbol, seeded from the symbol
//! name. The walk always starts at a fixed epoch, so the value for a given
//! (symbol, date) is the same whatever interval is requested; gap fetches
//! therefore line up with earlier fetches.

use super::{standard_field, PriceSource, SourceError};
use crate::domain::{Interval, PricePoint};
use chrono::{Datelike, Duration, NaiveDate, Weekday};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub struct SyntheticSource {
    epoch: NaiveDate,
}

impl SyntheticSource {
    pub fn new() -> Self {
        Self {
            epoch: NaiveDate::from_ymd_opt(2000, 1, 3).unwrap_or_default(),
        }
    }
}

impl Default for SyntheticSource {
    fn default() -> Self {
        Self::new()
    }
}

struct SyntheticBar {
    date: NaiveDate,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
}

impl SyntheticBar {
    fn field(&self, canonical: &str) -> f64 {
        match canonical {
            "Open" => self.open,
            "High" => self.high,
            "Low" => self.low,
            "Volume" => self.volume,
            _ => self.close,
        }
    }
}

fn walk(symbol: &str, epoch: NaiveDate, until: NaiveDate) -> impl Iterator<Item = SyntheticBar> {
    let seed: [u8; 32] = *blake3::hash(symbol.as_bytes()).as_bytes();
    let mut rng = StdRng::from_seed(seed);
    let mut price = 100.0_f64;
    let mut current = epoch;

    std::iter::from_fn(move || {
        while current <= until {
            let date = current;
            current += Duration::days(1);
            if matches!(date.weekday(), Weekday::Sat | Weekday::Sun) {
                continue;
            }

            let daily_return: f64 = rng.gen_range(-0.03..0.03);
            let open = price;
            let close = price * (1.0 + daily_return);
            let high = open.max(close) * (1.0 + rng.gen_range(0.0..0.01));
            let low = open.min(close) * (1.0 - rng.gen_range(0.0..0.01));
            let volume = rng.gen_range(500_000..5_000_000u64) as f64;
            price = close;

            return Some(SyntheticBar {
                date,
                open,
                high,
                low,
                close,
                volume,
            });
        }
        None
    })
}

impl PriceSource for SyntheticSource {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn fetch(
        &self,
        symbol: &str,
        field: &str,
        interval: &Interval,
    ) -> Result<Vec<PricePoint>, SourceError> {
        let canonical = standard_field(field).ok_or_else(|| SourceError::FieldNotAvailable {
            symbol: symbol.to_string(),
            field: field.to_string(),
        })?;

        Ok(walk(symbol, self.epoch, interval.end())
            .filter(|bar| interval.contains_date(bar.date))
            .map(|bar| PricePoint::new(bar.date, bar.field(canonical)))
            .collect())
    }
}
