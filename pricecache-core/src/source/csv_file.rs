//! CSV import source and series export.
//!
//! Reads `{dir}/{SYMBOL}.csv` files with a `Date` column and one column per
//! field, the layout Yahoo's download button and most brokers produce:
//!
//! ```text
//! Date,Open,High,Low,Close,Adj Close,Volume
//! 2024-01-02,187.15,188.44,183.89,185.64,184.94,82488700
//! ```

use super::{PriceSource, SourceError};
use crate::domain::{Interval, PricePoint, PriceSeries};
use chrono::NaiveDate;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

pub struct CsvSource {
    dir: PathBuf,
}

impl CsvSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// `None` when the symbol cannot name a file directly inside `dir`.
    fn path_for(&self, symbol: &str) -> Option<PathBuf> {
        if symbol.is_empty() || symbol.starts_with('.') || symbol.contains(['/', '\\']) {
            return None;
        }
        Some(self.dir.join(format!("{symbol}.csv")))
    }
}

/// Normalize a header for comparison: `Adj Close`, `adj_close` and `AdjClose` agree.
fn fold(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    // tolerate timestamps such as 2024-01-02 00:00:00-05:00
    let head = raw.trim().get(..10)?;
    NaiveDate::parse_from_str(head, "%Y-%m-%d").ok()
}

/// Parse CSV content for one symbol and field.
pub fn read_points<R: Read>(
    reader: R,
    symbol: &str,
    field: &str,
    interval: &Interval,
) -> Result<Vec<PricePoint>, SourceError> {
    let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let headers = rdr
        .headers()
        .map_err(|e| SourceError::ResponseFormatChanged(format!("csv header: {e}")))?
        .clone();

    let date_col = headers
        .iter()
        .position(|h| fold(h) == "date")
        .ok_or_else(|| SourceError::ResponseFormatChanged("csv has no Date column".into()))?;
    let wanted = fold(field);
    let value_col = headers
        .iter()
        .position(|h| h == field)
        .or_else(|| headers.iter().position(|h| fold(h) == wanted))
        .ok_or_else(|| SourceError::FieldNotAvailable {
            symbol: symbol.to_string(),
            field: field.to_string(),
        })?;

    let mut points = Vec::new();
    for (row, record) in rdr.records().enumerate() {
        let record =
            record.map_err(|e| SourceError::ResponseFormatChanged(format!("csv row {row}: {e}")))?;
        let date_raw = record.get(date_col).unwrap_or_default();
        let date = parse_date(date_raw).ok_or_else(|| {
            SourceError::ResponseFormatChanged(format!("csv row {row}: bad date '{date_raw}'"))
        })?;
        if !interval.contains_date(date) {
            continue;
        }
        let cell = record.get(value_col).unwrap_or_default();
        if cell.is_empty() || cell.eq_ignore_ascii_case("null") {
            continue;
        }
        let value: f64 = cell.parse().map_err(|_| {
            SourceError::ResponseFormatChanged(format!("csv row {row}: bad value '{cell}'"))
        })?;
        points.push(PricePoint::new(date, value));
    }
    Ok(points)
}

impl PriceSource for CsvSource {
    fn name(&self) -> &str {
        "csv_import"
    }

    fn fetch(
        &self,
        symbol: &str,
        field: &str,
        interval: &Interval,
    ) -> Result<Vec<PricePoint>, SourceError> {
        let Some(path) = self.path_for(symbol) else {
            tracing::debug!(symbol, "symbol is not a valid csv file name");
            return Err(SourceError::SymbolNotFound {
                symbol: symbol.to_string(),
            });
        };
        let file = match std::fs::File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SourceError::SymbolNotFound {
                    symbol: symbol.to_string(),
                })
            }
            Err(e) => return Err(SourceError::Io(format!("{}: {e}", path.display()))),
        };
        read_points(file, symbol, field, interval)
    }
}

/// Write a series as `Date,<field>` CSV.
pub fn write_series<W: Write>(series: &PriceSeries, writer: W) -> Result<(), csv::Error> {
    let mut wtr = csv::Writer::from_writer(writer);
    wtr.write_record(["Date", series.field()])?;
    for p in series.points() {
        wtr.write_record([p.date.format("%Y-%m-%d").to_string(), p.value.to_string()])?;
    }
    wtr.flush()?;
    Ok(())
}

/// Write a series to `{dir}/{SYMBOL}_{field}.csv`, returning the path.
pub fn export_series(series: &PriceSeries, dir: &Path) -> Result<PathBuf, csv::Error> {
    std::fs::create_dir_all(dir)?;
    let field: String = series
        .field()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    let symbol: String = series
        .symbol()
        .chars()
        .enumerate()
        .map(|(i, c)| match c {
            '.' if i == 0 => '_',
            '/' | '\\' => '_',
            c => c,
        })
        .collect();
    let path = dir.join(format!("{symbol}_{field}.csv"));
    let file = std::fs::File::create(&path)?;
    write_series(series, file)?;
    Ok(path)
}
