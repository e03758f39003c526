//! Yahoo Finance price source.
//!
//! Fetches daily bars from Yahoo's v8 chart API and extracts one field. Handles
//! rate limiting, retries with exponential backoff, response parsing and the
//! circuit breaker.
//!
//! Yahoo Finance has no official API and is subject to unannounced format
//! changes. `CsvSource` is the fallback when Yahoo is unavailable.

use super::circuit_breaker::CircuitBreaker;
use super::{standard_field, PriceSource, SourceError};
use crate::config::YahooConfig;
use crate::domain::{Interval, PricePoint};
use chrono::NaiveDate;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: ChartResult,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    result: Option<Vec<ChartData>>,
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    code: String,
    description: String,
}

#[derive(Debug, Deserialize)]
struct ChartData {
    meta: Option<ChartMeta>,
    timestamp: Option<Vec<i64>>,
    indicators: Indicators,
}

#[derive(Debug, Deserialize)]
struct ChartMeta {
    gmtoffset: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    quote: Vec<QuoteData>,
    adjclose: Option<Vec<AdjCloseData>>,
}

#[derive(Debug, Default, Deserialize)]
struct QuoteData {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<f64>>,
}

#[derive(Debug, Deserialize)]
struct AdjCloseData {
    adjclose: Vec<Option<f64>>,
}

pub struct YahooSource {
    client: reqwest::blocking::Client,
    circuit_breaker: Arc<CircuitBreaker>,
    max_retries: u32,
    base_delay: Duration,
}

impl YahooSource {
    pub fn new(config: &YahooConfig, circuit_breaker: Arc<CircuitBreaker>) -> Result<Self, SourceError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36")
            .build()
            .map_err(|e| SourceError::Other(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            circuit_breaker,
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.base_delay_ms),
        })
    }

    fn chart_url(symbol: &str, interval: &Interval) -> String {
        let start_ts = day_start_ts(interval.start());
        let end_ts = day_start_ts(interval.end()) + 86_399;
        format!(
            "https://query2.finance.yahoo.com/v8/finance/chart/{symbol}\
             ?period1={start_ts}&period2={end_ts}&interval=1d\
             &includeAdjustedClose=true"
        )
    }

    /// Extract `field` from a chart response, keeping only dates inside `interval`.
    fn parse_response(
        symbol: &str,
        field: &str,
        interval: &Interval,
        resp: ChartResponse,
    ) -> Result<Vec<PricePoint>, SourceError> {
        let canonical = standard_field(field).ok_or_else(|| SourceError::FieldNotAvailable {
            symbol: symbol.to_string(),
            field: field.to_string(),
        })?;

        let result = resp.chart.result.ok_or_else(|| match resp.chart.error {
            Some(err) if err.code == "Not Found" => SourceError::SymbolNotFound {
                symbol: symbol.to_string(),
            },
            Some(err) => SourceError::ResponseFormatChanged(format!("{}: {}", err.code, err.description)),
            None => SourceError::ResponseFormatChanged("empty result with no error".into()),
        })?;

        let data = result
            .into_iter()
            .next()
            .ok_or_else(|| SourceError::ResponseFormatChanged("result array is empty".into()))?;

        // No timestamps means nothing traded in the range.
        let Some(timestamps) = data.timestamp else {
            return Ok(Vec::new());
        };
        let offset = data.meta.and_then(|m| m.gmtoffset).unwrap_or(0);

        let quote = data.indicators.quote.into_iter().next().unwrap_or_default();
        let column: Vec<Option<f64>> = match canonical {
            "Open" => quote.open,
            "High" => quote.high,
            "Low" => quote.low,
            "Close" => quote.close,
            "Volume" => quote.volume,
            _ => data
                .indicators
                .adjclose
                .and_then(|v| v.into_iter().next())
                .map(|a| a.adjclose)
                .unwrap_or_default(),
        };

        if column.is_empty() && !timestamps.is_empty() {
            return Err(SourceError::FieldNotAvailable {
                symbol: symbol.to_string(),
                field: field.to_string(),
            });
        }

        let mut points = Vec::with_capacity(timestamps.len());
        for (i, &ts) in timestamps.iter().enumerate() {
            let date = chrono::DateTime::from_timestamp(ts + offset, 0)
                .map(|dt| dt.naive_utc().date())
                .ok_or_else(|| SourceError::ResponseFormatChanged(format!("invalid timestamp: {ts}")))?;

            // holidays and halted sessions come back as nulls
            let Some(value) = column.get(i).copied().flatten() else {
                continue;
            };
            if interval.contains_date(date) {
                points.push(PricePoint::new(date, value));
            }
        }

        Ok(points)
    }

    fn fetch_with_retry(
        &self,
        symbol: &str,
        field: &str,
        interval: &Interval,
    ) -> Result<Vec<PricePoint>, SourceError> {
        if !self.circuit_breaker.is_allowed() {
            return Err(SourceError::CircuitBreakerTripped);
        }

        let url = Self::chart_url(symbol, interval);
        let mut last_error = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = self.base_delay * 2u32.pow(attempt - 1);
                tracing::debug!(symbol, attempt, delay_ms = delay.as_millis() as u64, "retrying yahoo request");
                std::thread::sleep(delay);
            }

            if !self.circuit_breaker.is_allowed() {
                return Err(SourceError::CircuitBreakerTripped);
            }

            let resp = match self.client.get(&url).send() {
                Ok(resp) => resp,
                Err(e) if e.is_connect() || e.is_timeout() => {
                    last_error = Some(SourceError::NetworkUnreachable(e.to_string()));
                    continue;
                }
                Err(e) => return Err(SourceError::NetworkUnreachable(e.to_string())),
            };

            let status = resp.status();

            if status == reqwest::StatusCode::FORBIDDEN {
                self.circuit_breaker.trip();
                return Err(SourceError::CircuitBreakerTripped);
            }

            if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                self.circuit_breaker.record_failure();
                let retry_after = resp
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                    .unwrap_or(60);
                last_error = Some(SourceError::RateLimited {
                    retry_after_secs: retry_after,
                });
                continue;
            }

            if status == reqwest::StatusCode::NOT_FOUND {
                return Err(SourceError::SymbolNotFound {
                    symbol: symbol.to_string(),
                });
            }

            if !status.is_success() {
                self.circuit_breaker.record_failure();
                last_error = Some(SourceError::Other(format!("HTTP {status} for {symbol}")));
                continue;
            }

            let chart: ChartResponse = resp.json().map_err(|e| {
                SourceError::ResponseFormatChanged(format!("failed to parse response for {symbol}: {e}"))
            })?;

            let points = Self::parse_response(symbol, field, interval, chart)?;
            self.circuit_breaker.record_success();
            return Ok(points);
        }

        Err(last_error.unwrap_or_else(|| SourceError::Other("max retries exceeded".into())))
    }
}

fn day_start_ts(date: NaiveDate) -> i64 {
    date.and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc().timestamp())
        .unwrap_or_default()
}

impl PriceSource for YahooSource {
    fn name(&self) -> &str {
        "yahoo_finance"
    }

    fn fetch(
        &self,
        symbol: &str,
        field: &str,
        interval: &Interval,
    ) -> Result<Vec<PricePoint>, SourceError> {
        if standard_field(field).is_none() {
            return Err(SourceError::FieldNotAvailable {
                symbol: symbol.to_string(),
                field: field.to_string(),
            });
        }
        tracing::debug!(symbol, field, %interval, "fetching from yahoo");
        self.fetch_with_retry(symbol, field, interval)
    }

    fn is_available(&self) -> bool {
        self.circuit_breaker.is_allowed()
    }
}
