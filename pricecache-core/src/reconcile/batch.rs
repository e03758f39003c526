//! Multi-symbol requests: per-symbol outcomes and progress reporting.

use super::{Fetched, ReconcileError};
use crate::domain::PriceSeries;
use std::collections::BTreeMap;

/// Result for one symbol of a batch.
#[derive(Debug)]
pub enum SymbolOutcome {
    Found(PriceSeries),
    NotFound,
    Failed(ReconcileError),
}

impl From<Result<Fetched, ReconcileError>> for SymbolOutcome {
    fn from(result: Result<Fetched, ReconcileError>) -> Self {
        match result {
            Ok(Fetched::Found(series)) => SymbolOutcome::Found(series),
            Ok(Fetched::NotFound) => SymbolOutcome::NotFound,
            Err(e) => SymbolOutcome::Failed(e),
        }
    }
}

impl SymbolOutcome {
    pub fn series(&self) -> Option<&PriceSeries> {
        match self {
            SymbolOutcome::Found(series) => Some(series),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&ReconcileError> {
        match self {
            SymbolOutcome::Failed(e) => Some(e),
            _ => None,
        }
    }
}

/// Outcomes of a batch, in request order.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub outcomes: Vec<(String, SymbolOutcome)>,
}

impl BatchReport {
    /// Successful symbols only.
    pub fn series(&self) -> BTreeMap<&str, &PriceSeries> {
        self.outcomes
            .iter()
            .filter_map(|(symbol, outcome)| outcome.series().map(|s| (symbol.as_str(), s)))
            .collect()
    }

    pub fn into_series(self) -> BTreeMap<String, PriceSeries> {
        self.outcomes
            .into_iter()
            .filter_map(|(symbol, outcome)| match outcome {
                SymbolOutcome::Found(series) => Some((symbol, series)),
                _ => None,
            })
            .collect()
    }

    pub fn outcome(&self, symbol: &str) -> Option<&SymbolOutcome> {
        self.outcomes
            .iter()
            .find(|(s, _)| s == symbol)
            .map(|(_, outcome)| outcome)
    }

    pub fn failures(&self) -> impl Iterator<Item = (&str, &ReconcileError)> {
        self.outcomes
            .iter()
            .filter_map(|(symbol, outcome)| outcome.error().map(|e| (symbol.as_str(), e)))
    }

    pub fn found_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, SymbolOutcome::Found(_)))
            .count()
    }

    pub fn not_found_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, SymbolOutcome::NotFound))
            .count()
    }

    pub fn failed_count(&self) -> usize {
        self.failures().count()
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed_count() == 0
    }
}

/// Progress callbacks for `Reconciler::fetch_many_with_progress`.
pub trait BatchProgress {
    fn on_start(&self, symbol: &str, index: usize, total: usize);

    fn on_complete(&self, symbol: &str, index: usize, total: usize, outcome: &SymbolOutcome);

    fn on_batch_complete(&self, report: &BatchReport);
}

/// Reports nothing.
pub struct SilentProgress;

impl BatchProgress for SilentProgress {
    fn on_start(&self, _symbol: &str, _index: usize, _total: usize) {}

    fn on_complete(&self, _symbol: &str, _index: usize, _total: usize, _outcome: &SymbolOutcome) {}

    fn on_batch_complete(&self, _report: &BatchReport) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::PricePoint;
    use chrono::NaiveDate;

    fn series(symbol: &str) -> PriceSeries {
        PriceSeries::new(
            symbol,
            "Close",
            vec![PricePoint::new(NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(), 1.0)],
        )
    }

    fn report() -> BatchReport {
        BatchReport {
            outcomes: vec![
                ("AAPL".into(), SymbolOutcome::Found(series("AAPL"))),
                ("GONE".into(), SymbolOutcome::NotFound),
                (
                    "BAD".into(),
                    SymbolOutcome::Failed(ReconcileError::FieldNotAvailable {
                        symbol: "BAD".into(),
                        field: "Close".into(),
                    }),
                ),
            ],
        }
    }

    #[test]
    fn counts_each_outcome_kind() {
        let r = report();
        assert_eq!(r.found_count(), 1);
        assert_eq!(r.not_found_count(), 1);
        assert_eq!(r.failed_count(), 1);
        assert!(!r.all_succeeded());
    }

    #[test]
    fn series_map_holds_only_successes() {
        let r = report();
        let map = r.series();
        assert_eq!(map.keys().copied().collect::<Vec<_>>(), vec!["AAPL"]);
        assert_eq!(r.into_series().len(), 1);
    }

    #[test]
    fn outcome_lookup_by_symbol() {
        let r = report();
        assert!(matches!(r.outcome("GONE"), Some(SymbolOutcome::NotFound)));
        assert!(r.outcome("MSFT").is_none());
    }
}
