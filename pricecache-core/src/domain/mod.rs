//! Domain types: intervals, cache keys, price series.

pub mod interval;
pub mod key;
pub mod series;

pub use interval::{Interval, InvalidInterval};
pub use key::{CacheKey, KeyError};
pub use series::{PricePoint, PriceSeries};
