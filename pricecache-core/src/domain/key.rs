//! Cache key: (symbol, field).

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    #[error("symbol must not be empty")]
    EmptySymbol,
    #[error("field must not be empty")]
    EmptyField,
}

/// Identifies one cached series. The symbol is trimmed and upper-cased;
/// the field keeps the caller's spelling (e.g. `Close`, `Adj Close`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey {
    symbol: String,
    field: String,
}

impl CacheKey {
    pub fn new(symbol: &str, field: &str) -> Result<Self, KeyError> {
        let symbol = symbol.trim();
        let field = field.trim();
        if symbol.is_empty() {
            return Err(KeyError::EmptySymbol);
        }
        if field.is_empty() {
            return Err(KeyError::EmptyField);
        }
        Ok(Self {
            symbol: symbol.to_uppercase(),
            field: field.to_string(),
        })
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn field(&self) -> &str {
        &self.field
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.symbol, self.field)
    }
}
