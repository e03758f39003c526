//! Range classifier: how a cached interval relates to a requested one.
//!
//! Decision order (first match wins, all comparisons inclusive):
//! 1. disjoint → `Miss`
//! 2. identical bounds → `Exact`
//! 3. cache covers request → `Contains`
//! 4. cache covers the left part → `OverlapAfter`, gap is the trailing remainder
//! 5. cache covers the right part → `OverlapBefore`, gap is the leading remainder
//! 6. request strictly wider on both sides → `Miss`
//!
//! Case 6 is deliberately a full miss: the request is refetched in one call
//! rather than as two gaps.

use crate::domain::Interval;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Outcome of comparing a cached interval with a requested interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MatchResult {
    Exact,
    Contains,
    /// Cache covers the earlier part; `gap` is what follows it.
    OverlapAfter { gap: Interval },
    /// Cache covers the later part; `gap` is what precedes it.
    OverlapBefore { gap: Interval },
    Miss,
}

impl MatchResult {
    pub fn is_miss(&self) -> bool {
        matches!(self, MatchResult::Miss)
    }

    /// True when the cache alone answers the request.
    pub fn is_hit(&self) -> bool {
        matches!(self, MatchResult::Exact | MatchResult::Contains)
    }

    pub fn gap(&self) -> Option<Interval> {
        match self {
            MatchResult::OverlapAfter { gap } | MatchResult::OverlapBefore { gap } => Some(*gap),
            _ => None,
        }
    }

    /// Preference among candidates: lower is better.
    pub(crate) fn rank(&self) -> u8 {
        match self {
            MatchResult::Exact => 0,
            MatchResult::Contains => 1,
            MatchResult::OverlapAfter { .. } | MatchResult::OverlapBefore { .. } => 2,
            MatchResult::Miss => 3,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            MatchResult::Exact => "exact",
            MatchResult::Contains => "contains",
            MatchResult::OverlapAfter { .. } => "overlap_after",
            MatchResult::OverlapBefore { .. } => "overlap_before",
            MatchResult::Miss => "miss",
        }
    }
}

impl fmt::Display for MatchResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.gap() {
            Some(gap) => write!(f, "{} (gap {gap})", self.label()),
            None => f.write_str(self.label()),
        }
    }
}

/// Classify `cached` against `requested`.
pub fn classify(cached: &Interval, requested: &Interval) -> MatchResult {
    let (cs, ce) = (cached.start(), cached.end());
    let (rs, re) = (requested.start(), requested.end());

    if ce < rs || cs > re {
        return MatchResult::Miss;
    }
    if cs == rs && ce == re {
        return MatchResult::Exact;
    }
    if cs <= rs && ce >= re {
        return MatchResult::Contains;
    }
    if cs <= rs && ce < re {
        // ce >= rs and ce < re, so the day after ce is inside the request
        return match cached.after(re) {
            Some(gap) => MatchResult::OverlapAfter { gap },
            None => MatchResult::Miss,
        };
    }
    if cs > rs && ce >= re {
        return match cached.before(rs) {
            Some(gap) => MatchResult::OverlapBefore { gap },
            None => MatchResult::Miss,
        };
    }
    MatchResult::Miss
}
