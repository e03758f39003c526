//! Combining cached and freshly fetched points.

use crate::domain::series::normalize;
use crate::domain::{Interval, PricePoint};

/// Merge two date-sorted, date-unique point lists. On a shared date the
/// fetched point replaces the cached one.
pub fn merge_points(cached: &[PricePoint], fetched: &[PricePoint]) -> Vec<PricePoint> {
    let mut out = Vec::with_capacity(cached.len() + fetched.len());
    let (mut i, mut j) = (0, 0);
    while i < cached.len() && j < fetched.len() {
        let (c, f) = (cached[i], fetched[j]);
        if c.date < f.date {
            out.push(c);
            i += 1;
        } else {
            if c.date == f.date {
                i += 1;
            }
            out.push(f);
            j += 1;
        }
    }
    out.extend_from_slice(&cached[i..]);
    out.extend_from_slice(&fetched[j..]);
    out
}

/// Clean raw source output: drop non-finite values and anything outside
/// `interval`, then sort and dedup. Returns the cleaned points and how many
/// non-finite values were dropped.
pub(crate) fn sanitize(points: Vec<PricePoint>, interval: &Interval) -> (Vec<PricePoint>, usize) {
    let before = points.len();
    let finite: Vec<PricePoint> = points.into_iter().filter(|p| p.value.is_finite()).collect();
    let dropped = before - finite.len();
    let inside = finite
        .into_iter()
        .filter(|p| interval.contains_date(p.date))
        .collect();
    (normalize(inside), dropped)
}
