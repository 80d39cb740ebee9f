//! Nearest-time join of two series.

use backfill_core::{Series, TimePoint};
use chrono::{DateTime, Duration, Utc};

/// Index into `other` of the point nearest to `ts` within `tolerance`.
/// Ties go to the earlier point.
fn nearest(other: &[TimePoint], ts: DateTime<Utc>, tolerance: Duration) -> Option<usize> {
    let idx = other.partition_point(|p| p.timestamp < ts);

    let before = idx.checked_sub(1).map(|i| (i, ts - other[i].timestamp));
    let after = other.get(idx).map(|p| (idx, p.timestamp - ts));

    let best = match (before, after) {
        (Some(b), Some(a)) => {
            if a.1 < b.1 {
                a
            } else {
                b
            }
        }
        (Some(b), None) => b,
        (None, Some(a)) => a,
        (None, None) => return None,
    };

    (best.1 <= tolerance).then_some(best.0)
}

/// Copies fields from `other` onto each point of `driving`, taking the
/// nearest `other` point within `tolerance`.
///
/// `fields` maps an `other` field name to its name in the output. Rows
/// without a match keep only their own fields. The result keeps the driving
/// series' metadata.
#[must_use]
pub fn nearest_join(
    driving: &Series,
    other: &Series,
    tolerance: Duration,
    fields: &[(&str, &str)],
) -> Series {
    let candidates = other.points();

    let points = driving
        .points()
        .iter()
        .map(|point| {
            let mut joined = point.clone();
            if let Some(i) = nearest(candidates, point.timestamp, tolerance) {
                for (from, to) in fields {
                    if let Some(v) = candidates[i].get(from) {
                        joined.set(*to, v);
                    }
                }
            }
            joined
        })
        .collect();

    Series::from_points(driving.meta().clone(), points)
}
