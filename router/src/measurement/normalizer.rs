//! Shared result contract for every source.
//!
//! Both adapters hand their decoded measurements to [`finalize`], which is the
//! only place that filters to the query window, projects values onto the
//! requested parameters, orders, and applies the result ceiling. A result from
//! the live provider and one from the replica are therefore shaped and ordered
//! identically.

use std::cmp::Ordering;

use crate::measurement::model::Measurement;
use crate::query::Query;

/// Output of [`finalize`].
#[derive(Debug, Clone, PartialEq)]
pub struct Normalized {
    pub measurements: Vec<Measurement>,
    pub truncated: bool,
}

/// Timestamp descending, then platform id ascending. Depth and position break
/// any remaining tie so the order is total.
pub fn canonical_order(a: &Measurement, b: &Measurement) -> Ordering {
    b.observed_at()
        .cmp(&a.observed_at())
        .then_with(|| a.platform_id().cmp(b.platform_id()))
        .then_with(|| a.depth_m().total_cmp(&b.depth_m()))
        .then_with(|| a.latitude().total_cmp(&b.latitude()))
        .then_with(|| a.longitude().total_cmp(&b.longitude()))
}

pub fn is_canonically_ordered(ms: &[Measurement]) -> bool {
    ms.windows(2)
        .all(|w| canonical_order(&w[0], &w[1]) != Ordering::Greater)
}

pub fn finalize(measurements: Vec<Measurement>, query: &Query) -> Normalized {
    let params = query.parameters();

    let mut out: Vec<Measurement> = measurements
        .into_iter()
        .filter(|m| query.covers(m.latitude(), m.longitude(), m.depth_m(), m.observed_at()))
        .filter(|m| m.measures_any(params))
        .map(|m| m.project(params))
        .collect();

    out.sort_by(canonical_order);

    let truncated = out.len() > query.max_results();
    out.truncate(query.max_results());

    Normalized {
        measurements: out,
        truncated,
    }
}

/// Sufficiency rule for the live path: at least one measurement in the window
/// carries a value for a requested parameter.
pub fn is_sufficient(normalized: &Normalized, query: &Query) -> bool {
    normalized
        .measurements
        .iter()
        .any(|m| m.measures_any(query.parameters()))
}
