use tracing::{Span, field};

use super::TraceId;

/// Root span for one query resolution. `signature` and `source` are filled
/// in once known.
pub fn root_span(name: &'static str, trace_id: &TraceId) -> Span {
    tracing::info_span!(
        "root",
        name = %name,
        trace_id = %trace_id.as_str(),
        signature = field::Empty,
        source = field::Empty
    )
}

/// Child span (inherits trace_id from the enclosing root span).
pub fn child_span(name: &'static str) -> Span {
    tracing::info_span!("child", name = %name, source = field::Empty)
}
