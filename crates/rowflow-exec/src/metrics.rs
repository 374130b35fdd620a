//! Metrics hooks.
//!
//! Counter snapshots are emitted as trace-level events inside a `rowflow`
//! span; an exporter layer in the binary can turn them into real metrics.

pub fn emit_span(event: &str, key_values: &[(&str, String)]) {
    let span = tracing::trace_span!("rowflow", event);
    let _guard = span.enter();
    for (k, v) in key_values {
        tracing::trace!(%event, key = %k, value = %v, "metric");
    }
}
