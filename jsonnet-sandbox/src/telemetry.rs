use crate::error::Error;
use tracing::Span;

/// Records the outcome of an operation on its span. The span must declare
/// `otel.status_code` and `error` as empty fields.
pub(crate) fn record_result<T>(span: &Span, result: &Result<T, Error>) {
    match result {
        Ok(_) => {
            span.record("otel.status_code", "OK");
        }
        Err(e) => {
            span.record("otel.status_code", "ERROR");
            span.record("error", tracing::field::display(e));
        }
    }
}
