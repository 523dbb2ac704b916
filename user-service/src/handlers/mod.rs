pub mod system_handlers;
pub mod user_handlers;

use user_api_shared::telemetry::RequestSpan;

use crate::error::AppError;

/// Marks the request span as failed with the client-facing message.
pub(crate) fn fail_span(span: &RequestSpan, err: impl Into<AppError>) -> AppError {
    let err = err.into();
    span.fail(err.public_message());
    err
}
