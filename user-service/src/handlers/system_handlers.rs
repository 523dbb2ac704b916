use axum::{
    extract::{Extension, State},
    http::header,
    response::IntoResponse,
};
use prometheus::TEXT_FORMAT;

use super::fail_span;
use crate::error::{AppError, Result};
use user_api_shared::telemetry::{RequestSpan, Telemetry};

// GET /health
pub async fn health(Extension(span): Extension<RequestSpan>) -> &'static str {
    span.set_operation("health_check");
    "Healthy"
}

// GET /metrics
pub async fn metrics(
    State(telemetry): State<Telemetry>,
    Extension(span): Extension<RequestSpan>,
) -> Result<impl IntoResponse> {
    span.set_operation("metrics");

    let body = telemetry.render().map_err(|e| {
        fail_span(
            &span,
            AppError::internal("An error occurred while encoding metrics", e),
        )
    })?;

    Ok(([(header::CONTENT_TYPE, TEXT_FORMAT)], body))
}
