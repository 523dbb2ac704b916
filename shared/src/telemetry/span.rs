use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use http::StatusCode;
use tracing::field::Empty;
use tracing::Span;

use super::redact::email_domain;
use super::Telemetry;

/// Per-request trace span handed to handlers through request extensions.
///
/// Handlers annotate it with the operation they perform and safe identifying
/// attributes. Raw emails are never recorded; `set_email_domain` stores the
/// domain only.
#[derive(Clone, Debug)]
pub struct RequestSpan {
    span: Span,
    failure: Arc<Mutex<Option<String>>>,
}

impl RequestSpan {
    pub fn new(method: &str, route: &str) -> Self {
        let span = tracing::info_span!(
            "http_request",
            http.method = %method,
            http.route = %route,
            operation = Empty,
            user.id = Empty,
            user.email.domain = Empty,
            http.status_code = Empty,
            otel.status_code = Empty,
            error.message = Empty,
            duration_ms = Empty,
        );

        Self {
            span,
            failure: Arc::new(Mutex::new(None)),
        }
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn set_operation(&self, operation: &'static str) {
        self.span.record("operation", operation);
    }

    pub fn set_user_id(&self, id: i64) {
        self.span.record("user.id", id);
    }

    pub fn set_email_domain(&self, email: &str) {
        self.span
            .record("user.email.domain", email_domain(email).as_str());
    }

    /// Marks the request as failed with a message for the span status.
    pub fn fail(&self, message: impl Into<String>) {
        if let Ok(mut failure) = self.failure.lock() {
            *failure = Some(message.into());
        }
    }

    /// The message recorded by `fail`, if any
    pub fn failure(&self) -> Option<String> {
        self.failure.lock().ok().and_then(|failure| failure.clone())
    }

    fn close(&self, status: &str, elapsed: Duration, error: Option<&str>) {
        self.span.record("http.status_code", status);
        self.span.record("duration_ms", elapsed.as_millis() as u64);

        match error {
            Some(message) => {
                self.span.record("otel.status_code", "ERROR");
                self.span.record("error.message", message);
                self.span.in_scope(|| {
                    tracing::warn!(status, error = message, "Request failed");
                });
            }
            None => {
                self.span.record("otel.status_code", "OK");
                self.span.in_scope(|| {
                    tracing::info!(status, "Request completed");
                });
            }
        }
    }
}

/// Guard that records the request duration and closes the span.
///
/// Recording happens on drop, so a request whose future is dropped before a
/// response exists is still accounted for, with status `cancelled`.
pub struct RequestTimer {
    telemetry: Telemetry,
    method: String,
    route: String,
    span: RequestSpan,
    started: Instant,
    status: Option<StatusCode>,
}

impl RequestTimer {
    pub fn start(telemetry: Telemetry, method: String, route: String, span: RequestSpan) -> Self {
        Self {
            telemetry,
            method,
            route,
            span,
            started: Instant::now(),
            status: None,
        }
    }

    /// Stops the timer with the final response status.
    pub fn finish(mut self, status: StatusCode) {
        self.status = Some(status);
    }
}

impl Drop for RequestTimer {
    fn drop(&mut self) {
        let elapsed = self.started.elapsed();
        let status_label = match self.status {
            Some(status) => status.as_str().to_string(),
            None => "cancelled".to_string(),
        };

        self.telemetry
            .observe_duration(&self.method, &self.route, &status_label, elapsed);

        let error = match self.status {
            Some(status) if status.is_client_error() || status.is_server_error() => {
                Some(self.span.failure().unwrap_or_else(|| {
                    status
                        .canonical_reason()
                        .unwrap_or("Request failed")
                        .to_string()
                }))
            }
            Some(_) => None,
            None => Some("Request cancelled".to_string()),
        };

        self.span.close(&status_label, elapsed, error.as_deref());
    }
}
