//! Request telemetry: a request counter, a duration histogram and a trace
//! span for every inbound request.
//!
//! The metrics live in a [`Telemetry`] handle that owns its own
//! `prometheus::Registry`. Build one at start-up and hand it to
//! [`telemetry_middleware`] with `axum::middleware::from_fn_with_state`.
//! The middleware only observes: it never alters the handler's response.

use std::time::Duration;

use axum::{
    extract::{MatchedPath, Request, State},
    middleware::Next,
    response::Response,
};
use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};
use tracing::Instrument;

pub mod redact;
pub mod span;

pub use span::{RequestSpan, RequestTimer};

const REQUESTS_TOTAL: &str = "user_api_http_requests_total";
const REQUEST_DURATION: &str = "user_api_http_request_duration_seconds";
/// Path label for requests no route matched
pub const UNMATCHED_PATH: &str = "unmatched";

// Tuned for a service answering from memory or a single DynamoDB round trip
const DURATION_BUCKETS: &[f64] = &[
    0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Shared, cheaply cloneable handle over the request metrics.
#[derive(Clone)]
pub struct Telemetry {
    registry: Registry,
    requests_total: IntCounterVec,
    request_duration: HistogramVec,
}

impl Telemetry {
    /// Create the request metrics and register them with the given registry.
    ///
    /// # Errors
    ///
    /// Returns an error if a metric with the same name is already registered.
    pub fn new(registry: Registry) -> Result<Self, prometheus::Error> {
        let requests_total = IntCounterVec::new(
            Opts::new(REQUESTS_TOTAL, "Total HTTP requests by method and path"),
            &["method", "path"],
        )?;
        let request_duration = HistogramVec::new(
            HistogramOpts::new(
                REQUEST_DURATION,
                "HTTP request duration in seconds by method, path and status code",
            )
            .buckets(DURATION_BUCKETS.to_vec()),
            &["method", "path", "status_code"],
        )?;

        registry.register(Box::new(requests_total.clone()))?;
        registry.register(Box::new(request_duration.clone()))?;

        Ok(Self {
            registry,
            requests_total,
            request_duration,
        })
    }

    pub fn count_request(&self, method: &str, path: &str) {
        self.requests_total.with_label_values(&[method, path]).inc();
    }

    pub fn observe_duration(&self, method: &str, path: &str, status_code: &str, elapsed: Duration) {
        self.request_duration
            .with_label_values(&[method, path, status_code])
            .observe(elapsed.as_secs_f64());
    }

    /// Number of requests counted for a method and path
    pub fn request_count(&self, method: &str, path: &str) -> u64 {
        self.requests_total.with_label_values(&[method, path]).get()
    }

    /// Number of duration samples recorded for a method, path and status code
    pub fn duration_sample_count(&self, method: &str, path: &str, status_code: &str) -> u64 {
        self.request_duration
            .with_label_values(&[method, path, status_code])
            .get_sample_count()
    }

    /// Renders every metric in the registry in the Prometheus text format.
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

/// Middleware recording the counter, histogram and span for each request.
///
/// The path label is the matched route template (`/api/user/:id`), never the
/// raw URI. Requests no route matched share the `unmatched` label.
pub async fn telemetry_middleware(
    State(telemetry): State<Telemetry>,
    matched_path: Option<MatchedPath>,
    mut request: Request,
    next: Next,
) -> Response {
    let method = request.method().to_string();
    let path = matched_path
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| UNMATCHED_PATH.to_string());

    telemetry.count_request(&method, &path);

    let span = RequestSpan::new(&method, &path);
    request.extensions_mut().insert(span.clone());
    let timer = RequestTimer::start(telemetry, method, path, span.clone());

    let response = next.run(request).instrument(span.span().clone()).await;

    timer.finish(response.status());
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        extract::Extension,
        http::{Request as HttpRequest, StatusCode},
        middleware,
        routing::get,
        Router,
    };
    use tower::ServiceExt;

    async fn ok_handler() -> &'static str {
        "ok"
    }

    async fn failing_handler(Extension(span): Extension<RequestSpan>) -> StatusCode {
        span.set_operation("get_user");
        span.set_user_id(7);
        span.fail("User not found");
        StatusCode::NOT_FOUND
    }

    fn test_app(telemetry: Telemetry) -> Router {
        Router::new()
            .route("/items", get(ok_handler))
            .route("/items/:id", get(failing_handler))
            .fallback(|| async { StatusCode::NOT_FOUND })
            .layer(middleware::from_fn_with_state(
                telemetry,
                telemetry_middleware,
            ))
    }

    fn get_request(uri: &str) -> HttpRequest<Body> {
        HttpRequest::builder()
            .method("GET")
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn test_counts_requests_by_route_template() {
        let telemetry = Telemetry::new(Registry::new()).unwrap();
        let app = test_app(telemetry.clone());

        for id in 1..=3 {
            let response = app
                .clone()
                .oneshot(get_request(&format!("/items/{}", id)))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::NOT_FOUND);
        }

        assert_eq!(telemetry.request_count("GET", "/items/:id"), 3);
        assert_eq!(telemetry.request_count("GET", "/items/1"), 0);
        assert_eq!(telemetry.duration_sample_count("GET", "/items/:id", "404"), 3);
    }

    #[tokio::test]
    async fn test_unknown_paths_share_one_label() {
        let telemetry = Telemetry::new(Registry::new()).unwrap();
        let app = test_app(telemetry.clone());

        for i in 0..5 {
            let response = app
                .clone()
                .oneshot(get_request(&format!("/random-{}", i)))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::NOT_FOUND);
        }

        assert_eq!(telemetry.request_count("GET", UNMATCHED_PATH), 5);
        assert_eq!(
            telemetry.duration_sample_count("GET", UNMATCHED_PATH, "404"),
            5
        );
        assert!(!telemetry.render().unwrap().contains("/random-"));
    }

    #[tokio::test]
    async fn test_response_passes_through_unchanged() {
        let telemetry = Telemetry::new(Registry::new()).unwrap();
        let app = test_app(telemetry.clone());

        let response = app.oneshot(get_request("/items")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"ok");
        assert_eq!(telemetry.duration_sample_count("GET", "/items", "200"), 1);
    }

    #[tokio::test]
    async fn test_render_exposes_both_metrics() {
        let telemetry = Telemetry::new(Registry::new()).unwrap();
        let app = test_app(telemetry.clone());

        app.oneshot(get_request("/items")).await.unwrap();

        let text = telemetry.render().unwrap();
        assert!(text.contains(REQUESTS_TOTAL));
        assert!(text.contains(REQUEST_DURATION));
        assert!(text.contains("status_code=\"200\""));
    }

    #[test]
    fn test_registering_twice_fails() {
        let registry = Registry::new();
        Telemetry::new(registry.clone()).unwrap();

        assert!(Telemetry::new(registry).is_err());
    }
}
