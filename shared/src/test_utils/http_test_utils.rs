use axum::body::to_bytes;
use serde_json::Value;

/// Helper function to extract JSON from an Axum response
///
/// This is useful in tests to easily parse and assert on JSON responses.
pub async fn response_to_json(response: axum::response::Response) -> Value {
    let body = response.into_body();
    let bytes = to_bytes(body, usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

/// Helper function to read a plain-text Axum response body
pub async fn response_to_text(response: axum::response::Response) -> String {
    let body = response.into_body();
    let bytes = to_bytes(body, usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

/// Builds a request with an optional JSON body
pub fn json_request(
    method: &str,
    path: &str,
    body: Option<Value>,
) -> http::Request<axum::body::Body> {
    let builder = http::Request::builder().method(method).uri(path);

    match body {
        Some(json_body) => builder
            .header("content-type", "application/json")
            .body(axum::body::Body::from(json_body.to_string()))
            .unwrap(),
        None => builder.body(axum::body::Body::empty()).unwrap(),
    }
}
