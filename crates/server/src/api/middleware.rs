//! HTTP metrics, labelled by route template.

use axum::{
    body::Body,
    extract::MatchedPath,
    http::Request,
    middleware::Next,
    response::Response,
};
use std::time::Instant;

use crate::metrics::{HTTP_REQUESTS_IN_FLIGHT, HTTP_REQUESTS_TOTAL, HTTP_REQUEST_DURATION};

/// Label for requests that matched no route.
const UNMATCHED: &str = "unmatched";

pub async fn metrics_middleware(request: Request<Body>, next: Next) -> Response {
    // `/api/v1/requests/{id}` rather than one series per request id.
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_string())
        .unwrap_or_else(|| UNMATCHED.to_string());
    let method = request.method().clone();

    HTTP_REQUESTS_IN_FLIGHT.inc();
    let start = Instant::now();
    let response = next.run(request).await;
    let elapsed = start.elapsed();
    HTTP_REQUESTS_IN_FLIGHT.dec();

    let status = response.status();
    let labels = [method.as_str(), route.as_str(), status.as_str()];
    HTTP_REQUEST_DURATION
        .with_label_values(&labels)
        .observe(elapsed.as_secs_f64());
    HTTP_REQUESTS_TOTAL.with_label_values(&labels).inc();

    response
}
