//! Request metrics for every route

use axum::{
    body::Body,
    extract::MatchedPath,
    http::{Request, Response},
    middleware::Next,
};
use geogate_core::metrics::{ACTIVE_REQUESTS, API_REQUEST_COUNT, API_REQUEST_DURATION};
use std::time::Instant;

/// Records count, duration and in-flight gauge, labelled by matched route.
pub async fn track_metrics(req: Request<Body>, next: Next) -> Response<Body> {
    let start = Instant::now();
    let method = req.method().clone();

    // Route template keeps label cardinality bounded.
    let path = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_owned())
        .unwrap_or_else(|| "unmatched".to_string());

    ACTIVE_REQUESTS.inc();
    let response = next.run(req).await;
    ACTIVE_REQUESTS.dec();

    let status = response.status().as_u16().to_string();
    API_REQUEST_COUNT
        .with_label_values(&[method.as_str(), &path, &status])
        .inc();
    API_REQUEST_DURATION
        .with_label_values(&[method.as_str(), &path])
        .observe(start.elapsed().as_secs_f64());

    response
}
