use axum::{
    extract::Request,
    middleware::{from_fn, from_fn_with_state},
    response::Response,
    routing::{get, post},
    Router,
};
use tower_http::{classify::ServerErrorsFailureClass, trace::TraceLayer};
use tracing::{info_span, Span};
use uuid::Uuid;

use crate::{
    forward::forward,
    handlers::{health_handler, liveness_handler, metrics_handler},
    middleware::{authenticate, authz, enforce_quota, record_usage, track_metrics},
    state::AppState,
};

/// Resource reads: authorization, then metering around the quota check and
/// the upstream call. Route layers run last-added first.
macro_rules! metered {
    ($state:expr, $route:expr, $authorize:expr) => {
        $route
            .route_layer(from_fn_with_state($state.clone(), enforce_quota))
            .route_layer(from_fn_with_state($state.clone(), record_usage))
            .route_layer(from_fn_with_state($state.clone(), $authorize))
    };
}

/// Builds the gateway router.
pub fn build_router(state: AppState) -> Router {
    let gated = Router::new()
        // OGC features and tiles
        .route(
            "/collections/:collection_id/items",
            metered!(state, get(forward), authz::authorize_features),
        )
        .route(
            "/collections/:collection_id/items/:feature_id",
            metered!(state, get(forward), authz::authorize_features),
        )
        .route(
            "/collections/:collection_id/map/tiles/:tms/:matrix/:row/:col",
            metered!(state, get(forward), authz::authorize_tiles),
        )
        // STAC
        .route(
            "/assets/:asset_id",
            metered!(state, get(forward), authz::authorize_stac_asset),
        )
        .route(
            "/stac/collections/:collection_id/items/:item_id",
            get(forward).route_layer(from_fn_with_state(
                state.clone(),
                authz::authorize_stac_item,
            )),
        )
        .route(
            "/stac/collections",
            post(forward).route_layer(from_fn_with_state(
                state.clone(),
                authz::authorize_collection_onboarding,
            )),
        )
        .route(
            "/stac/collections/:collection_id/items",
            post(forward).route_layer(from_fn_with_state(
                state.clone(),
                authz::authorize_item_onboarding,
            )),
        )
        // Processes and jobs
        .route(
            "/processes/:process_id/execution",
            post(forward).route_layer(from_fn_with_state(
                state.clone(),
                authz::authorize_process,
            )),
        )
        .route(
            "/jobs/:job_id",
            get(forward).route_layer(from_fn_with_state(
                state.clone(),
                authz::authorize_job_status,
            )),
        )
        // Metering reads
        .route(
            "/ngsi-ld/v1/*rest",
            get(forward).route_layer(from_fn_with_state(
                state.clone(),
                authz::authorize_metering,
            )),
        )
        .layer(from_fn_with_state(state.clone(), authenticate));

    Router::new()
        // Health check and metrics (no credential required)
        .route("/health", get(health_handler))
        .route("/health/live", get(liveness_handler))
        .route("/metrics", get(metrics_handler))
        .merge(gated)
        .with_state(state)
        .layer(from_fn(track_metrics))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &Request| {
                    let request_id = Uuid::new_v4();
                    info_span!(
                        "http_request",
                        request_id = %request_id,
                        method = %request.method(),
                        uri = %request.uri(),
                        version = ?request.version(),
                    )
                })
                .on_request(|_request: &Request, _span: &Span| {
                    tracing::debug!("started processing request");
                })
                .on_response(|response: &Response, latency: std::time::Duration, _span: &Span| {
                    let status = response.status();
                    let latency_ms = latency.as_millis();

                    if status.is_server_error() {
                        tracing::error!(status = %status, latency_ms = latency_ms, "request failed with server error");
                    } else if status.is_client_error() {
                        tracing::warn!(status = %status, latency_ms = latency_ms, "request refused");
                    } else {
                        tracing::info!(status = %status, latency_ms = latency_ms, "request completed");
                    }
                })
                .on_failure(|failure_class: ServerErrorsFailureClass, latency: std::time::Duration, _span: &Span| {
                    tracing::error!(failure_class = ?failure_class, latency_ms = latency.as_millis(), "request failed");
                }),
        )
}
