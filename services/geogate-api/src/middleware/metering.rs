//! Post-response usage recording
//!
//! Never alters or fails the response; it only feeds the aggregator.

use axum::{
    extract::{Request, State},
    http::{header, Response as HttpResponse},
    middleware::Next,
    response::Response,
};
use geogate_core::{AggregationKey, Authorization};
use tracing::debug;

use super::authz::AccountingPath;
use crate::state::AppState;

pub async fn record_usage(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let authorization = request.extensions().get::<Authorization>().cloned();
    let path = request.extensions().get::<AccountingPath>().cloned();

    let response = next.run(request).await;

    let status = response.status().as_u16();
    if !state.config.metering.is_audited(status) {
        return response;
    }
    let (Some(authorization), Some(AccountingPath(api_path))) = (authorization, path) else {
        return response;
    };
    let (Some(resource_id), Some(asset)) = (authorization.resource_id, authorization.asset) else {
        debug!("response has no metered resource");
        return response;
    };

    let key = AggregationKey {
        user_id: authorization.subject,
        resource_id,
        resource_group: asset.group(),
        provider_id: asset.owner_id,
        api_path,
    };
    state.aggregator.record(key, response_size(&response));
    response
}

/// Body size from `Content-Length`, falling back to the body's exact size hint.
fn response_size<B: hyper::body::Body>(response: &HttpResponse<B>) -> u64 {
    response
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .or_else(|| response.body().size_hint().exact())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    #[test]
    fn size_prefers_content_length() {
        let response = HttpResponse::builder()
            .header(header::CONTENT_LENGTH, "42")
            .body(Body::from("short"))
            .unwrap();
        assert_eq!(response_size(&response), 42);
    }

    #[test]
    fn size_falls_back_to_body_hint() {
        let response = HttpResponse::new(Body::from("twelve bytes"));
        assert_eq!(response_size(&response), 12);
    }
}
