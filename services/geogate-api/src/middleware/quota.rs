//! Usage limit admission
//!
//! Runs after the authorization layer and before the upstream call.

use std::collections::HashMap;

use axum::{
    extract::{Query, Request, State},
    middleware::Next,
    response::Response,
};
use geogate_core::{Authorization, GateError, Principal, QuotaContext};

use super::authz::AccountingPath;
use crate::error::ApiError;
use crate::state::AppState;

pub async fn enforce_quota(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let extensions = request.extensions();
    let (Some(principal), Some(authorization), Some(path)) = (
        extensions.get::<Principal>(),
        extensions.get::<Authorization>(),
        extensions.get::<AccountingPath>(),
    ) else {
        return Err(GateError::internal("quota stage reached without authorization").into());
    };
    let Some(resource_id) = authorization.resource_id else {
        return Err(GateError::internal("quota stage reached without a target resource").into());
    };

    let ctx = QuotaContext {
        resource_id,
        api_path: &path.0,
        query_bbox: query.get("bbox").map(String::as_str),
    };
    state.quota.enforce(principal, ctx).await?;

    Ok(next.run(request).await)
}
