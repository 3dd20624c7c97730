//! Per-route access decisions
//!
//! Each endpoint class has its own layer. On success the layer attaches the
//! [`Authorization`] and the [`AccountingPath`] to the request for the quota
//! and metering stages; on failure it answers with the decision's error.

use std::collections::HashMap;

use axum::{
    body::{to_bytes, Body},
    extract::{Path, Request, State},
    middleware::Next,
    response::Response,
};
use geogate_core::{base_path, Authorization, GateError, GateResult, Principal};
use serde_json::Value;
use tracing::debug;

use super::auth::BearerToken;
use crate::error::ApiError;
use crate::state::AppState;

/// Largest onboarding body inspected for collection ids.
const MAX_ONBOARDING_BODY: usize = 16 * 1024 * 1024;

/// Tile routes are accounted without their matrix/row/col segments.
const TILE_POSITION_SEGMENTS: usize = 3;

/// Path usage is accounted and rate-limited under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountingPath(pub String);

type Params = Path<HashMap<String, String>>;

fn credential(request: &Request) -> GateResult<(Principal, String)> {
    let principal = request
        .extensions()
        .get::<Principal>()
        .cloned()
        .ok_or_else(GateError::missing_credential)?;
    let bearer = request
        .extensions()
        .get::<BearerToken>()
        .map(|b| b.0.clone())
        .ok_or_else(GateError::missing_credential)?;
    Ok((principal, bearer))
}

fn param<'a>(params: &'a HashMap<String, String>, name: &str) -> GateResult<&'a str> {
    params
        .get(name)
        .map(String::as_str)
        .ok_or_else(|| GateError::bad_request(format!("missing path parameter `{name}`")))
}

async fn proceed(
    mut request: Request,
    next: Next,
    authorization: Authorization,
    accounting_path: String,
) -> Response {
    let extensions = request.extensions_mut();
    extensions.insert(authorization);
    extensions.insert(AccountingPath(accounting_path));
    next.run(request).await
}

/// Feature routes addressed by `collection_id`.
pub async fn authorize_features(
    State(state): State<AppState>,
    Path(params): Params,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let (principal, bearer) = credential(&request)?;
    let collection_id = param(&params, "collection_id")?;
    let authorization = state
        .engine
        .authorize_resource(&principal, collection_id, &bearer)
        .await?;
    let path = request.uri().path().to_string();
    Ok(proceed(request, next, authorization, path).await)
}

/// Tile routes addressed by `collection_id`.
pub async fn authorize_tiles(
    State(state): State<AppState>,
    Path(params): Params,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let (principal, bearer) = credential(&request)?;
    let collection_id = param(&params, "collection_id")?;
    let authorization = state
        .engine
        .authorize_resource(&principal, collection_id, &bearer)
        .await?;
    let path = base_path(request.uri().path(), TILE_POSITION_SEGMENTS);
    Ok(proceed(request, next, authorization, path).await)
}

/// STAC asset download addressed by `asset_id`.
pub async fn authorize_stac_asset(
    State(state): State<AppState>,
    Path(params): Params,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let (principal, bearer) = credential(&request)?;
    let asset_id = param(&params, "asset_id")?;
    let authorization = state
        .engine
        .authorize_stac_asset(&principal, asset_id, &bearer)
        .await?;
    let path = request.uri().path().to_string();
    Ok(proceed(request, next, authorization, path).await)
}

/// STAC item by id. Credentials are optional here.
pub async fn authorize_stac_item(
    State(state): State<AppState>,
    Path(params): Params,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let principal = request.extensions().get::<Principal>().cloned();
    let bearer = request.extensions().get::<BearerToken>().map(|b| b.0.clone());
    let collection_id = param(&params, "collection_id")?;
    let authorization = state
        .engine
        .authorize_stac_item(
            principal.as_ref(),
            collection_id,
            bearer.as_deref(),
            chrono::Utc::now().timestamp(),
        )
        .await?;
    debug!(presign = authorization.presign_allowed, "stac item decided");
    let path = request.uri().path().to_string();
    Ok(proceed(request, next, authorization, path).await)
}

/// STAC collection onboarding; collection ids come from the JSON body.
pub async fn authorize_collection_onboarding(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let (principal, _) = credential(&request)?;

    let (parts, body) = request.into_parts();
    let bytes = to_bytes(body, MAX_ONBOARDING_BODY)
        .await
        .map_err(|_| GateError::bad_request("Unreadable request body"))?;
    let document: Value = serde_json::from_slice(&bytes)
        .map_err(|_| GateError::bad_request("Request body is not valid JSON"))?;
    let ids = collection_ids(&document);

    let authorization = state
        .engine
        .authorize_collection_onboarding(&principal, &ids)
        .await?;
    let request = Request::from_parts(parts, Body::from(bytes));
    let path = request.uri().path().to_string();
    Ok(proceed(request, next, authorization, path).await)
}

/// Collection ids named by an onboarding document: a single collection's
/// `id`, or the `id` of each entry under `collections`.
fn collection_ids(document: &Value) -> Vec<String> {
    if let Some(id) = document.get("id").and_then(Value::as_str) {
        return vec![id.to_string()];
    }
    document
        .get("collections")
        .and_then(Value::as_array)
        .map(|entries| {
            entries
                .iter()
                .filter_map(|entry| entry.get("id").and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// STAC item onboarding into the collection named in the path.
pub async fn authorize_item_onboarding(
    State(state): State<AppState>,
    Path(params): Params,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let (principal, _) = credential(&request)?;
    let collection_id = param(&params, "collection_id")?;
    let authorization = state
        .engine
        .authorize_item_onboarding(&principal, collection_id)
        .await?;
    let path = request.uri().path().to_string();
    Ok(proceed(request, next, authorization, path).await)
}

/// Process execution addressed by `process_id`.
pub async fn authorize_process(
    State(state): State<AppState>,
    Path(params): Params,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let (principal, _) = credential(&request)?;
    let process_id = param(&params, "process_id")?;
    let authorization = state
        .engine
        .authorize_process(&principal, process_id)
        .await?;
    let path = request.uri().path().to_string();
    Ok(proceed(request, next, authorization, path).await)
}

pub async fn authorize_job_status(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let (principal, _) = credential(&request)?;
    let authorization = state.engine.authorize_job_status(&principal);
    let path = request.uri().path().to_string();
    Ok(proceed(request, next, authorization, path).await)
}

/// Metering read APIs, decided on the request path.
pub async fn authorize_metering(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let (principal, _) = credential(&request)?;
    let path = request.uri().path().to_string();
    let authorization = state.engine.authorize_metering(&principal, &path)?;
    Ok(proceed(request, next, authorization, path).await)
}
