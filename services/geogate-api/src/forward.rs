//! Forwarding of admitted requests to the data server

use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    extract::{Request, State},
    http::{header, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use geogate_core::{Authorization, CoreError, CoreResult, GateError};
use reqwest::Client;
use tracing::{debug, error};

use crate::error::ApiError;
use crate::state::AppState;

/// Largest request body relayed upstream.
const MAX_FORWARD_BODY: usize = 64 * 1024 * 1024;

const SUBJECT_HEADER: &str = "x-geogate-subject";
const ROLE_HEADER: &str = "x-geogate-role";
const CREDENTIAL_ROLE_HEADER: &str = "x-geogate-credential-role";
const RESOURCE_HEADER: &str = "x-geogate-resource";
const PRESIGN_HEADER: &str = "x-geogate-presign";

/// Request relayed to the data server.
#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    pub method: Method,
    /// Path and query, e.g. `/collections/x/items?bbox=1,2,3,4`.
    pub path_and_query: String,
    pub content_type: Option<String>,
    /// Decision annotations as `x-geogate-*` header pairs.
    pub annotations: Vec<(&'static str, String)>,
    pub body: Bytes,
}

#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Bytes,
}

/// Downstream resource handler.
#[async_trait]
pub trait Upstream: Send + Sync {
    async fn forward(&self, request: UpstreamRequest) -> CoreResult<UpstreamResponse>;
}

/// Relays requests to a data server over HTTP.
pub struct HttpUpstream {
    base_url: String,
    client: Client,
}

impl HttpUpstream {
    pub fn new(base_url: &str, request_timeout: Duration) -> CoreResult<Self> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| CoreError::collaborator("upstream", e.to_string()))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }
}

#[async_trait]
impl Upstream for HttpUpstream {
    async fn forward(&self, request: UpstreamRequest) -> CoreResult<UpstreamResponse> {
        let method = reqwest::Method::from_bytes(request.method.as_str().as_bytes())
            .map_err(|e| CoreError::internal(format!("unsupported method: {e}")))?;
        let url = format!("{}{}", self.base_url, request.path_and_query);

        let mut builder = self.client.request(method, &url);
        if let Some(content_type) = &request.content_type {
            builder = builder.header(reqwest::header::CONTENT_TYPE, content_type);
        }
        for (name, value) in &request.annotations {
            builder = builder.header(*name, value);
        }

        let response = builder
            .body(request.body)
            .send()
            .await
            .map_err(|e| CoreError::collaborator("upstream", e.to_string()))?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response
            .bytes()
            .await
            .map_err(|e| CoreError::collaborator("upstream", e.to_string()))?;
        debug!(%url, status, bytes = body.len(), "upstream answered");

        Ok(UpstreamResponse {
            status,
            content_type,
            body,
        })
    }
}

fn annotations(authorization: Option<&Authorization>) -> Vec<(&'static str, String)> {
    let Some(authorization) = authorization else {
        return Vec::new();
    };
    let mut pairs = vec![
        (SUBJECT_HEADER, authorization.subject.to_string()),
        (ROLE_HEADER, authorization.role.to_string()),
        (CREDENTIAL_ROLE_HEADER, authorization.credential_role.to_string()),
        (PRESIGN_HEADER, authorization.presign_allowed.to_string()),
    ];
    if let Some(resource_id) = authorization.resource_id {
        pairs.push((RESOURCE_HEADER, resource_id.to_string()));
    }
    pairs
}

/// Handler for every gated route: relays the admitted request upstream.
pub async fn forward(State(state): State<AppState>, request: Request) -> Result<Response, ApiError> {
    let authorization = request.extensions().get::<Authorization>().cloned();
    let (parts, body) = request.into_parts();
    let body = to_bytes(body, MAX_FORWARD_BODY)
        .await
        .map_err(|_| GateError::bad_request("Unreadable request body"))?;

    let upstream_request = UpstreamRequest {
        method: parts.method,
        path_and_query: parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| parts.uri.path().to_string()),
        content_type: parts
            .headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        annotations: annotations(authorization.as_ref()),
        body,
    };

    let upstream = state.upstream.forward(upstream_request).await.map_err(|e| {
        error!(error = %e, "upstream request failed");
        ApiError::from(e)
    })?;

    let status = StatusCode::from_u16(upstream.status).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut response = (status, Body::from(upstream.body.clone())).into_response();
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(upstream.body.len()));
    if let Some(content_type) = upstream
        .content_type
        .as_deref()
        .and_then(|v| HeaderValue::from_str(v).ok())
    {
        headers.insert(header::CONTENT_TYPE, content_type);
    }
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use geogate_core::{BaseRole, Delegation, ResourceId, Role, SubjectId};

    #[test]
    fn annotations_cover_decision() {
        let resource = ResourceId::new();
        let auth = Authorization {
            subject: SubjectId::new(),
            role: BaseRole::Provider,
            credential_role: Role::Provider,
            resource_id: Some(resource),
            asset: None,
            presign_allowed: true,
        };
        let pairs = annotations(Some(&auth));
        assert!(pairs.contains(&(RESOURCE_HEADER, resource.to_string())));
        assert!(pairs.contains(&(PRESIGN_HEADER, "true".to_string())));
        assert!(pairs.contains(&(ROLE_HEADER, "provider".to_string())));
        assert!(pairs.contains(&(CREDENTIAL_ROLE_HEADER, "provider".to_string())));
        assert!(annotations(None).is_empty());
    }

    #[test]
    fn delegate_keeps_credential_role() {
        let auth = Authorization {
            subject: SubjectId::new(),
            role: BaseRole::Provider,
            credential_role: Role::Delegate(Delegation {
                role: BaseRole::Provider,
                delegator: SubjectId::new(),
            }),
            resource_id: None,
            asset: None,
            presign_allowed: false,
        };
        let pairs = annotations(Some(&auth));
        assert!(pairs.contains(&(ROLE_HEADER, "provider".to_string())));
        assert!(pairs.contains(&(CREDENTIAL_ROLE_HEADER, "delegate".to_string())));
        assert!(!pairs.iter().any(|(name, _)| *name == RESOURCE_HEADER));
    }
}
