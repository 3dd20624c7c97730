//! HTTP access control list client

use std::time::Duration;

use async_trait::async_trait;
use geogate_core::{AccessControlList, CoreError, CoreResult, ResourceId};
use reqwest::{Client, StatusCode};
use serde_json::json;
use tracing::debug;

const COLLABORATOR: &str = "acl";

/// Grant checks answered by an ACL service.
///
/// `POST {base}{path}` with the consumer's bearer and `{"itemId": <id>}`;
/// `200` means an active grant, any other status means none.
pub struct HttpAccessList {
    endpoint: String,
    client: Client,
}

impl HttpAccessList {
    pub fn new(base_url: &str, path: &str, request_timeout: Duration) -> CoreResult<Self> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| CoreError::collaborator(COLLABORATOR, e.to_string()))?;
        Ok(Self {
            endpoint: format!("{}{}", base_url.trim_end_matches('/'), path),
            client,
        })
    }
}

#[async_trait]
impl AccessControlList for HttpAccessList {
    async fn check_access(&self, resource_id: ResourceId, bearer: &str) -> CoreResult<bool> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(bearer)
            .json(&json!({ "itemId": resource_id }))
            .send()
            .await
            .map_err(|e| CoreError::collaborator(COLLABORATOR, e.to_string()))?;

        let status = response.status();
        debug!(%resource_id, %status, "acl answered");
        Ok(status == StatusCode::OK)
    }
}
