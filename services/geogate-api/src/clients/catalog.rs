//! HTTP catalog client

use std::time::Duration;

use async_trait::async_trait;
use geogate_core::{
    Catalog, CoreError, CoreResult, ProcessDescriptor, ProcessId, ResourceAsset, ResourceId,
    StacAssetRecord,
};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use tracing::debug;

const COLLABORATOR: &str = "catalog";

/// Catalog served over HTTP.
///
/// Lookups map onto `GET {base}/assets/{id}`, `GET {base}/stac/assets/{id}`
/// and `GET {base}/processes/{id}`; `404` means the record does not exist.
pub struct HttpCatalog {
    /// Base URL without a trailing slash.
    base_url: String,
    client: Client,
}

impl HttpCatalog {
    pub fn new(base_url: &str, request_timeout: Duration) -> CoreResult<Self> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| CoreError::collaborator(COLLABORATOR, e.to_string()))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    async fn fetch<T: DeserializeOwned>(&self, path: &str) -> CoreResult<Option<T>> {
        let url = format!("{}{}", self.base_url, path);
        debug!(%url, "catalog lookup");
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| CoreError::collaborator(COLLABORATOR, e.to_string()))?;

        match response.status() {
            StatusCode::OK => response
                .json::<T>()
                .await
                .map(Some)
                .map_err(|e| CoreError::invalid_response(COLLABORATOR, e.to_string())),
            StatusCode::NOT_FOUND => Ok(None),
            status => Err(CoreError::collaborator(
                COLLABORATOR,
                format!("unexpected status {status} for {url}"),
            )),
        }
    }
}

#[async_trait]
impl Catalog for HttpCatalog {
    async fn get_asset(&self, resource_id: ResourceId) -> CoreResult<Option<ResourceAsset>> {
        self.fetch(&format!("/assets/{resource_id}")).await
    }

    async fn get_stac_asset(&self, asset_id: &str) -> CoreResult<Option<StacAssetRecord>> {
        self.fetch(&format!("/stac/assets/{asset_id}")).await
    }

    async fn get_process(&self, process_id: ProcessId) -> CoreResult<Option<ProcessDescriptor>> {
        self.fetch(&format!("/processes/{process_id}")).await
    }
}
