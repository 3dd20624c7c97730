//! HTTP usage ledger client

use std::time::Duration;

use async_trait::async_trait;
use geogate_core::{CoreError, CoreResult, EventSink, MeteringEvent, UsageLedger, UsageQuery};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

const COLLABORATOR: &str = "ledger";

/// Usage totals for one accounting window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageTotals {
    pub total_bytes: i64,
    pub total_hits: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FeatureCheck<'a> {
    collection_id: &'a str,
    feature_ids: &'a [String],
}

#[derive(Debug, Deserialize)]
struct FeatureCheckResult {
    exists: bool,
}

/// Durable usage store served over HTTP. Acts as both the ledger quota
/// checks read and the sink flushed events are published to.
///
/// - `POST {base}/events` stores one [`MeteringEvent`]; any 2xx is success.
/// - `POST {base}/usage/totals` answers a [`UsageQuery`] with [`UsageTotals`].
/// - `POST {base}/features/exists` answers `{"exists": bool}`.
pub struct HttpUsageLedger {
    /// Base URL without a trailing slash.
    base_url: String,
    client: Client,
}

impl HttpUsageLedger {
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

    async fn post<B, T>(&self, path: &str, body: &B) -> CoreResult<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| CoreError::collaborator(COLLABORATOR, e.to_string()))?;

        match response.status() {
            StatusCode::OK => response
                .json::<T>()
                .await
                .map_err(|e| CoreError::invalid_response(COLLABORATOR, e.to_string())),
            status => Err(CoreError::collaborator(
                COLLABORATOR,
                format!("unexpected status {status} for {url}"),
            )),
        }
    }

    async fn totals(&self, query: &UsageQuery) -> CoreResult<UsageTotals> {
        debug!(user_id = %query.user_id, api_path = %query.api_path, "usage lookup");
        self.post("/usage/totals", query).await
    }
}

#[async_trait]
impl UsageLedger for HttpUsageLedger {
    async fn total_bytes(&self, query: &UsageQuery) -> CoreResult<i64> {
        Ok(self.totals(query).await?.total_bytes)
    }

    async fn total_hits(&self, query: &UsageQuery) -> CoreResult<i64> {
        Ok(self.totals(query).await?.total_hits)
    }

    async fn feature_ids_exist(
        &self,
        collection_id: &str,
        feature_ids: &[String],
    ) -> CoreResult<bool> {
        let check = FeatureCheck {
            collection_id,
            feature_ids,
        };
        let result: FeatureCheckResult = self.post("/features/exists", &check).await?;
        Ok(result.exists)
    }
}

#[async_trait]
impl EventSink for HttpUsageLedger {
    async fn publish(&self, event: &MeteringEvent) -> CoreResult<()> {
        let url = format!("{}/events", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(event)
            .send()
            .await
            .map_err(|e| CoreError::collaborator(COLLABORATOR, e.to_string()))?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(CoreError::collaborator(
                COLLABORATOR,
                format!("unexpected status {} for {url}", response.status()),
            ))
        }
    }
}
