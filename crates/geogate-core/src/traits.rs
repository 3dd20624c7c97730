use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::ids::{ProcessId, ResourceId, SubjectId};
use crate::metering::MeteringEvent;
use crate::policy::{ProcessDescriptor, ResourceAsset, StacAssetRecord};

/// Read-only view of the resource catalog.
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Fetches ownership and access policy for a resource.
    async fn get_asset(&self, resource_id: ResourceId) -> CoreResult<Option<ResourceAsset>>;

    /// Resolves a STAC asset to the collection that owns it.
    async fn get_stac_asset(&self, asset_id: &str) -> CoreResult<Option<StacAssetRecord>>;

    /// Looks up a registered process.
    async fn get_process(&self, process_id: ProcessId) -> CoreResult<Option<ProcessDescriptor>>;
}

/// Per-consumer grant check for secure resources.
#[async_trait]
pub trait AccessControlList: Send + Sync {
    /// Returns whether the bearer holds an active grant on the resource.
    async fn check_access(&self, resource_id: ResourceId, bearer: &str) -> CoreResult<bool>;
}

/// Window selector for usage totals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageQuery {
    pub user_id: SubjectId,
    pub api_path: String,
    pub resource_id: ResourceId,
    /// Inclusive window start, epoch seconds.
    pub since_epoch: i64,
}

/// Historical usage store consulted by quota checks.
#[async_trait]
pub trait UsageLedger: Send + Sync {
    /// Total response bytes recorded in the window.
    async fn total_bytes(&self, query: &UsageQuery) -> CoreResult<i64>;

    /// Number of recorded calls in the window.
    async fn total_hits(&self, query: &UsageQuery) -> CoreResult<i64>;

    /// Returns whether every feature id exists in the collection.
    async fn feature_ids_exist(&self, collection_id: &str, feature_ids: &[String])
        -> CoreResult<bool>;
}

/// Durable destination for flushed metering events.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Publishes one aggregated event.
    async fn publish(&self, event: &MeteringEvent) -> CoreResult<()>;
}

/// Awaits a collaborator call, failing with [`CoreError::Timeout`] once
/// `bound` elapses. The in-flight call is dropped on timeout.
pub async fn bounded<T, F>(collaborator: &'static str, bound: Duration, call: F) -> CoreResult<T>
where
    F: Future<Output = CoreResult<T>>,
{
    tokio::time::timeout(bound, call)
        .await
        .map_err(|_| CoreError::Timeout {
            collaborator,
            timeout_ms: u64::try_from(bound.as_millis()).unwrap_or(u64::MAX),
        })?
}
