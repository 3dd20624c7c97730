//! In-memory collaborators for tests and single-node development.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::Deserialize;

use crate::error::{CoreError, CoreResult};
use crate::ids::{ProcessId, ResourceId, SubjectId};
use crate::metering::{AggregationBucket, MeteringEvent};
use crate::policy::{ProcessDescriptor, ResourceAsset, StacAssetRecord};
use crate::traits::{AccessControlList, Catalog, EventSink, UsageLedger, UsageQuery};

/// Catalog contents loadable from a JSON file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CatalogSeed {
    #[serde(default)]
    pub assets: Vec<ResourceAsset>,
    #[serde(default)]
    pub stac_assets: Vec<StacAssetRecord>,
    #[serde(default)]
    pub processes: Vec<ProcessDescriptor>,
}

impl CatalogSeed {
    /// Reads a seed from disk.
    pub fn from_file(path: impl AsRef<Path>) -> CoreResult<Self> {
        let raw = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            CoreError::internal(format!(
                "failed to read catalog seed {}: {e}",
                path.as_ref().display()
            ))
        })?;
        Ok(serde_json::from_str(&raw)?)
    }
}

#[derive(Default)]
pub struct MemoryCatalog {
    assets: RwLock<HashMap<ResourceId, ResourceAsset>>,
    stac_assets: RwLock<HashMap<String, ResourceId>>,
    processes: RwLock<HashMap<ProcessId, ProcessDescriptor>>,
    asset_lookups: AtomicUsize,
    failing: AtomicBool,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_seed(seed: CatalogSeed) -> Self {
        let catalog = Self::new();
        for asset in seed.assets {
            catalog.insert_asset(asset);
        }
        for record in seed.stac_assets {
            catalog.insert_stac_asset(&record.asset_id, record.collection_id);
        }
        for process in seed.processes {
            catalog.insert_process(process);
        }
        catalog
    }

    pub fn insert_asset(&self, asset: ResourceAsset) {
        self.assets.write().insert(asset.id, asset);
    }

    pub fn insert_stac_asset(&self, asset_id: &str, collection_id: ResourceId) {
        self.stac_assets
            .write()
            .insert(asset_id.to_string(), collection_id);
    }

    pub fn insert_process(&self, process: ProcessDescriptor) {
        self.processes.write().insert(process.id, process);
    }

    /// Makes every lookup fail until reset.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of `get_asset` calls served so far.
    pub fn asset_lookups(&self) -> usize {
        self.asset_lookups.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> CoreResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(CoreError::collaborator("catalog", "catalog unavailable"));
        }
        Ok(())
    }
}

#[async_trait]
impl Catalog for MemoryCatalog {
    async fn get_asset(&self, resource_id: ResourceId) -> CoreResult<Option<ResourceAsset>> {
        self.asset_lookups.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        Ok(self.assets.read().get(&resource_id).cloned())
    }

    async fn get_stac_asset(&self, asset_id: &str) -> CoreResult<Option<StacAssetRecord>> {
        self.check_available()?;
        Ok(self
            .stac_assets
            .read()
            .get(asset_id)
            .map(|collection_id| StacAssetRecord {
                asset_id: asset_id.to_string(),
                collection_id: *collection_id,
            }))
    }

    async fn get_process(&self, process_id: ProcessId) -> CoreResult<Option<ProcessDescriptor>> {
        self.check_available()?;
        Ok(self.processes.read().get(&process_id).cloned())
    }
}

/// Grants keyed by (resource, bearer credential).
#[derive(Default)]
pub struct StaticAccessList {
    grants: RwLock<HashSet<(ResourceId, String)>>,
    calls: AtomicUsize,
    failing: AtomicBool,
}

impl StaticAccessList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grant(&self, resource_id: ResourceId, bearer: &str) {
        self.grants.write().insert((resource_id, bearer.to_string()));
    }

    pub fn revoke(&self, resource_id: ResourceId, bearer: &str) {
        self.grants
            .write()
            .remove(&(resource_id, bearer.to_string()));
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of `check_access` calls served so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AccessControlList for StaticAccessList {
    async fn check_access(&self, resource_id: ResourceId, bearer: &str) -> CoreResult<bool> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(CoreError::collaborator("acl", "acl unavailable"));
        }
        Ok(self
            .grants
            .read()
            .contains(&(resource_id, bearer.to_string())))
    }
}

/// Accounting identity usage totals are kept under.
type UsageKey = (SubjectId, ResourceId, String);

/// Usage ledger that doubles as the event sink, so flushed events count
/// toward later quota checks on the same node.
///
/// Events are folded into per-key totals bucketed by flush second, so memory
/// grows with distinct keys and seconds rather than with event count.
#[derive(Default)]
pub struct MemoryUsageLedger {
    usage: Mutex<HashMap<UsageKey, BTreeMap<i64, AggregationBucket>>>,
    published: AtomicUsize,
    features: RwLock<HashMap<String, HashSet<String>>>,
    failing: AtomicBool,
}

impl MemoryUsageLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, event: &MeteringEvent) {
        let key = (
            event.key.user_id,
            event.key.resource_id,
            event.key.api_path.clone(),
        );
        let mut usage = self.usage.lock();
        let bucket = usage
            .entry(key)
            .or_default()
            .entry(event.epoch_seconds)
            .or_default();
        bucket.bytes = bucket.bytes.saturating_add(event.bytes);
        bucket.hits = bucket.hits.saturating_add(event.hits);
        self.published.fetch_add(1, Ordering::SeqCst);
    }

    pub fn register_features<I, S>(&self, collection_id: &str, feature_ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.features
            .write()
            .entry(collection_id.to_string())
            .or_default()
            .extend(feature_ids.into_iter().map(Into::into));
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of events recorded so far.
    pub fn published(&self) -> usize {
        self.published.load(Ordering::SeqCst)
    }

    /// Usage within the query window.
    pub fn usage(&self, query: &UsageQuery) -> AggregationBucket {
        let key = (query.user_id, query.resource_id, query.api_path.clone());
        let usage = self.usage.lock();
        usage
            .get(&key)
            .map(|seconds| {
                seconds
                    .range(query.since_epoch..)
                    .fold(AggregationBucket::default(), |total, (_, b)| AggregationBucket {
                        bytes: total.bytes.saturating_add(b.bytes),
                        hits: total.hits.saturating_add(b.hits),
                    })
            })
            .unwrap_or_default()
    }

    /// Number of distinct second buckets held across all keys.
    pub fn bucket_count(&self) -> usize {
        self.usage.lock().values().map(BTreeMap::len).sum()
    }

    fn check_available(&self) -> CoreResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(CoreError::collaborator("ledger", "ledger unavailable"));
        }
        Ok(())
    }
}

fn saturating_i64(total: u64) -> i64 {
    i64::try_from(total).unwrap_or(i64::MAX)
}

#[async_trait]
impl UsageLedger for MemoryUsageLedger {
    async fn total_bytes(&self, query: &UsageQuery) -> CoreResult<i64> {
        self.check_available()?;
        Ok(saturating_i64(self.usage(query).bytes))
    }

    async fn total_hits(&self, query: &UsageQuery) -> CoreResult<i64> {
        self.check_available()?;
        Ok(saturating_i64(self.usage(query).hits))
    }

    async fn feature_ids_exist(
        &self,
        collection_id: &str,
        feature_ids: &[String],
    ) -> CoreResult<bool> {
        self.check_available()?;
        let features = self.features.read();
        Ok(features
            .get(collection_id)
            .is_some_and(|known| feature_ids.iter().all(|id| known.contains(id))))
    }
}

#[async_trait]
impl EventSink for MemoryUsageLedger {
    async fn publish(&self, event: &MeteringEvent) -> CoreResult<()> {
        self.check_available()?;
        self.record(event);
        Ok(())
    }
}
