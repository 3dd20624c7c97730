//! Core authorization, quota and metering engine for GeoGate.

pub mod authz;
pub mod config;
pub mod error;
pub mod ids;
pub mod limits;
pub mod memory;
pub mod metering;
pub mod metrics;
pub mod policy;
pub mod principal;
pub mod quota;
pub mod traits;

pub use authz::{AccessDecisionEngine, Authorization, EndpointClass, MeteringApi, ProcessRules};
pub use config::GateConfig;
pub use error::{codes, CoreError, CoreResult, GateError, GateResult};
pub use ids::{ProcessId, ResourceId, SubjectId};
pub use limits::{BoundingBox, DataUsage, LimitRule, UsageLimits};
pub use memory::{CatalogSeed, MemoryCatalog, MemoryUsageLedger, StaticAccessList};
pub use metering::{
    base_path, AggregationBucket, AggregationKey, FlushReport, MeteringAggregator, MeteringEvent,
    MeteringFlusher,
};
pub use policy::{AccessPolicy, ProcessDescriptor, ResourceAsset, StacAssetRecord};
pub use principal::{
    resolve, Audience, BaseRole, Claims, Constraints, CredentialScope, Delegation, Principal, Role,
};
pub use quota::{QuotaContext, QuotaEnforcer};
pub use traits::{bounded, AccessControlList, Catalog, EventSink, UsageLedger, UsageQuery};
