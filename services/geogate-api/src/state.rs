//! Shared application state for the gateway

use std::sync::Arc;
use std::time::Instant;

use geogate_core::{
    AccessControlList, AccessDecisionEngine, Catalog, EventSink, GateConfig, MeteringAggregator,
    QuotaEnforcer, UsageLedger,
};

use crate::forward::Upstream;
use crate::middleware::TokenVerifier;

/// Collaborators a gateway instance is wired with.
#[derive(Clone)]
pub struct Collaborators {
    pub catalog: Arc<dyn Catalog>,
    pub acl: Arc<dyn AccessControlList>,
    pub ledger: Arc<dyn UsageLedger>,
    pub sink: Arc<dyn EventSink>,
    pub upstream: Arc<dyn Upstream>,
}

/// Handles cloned into every request
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GateConfig>,
    pub verifier: Arc<TokenVerifier>,
    pub engine: Arc<AccessDecisionEngine>,
    pub quota: Arc<QuotaEnforcer>,
    pub aggregator: Arc<MeteringAggregator>,
    pub upstream: Arc<dyn Upstream>,
    pub started_at: Instant,
}

impl AppState {
    /// Builds the pipeline stages around the given collaborators.
    pub fn new(config: GateConfig, verifier: TokenVerifier, collaborators: Collaborators) -> Self {
        let timeout = config.collaborators.timeout();
        let engine = AccessDecisionEngine::new(
            collaborators.catalog,
            collaborators.acl,
            timeout,
            (&config.processes).into(),
        );
        let quota = QuotaEnforcer::new(collaborators.ledger, timeout);
        let aggregator = MeteringAggregator::new(collaborators.sink, timeout);

        Self {
            config: Arc::new(config),
            verifier: Arc::new(verifier),
            engine: Arc::new(engine),
            quota: Arc::new(quota),
            aggregator: Arc::new(aggregator),
            upstream: collaborators.upstream,
            started_at: Instant::now(),
        }
    }
}
