//! GeoGate HTTP gateway: credential checks, access decisions, quotas and
//! usage metering in front of a geospatial data server.

pub mod clients;
pub mod error;
pub mod forward;
pub mod handlers;
pub mod middleware;
pub mod rest;
pub mod state;
pub mod telemetry;

pub use error::{ApiError, ErrorBody};
pub use forward::{HttpUpstream, Upstream, UpstreamRequest, UpstreamResponse};
pub use middleware::TokenVerifier;
pub use rest::build_router;
pub use state::{AppState, Collaborators};

use std::net::SocketAddr;
use std::sync::Arc;

use geogate_core::{
    AccessControlList, Catalog, CatalogSeed, CoreError, CoreResult, EventSink, GateConfig,
    MemoryCatalog, MemoryUsageLedger, StaticAccessList, UsageLedger,
};
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use clients::{HttpAccessList, HttpCatalog, HttpUsageLedger};

/// Wires collaborators from configuration: HTTP clients where a base URL is
/// configured, in-memory stand-ins otherwise.
pub fn build_collaborators(config: &GateConfig) -> CoreResult<Collaborators> {
    let timeout = config.collaborators.timeout();

    let catalog: Arc<dyn Catalog> = match &config.catalog.base_url {
        Some(url) => {
            info!(%url, "using HTTP catalog");
            Arc::new(HttpCatalog::new(url, timeout)?)
        }
        None => {
            let seed = match &config.catalog.seed_file {
                Some(path) => CatalogSeed::from_file(path)?,
                None => CatalogSeed::default(),
            };
            info!(assets = seed.assets.len(), "using in-memory catalog");
            Arc::new(MemoryCatalog::from_seed(seed))
        }
    };

    let acl: Arc<dyn AccessControlList> = match &config.acl.base_url {
        Some(url) => {
            info!(%url, "using HTTP access control list");
            Arc::new(HttpAccessList::new(url, &config.acl.path, timeout)?)
        }
        None => {
            warn!("no ACL service configured, secure resources grant no consumer access");
            Arc::new(StaticAccessList::new())
        }
    };

    // Flushed events land in the same ledger quota checks read from.
    let (ledger, sink): (Arc<dyn UsageLedger>, Arc<dyn EventSink>) = match &config.ledger.base_url
    {
        Some(url) => {
            info!(%url, "using HTTP usage ledger");
            let ledger = Arc::new(HttpUsageLedger::new(url, timeout)?);
            (ledger.clone(), ledger)
        }
        None => {
            warn!("no usage ledger configured, usage totals reset on restart");
            let ledger = Arc::new(MemoryUsageLedger::new());
            (ledger.clone(), ledger)
        }
    };

    Ok(Collaborators {
        catalog,
        acl,
        ledger,
        sink,
        upstream: Arc::new(HttpUpstream::new(&config.upstream.base_url, timeout)?),
    })
}

/// Boots the gateway and serves until a shutdown signal arrives.
pub async fn run_server() -> CoreResult<()> {
    let config = GateConfig::load()
        .map_err(|e| CoreError::internal(format!("invalid configuration: {e}")))?;
    let verifier = TokenVerifier::from_config(&config.auth)?;
    let collaborators = build_collaborators(&config)?;
    let state = AppState::new(config, verifier, collaborators);

    let flusher = state
        .aggregator
        .spawn_flusher(state.config.metering.flush_interval());

    let bind_address = state.config.server.bind_address.clone();
    let addr: SocketAddr = bind_address.parse().map_err(|e| {
        CoreError::internal(format!("invalid bind address '{bind_address}': {e}"))
    })?;
    let app = build_router(state);

    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| CoreError::internal(format!("failed to bind to {addr}: {e}")))?;
    info!(%addr, "GeoGate listening");

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    // Drain whatever the last interval collected before exiting.
    flusher.shutdown().await;

    served.map_err(|e| CoreError::internal(format!("server error: {e}")))?;
    info!("GeoGate shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for CTRL+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received CTRL+C signal, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM signal, initiating graceful shutdown");
        }
    }
}
