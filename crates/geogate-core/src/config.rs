//! Configuration management for GeoGate
//!
//! Sources, lowest to highest precedence:
//! - hardcoded defaults
//! - `/etc/geogate/geogate.{yaml,toml,json}`
//! - `./config/geogate.{yaml,toml,json}`
//! - the file named by `GEOGATE_CONFIG`
//! - `GEOGATE__SECTION__KEY` environment variables

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::authz::ProcessRules;

/// Root configuration structure for GeoGate
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct GateConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default)]
    pub catalog: CatalogConfig,

    #[serde(default)]
    pub acl: AclConfig,

    #[serde(default)]
    pub ledger: LedgerConfig,

    #[serde(default)]
    pub upstream: UpstreamConfig,

    #[serde(default)]
    pub collaborators: CollaboratorConfig,

    #[serde(default)]
    pub metering: MeteringConfig,

    #[serde(default)]
    pub processes: ProcessConfig,
}

impl GateConfig {
    /// Load configuration from defaults, files and environment.
    pub fn load() -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        builder = Self::set_defaults(builder)?;

        builder = builder
            .add_source(File::with_name("/etc/geogate/geogate").required(false))
            .add_source(File::with_name("./config/geogate").required(false));

        if let Ok(config_path) = std::env::var("GEOGATE_CONFIG") {
            builder = builder.add_source(File::with_name(&config_path).required(false));
        }

        // Example: GEOGATE__METERING__FLUSH_INTERVAL_MS=5000
        builder = builder.add_source(
            Environment::with_prefix("GEOGATE")
                .prefix_separator("__")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("metering.audited_statuses")
                .try_parsing(true),
        );

        let config: GateConfig = builder.build()?.try_deserialize()?;
        config.validate()?;

        Ok(config)
    }

    fn set_defaults(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<config::ConfigBuilder<config::builder::DefaultState>, ConfigError> {
        builder
            // Server
            .set_default("server.bind_address", "0.0.0.0:8080")?
            .set_default("server.resource_server_id", "rs.geogate.local")?
            // Auth
            .set_default("auth.algorithm", "ES256")?
            .set_default("auth.ignore_expiry", false)?
            // Collaborators
            .set_default("acl.path", "/check-access")?
            .set_default("upstream.base_url", "http://localhost:8081")?
            .set_default("collaborators.timeout_ms", 5000)?
            // Metering
            .set_default("metering.flush_interval_ms", 2000)?
            .set_default("metering.audited_statuses", vec![200i64, 201])?
            // Processes
            .set_default("processes.echo_enabled", false)?
            .set_default("processes.echo_title", "Echo")?
            .set_default("processes.audit_ingestion_title", "AuditLogsIngestion")
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.resource_server_id.trim().is_empty() {
            return Err(ConfigError::Message(
                "server.resource_server_id must not be empty".to_string(),
            ));
        }

        if !matches!(self.auth.algorithm.as_str(), "ES256" | "HS256") {
            return Err(ConfigError::Message(format!(
                "auth.algorithm must be ES256 or HS256, got {}",
                self.auth.algorithm
            )));
        }

        if self.collaborators.timeout_ms == 0 {
            return Err(ConfigError::Message(
                "collaborators.timeout_ms must be > 0".to_string(),
            ));
        }

        if self.metering.flush_interval_ms == 0 {
            return Err(ConfigError::Message(
                "metering.flush_interval_ms must be > 0".to_string(),
            ));
        }

        if self.metering.audited_statuses.is_empty() {
            return Err(ConfigError::Message(
                "metering.audited_statuses must not be empty".to_string(),
            ));
        }

        if let Some(bad) = self
            .metering
            .audited_statuses
            .iter()
            .find(|s| !(100..=599).contains(*s))
        {
            return Err(ConfigError::Message(format!(
                "metering.audited_statuses contains invalid status {bad}"
            )));
        }

        Ok(())
    }

    /// Load configuration from a specific file path
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config: GateConfig = Self::set_defaults(Config::builder())?
            .add_source(File::from(path.as_ref()))
            .build()?
            .try_deserialize()?;
        config.validate()?;

        Ok(config)
    }
}

/// Listener and identity
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    pub bind_address: String,

    /// Identity this deployment serves under; server-scoped credentials must name it
    pub resource_server_id: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            resource_server_id: "rs.geogate.local".to_string(),
        }
    }
}

/// Credential verification
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuthConfig {
    /// Expected `iss` claim; unchecked when absent
    #[serde(default)]
    pub issuer: Option<String>,

    /// `ES256` (PEM public key) or `HS256` (shared secret)
    pub algorithm: String,

    /// Inline key material
    #[serde(default)]
    pub key: Option<String>,

    /// Path to key material, read when `key` is absent
    #[serde(default)]
    pub key_file: Option<String>,

    /// Skip `exp` validation (development only)
    pub ignore_expiry: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            issuer: None,
            algorithm: "ES256".to_string(),
            key: None,
            key_file: None,
            ignore_expiry: false,
        }
    }
}

/// Catalog collaborator
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CatalogConfig {
    /// HTTP catalog; the in-memory catalog is used when absent
    #[serde(default)]
    pub base_url: Option<String>,

    /// JSON seed for the in-memory catalog
    #[serde(default)]
    pub seed_file: Option<String>,
}

/// ACL collaborator
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AclConfig {
    /// HTTP ACL service; the in-memory list (no grants) is used when absent
    #[serde(default)]
    pub base_url: Option<String>,

    pub path: String,
}

impl Default for AclConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            path: "/check-access".to_string(),
        }
    }
}

/// Usage ledger and metering event sink
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct LedgerConfig {
    /// HTTP usage service; the in-memory ledger is used when absent
    #[serde(default)]
    pub base_url: Option<String>,
}

/// Data server requests are forwarded to once admitted
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UpstreamConfig {
    pub base_url: String,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8081".to_string(),
        }
    }
}

/// Bounds applied to every collaborator call
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CollaboratorConfig {
    pub timeout_ms: u64,
}

impl CollaboratorConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for CollaboratorConfig {
    fn default() -> Self {
        Self { timeout_ms: 5000 }
    }
}

/// Usage metering
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MeteringConfig {
    pub flush_interval_ms: u64,

    /// Response statuses that count as usage
    pub audited_statuses: Vec<u16>,
}

impl MeteringConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn is_audited(&self, status: u16) -> bool {
        self.audited_statuses.contains(&status)
    }
}

impl Default for MeteringConfig {
    fn default() -> Self {
        Self {
            flush_interval_ms: 2000,
            audited_statuses: vec![200, 201],
        }
    }
}

/// Process execution rules
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProcessConfig {
    pub echo_enabled: bool,
    pub echo_title: String,
    pub audit_ingestion_title: String,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        let rules = ProcessRules::default();
        Self {
            echo_enabled: rules.echo_enabled,
            echo_title: rules.echo_title,
            audit_ingestion_title: rules.audit_ingestion_title,
        }
    }
}

impl From<&ProcessConfig> for ProcessRules {
    fn from(config: &ProcessConfig) -> Self {
        Self {
            echo_title: config.echo_title.clone(),
            echo_enabled: config.echo_enabled,
            audit_ingestion_title: config.audit_ingestion_title.clone(),
        }
    }
}
