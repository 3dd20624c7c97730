pub mod auth;
pub mod authz;
pub mod metering;
pub mod metrics;
pub mod quota;

pub use auth::{authenticate, BearerToken, TokenVerifier};
pub use authz::AccountingPath;
pub use metering::record_usage;
pub use metrics::track_metrics;
pub use quota::enforce_quota;
