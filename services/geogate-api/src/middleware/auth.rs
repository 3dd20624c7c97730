//! Bearer credential verification
//!
//! Requests without an `Authorization` header pass through with no
//! [`Principal`]; the per-route authorization layer decides whether that is
//! acceptable. A header that is present must carry a valid bearer JWT.

use std::collections::HashSet;

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};
use geogate_core::config::AuthConfig;
use geogate_core::{resolve, Claims, CoreError, CoreResult, GateError, GateResult, Principal};
use jsonwebtoken::{decode, errors::ErrorKind, Algorithm, DecodingKey, Validation};
use tracing::{debug, warn};

use crate::error::ApiError;
use crate::state::AppState;

/// Raw bearer string, kept for ACL calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BearerToken(pub String);

/// Verifies credential signatures and standard claims.
pub struct TokenVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    pub fn new(
        algorithm: Algorithm,
        key: DecodingKey,
        issuer: Option<&str>,
        ignore_expiry: bool,
    ) -> Self {
        let mut validation = Validation::new(algorithm);
        // Audience is matched against the resource server id during resolution.
        validation.validate_aud = false;
        if let Some(issuer) = issuer {
            validation.set_issuer(&[issuer]);
        }
        if ignore_expiry {
            validation.validate_exp = false;
            validation.required_spec_claims = HashSet::new();
        }
        Self { key, validation }
    }

    /// Shared-secret verifier, used by tests and local deployments.
    pub fn hs256(secret: &[u8], issuer: Option<&str>) -> Self {
        Self::new(
            Algorithm::HS256,
            DecodingKey::from_secret(secret),
            issuer,
            false,
        )
    }

    pub fn from_config(config: &AuthConfig) -> CoreResult<Self> {
        let material = match (&config.key, &config.key_file) {
            (Some(key), _) => key.clone().into_bytes(),
            (None, Some(path)) => std::fs::read(path)
                .map_err(|e| CoreError::internal(format!("failed to read {path}: {e}")))?,
            (None, None) => {
                return Err(CoreError::internal(
                    "auth.key or auth.key_file must be configured",
                ))
            }
        };

        let (algorithm, key) = match config.algorithm.as_str() {
            "ES256" => (
                Algorithm::ES256,
                DecodingKey::from_ec_pem(&material)
                    .map_err(|e| CoreError::internal(format!("invalid ES256 public key: {e}")))?,
            ),
            "HS256" => (Algorithm::HS256, DecodingKey::from_secret(&material)),
            other => {
                return Err(CoreError::internal(format!(
                    "unsupported credential algorithm {other}"
                )))
            }
        };

        Ok(Self::new(
            algorithm,
            key,
            config.issuer.as_deref(),
            config.ignore_expiry,
        ))
    }

    /// Checks signature, issuer and expiry and returns the claim set.
    pub fn verify(&self, token: &str) -> GateResult<Claims> {
        decode::<Claims>(token, &self.key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| {
                warn!(error = %e, "credential verification failed");
                match e.kind() {
                    ErrorKind::ExpiredSignature => GateError::invalid_token("Token expired"),
                    ErrorKind::InvalidIssuer => GateError::invalid_token("Invalid issuer"),
                    _ => GateError::invalid_token("Invalid token"),
                }
            })
    }
}

fn bearer(headers: &HeaderMap) -> GateResult<Option<String>> {
    let Some(value) = headers.get(header::AUTHORIZATION) else {
        return Ok(None);
    };
    let value = value
        .to_str()
        .map_err(|_| GateError::invalid_token("Malformed authorization header"))?;
    match value.strip_prefix("Bearer ") {
        Some(token) if !token.trim().is_empty() => Ok(Some(token.trim().to_string())),
        _ => Err(GateError::invalid_token("Malformed authorization header")),
    }
}

/// Resolves the request's bearer credential into a [`Principal`].
pub async fn authenticate(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let Some(token) = bearer(request.headers())? else {
        debug!(path = %request.uri().path(), "no credential presented");
        return Ok(next.run(request).await);
    };

    let claims = state.verifier.verify(&token)?;
    let principal = resolve(Some(&claims), &state.config.server.resource_server_id)?;
    debug!(
        subject = %principal.subject,
        role = %principal.role,
        "credential resolved"
    );

    let extensions = request.extensions_mut();
    extensions.insert::<Principal>(principal);
    extensions.insert(BearerToken(token));
    Ok(next.run(request).await)
}
