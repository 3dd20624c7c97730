//! Resolution of verified credential claims into a [`Principal`].
//!
//! Claims arrive already signature-checked. Resolution is pure: it parses
//! role, delegation and scope eagerly and fails closed on anything it does
//! not recognise.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{GateError, GateResult};
use crate::ids::{ResourceId, SubjectId};

const INSTANCE_PREFIX: &str = "ri:";
const SERVER_PREFIX: &str = "rs:";

/// Audience claim, either a single value or a list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Audience {
    One(String),
    Many(Vec<String>),
}

impl Audience {
    #[must_use]
    pub fn contains(&self, value: &str) -> bool {
        match self {
            Self::One(aud) => aud == value,
            Self::Many(auds) => auds.iter().any(|aud| aud == value),
        }
    }
}

/// Raw claim set carried by a verified bearer credential.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<Audience>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    /// Resource instance (`ri:<uuid>`) or resource server (`rs:<id>`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cons: Option<Map<String, Value>>,
    /// Delegator role, present only for delegates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drl: Option<String>,
    /// Delegator id, present only for delegates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub did: Option<String>,
}

/// Role a principal acts with once delegation has been resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BaseRole {
    Provider,
    Consumer,
    Admin,
}

impl BaseRole {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "provider" => Some(Self::Provider),
            "consumer" => Some(Self::Consumer),
            "admin" => Some(Self::Admin),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Provider => "provider",
            Self::Consumer => "consumer",
            Self::Admin => "admin",
        }
    }
}

impl fmt::Display for BaseRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Delegator a delegate acts on behalf of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Delegation {
    pub role: BaseRole,
    pub delegator: SubjectId,
}

/// Credential role. Delegation fields exist only on [`Role::Delegate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Provider,
    Consumer,
    Admin,
    Delegate(Delegation),
}

impl Role {
    #[must_use]
    pub const fn effective(&self) -> BaseRole {
        match self {
            Self::Provider => BaseRole::Provider,
            Self::Consumer => BaseRole::Consumer,
            Self::Admin => BaseRole::Admin,
            Self::Delegate(delegation) => delegation.role,
        }
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Provider => "provider",
            Self::Consumer => "consumer",
            Self::Admin => "admin",
            Self::Delegate(_) => "delegate",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a credential was issued for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CredentialScope {
    /// Bound to one resource instance.
    Instance(ResourceId),
    /// Valid across the named resource server.
    Server(String),
}

/// Constraint object carried in the `cons` claim.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Constraints(Map<String, Value>);

impl Constraints {
    #[must_use]
    pub fn new(inner: Map<String, Value>) -> Self {
        Self(inner)
    }

    /// True when `access` lists the `api` grant.
    #[must_use]
    pub fn has_api_access(&self) -> bool {
        self.0
            .get("access")
            .and_then(Value::as_array)
            .is_some_and(|grants| grants.iter().any(|g| g.as_str() == Some("api")))
    }

    /// Raw `limits` object. An explicit `null` counts as absent.
    #[must_use]
    pub fn limits(&self) -> Option<&Value> {
        self.0.get("limits").filter(|v| !v.is_null())
    }
}

/// Validated identity for the current request.
#[derive(Debug, Clone, PartialEq)]
pub struct Principal {
    pub subject: SubjectId,
    pub role: Role,
    pub scope: CredentialScope,
    pub constraints: Constraints,
    pub expires_at: Option<i64>,
}

impl Principal {
    /// Subject whose ownership and usage this request counts against.
    #[must_use]
    pub fn effective_subject(&self) -> SubjectId {
        match self.role {
            Role::Delegate(delegation) => delegation.delegator,
            _ => self.subject,
        }
    }

    #[must_use]
    pub fn effective_role(&self) -> BaseRole {
        self.role.effective()
    }

    #[must_use]
    pub fn is_server_scoped(&self) -> bool {
        matches!(self.scope, CredentialScope::Server(_))
    }

    #[must_use]
    pub fn instance_id(&self) -> Option<ResourceId> {
        match self.scope {
            CredentialScope::Instance(id) => Some(id),
            CredentialScope::Server(_) => None,
        }
    }

    /// Delegator id for delegates.
    #[must_use]
    pub fn delegator(&self) -> Option<SubjectId> {
        match self.role {
            Role::Delegate(delegation) => Some(delegation.delegator),
            _ => None,
        }
    }
}

/// Turns verified claims into a [`Principal`].
///
/// `resource_server_id` is the identity this deployment serves under; a
/// server-scoped credential must name it both in `iid` and in `aud`.
///
/// # Errors
///
/// `MissingCredential` when `claims` is `None`, `InvalidToken` for any
/// malformed or mis-scoped field.
pub fn resolve(claims: Option<&Claims>, resource_server_id: &str) -> GateResult<Principal> {
    let claims = claims.ok_or_else(GateError::missing_credential)?;

    let subject = claims
        .sub
        .as_deref()
        .and_then(SubjectId::parse_canonical)
        .ok_or_else(|| GateError::invalid_token("Invalid subject"))?;

    let role = parse_role(claims)?;
    let scope = parse_scope(claims, resource_server_id)?;

    Ok(Principal {
        subject,
        role,
        scope,
        constraints: Constraints::new(claims.cons.clone().unwrap_or_default()),
        expires_at: claims.exp,
    })
}

fn parse_role(claims: &Claims) -> GateResult<Role> {
    let raw = claims
        .role
        .as_deref()
        .ok_or_else(|| GateError::invalid_token("Missing role"))?;

    if raw == "delegate" {
        let role = claims
            .drl
            .as_deref()
            .and_then(BaseRole::parse)
            .ok_or_else(|| GateError::invalid_token("Invalid delegator role"))?;
        let delegator = claims
            .did
            .as_deref()
            .and_then(SubjectId::parse_canonical)
            .ok_or_else(|| GateError::invalid_token("Invalid delegator id"))?;
        return Ok(Role::Delegate(Delegation { role, delegator }));
    }

    match BaseRole::parse(raw) {
        Some(BaseRole::Provider) => Ok(Role::Provider),
        Some(BaseRole::Consumer) => Ok(Role::Consumer),
        Some(BaseRole::Admin) => Ok(Role::Admin),
        None => Err(GateError::invalid_token(format!("Invalid role `{raw}`"))),
    }
}

fn parse_scope(claims: &Claims, resource_server_id: &str) -> GateResult<CredentialScope> {
    let iid = claims
        .iid
        .as_deref()
        .ok_or_else(|| GateError::invalid_token("Missing item id"))?;

    if let Some(instance) = iid.strip_prefix(INSTANCE_PREFIX) {
        return ResourceId::parse_canonical(instance)
            .map(CredentialScope::Instance)
            .ok_or_else(|| GateError::invalid_token("Invalid item id"));
    }

    if let Some(server) = iid.strip_prefix(SERVER_PREFIX) {
        let audience_ok = claims
            .aud
            .as_ref()
            .is_some_and(|aud| aud.contains(resource_server_id));
        if server != resource_server_id || !audience_ok {
            return Err(GateError::invalid_token("Invalid Audience Value"));
        }
        return Ok(CredentialScope::Server(server.to_string()));
    }

    Err(GateError::invalid_token("Invalid item id"))
}
