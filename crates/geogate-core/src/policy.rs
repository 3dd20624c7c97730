use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ids::{ProcessId, ResourceId, SubjectId};

/// Access policy attached to a catalogued resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum AccessPolicy {
    /// Accessible without a per-consumer grant check.
    Open,
    /// Requires ownership or an ACL grant.
    Secure,
}

impl AccessPolicy {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Secure => "secure",
        }
    }
}

impl fmt::Display for AccessPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccessPolicy {
    type Err = String;

    /// Catalog entries label secure resources as `secure`, `private` or
    /// `restricted`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "open" => Ok(Self::Open),
            "secure" | "private" | "restricted" => Ok(Self::Secure),
            other => Err(format!("unknown access policy `{other}`")),
        }
    }
}

impl TryFrom<String> for AccessPolicy {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Catalog record for a resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceAsset {
    pub id: ResourceId,
    pub owner_id: SubjectId,
    pub access_policy: AccessPolicy,
    /// Group the resource is metered under; the resource itself when absent.
    #[serde(default)]
    pub resource_group: Option<ResourceId>,
}

impl ResourceAsset {
    #[must_use]
    pub fn group(&self) -> ResourceId {
        self.resource_group.unwrap_or(self.id)
    }
}

/// STAC asset pointing back at the collection that owns it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StacAssetRecord {
    pub asset_id: String,
    pub collection_id: ResourceId,
}

/// Registered process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessDescriptor {
    pub id: ProcessId,
    pub title: String,
}
