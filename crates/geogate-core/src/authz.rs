//! Access decisions per endpoint class.
//!
//! Every public method ends in exactly one outcome: an [`Authorization`]
//! describing who the request is accounted to, or a single [`GateError`].

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{codes, GateError, GateResult};
use crate::ids::{ProcessId, ResourceId, SubjectId};
use crate::metrics::AUTHZ_DECISIONS;
use crate::policy::{AccessPolicy, ResourceAsset};
use crate::principal::{BaseRole, Principal, Role};
use crate::traits::{bounded, AccessControlList, Catalog};

/// Seconds of remaining credential lifetime below which presigning is refused.
pub const PRESIGN_EXPIRY_THRESHOLD_SECS: i64 = 10;

/// Endpoint classes with their own decision table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointClass {
    FeatureOrTile,
    StacAsset,
    StacItem,
    CollectionOnboarding,
    ItemOnboarding,
    Process,
    JobStatus,
    Metering,
}

impl EndpointClass {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::FeatureOrTile => "feature_tile",
            Self::StacAsset => "stac_asset",
            Self::StacItem => "stac_item",
            Self::CollectionOnboarding => "collection_onboarding",
            Self::ItemOnboarding => "item_onboarding",
            Self::Process => "process",
            Self::JobStatus => "job_status",
            Self::Metering => "metering",
        }
    }
}

/// Metering read APIs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeteringApi {
    ConsumerAudit,
    ProviderAudit,
    Overview,
    Summary,
}

impl MeteringApi {
    /// Maps a request path onto a metering API.
    #[must_use]
    pub fn from_path(path: &str) -> Option<Self> {
        match path.trim_end_matches('/') {
            "/ngsi-ld/v1/consumer/audit" => Some(Self::ConsumerAudit),
            "/ngsi-ld/v1/provider/audit" => Some(Self::ProviderAudit),
            "/ngsi-ld/v1/overview" => Some(Self::Overview),
            "/ngsi-ld/v1/summary" => Some(Self::Summary),
            _ => None,
        }
    }
}

/// Process titles with dedicated rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessRules {
    pub echo_title: String,
    pub echo_enabled: bool,
    pub audit_ingestion_title: String,
}

impl Default for ProcessRules {
    fn default() -> Self {
        Self {
            echo_title: "Echo".to_string(),
            echo_enabled: false,
            audit_ingestion_title: "AuditLogsIngestion".to_string(),
        }
    }
}

/// Outcome of a successful decision.
#[derive(Debug, Clone, PartialEq)]
pub struct Authorization {
    /// Subject usage and ownership are accounted to.
    pub subject: SubjectId,
    /// Role the decision was taken with.
    pub role: BaseRole,
    /// Role named on the credential.
    pub credential_role: Role,
    pub resource_id: Option<ResourceId>,
    pub asset: Option<ResourceAsset>,
    /// Whether downstream may hand out presigned links.
    pub presign_allowed: bool,
}

impl Authorization {
    fn for_principal(principal: &Principal) -> Self {
        Self {
            subject: principal.effective_subject(),
            role: principal.effective_role(),
            credential_role: principal.role,
            resource_id: principal.instance_id(),
            asset: None,
            presign_allowed: false,
        }
    }

    fn with_asset(mut self, asset: ResourceAsset) -> Self {
        self.resource_id = Some(asset.id);
        self.asset = Some(asset);
        self
    }
}

/// Decision tables backed by the catalog and ACL collaborators.
pub struct AccessDecisionEngine {
    catalog: Arc<dyn Catalog>,
    acl: Arc<dyn AccessControlList>,
    timeout: Duration,
    processes: ProcessRules,
}

impl AccessDecisionEngine {
    pub fn new(
        catalog: Arc<dyn Catalog>,
        acl: Arc<dyn AccessControlList>,
        timeout: Duration,
        processes: ProcessRules,
    ) -> Self {
        Self {
            catalog,
            acl,
            timeout,
            processes,
        }
    }

    /// Generic feature and tile routes addressed by collection id.
    pub async fn authorize_resource(
        &self,
        principal: &Principal,
        raw_resource_id: &str,
        bearer: &str,
    ) -> GateResult<Authorization> {
        let outcome: GateResult<Authorization> = async {
            let resource_id = parse_resource_id(raw_resource_id)?;
            self.decide_resource(EndpointClass::FeatureOrTile, principal, resource_id, bearer)
                .await
        }
        .await;
        record(EndpointClass::FeatureOrTile, &outcome);
        outcome
    }

    /// STAC asset routes addressed by asset id.
    pub async fn authorize_stac_asset(
        &self,
        principal: &Principal,
        asset_id: &str,
        bearer: &str,
    ) -> GateResult<Authorization> {
        let outcome: GateResult<Authorization> = async {
            let stac = bounded("catalog", self.timeout, self.catalog.get_stac_asset(asset_id))
                .await?
                .ok_or_else(|| GateError::not_found(format!("Asset `{asset_id}` not found")))?;
            self.decide_resource(
                EndpointClass::StacAsset,
                principal,
                stac.collection_id,
                bearer,
            )
            .await
        }
        .await;
        record(EndpointClass::StacAsset, &outcome);
        outcome
    }

    /// STAC item by id. Never refuses on authorization grounds; only the
    /// presign flag reflects the decision.
    pub async fn authorize_stac_item(
        &self,
        principal: Option<&Principal>,
        raw_collection_id: &str,
        bearer: Option<&str>,
        now_epoch: i64,
    ) -> GateResult<Authorization> {
        let collection_id = match parse_resource_id(raw_collection_id) {
            Ok(id) => id,
            Err(err) => {
                record_label(EndpointClass::StacItem, err.code());
                return Err(err);
            }
        };

        let (Some(principal), Some(bearer)) = (principal, bearer) else {
            debug!("no credential, presigning disabled");
            record_label(EndpointClass::StacItem, "anonymous");
            // Anonymous reads are accounted to the nil subject.
            return Ok(Authorization {
                subject: SubjectId::from_uuid(uuid::Uuid::nil()),
                role: BaseRole::Consumer,
                credential_role: Role::Consumer,
                resource_id: Some(collection_id),
                asset: None,
                presign_allowed: false,
            });
        };

        let mut authorization = Authorization::for_principal(principal);
        authorization.resource_id = Some(collection_id);

        if let Some(exp) = principal.expires_at {
            if exp.saturating_sub(now_epoch) <= PRESIGN_EXPIRY_THRESHOLD_SECS {
                warn!(
                    threshold_secs = PRESIGN_EXPIRY_THRESHOLD_SECS,
                    "credential about to expire, presigning disabled"
                );
                record_label(EndpointClass::StacItem, "presign_expiring");
                return Ok(authorization);
            }
        }

        match self
            .decide_resource(EndpointClass::StacItem, principal, collection_id, bearer)
            .await
        {
            Ok(decided) => {
                authorization = decided;
                authorization.presign_allowed = true;
                record_label(EndpointClass::StacItem, "allow");
            }
            Err(err) => {
                debug!(reason = %err, "presigning disabled");
                record_label(EndpointClass::StacItem, "presign_denied");
            }
        }
        Ok(authorization)
    }

    /// Collection onboarding; every id in the body must be owned by the caller.
    pub async fn authorize_collection_onboarding(
        &self,
        principal: &Principal,
        raw_collection_ids: &[String],
    ) -> GateResult<Authorization> {
        let outcome: GateResult<Authorization> = async {
            require_provider(principal)?;
            if raw_collection_ids.is_empty() {
                return Err(GateError::bad_request("No collection id in request body"));
            }
            let ids = raw_collection_ids
                .iter()
                .map(|raw| {
                    ResourceId::parse_canonical(raw).ok_or_else(|| {
                        GateError::bad_request(format!("Invalid collection id `{raw}`"))
                    })
                })
                .collect::<GateResult<Vec<_>>>()?;
            require_server_scope(principal)?;

            let mut authorization = Authorization::for_principal(principal);
            for id in ids {
                let asset = self.fetch_asset(id).await?;
                require_owner(principal, &asset)?;
                authorization = authorization.with_asset(asset);
            }
            Ok(authorization)
        }
        .await;
        record(EndpointClass::CollectionOnboarding, &outcome);
        outcome
    }

    /// Item onboarding into the collection named in the path.
    pub async fn authorize_item_onboarding(
        &self,
        principal: &Principal,
        raw_collection_id: &str,
    ) -> GateResult<Authorization> {
        let outcome: GateResult<Authorization> = async {
            require_provider(principal)?;
            let id = ResourceId::parse_canonical(raw_collection_id).ok_or_else(|| {
                GateError::bad_request(format!("Invalid collection id `{raw_collection_id}`"))
            })?;
            require_server_scope(principal)?;
            let asset = self.fetch_asset(id).await?;
            require_owner(principal, &asset)?;
            Ok(Authorization::for_principal(principal).with_asset(asset))
        }
        .await;
        record(EndpointClass::ItemOnboarding, &outcome);
        outcome
    }

    /// Process execution.
    pub async fn authorize_process(
        &self,
        principal: &Principal,
        raw_process_id: &str,
    ) -> GateResult<Authorization> {
        let outcome: GateResult<Authorization> = async {
            let process_id = ProcessId::parse_canonical(raw_process_id).ok_or_else(|| {
                GateError::bad_request(format!("Invalid process id `{raw_process_id}`"))
            })?;
            let process = bounded("catalog", self.timeout, self.catalog.get_process(process_id))
                .await?
                .ok_or_else(|| GateError::not_found(format!("Process `{process_id}` not found")))?;
            debug!(%process_id, title = %process.title, "process resolved");

            if process.title == self.processes.echo_title && !self.processes.echo_enabled {
                return Err(GateError::forbidden("Echo process is disabled"));
            }

            if process.title == self.processes.audit_ingestion_title {
                if principal.role == Role::Admin && principal.is_server_scoped() {
                    return Ok(Authorization::for_principal(principal));
                }
                return Err(GateError::not_authorized(
                    "Only resource server admin may execute this process",
                ));
            }

            if !principal.is_server_scoped() {
                return Err(GateError::not_authorized(
                    "Process execution requires a resource server token",
                ));
            }
            if principal.effective_role() != BaseRole::Provider {
                return Err(GateError::not_authorized(
                    "Only providers and provider delegates may execute this process",
                ));
            }
            Ok(Authorization::for_principal(principal))
        }
        .await;
        record(EndpointClass::Process, &outcome);
        outcome
    }

    /// Job status. Any resolved principal proceeds.
    #[must_use]
    pub fn authorize_job_status(&self, principal: &Principal) -> Authorization {
        record(EndpointClass::JobStatus, &Ok::<_, GateError>(()));
        Authorization::for_principal(principal)
    }

    /// Metering read APIs, addressed by request path.
    pub fn authorize_metering(
        &self,
        principal: &Principal,
        path: &str,
    ) -> GateResult<Authorization> {
        let outcome = decide_metering(principal, MeteringApi::from_path(path));
        record(EndpointClass::Metering, &outcome);
        outcome
    }

    async fn decide_resource(
        &self,
        class: EndpointClass,
        principal: &Principal,
        resource_id: ResourceId,
        bearer: &str,
    ) -> GateResult<Authorization> {
        if let Some(instance) = principal.instance_id() {
            if instance != resource_id {
                warn!(%instance, %resource_id, "credential scoped to another resource");
                return Err(GateError::not_authorized(
                    "Credential is not valid for this resource",
                ));
            }
        }

        let asset = self.fetch_asset(resource_id).await?;
        match asset.access_policy {
            AccessPolicy::Open => decide_open(class, principal)?,
            AccessPolicy::Secure => self.decide_secure(principal, &asset, bearer).await?,
        }
        debug!(%resource_id, class = class.as_str(), "resource access granted");
        Ok(Authorization::for_principal(principal).with_asset(asset))
    }

    async fn decide_secure(
        &self,
        principal: &Principal,
        asset: &ResourceAsset,
        bearer: &str,
    ) -> GateResult<()> {
        let role = principal.effective_role();

        if principal.is_server_scoped() {
            if role == BaseRole::Provider && principal.effective_subject() == asset.owner_id {
                return Ok(());
            }
            return Err(GateError::not_authorized(
                "Resource server token cannot access a secure resource",
            ));
        }

        match role {
            BaseRole::Provider => Ok(()),
            BaseRole::Admin => Err(GateError::not_authorized(
                "Admin credential cannot access a secure resource",
            )),
            BaseRole::Consumer => {
                if !principal.constraints.has_api_access() {
                    return Err(GateError::not_authorized("Credential lacks api access"));
                }
                let granted =
                    bounded("acl", self.timeout, self.acl.check_access(asset.id, bearer)).await?;
                if granted {
                    Ok(())
                } else {
                    Err(GateError::forbidden("No active access grant for this resource"))
                }
            }
        }
    }

    async fn fetch_asset(&self, resource_id: ResourceId) -> GateResult<ResourceAsset> {
        bounded("catalog", self.timeout, self.catalog.get_asset(resource_id))
            .await?
            .ok_or_else(|| GateError::not_found(format!("Collection `{resource_id}` not found")))
    }
}

fn parse_resource_id(raw: &str) -> GateResult<ResourceId> {
    ResourceId::parse_canonical(raw)
        .ok_or_else(|| GateError::not_found(format!("Collection `{raw}` not found")))
}

fn decide_open(class: EndpointClass, principal: &Principal) -> GateResult<()> {
    if principal.is_server_scoped() {
        return Ok(());
    }
    if class == EndpointClass::StacAsset {
        return Err(GateError::NotAuthorized {
            code: codes::RESOURCE_OPEN_TOKEN_SECURE,
            description: "Open resource requires a resource server token".to_string(),
        });
    }
    if principal.effective_role() == BaseRole::Consumer && !principal.constraints.has_api_access()
    {
        return Err(GateError::not_authorized("Credential lacks api access"));
    }
    Ok(())
}

fn decide_metering(principal: &Principal, api: Option<MeteringApi>) -> GateResult<Authorization> {
    let allowed = match api {
        Some(MeteringApi::ConsumerAudit) => true,
        Some(MeteringApi::ProviderAudit) => principal.effective_role() != BaseRole::Consumer,
        Some(MeteringApi::Overview | MeteringApi::Summary) => {
            let provider_like = matches!(principal.role, Role::Provider | Role::Delegate(_));
            !(provider_like && !principal.is_server_scoped())
        }
        None => false,
    };
    if allowed {
        Ok(Authorization::for_principal(principal))
    } else {
        Err(GateError::not_authorized("Role not permitted for this API"))
    }
}

fn require_provider(principal: &Principal) -> GateResult<()> {
    match principal.role {
        Role::Provider => Ok(()),
        Role::Delegate(delegation) if delegation.role == BaseRole::Provider => Ok(()),
        _ => Err(GateError::not_authorized(
            "Only providers and provider delegates may onboard",
        )),
    }
}

fn require_server_scope(principal: &Principal) -> GateResult<()> {
    if principal.is_server_scoped() {
        Ok(())
    } else {
        Err(GateError::not_authorized("open token should be used"))
    }
}

fn require_owner(principal: &Principal, asset: &ResourceAsset) -> GateResult<()> {
    if principal.effective_subject() == asset.owner_id {
        Ok(())
    } else {
        warn!(resource_id = %asset.id, "ownership check failed");
        Err(GateError::forbidden("ownership check failed"))
    }
}

fn record<T>(class: EndpointClass, outcome: &GateResult<T>) {
    let label = match outcome {
        Ok(_) => "allow",
        Err(err) => err.code(),
    };
    record_label(class, label);
}

fn record_label(class: EndpointClass, label: &str) {
    AUTHZ_DECISIONS
        .with_label_values(&[class.as_str(), label])
        .inc();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryCatalog, StaticAccessList};
    use crate::policy::ProcessDescriptor;
    use crate::principal::{Constraints, CredentialScope, Delegation};
    use serde_json::json;

    const SERVER: &str = "rs.geo.example.org";
    const BEARER: &str = "bearer-token";

    struct Fixture {
        engine: AccessDecisionEngine,
        catalog: Arc<MemoryCatalog>,
        acl: Arc<StaticAccessList>,
    }

    fn fixture() -> Fixture {
        let catalog = Arc::new(MemoryCatalog::new());
        let acl = Arc::new(StaticAccessList::new());
        let engine = AccessDecisionEngine::new(
            catalog.clone(),
            acl.clone(),
            Duration::from_millis(500),
            ProcessRules::default(),
        );
        Fixture {
            engine,
            catalog,
            acl,
        }
    }

    fn principal(role: Role, scope: CredentialScope, cons: serde_json::Value) -> Principal {
        Principal {
            subject: SubjectId::new(),
            role,
            scope,
            constraints: Constraints::new(cons.as_object().cloned().unwrap_or_default()),
            expires_at: None,
        }
    }

    fn server() -> CredentialScope {
        CredentialScope::Server(SERVER.to_string())
    }

    fn asset(owner: SubjectId, policy: AccessPolicy) -> ResourceAsset {
        ResourceAsset {
            id: ResourceId::new(),
            owner_id: owner,
            access_policy: policy,
            resource_group: None,
        }
    }

    #[tokio::test]
    async fn server_token_proceeds_on_open_resource() {
        let f = fixture();
        let a = asset(SubjectId::new(), AccessPolicy::Open);
        f.catalog.insert_asset(a.clone());

        for role in [Role::Provider, Role::Consumer, Role::Admin] {
            let p = principal(role, server(), json!({}));
            let auth = f
                .engine
                .authorize_resource(&p, &a.id.to_string(), BEARER)
                .await
                .unwrap();
            assert_eq!(auth.resource_id, Some(a.id));
            assert_eq!(auth.asset.as_ref(), Some(&a));
        }
    }

    #[tokio::test]
    async fn owning_provider_with_server_token_proceeds_on_secure_resource() {
        let f = fixture();
        let owner = principal(Role::Provider, server(), json!({}));
        let a = asset(owner.subject, AccessPolicy::Secure);
        f.catalog.insert_asset(a.clone());

        assert!(f
            .engine
            .authorize_resource(&owner, &a.id.to_string(), BEARER)
            .await
            .is_ok());

        let stranger = principal(Role::Provider, server(), json!({}));
        let err = f
            .engine
            .authorize_resource(&stranger, &a.id.to_string(), BEARER)
            .await
            .unwrap_err();
        assert_eq!(err.status(), 401);

        let consumer = principal(Role::Consumer, server(), json!({"access": ["api"]}));
        let err = f
            .engine
            .authorize_resource(&consumer, &a.id.to_string(), BEARER)
            .await
            .unwrap_err();
        assert_eq!(err.status(), 401);
    }

    #[tokio::test]
    async fn instance_mismatch_is_rejected_before_catalog() {
        let f = fixture();
        let target = asset(SubjectId::new(), AccessPolicy::Secure);
        f.catalog.insert_asset(target.clone());

        for role in [Role::Provider, Role::Consumer, Role::Admin] {
            let p = principal(role, CredentialScope::Instance(ResourceId::new()), json!({}));
            let err = f
                .engine
                .authorize_resource(&p, &target.id.to_string(), BEARER)
                .await
                .unwrap_err();
            assert_eq!(err.status(), 401);
        }
        assert_eq!(f.catalog.asset_lookups(), 0);
    }

    #[tokio::test]
    async fn malformed_or_unknown_resource_is_not_found() {
        let f = fixture();
        let p = principal(Role::Provider, server(), json!({}));
        let err = f
            .engine
            .authorize_resource(&p, "not-a-uuid", BEARER)
            .await
            .unwrap_err();
        assert_eq!(err.status(), 404);

        let err = f
            .engine
            .authorize_resource(&p, &ResourceId::new().to_string(), BEARER)
            .await
            .unwrap_err();
        assert_eq!(err.status(), 404);
    }

    #[tokio::test]
    async fn catalog_failure_is_internal() {
        let f = fixture();
        f.catalog.set_failing(true);
        let p = principal(Role::Provider, server(), json!({}));
        let err = f
            .engine
            .authorize_resource(&p, &ResourceId::new().to_string(), BEARER)
            .await
            .unwrap_err();
        assert_eq!(err.status(), 500);
    }

    #[tokio::test]
    async fn secure_consumer_without_grant_skips_acl() {
        let f = fixture();
        let a = asset(SubjectId::new(), AccessPolicy::Secure);
        f.catalog.insert_asset(a.clone());
        f.acl.grant(a.id, BEARER);

        let p = principal(Role::Consumer, CredentialScope::Instance(a.id), json!({}));
        let err = f
            .engine
            .authorize_resource(&p, &a.id.to_string(), BEARER)
            .await
            .unwrap_err();
        assert_eq!(err.status(), 401);
        assert_eq!(f.acl.calls(), 0);
    }

    #[tokio::test]
    async fn secure_consumer_acl_outcomes() {
        let f = fixture();
        let a = asset(SubjectId::new(), AccessPolicy::Secure);
        f.catalog.insert_asset(a.clone());
        let p = principal(
            Role::Consumer,
            CredentialScope::Instance(a.id),
            json!({"access": ["api"]}),
        );

        let err = f
            .engine
            .authorize_resource(&p, &a.id.to_string(), BEARER)
            .await
            .unwrap_err();
        assert_eq!(err.status(), 403);

        f.acl.grant(a.id, BEARER);
        assert!(f
            .engine
            .authorize_resource(&p, &a.id.to_string(), BEARER)
            .await
            .is_ok());

        f.acl.set_failing(true);
        let err = f
            .engine
            .authorize_resource(&p, &a.id.to_string(), BEARER)
            .await
            .unwrap_err();
        assert_eq!(err.status(), 500);
    }

    #[tokio::test]
    async fn secure_instance_provider_and_admin() {
        let f = fixture();
        let a = asset(SubjectId::new(), AccessPolicy::Secure);
        f.catalog.insert_asset(a.clone());

        let provider = principal(Role::Provider, CredentialScope::Instance(a.id), json!({}));
        assert!(f
            .engine
            .authorize_resource(&provider, &a.id.to_string(), BEARER)
            .await
            .is_ok());

        let admin = principal(Role::Admin, CredentialScope::Instance(a.id), json!({}));
        let err = f
            .engine
            .authorize_resource(&admin, &a.id.to_string(), BEARER)
            .await
            .unwrap_err();
        assert_eq!(err.status(), 401);
    }

    #[tokio::test]
    async fn delegate_uses_delegator_role_and_identity() {
        let f = fixture();
        let delegator = SubjectId::new();
        let a = asset(delegator, AccessPolicy::Secure);
        f.catalog.insert_asset(a.clone());

        let delegate = principal(
            Role::Delegate(Delegation {
                role: BaseRole::Provider,
                delegator,
            }),
            server(),
            json!({}),
        );
        let auth = f
            .engine
            .authorize_resource(&delegate, &a.id.to_string(), BEARER)
            .await
            .unwrap();
        assert_eq!(auth.subject, delegator);
        assert_eq!(auth.role, BaseRole::Provider);

        let consumer_delegate = principal(
            Role::Delegate(Delegation {
                role: BaseRole::Consumer,
                delegator: SubjectId::new(),
            }),
            CredentialScope::Instance(a.id),
            json!({}),
        );
        let err = f
            .engine
            .authorize_resource(&consumer_delegate, &a.id.to_string(), BEARER)
            .await
            .unwrap_err();
        assert_eq!(err.status(), 401);
    }

    #[tokio::test]
    async fn open_resource_instance_consumer_needs_grant() {
        let f = fixture();
        let a = asset(SubjectId::new(), AccessPolicy::Open);
        f.catalog.insert_asset(a.clone());

        let without = principal(Role::Consumer, CredentialScope::Instance(a.id), json!({}));
        assert!(f
            .engine
            .authorize_resource(&without, &a.id.to_string(), BEARER)
            .await
            .is_err());

        let with = principal(
            Role::Consumer,
            CredentialScope::Instance(a.id),
            json!({"access": ["api"]}),
        );
        assert!(f
            .engine
            .authorize_resource(&with, &a.id.to_string(), BEARER)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn stac_asset_resolves_collection() {
        let f = fixture();
        let a = asset(SubjectId::new(), AccessPolicy::Open);
        f.catalog.insert_asset(a.clone());
        f.catalog.insert_stac_asset("thumb-1", a.id);

        let p = principal(Role::Consumer, server(), json!({}));
        let auth = f
            .engine
            .authorize_stac_asset(&p, "thumb-1", BEARER)
            .await
            .unwrap();
        assert_eq!(auth.resource_id, Some(a.id));

        let err = f
            .engine
            .authorize_stac_asset(&p, "missing", BEARER)
            .await
            .unwrap_err();
        assert_eq!(err.status(), 404);

        let instance = principal(
            Role::Consumer,
            CredentialScope::Instance(a.id),
            json!({"access": ["api"]}),
        );
        let err = f
            .engine
            .authorize_stac_asset(&instance, "thumb-1", BEARER)
            .await
            .unwrap_err();
        assert_eq!(err.code(), codes::RESOURCE_OPEN_TOKEN_SECURE);
    }

    #[tokio::test]
    async fn stac_item_sets_presign_flag_only() {
        let f = fixture();
        let a = asset(SubjectId::new(), AccessPolicy::Secure);
        f.catalog.insert_asset(a.clone());
        let id = a.id.to_string();

        let anon = f.engine.authorize_stac_item(None, &id, None, 0).await.unwrap();
        assert!(!anon.presign_allowed);

        let mut provider = principal(Role::Provider, CredentialScope::Instance(a.id), json!({}));
        let ok = f
            .engine
            .authorize_stac_item(Some(&provider), &id, Some(BEARER), 0)
            .await
            .unwrap();
        assert!(ok.presign_allowed);

        provider.expires_at = Some(1_000);
        let expiring = f
            .engine
            .authorize_stac_item(Some(&provider), &id, Some(BEARER), 995)
            .await
            .unwrap();
        assert!(!expiring.presign_allowed);

        let outsider = principal(Role::Consumer, server(), json!({}));
        let denied = f
            .engine
            .authorize_stac_item(Some(&outsider), &id, Some(BEARER), 0)
            .await
            .unwrap();
        assert!(!denied.presign_allowed);

        let err = f
            .engine
            .authorize_stac_item(Some(&outsider), "bad-id", Some(BEARER), 0)
            .await
            .unwrap_err();
        assert_eq!(err.status(), 404);
    }

    fn stac_item_decisions(label: &str) -> u64 {
        AUTHZ_DECISIONS
            .with_label_values(&[EndpointClass::StacItem.as_str(), label])
            .get()
    }

    #[tokio::test]
    async fn stac_item_counts_actual_outcome() {
        let f = fixture();
        let a = asset(SubjectId::new(), AccessPolicy::Secure);
        f.catalog.insert_asset(a.clone());
        let id = a.id.to_string();

        let anonymous = stac_item_decisions("anonymous");
        f.engine.authorize_stac_item(None, &id, None, 0).await.unwrap();
        assert!(stac_item_decisions("anonymous") > anonymous);

        let denied = stac_item_decisions("presign_denied");
        let outsider = principal(Role::Consumer, server(), json!({}));
        f.engine
            .authorize_stac_item(Some(&outsider), &id, Some(BEARER), 0)
            .await
            .unwrap();
        assert!(stac_item_decisions("presign_denied") > denied);
    }

    struct StalledCatalog;

    #[async_trait::async_trait]
    impl Catalog for StalledCatalog {
        async fn get_asset(&self, _: ResourceId) -> crate::error::CoreResult<Option<ResourceAsset>> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(None)
        }

        async fn get_stac_asset(
            &self,
            _: &str,
        ) -> crate::error::CoreResult<Option<crate::policy::StacAssetRecord>> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(None)
        }

        async fn get_process(
            &self,
            _: ProcessId,
        ) -> crate::error::CoreResult<Option<ProcessDescriptor>> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(None)
        }
    }

    #[tokio::test]
    async fn stalled_catalog_times_out_as_internal() {
        let engine = AccessDecisionEngine::new(
            Arc::new(StalledCatalog),
            Arc::new(StaticAccessList::new()),
            Duration::from_millis(20),
            ProcessRules::default(),
        );
        let p = principal(Role::Provider, server(), json!({}));
        let err = engine
            .authorize_resource(&p, &ResourceId::new().to_string(), BEARER)
            .await
            .unwrap_err();
        assert_eq!(err.status(), 500);
    }

    #[tokio::test]
    async fn stac_item_expiry_check_saturates() {
        let f = fixture();
        let a = asset(SubjectId::new(), AccessPolicy::Open);
        f.catalog.insert_asset(a.clone());

        let mut p = principal(Role::Consumer, server(), json!({}));
        p.expires_at = Some(i64::MIN + 1);
        let auth = f
            .engine
            .authorize_stac_item(Some(&p), &a.id.to_string(), Some(BEARER), i64::MAX)
            .await
            .unwrap();
        assert!(!auth.presign_allowed);
    }

    #[tokio::test]
    async fn onboarding_requires_ownership() {
        let f = fixture();
        let owner = principal(Role::Provider, server(), json!({}));
        let owned = asset(owner.subject, AccessPolicy::Secure);
        let foreign = asset(SubjectId::new(), AccessPolicy::Open);
        f.catalog.insert_asset(owned.clone());
        f.catalog.insert_asset(foreign.clone());

        assert!(f
            .engine
            .authorize_collection_onboarding(&owner, &[owned.id.to_string()])
            .await
            .is_ok());

        let err = f
            .engine
            .authorize_collection_onboarding(&owner, &[owned.id.to_string(), foreign.id.to_string()])
            .await
            .unwrap_err();
        assert_eq!(err.status(), 403);
        assert_eq!(err.description(), "ownership check failed");

        let err = f
            .engine
            .authorize_collection_onboarding(&owner, &["nope".to_string()])
            .await
            .unwrap_err();
        assert_eq!(err.status(), 400);

        let consumer = principal(Role::Consumer, server(), json!({}));
        let err = f
            .engine
            .authorize_item_onboarding(&consumer, &owned.id.to_string())
            .await
            .unwrap_err();
        assert_eq!(err.status(), 401);

        let instance_owner = Principal {
            scope: CredentialScope::Instance(owned.id),
            ..owner.clone()
        };
        let err = f
            .engine
            .authorize_item_onboarding(&instance_owner, &owned.id.to_string())
            .await
            .unwrap_err();
        assert_eq!(err.status(), 401);

        assert!(f
            .engine
            .authorize_item_onboarding(&owner, &owned.id.to_string())
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn process_rules() {
        let f = fixture();
        let echo = ProcessDescriptor {
            id: ProcessId::new(),
            title: "Echo".into(),
        };
        let ingest = ProcessDescriptor {
            id: ProcessId::new(),
            title: "AuditLogsIngestion".into(),
        };
        let tiling = ProcessDescriptor {
            id: ProcessId::new(),
            title: "TilesOnboarding".into(),
        };
        for p in [&echo, &ingest, &tiling] {
            f.catalog.insert_process(p.clone());
        }

        let provider = principal(Role::Provider, server(), json!({}));
        let admin = principal(Role::Admin, server(), json!({}));

        let err = f
            .engine
            .authorize_process(&provider, &echo.id.to_string())
            .await
            .unwrap_err();
        assert_eq!(err.status(), 403);

        assert!(f
            .engine
            .authorize_process(&admin, &ingest.id.to_string())
            .await
            .is_ok());
        assert_eq!(
            f.engine
                .authorize_process(&provider, &ingest.id.to_string())
                .await
                .unwrap_err()
                .status(),
            401
        );

        assert!(f
            .engine
            .authorize_process(&provider, &tiling.id.to_string())
            .await
            .is_ok());
        assert_eq!(
            f.engine
                .authorize_process(&admin, &tiling.id.to_string())
                .await
                .unwrap_err()
                .status(),
            401
        );

        assert_eq!(
            f.engine
                .authorize_process(&provider, "bad")
                .await
                .unwrap_err()
                .status(),
            400
        );
        assert_eq!(
            f.engine
                .authorize_process(&provider, &ProcessId::new().to_string())
                .await
                .unwrap_err()
                .status(),
            404
        );
    }

    #[test]
    fn metering_table() {
        let f = fixture();
        let instance = CredentialScope::Instance(ResourceId::new());
        let consumer = principal(Role::Consumer, instance.clone(), json!({}));
        let provider_instance = principal(Role::Provider, instance, json!({}));
        let provider_server = principal(Role::Provider, server(), json!({}));

        assert!(f
            .engine
            .authorize_metering(&consumer, "/ngsi-ld/v1/consumer/audit")
            .is_ok());
        assert!(f
            .engine
            .authorize_metering(&consumer, "/ngsi-ld/v1/provider/audit")
            .is_err());
        assert!(f
            .engine
            .authorize_metering(&provider_instance, "/ngsi-ld/v1/overview")
            .is_err());
        assert!(f
            .engine
            .authorize_metering(&provider_server, "/ngsi-ld/v1/summary")
            .is_ok());
        assert!(f
            .engine
            .authorize_metering(&consumer, "/ngsi-ld/v1/summary")
            .is_ok());
        assert!(f
            .engine
            .authorize_metering(&provider_server, "/ngsi-ld/v1/other")
            .is_err());
    }

    #[test]
    fn job_status_annotates_effective_owner() {
        let f = fixture();
        let delegator = SubjectId::new();
        let p = principal(
            Role::Delegate(Delegation {
                role: BaseRole::Provider,
                delegator,
            }),
            server(),
            json!({}),
        );
        assert_eq!(f.engine.authorize_job_status(&p).subject, delegator);
    }
}
