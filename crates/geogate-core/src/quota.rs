//! Quota enforcement against the usage ledger.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{codes, GateError, GateResult};
use crate::ids::ResourceId;
use crate::limits::{BoundingBox, LimitRule, UsageLimits};
use crate::metrics::QUOTA_REJECTIONS;
use crate::principal::Principal;
use crate::traits::{bounded, UsageLedger, UsageQuery};

/// Per-request inputs that are not part of the credential.
#[derive(Debug, Clone, Copy)]
pub struct QuotaContext<'a> {
    /// Resource the request was authorized against.
    pub resource_id: ResourceId,
    /// Request path usage is accounted under.
    pub api_path: &'a str,
    /// Raw `bbox` query parameter, if the request carries one.
    pub query_bbox: Option<&'a str>,
}

/// Admission control for credentials carrying `cons.limits`.
pub struct QuotaEnforcer {
    ledger: Arc<dyn UsageLedger>,
    timeout: Duration,
}

impl QuotaEnforcer {
    pub fn new(ledger: Arc<dyn UsageLedger>, timeout: Duration) -> Self {
        Self { ledger, timeout }
    }

    /// Checks the first recognised limit on the credential.
    ///
    /// Credentials without `limits` always pass. Later limit keys are parsed
    /// for validity but not evaluated.
    ///
    /// # Errors
    ///
    /// `BadRequest` for malformed limits or query bbox, `TooManyRequests`
    /// when a usage ceiling is exceeded, `Forbidden` for feature or bbox
    /// violations and `Internal` when the ledger fails.
    pub async fn enforce(&self, principal: &Principal, ctx: QuotaContext<'_>) -> GateResult<()> {
        let Some(raw) = principal.constraints.limits() else {
            return Ok(());
        };
        let limits = UsageLimits::parse(raw)?;
        let Some(rule) = limits.enforced_rule() else {
            return Ok(());
        };

        let outcome = self.check_rule(principal, &limits, rule, ctx).await;
        if let Err(err) = &outcome {
            QUOTA_REJECTIONS
                .with_label_values(&[rule.name(), err.code()])
                .inc();
        }
        outcome
    }

    async fn check_rule(
        &self,
        principal: &Principal,
        limits: &UsageLimits,
        rule: &LimitRule,
        ctx: QuotaContext<'_>,
    ) -> GateResult<()> {
        let query = UsageQuery {
            user_id: principal.effective_subject(),
            api_path: ctx.api_path.to_string(),
            resource_id: ctx.resource_id,
            since_epoch: limits.issued_at,
        };

        match rule {
            LimitRule::DataUsage(usage) => {
                let used = bounded("ledger", self.timeout, self.ledger.total_bytes(&query)).await?;
                debug!(used, ceiling = usage.bytes(), "data usage check");
                if i128::from(used) > i128::from(usage.bytes()) {
                    warn!(user_id = %query.user_id, used, "data usage limit exceeded");
                    return Err(GateError::too_many_requests(
                        codes::DATA_USAGE_LIMIT_EXCEEDED,
                        "Data usage limit exceeded",
                    ));
                }
            }
            LimitRule::ApiHits(ceiling) => {
                let hits = bounded("ledger", self.timeout, self.ledger.total_hits(&query)).await?;
                debug!(hits, ceiling, "api hits check");
                if hits > *ceiling {
                    warn!(user_id = %query.user_id, hits, "api hits limit exceeded");
                    return Err(GateError::too_many_requests(
                        codes::API_CALLS_LIMIT_EXCEEDED,
                        "API calls limit exceeded",
                    ));
                }
            }
            LimitRule::Features(features) => {
                for (collection, ids) in features {
                    let exist = bounded(
                        "ledger",
                        self.timeout,
                        self.ledger.feature_ids_exist(collection, ids),
                    )
                    .await?;
                    if !exist {
                        warn!(collection = %collection, "feature allow-list names unknown features");
                        return Err(GateError::forbidden(
                            "One or more features in the token do not exist",
                        ));
                    }
                }
            }
            LimitRule::BoundingBox(limit) => {
                let Some(raw) = ctx.query_bbox else {
                    return Ok(());
                };
                let requested = BoundingBox::parse_query(raw)?;
                if !limit.intersects(&requested) {
                    warn!(bbox = raw, "requested bbox outside credential limits");
                    return Err(GateError::forbidden("bbox violates constraints"));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::SubjectId;
    use crate::memory::MemoryUsageLedger;
    use crate::metering::{AggregationKey, MeteringEvent};
    use crate::principal::{BaseRole, Constraints, CredentialScope, Delegation, Role};
    use crate::error::CoreResult;
    use async_trait::async_trait;
    use serde_json::json;

    /// Ledger that never answers within the quota timeout.
    struct StalledLedger;

    #[async_trait]
    impl UsageLedger for StalledLedger {
        async fn total_bytes(&self, _query: &UsageQuery) -> CoreResult<i64> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(0)
        }

        async fn total_hits(&self, _query: &UsageQuery) -> CoreResult<i64> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(0)
        }

        async fn feature_ids_exist(&self, _: &str, _: &[String]) -> CoreResult<bool> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(true)
        }
    }

    const PATH: &str = "/collections/x/items";

    fn principal(role: Role, limits: serde_json::Value) -> Principal {
        Principal {
            subject: SubjectId::new(),
            role,
            scope: CredentialScope::Server("rs".into()),
            constraints: Constraints::new(
                json!({ "limits": limits }).as_object().cloned().unwrap_or_default(),
            ),
            expires_at: None,
        }
    }

    fn event(user: SubjectId, resource: ResourceId, bytes: u64, at: i64) -> MeteringEvent {
        MeteringEvent {
            key: AggregationKey {
                user_id: user,
                resource_id: resource,
                resource_group: resource,
                provider_id: SubjectId::new(),
                api_path: PATH.to_string(),
            },
            bytes,
            hits: 1,
            epoch_seconds: at,
        }
    }

    fn ctx(resource_id: ResourceId) -> QuotaContext<'static> {
        QuotaContext {
            resource_id,
            api_path: PATH,
            query_bbox: None,
        }
    }

    fn enforcer(ledger: Arc<MemoryUsageLedger>) -> QuotaEnforcer {
        QuotaEnforcer::new(ledger, Duration::from_millis(500))
    }

    #[tokio::test]
    async fn no_limits_is_noop() {
        let ledger = Arc::new(MemoryUsageLedger::new());
        let p = Principal {
            constraints: Constraints::default(),
            ..principal(Role::Consumer, json!({}))
        };
        assert!(enforcer(ledger).enforce(&p, ctx(ResourceId::new())).await.is_ok());
    }

    #[tokio::test]
    async fn null_limits_is_noop() {
        let ledger = Arc::new(MemoryUsageLedger::new());
        let p = principal(Role::Consumer, serde_json::Value::Null);
        assert!(enforcer(ledger).enforce(&p, ctx(ResourceId::new())).await.is_ok());
    }

    #[tokio::test]
    async fn empty_bbox_limit_is_noop() {
        let ledger = Arc::new(MemoryUsageLedger::new());
        let p = principal(Role::Consumer, json!({"bbox": []}));
        let with_bbox = QuotaContext {
            query_bbox: Some("0,0,5,5"),
            ..ctx(ResourceId::new())
        };
        assert!(enforcer(ledger).enforce(&p, with_bbox).await.is_ok());
    }

    #[tokio::test]
    async fn zero_api_hits_with_prior_hit_is_rejected() {
        let ledger = Arc::new(MemoryUsageLedger::new());
        let resource = ResourceId::new();
        let p = principal(Role::Consumer, json!({"apiHits": 0}));

        let gate = enforcer(ledger.clone());
        assert!(gate.enforce(&p, ctx(resource)).await.is_ok());

        ledger.record(&event(p.subject, resource, 10, 5));
        let err = gate.enforce(&p, ctx(resource)).await.unwrap_err();
        assert_eq!(err.status(), 429);
        assert_eq!(err.code(), codes::API_CALLS_LIMIT_EXCEEDED);
    }

    #[tokio::test]
    async fn zero_data_usage_with_prior_bytes_is_rejected() {
        let ledger = Arc::new(MemoryUsageLedger::new());
        let resource = ResourceId::new();
        let p = principal(Role::Consumer, json!({"dataUsage": "0:kb"}));
        ledger.record(&event(p.subject, resource, 1, 5));

        let err = enforcer(ledger).enforce(&p, ctx(resource)).await.unwrap_err();
        assert_eq!(err.status(), 429);
        assert_eq!(err.code(), codes::DATA_USAGE_LIMIT_EXCEEDED);
    }

    #[tokio::test]
    async fn usage_before_window_is_ignored() {
        let ledger = Arc::new(MemoryUsageLedger::new());
        let resource = ResourceId::new();
        let p = principal(Role::Consumer, json!({"iat": 100, "dataUsage": "1:kb"}));
        ledger.record(&event(p.subject, resource, 4096, 50));
        ledger.record(&event(p.subject, resource, 1024, 150));

        assert!(enforcer(ledger.clone()).enforce(&p, ctx(resource)).await.is_ok());
        ledger.record(&event(p.subject, resource, 1, 151));
        assert!(enforcer(ledger).enforce(&p, ctx(resource)).await.is_err());
    }

    #[tokio::test]
    async fn delegate_usage_counts_against_delegator() {
        let ledger = Arc::new(MemoryUsageLedger::new());
        let resource = ResourceId::new();
        let delegator = SubjectId::new();
        let p = principal(
            Role::Delegate(Delegation {
                role: BaseRole::Consumer,
                delegator,
            }),
            json!({"apiHits": 1}),
        );
        ledger.record(&event(delegator, resource, 1, 1));
        ledger.record(&event(delegator, resource, 1, 2));

        let err = enforcer(ledger).enforce(&p, ctx(resource)).await.unwrap_err();
        assert_eq!(err.status(), 429);
    }

    #[tokio::test]
    async fn only_first_recognised_limit_is_checked() {
        let ledger = Arc::new(MemoryUsageLedger::new());
        let resource = ResourceId::new();
        let p = principal(
            Role::Consumer,
            json!({"apiHits": 100, "dataUsage": "0:kb"}),
        );
        ledger.record(&event(p.subject, resource, 50_000, 1));
        assert!(enforcer(ledger).enforce(&p, ctx(resource)).await.is_ok());
    }

    #[tokio::test]
    async fn unknown_unit_is_bad_request() {
        let ledger = Arc::new(MemoryUsageLedger::new());
        let p = principal(Role::Consumer, json!({"dataUsage": "5:pb"}));
        let err = enforcer(ledger)
            .enforce(&p, ctx(ResourceId::new()))
            .await
            .unwrap_err();
        assert_eq!(err.status(), 400);
    }

    #[tokio::test]
    async fn feature_allow_list_is_validated() {
        let ledger = Arc::new(MemoryUsageLedger::new());
        ledger.register_features("c1", ["1", "2", "3"]);
        let gate = enforcer(ledger);

        let ok = principal(Role::Consumer, json!({"feat": {"c1": ["1", 3]}}));
        assert!(gate.enforce(&ok, ctx(ResourceId::new())).await.is_ok());

        let missing = principal(Role::Consumer, json!({"feat": {"c1": ["1", "9"]}}));
        let err = gate
            .enforce(&missing, ctx(ResourceId::new()))
            .await
            .unwrap_err();
        assert_eq!(err.status(), 403);
    }

    #[tokio::test]
    async fn bbox_overlap_rules() {
        let ledger = Arc::new(MemoryUsageLedger::new());
        let gate = enforcer(ledger);
        let p = principal(Role::Consumer, json!({"bbox": [70, 10, 80, 20]}));
        let resource = ResourceId::new();

        let with_bbox = |bbox: &'static str| QuotaContext {
            query_bbox: Some(bbox),
            ..ctx(resource)
        };

        assert!(gate.enforce(&p, ctx(resource)).await.is_ok());
        assert!(gate.enforce(&p, with_bbox("75,15,85,25")).await.is_ok());
        let err = gate.enforce(&p, with_bbox("0,0,5,5")).await.unwrap_err();
        assert_eq!(err.status(), 403);
        let err = gate.enforce(&p, with_bbox("0,0")).await.unwrap_err();
        assert_eq!(err.status(), 400);
    }

    #[tokio::test]
    async fn ledger_failure_is_internal() {
        let ledger = Arc::new(MemoryUsageLedger::new());
        ledger.set_failing(true);
        let p = principal(Role::Consumer, json!({"apiHits": 10}));
        let err = enforcer(ledger)
            .enforce(&p, ctx(ResourceId::new()))
            .await
            .unwrap_err();
        assert_eq!(err.status(), 500);
    }

    #[tokio::test]
    async fn stalled_ledger_times_out_as_internal() {
        let gate = QuotaEnforcer::new(Arc::new(StalledLedger), Duration::from_millis(20));
        let p = principal(Role::Consumer, json!({"dataUsage": "1:gb"}));
        let err = gate.enforce(&p, ctx(ResourceId::new())).await.unwrap_err();
        assert_eq!(err.status(), 500);
    }
}
