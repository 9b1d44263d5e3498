use std::{collections::HashMap, sync::Arc};

use broker_adapters::DnsResolver;
use broker_db::{
    error::DbError,
    model::{
        AlbInstance, CdnInstance, ForwardCookiePolicy, InstanceCore, InstanceType, OperationAction,
        OperationState, OriginProtocolPolicy, ServiceInstance,
    },
    params, Db,
};

use crate::{
    config::AppConfig,
    error::CoreError,
    params as param_helpers, pipelines,
    runtime::{PipelineJob, PipelineQueue},
    validators,
};

/// Caller-supplied CDN-only knobs. Each field is `Option` so the handler can
/// tell "omitted" from "explicitly empty".
#[derive(Debug, Clone, Default)]
pub struct CdnParameters {
    pub origin: Option<String>,
    pub path: Option<String>,
    pub forward_cookies: Option<String>,
    pub forward_headers: Option<String>,
    pub insecure_origin: Option<bool>,
    pub error_responses: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone)]
pub struct ProvisionRequest {
    pub instance_id: String,
    pub plan_id: String,
    pub async_allowed: bool,
    pub domains: Option<String>,
    pub cdn: CdnParameters,
}

#[derive(Debug, Clone, Copy)]
pub struct ProvisionResult {
    pub operation_id: i64,
}

#[derive(Debug, Clone)]
pub struct UpdateRequest {
    pub instance_id: String,
    pub async_allowed: bool,
    pub domains: Option<String>,
    pub cdn: CdnParameters,
}

#[derive(Debug, Clone, Copy)]
pub enum UpdateResult {
    Enqueued { operation_id: i64 },
    NoOp,
}

#[derive(Debug, Clone)]
pub struct DeprovisionRequest {
    pub instance_id: String,
    pub async_allowed: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct DeprovisionResult {
    pub operation_id: i64,
}

#[derive(Debug, Clone)]
pub struct LastOperationRequest {
    pub instance_id: String,
    pub operation_id: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct LastOperationResult {
    pub state: OperationState,
    pub description: String,
}

#[derive(Debug, Clone)]
pub struct CatalogPlan {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
}

#[derive(Debug, Clone)]
pub struct Catalog {
    pub plans: Vec<CatalogPlan>,
}

/// Implements the five broker operations over a transport-agnostic `Db` and
/// a `PipelineQueue`. Holds no connection state of its own;
/// every call is handed a fresh `Db` by the caller (one per HTTP request).
pub struct BrokerHandler {
    config: AppConfig,
    dns_resolver: Arc<dyn DnsResolver>,
    queue: Arc<dyn PipelineQueue>,
}

impl BrokerHandler {
    pub fn new(config: AppConfig, dns_resolver: Arc<dyn DnsResolver>, queue: Arc<dyn PipelineQueue>) -> Self {
        Self {
            config,
            dns_resolver,
            queue,
        }
    }

    /// Pure, no side effects.
    pub fn catalog(&self) -> Catalog {
        Catalog {
            plans: vec![
                CatalogPlan {
                    id: "alb",
                    name: "alb",
                    description: "Custom domain fronted by an Application Load Balancer",
                },
                CatalogPlan {
                    id: "cdn",
                    name: "cdn",
                    description: "Custom domain fronted by a CDN distribution",
                },
            ],
        }
    }

    pub async fn provision<D>(&self, db: &mut D, req: ProvisionRequest) -> Result<ProvisionResult, CoreError>
    where
        D: Db<Error = DbError>,
    {
        if !req.async_allowed {
            return Err(CoreError::async_required());
        }

        let domains = param_helpers::parse_domains(req.domains.as_deref().unwrap_or(""))?;
        validators::validate_unique_domains(db, &domains, None).await?;
        validators::validate_cname(&self.dns_resolver, &domains, &self.config.cname_validation_target).await?;

        let instance_type = match req.plan_id.as_str() {
            "alb" => InstanceType::Alb,
            "cdn" => InstanceType::Cdn,
            _ => return Err(CoreError::not_implemented()),
        };

        let instance = match instance_type {
            InstanceType::Alb => ServiceInstance::Alb(AlbInstance {
                core: InstanceCore::new(req.instance_id.clone(), domains),
                alb_listener_arn: None,
                alb_arn: None,
                domain_internal: None,
                route53_alias_hosted_zone: None,
            }),
            InstanceType::Cdn => {
                let core = InstanceCore::new(req.instance_id.clone(), domains);
                ServiceInstance::Cdn(self.new_cdn_instance(core, &req.cdn)?)
            }
            InstanceType::CdnDedicatedWaf | InstanceType::Migration => return Err(CoreError::not_implemented()),
        };

        db.begin(true).await?;
        match self.provision_locked(db, instance, instance_type).await {
            Ok(operation_id) => {
                db.commit().await?;
                Ok(ProvisionResult { operation_id })
            }
            Err(e) => {
                db.rollback().await.ok();
                Err(e)
            }
        }
    }

    async fn provision_locked<D>(
        &self,
        db: &mut D,
        instance: ServiceInstance,
        instance_type: InstanceType,
    ) -> Result<i64, CoreError>
    where
        D: Db<Error = DbError>,
    {
        let service_instance_id = instance.id().to_owned();
        db.create_instance(params::CreateInstance { instance }).await?;
        let created = db
            .create_operation(params::CreateOperation {
                service_instance_id: service_instance_id.clone(),
                action: OperationAction::Provision,
                step_description: "Queuing tasks".to_owned(),
            })
            .await?;

        let steps = pipelines::steps_for(instance_type, OperationAction::Provision);
        if steps.is_empty() {
            db.update_operation_state(params::UpdateOperationState {
                operation_id: created.id,
                state: OperationState::Succeeded,
                step_description: "Nothing to do".to_owned(),
            })
            .await?;
        } else {
            self.queue.enqueue(service_instance_id, PipelineJob::new(created.id, steps)).await;
        }

        Ok(created.id)
    }

    pub async fn update<D>(&self, db: &mut D, req: UpdateRequest) -> Result<UpdateResult, CoreError>
    where
        D: Db<Error = DbError>,
    {
        if !req.async_allowed {
            return Err(CoreError::async_required());
        }

        let existing = db
            .get_instance(params::GetInstance {
                service_instance_id: req.instance_id.clone(),
            })
            .await?
            .ok_or_else(CoreError::instance_does_not_exist)?;

        if existing.core().is_deactivated() {
            return Err(CoreError::instance_does_not_exist());
        }
        if db.has_active_operation(&req.instance_id).await? {
            return Err(CoreError::conflict());
        }

        let mut domains_changed = false;
        let mut new_domains = existing.core().domain_names.to_vec();
        if let Some(raw) = req.domains.as_deref() {
            let candidate = param_helpers::parse_domains(raw)?;
            if !candidate.is_empty() {
                validators::validate_unique_domains(db, &candidate, Some(&req.instance_id)).await?;
                validators::validate_cname(&self.dns_resolver, &candidate, &self.config.cname_validation_target).await?;
                domains_changed = param_helpers::sorted(&candidate) != param_helpers::sorted(&new_domains);
                new_domains = candidate;
            }
        }

        let instance_type = existing.instance_type();
        let is_cdn = matches!(instance_type, InstanceType::Cdn | InstanceType::CdnDedicatedWaf);

        // CDN updates are never no-op; every other plan is a
        // no-op exactly when the domain list didn't change.
        if !is_cdn && !domains_changed {
            return Ok(UpdateResult::NoOp);
        }

        let mut next = existing.clone();
        next.core_mut().domain_names = new_domains;
        if let Some(cdn) = next.as_cdn_mut() {
            self.apply_cdn_update(cdn, &req.cdn)?;
        }
        if !domains_changed {
            // domains unchanged: point new_certificate at the current one so
            // the pipeline skips reissuance.
            next.core_mut().new_certificate_id = next.core().current_certificate_id;
        }

        db.begin(true).await?;
        match self.update_locked(db, next, instance_type).await {
            Ok(operation_id) => {
                db.commit().await?;
                Ok(UpdateResult::Enqueued { operation_id })
            }
            Err(e) => {
                db.rollback().await.ok();
                Err(e)
            }
        }
    }

    async fn update_locked<D>(&self, db: &mut D, instance: ServiceInstance, instance_type: InstanceType) -> Result<i64, CoreError>
    where
        D: Db<Error = DbError>,
    {
        let service_instance_id = instance.id().to_owned();
        db.update_instance(params::UpdateInstance { instance }).await?;
        let created = db
            .create_operation(params::CreateOperation {
                service_instance_id: service_instance_id.clone(),
                action: OperationAction::Update,
                step_description: "Queuing tasks".to_owned(),
            })
            .await?;

        let steps = pipelines::steps_for(instance_type, OperationAction::Update);
        if steps.is_empty() {
            db.update_operation_state(params::UpdateOperationState {
                operation_id: created.id,
                state: OperationState::Succeeded,
                step_description: "Nothing to do".to_owned(),
            })
            .await?;
        } else {
            self.queue.enqueue(service_instance_id, PipelineJob::new(created.id, steps)).await;
        }

        Ok(created.id)
    }

    pub async fn deprovision<D>(&self, db: &mut D, req: DeprovisionRequest) -> Result<DeprovisionResult, CoreError>
    where
        D: Db<Error = DbError>,
    {
        if !req.async_allowed {
            return Err(CoreError::async_required());
        }

        let instance = db
            .get_instance(params::GetInstance {
                service_instance_id: req.instance_id.clone(),
            })
            .await?
            .ok_or_else(CoreError::instance_does_not_exist)?;
        let instance_type = instance.instance_type();

        db.begin(true).await?;
        let created = match db
            .create_operation(params::CreateOperation {
                service_instance_id: req.instance_id.clone(),
                action: OperationAction::Deprovision,
                step_description: "Queuing tasks".to_owned(),
            })
            .await
        {
            Ok(created) => created,
            Err(e) => {
                db.rollback().await.ok();
                return Err(e.into());
            }
        };
        db.commit().await?;

        let steps = pipelines::steps_for(instance_type, OperationAction::Deprovision);
        if steps.is_empty() {
            db.deactivate_instance(params::DeactivateInstance {
                service_instance_id: req.instance_id,
            })
            .await?;
            db.update_operation_state(params::UpdateOperationState {
                operation_id: created.id,
                state: OperationState::Succeeded,
                step_description: "Nothing to do".to_owned(),
            })
            .await?;
        } else {
            self.queue.enqueue(req.instance_id, PipelineJob::new(created.id, steps)).await;
        }

        Ok(DeprovisionResult { operation_id: created.id })
    }

    pub async fn last_operation<D>(&self, db: &mut D, req: LastOperationRequest) -> Result<LastOperationResult, CoreError>
    where
        D: Db<Error = DbError>,
    {
        db.get_instance(params::GetInstance {
            service_instance_id: req.instance_id.clone(),
        })
        .await?
        .ok_or_else(CoreError::instance_does_not_exist)?;

        let operation = db
            .get_operation(params::GetOperation {
                service_instance_id: req.instance_id,
                operation_id: req.operation_id,
            })
            .await?
            .ok_or_else(|| CoreError::bad_request("no such operation for this instance"))?;

        Ok(LastOperationResult {
            state: operation.state,
            description: operation.step_description,
        })
    }

    /// Builds a brand-new CDN aggregate at provision time: every field gets
    /// its provision-time default unless the caller set it explicitly.
    fn new_cdn_instance(&self, core: InstanceCore, params: &CdnParameters) -> Result<CdnInstance, CoreError> {
        let origin = match params.origin.as_deref() {
            Some(o) if !o.trim().is_empty() => o.trim().to_owned(),
            _ => self.config.default_cloudfront_origin.clone(),
        };
        let path = params.path.as_deref().unwrap_or("").trim().to_owned();
        let is_default_origin = origin == self.config.default_cloudfront_origin;

        let insecure_origin = params.insecure_origin.unwrap_or(false);
        if insecure_origin && is_default_origin {
            return Err(CoreError::bad_request(
                "insecure_origin requires an explicit, non-default origin",
            ));
        }
        let origin_protocol_policy = if insecure_origin {
            OriginProtocolPolicy::HttpOnly
        } else {
            OriginProtocolPolicy::HttpsOnly
        };

        let (forward_cookie_policy, forwarded_cookies) = param_helpers::cookie_options(params.forward_cookies.as_deref());

        let mut headers = param_helpers::header_options(params.forward_headers.as_deref());
        if is_default_origin {
            headers.push("HOST".to_owned());
        }
        let forwarded_headers = param_helpers::normalize_headers(&headers);

        Ok(CdnInstance {
            core,
            cloudfront_distribution_id: None,
            cloudfront_distribution_arn: None,
            cloudfront_origin_hostname: origin,
            cloudfront_origin_path: path,
            forward_cookie_policy,
            forwarded_cookies,
            forwarded_headers,
            origin_protocol_policy,
            error_responses: param_helpers::parse_error_responses(params.error_responses.as_ref()),
        })
    }

    /// Mutates a CDN aggregate in place for `update()`. Presence matters: a
    /// parameter the caller didn't mention leaves the corresponding stored
    /// field untouched, including the derived `HOST` entry in
    /// `forwarded_headers`.
    fn apply_cdn_update(&self, cdn: &mut CdnInstance, params: &CdnParameters) -> Result<(), CoreError> {
        let origin_touched = params.origin.is_some();
        if let Some(origin) = params.origin.as_deref() {
            cdn.cloudfront_origin_hostname = if origin.trim().is_empty() {
                self.config.default_cloudfront_origin.clone()
            } else {
                origin.trim().to_owned()
            };
        }
        if let Some(path) = params.path.as_deref() {
            cdn.cloudfront_origin_path = path.trim().to_owned();
        }

        let is_default_origin = cdn.cloudfront_origin_hostname == self.config.default_cloudfront_origin;
        if let Some(insecure_origin) = params.insecure_origin {
            if insecure_origin && is_default_origin {
                return Err(CoreError::bad_request(
                    "insecure_origin requires an explicit, non-default origin",
                ));
            }
            cdn.origin_protocol_policy = if insecure_origin {
                OriginProtocolPolicy::HttpOnly
            } else {
                OriginProtocolPolicy::HttpsOnly
            };
        } else if cdn.origin_protocol_policy == OriginProtocolPolicy::HttpOnly && is_default_origin {
            return Err(CoreError::bad_request(
                "insecure_origin requires an explicit, non-default origin",
            ));
        }

        if let Some(raw) = params.forward_cookies.as_deref() {
            let (policy, cookies) = param_helpers::cookie_options(Some(raw));
            cdn.forward_cookie_policy = policy;
            cdn.forwarded_cookies = cookies;
        }

        if params.forward_headers.is_some() || origin_touched {
            let mut headers = if let Some(raw) = params.forward_headers.as_deref() {
                param_helpers::header_options(Some(raw))
            } else {
                cdn.forwarded_headers.clone()
            };
            if is_default_origin && !headers.iter().any(|h| h.eq_ignore_ascii_case("host")) {
                headers.push("HOST".to_owned());
            }
            cdn.forwarded_headers = param_helpers::normalize_headers(&headers);
        }

        if let Some(overrides) = params.error_responses.as_ref() {
            cdn.error_responses = param_helpers::parse_error_responses(Some(overrides));
        }

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use broker_db_memory::MemoryDb;

    fn handler() -> BrokerHandler {
        use crate::config::AppConfig;

        struct NoopQueue;
        #[async_trait::async_trait]
        impl PipelineQueue for NoopQueue {
            async fn enqueue(&self, _instance_id: String, _job: PipelineJob) {}
        }

        struct AlwaysMatchingResolver;
        #[async_trait::async_trait]
        impl DnsResolver for AlwaysMatchingResolver {
            async fn resolve_cname(&self, _domain: &str) -> broker_adapters::AdapterResult<Option<String>> {
                Ok(Some("edge.example.net".to_owned()))
            }
        }

        BrokerHandler::new(
            AppConfig {
                default_cloudfront_origin: "default.example.net".to_owned(),
                cloudfront_hosted_zone_id: "Z1".to_owned(),
                rate_limit_rule_arn: "arn:rule".to_owned(),
                waf_log_group_arn: "arn:loggroup".to_owned(),
                cname_validation_target: "edge.example.net".to_owned(),
                acme_contact_email: "broker@example.net".to_owned(),
                task_max_attempts: 5,
            },
            Arc::new(AlwaysMatchingResolver),
            Arc::new(NoopQueue),
        )
    }

    #[tokio::test]
    async fn provision_alb_normalises_domains() {
        let handler = handler();
        let mut db = MemoryDb::new();

        let result = handler
            .provision(
                &mut db,
                ProvisionRequest {
                    instance_id: "instance-1".to_owned(),
                    plan_id: "alb".to_owned(),
                    async_allowed: true,
                    domains: Some("foo.example, BAR.example".to_owned()),
                    cdn: CdnParameters::default(),
                },
            )
            .await
            .unwrap();

        let instance = db
            .get_instance(params::GetInstance {
                service_instance_id: "instance-1".to_owned(),
            })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(instance.domain_names(), &["foo.example", "bar.example"]);

        let operation = db
            .get_operation(params::GetOperation {
                service_instance_id: "instance-1".to_owned(),
                operation_id: Some(result.operation_id),
            })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(operation.step_description, "Queuing tasks");
        assert!(matches!(operation.state, OperationState::InProgress));
    }

    #[tokio::test]
    async fn provision_cdn_applies_defaults() {
        let handler = handler();
        let mut db = MemoryDb::new();

        handler
            .provision(
                &mut db,
                ProvisionRequest {
                    instance_id: "instance-2".to_owned(),
                    plan_id: "cdn".to_owned(),
                    async_allowed: true,
                    domains: Some("a.example".to_owned()),
                    cdn: CdnParameters::default(),
                },
            )
            .await
            .unwrap();

        let instance = db
            .get_instance(params::GetInstance {
                service_instance_id: "instance-2".to_owned(),
            })
            .await
            .unwrap()
            .unwrap();
        let cdn = instance.as_cdn().unwrap();
        assert_eq!(cdn.cloudfront_origin_hostname, "default.example.net");
        assert_eq!(cdn.origin_protocol_policy, OriginProtocolPolicy::HttpsOnly);
        assert_eq!(cdn.forwarded_headers, vec!["HOST".to_owned()]);
        assert_eq!(cdn.forward_cookie_policy, ForwardCookiePolicy::All);
        assert!(cdn.forwarded_cookies.is_empty());
    }

    #[tokio::test]
    async fn provision_without_async_allowed_is_rejected() {
        let handler = handler();
        let mut db = MemoryDb::new();

        let err = handler
            .provision(
                &mut db,
                ProvisionRequest {
                    instance_id: "instance-3".to_owned(),
                    plan_id: "alb".to_owned(),
                    async_allowed: false,
                    domains: Some("a.example".to_owned()),
                    cdn: CdnParameters::default(),
                },
            )
            .await
            .unwrap_err();
        assert!(err.is_async_required());
    }

    #[tokio::test]
    async fn update_with_unchanged_domains_on_alb_is_a_noop() {
        let handler = handler();
        let mut db = MemoryDb::new();

        handler
            .provision(
                &mut db,
                ProvisionRequest {
                    instance_id: "instance-4".to_owned(),
                    plan_id: "alb".to_owned(),
                    async_allowed: true,
                    domains: Some("a.example".to_owned()),
                    cdn: CdnParameters::default(),
                },
            )
            .await
            .unwrap();

        let result = handler
            .update(
                &mut db,
                UpdateRequest {
                    instance_id: "instance-4".to_owned(),
                    async_allowed: true,
                    domains: Some("a.example".to_owned()),
                    cdn: CdnParameters::default(),
                },
            )
            .await
            .unwrap();
        assert!(matches!(result, UpdateResult::NoOp));
    }

    #[tokio::test]
    async fn update_cdn_with_unchanged_domains_preserves_new_certificate_and_still_runs() {
        let handler = handler();
        let mut db = MemoryDb::new();

        handler
            .provision(
                &mut db,
                ProvisionRequest {
                    instance_id: "instance-5".to_owned(),
                    plan_id: "cdn".to_owned(),
                    async_allowed: true,
                    domains: Some("a.example".to_owned()),
                    cdn: CdnParameters::default(),
                },
            )
            .await
            .unwrap();

        let result = handler
            .update(
                &mut db,
                UpdateRequest {
                    instance_id: "instance-5".to_owned(),
                    async_allowed: true,
                    domains: Some("a.example".to_owned()),
                    cdn: CdnParameters {
                        path: Some("/v2".to_owned()),
                        ..Default::default()
                    },
                },
            )
            .await
            .unwrap();
        assert!(matches!(result, UpdateResult::Enqueued { .. }));

        let instance = db
            .get_instance(params::GetInstance {
                service_instance_id: "instance-5".to_owned(),
            })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(instance.as_cdn().unwrap().cloudfront_origin_path, "/v2");
    }

    #[tokio::test]
    async fn insecure_origin_on_default_is_rejected() {
        let handler = handler();
        let mut db = MemoryDb::new();

        let err = handler
            .provision(
                &mut db,
                ProvisionRequest {
                    instance_id: "instance-6".to_owned(),
                    plan_id: "cdn".to_owned(),
                    async_allowed: true,
                    domains: Some("a.example".to_owned()),
                    cdn: CdnParameters {
                        insecure_origin: Some(true),
                        ..Default::default()
                    },
                },
            )
            .await
            .unwrap_err();
        assert!(err.is_bad_request());
    }

    #[tokio::test]
    async fn deprovision_missing_instance_fails() {
        let handler = handler();
        let mut db = MemoryDb::new();

        let err = handler
            .deprovision(
                &mut db,
                DeprovisionRequest {
                    instance_id: "does-not-exist".to_owned(),
                    async_allowed: true,
                },
            )
            .await
            .unwrap_err();
        assert!(err.is_instance_does_not_exist());
    }

    #[tokio::test]
    async fn last_operation_reports_current_state() {
        let handler = handler();
        let mut db = MemoryDb::new();

        let provisioned = handler
            .provision(
                &mut db,
                ProvisionRequest {
                    instance_id: "instance-7".to_owned(),
                    plan_id: "alb".to_owned(),
                    async_allowed: true,
                    domains: Some("a.example".to_owned()),
                    cdn: CdnParameters::default(),
                },
            )
            .await
            .unwrap();

        let result = handler
            .last_operation(
                &mut db,
                LastOperationRequest {
                    instance_id: "instance-7".to_owned(),
                    operation_id: Some(provisioned.operation_id),
                },
            )
            .await
            .unwrap();
        assert_eq!(result.description, "Queuing tasks");
    }
}
