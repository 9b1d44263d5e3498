use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Discriminator column for the polymorphic `ServiceInstance` aggregate.
/// Stored alongside a variant-specific payload rather than mapped onto
/// separate tables, per the single-table-inheritance replacement noted in
/// the instance aggregate's design.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum InstanceType {
    Alb,
    Cdn,
    CdnDedicatedWaf,
    Migration,
}

impl InstanceType {
    pub fn plan_id(self) -> &'static str {
        match self {
            InstanceType::Alb => "alb",
            InstanceType::Cdn => "cdn",
            InstanceType::CdnDedicatedWaf => "cdn-dedicated-waf",
            InstanceType::Migration => "migration",
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, Eq, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum ForwardCookiePolicy {
    None,
    All,
    Whitelist,
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, Eq, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum OriginProtocolPolicy {
    HttpOnly,
    HttpsOnly,
}

/// Attributes shared by every `ServiceInstance` variant.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct InstanceCore {
    pub id: String,
    pub domain_names: Vec<String>,
    pub deactivated_at: Option<DateTime<Utc>>,
    pub current_certificate_id: Option<i64>,
    pub new_certificate_id: Option<i64>,
}

impl InstanceCore {
    pub fn new(id: String, domain_names: Vec<String>) -> Self {
        Self {
            id,
            domain_names,
            deactivated_at: None,
            current_certificate_id: None,
            new_certificate_id: None,
        }
    }

    pub fn is_deactivated(&self) -> bool {
        self.deactivated_at.is_some()
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct AlbInstance {
    pub core: InstanceCore,
    pub alb_listener_arn: Option<String>,
    pub alb_arn: Option<String>,
    pub domain_internal: Option<String>,
    pub route53_alias_hosted_zone: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct CdnInstance {
    pub core: InstanceCore,
    pub cloudfront_distribution_id: Option<String>,
    pub cloudfront_distribution_arn: Option<String>,
    pub cloudfront_origin_hostname: String,
    pub cloudfront_origin_path: String,
    pub forward_cookie_policy: ForwardCookiePolicy,
    pub forwarded_cookies: Vec<String>,
    pub forwarded_headers: Vec<String>,
    pub origin_protocol_policy: OriginProtocolPolicy,
    pub error_responses: HashMap<String, String>,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct Route53HealthCheck {
    pub domain_name: String,
    pub health_check_id: String,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct ShieldHealthCheck {
    pub domain_name: String,
    pub protection_id: String,
    pub health_check_id: String,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct CdnDedicatedWafInstance {
    pub cdn: CdnInstance,
    pub dedicated_waf_web_acl_id: Option<String>,
    pub dedicated_waf_web_acl_name: Option<String>,
    pub dedicated_waf_web_acl_arn: Option<String>,
    pub route53_health_checks: Vec<Route53HealthCheck>,
    pub shield_associated_health_check: Option<ShieldHealthCheck>,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct MigrationInstance {
    pub core: InstanceCore,
}

/// The durable record for one tenant subscription. One row per instance,
/// variant fields carried as a JSONB payload keyed by `instance_type`, not
/// as separate tables — see the instance aggregate's polymorphism note.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(tag = "instance_type", rename_all = "kebab-case")]
pub enum ServiceInstance {
    Alb(AlbInstance),
    Cdn(CdnInstance),
    CdnDedicatedWaf(CdnDedicatedWafInstance),
    Migration(MigrationInstance),
}

impl ServiceInstance {
    pub fn instance_type(&self) -> InstanceType {
        match self {
            ServiceInstance::Alb(_) => InstanceType::Alb,
            ServiceInstance::Cdn(_) => InstanceType::Cdn,
            ServiceInstance::CdnDedicatedWaf(_) => InstanceType::CdnDedicatedWaf,
            ServiceInstance::Migration(_) => InstanceType::Migration,
        }
    }

    pub fn core(&self) -> &InstanceCore {
        match self {
            ServiceInstance::Alb(i) => &i.core,
            ServiceInstance::Cdn(i) => &i.core,
            ServiceInstance::CdnDedicatedWaf(i) => &i.cdn.core,
            ServiceInstance::Migration(i) => &i.core,
        }
    }

    pub fn core_mut(&mut self) -> &mut InstanceCore {
        match self {
            ServiceInstance::Alb(i) => &mut i.core,
            ServiceInstance::Cdn(i) => &mut i.core,
            ServiceInstance::CdnDedicatedWaf(i) => &mut i.cdn.core,
            ServiceInstance::Migration(i) => &mut i.core,
        }
    }

    pub fn id(&self) -> &str {
        &self.core().id
    }

    pub fn domain_names(&self) -> &[String] {
        &self.core().domain_names
    }

    pub fn as_cdn(&self) -> Option<&CdnInstance> {
        match self {
            ServiceInstance::Cdn(i) => Some(i),
            ServiceInstance::CdnDedicatedWaf(i) => Some(&i.cdn),
            _ => None,
        }
    }

    pub fn as_cdn_mut(&mut self) -> Option<&mut CdnInstance> {
        match self {
            ServiceInstance::Cdn(i) => Some(i),
            ServiceInstance::CdnDedicatedWaf(i) => Some(&mut i.cdn),
            _ => None,
        }
    }
}

/// One ACME authorization challenge tracked against a certificate's order.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct Challenge {
    pub domain: String,
    pub token: String,
    pub key_authorization: String,
    pub status: String,
}

/// Owned by exactly one `ServiceInstance`, referenced there by id rather
/// than via a reciprocal pointer (see the back-reference design note).
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct Certificate {
    pub id: i64,
    pub service_instance_id: String,
    pub private_key_pem: Option<String>,
    pub leaf_pem: Option<String>,
    pub fullchain_pem: Option<String>,
    pub iam_server_certificate_id: Option<String>,
    pub iam_server_certificate_arn: Option<String>,
    pub csr_pem: Option<String>,
    pub order_json: Option<String>,
    pub challenges: Vec<Challenge>,
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum OperationAction {
    Provision,
    Deprovision,
    Update,
    Renew,
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum OperationState {
    InProgress,
    Succeeded,
    Failed,
}

/// One entry in an instance's ordered operation log.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct Operation {
    pub id: i64,
    pub service_instance_id: String,
    pub action: OperationAction,
    pub state: OperationState,
    pub step_description: String,
    pub created_at: DateTime<Utc>,
}
