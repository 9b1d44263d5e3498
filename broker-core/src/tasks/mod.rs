mod steps;

use std::{collections::HashMap, future::Future, pin::Pin, sync::Arc};

use broker_adapters::{AcmeClient, Cdn, CertificateIdentityStore, DnsProvider, Firewall, LoadBalancer};
use broker_db::{error::DbError, Db};
use lazy_static::lazy_static;

use crate::config::AppConfig;

/// Everything a step needs to do its work: a durable-store handle, the
/// outbound adapters, process config, and the correlation id threaded from
/// the originating HTTP request.
pub struct TaskContext {
    pub db: Box<dyn Db<Error = DbError>>,
    pub dns_provider: Arc<dyn DnsProvider>,
    pub acme: Arc<dyn AcmeClient>,
    pub identity_store: Arc<dyn CertificateIdentityStore>,
    pub load_balancer: Arc<dyn LoadBalancer>,
    pub cdn: Arc<dyn Cdn>,
    pub firewall: Arc<dyn Firewall>,
    pub config: AppConfig,
    pub correlation_id: String,
}

/// The runtime's retry/fail classification for a step's outcome.
/// `Transient` is requeued under the runtime's backoff
/// policy; `Permanent` fails the operation immediately.
#[derive(Debug, Clone)]
pub enum TaskError {
    Transient(String),
    Permanent(String),
}

impl TaskError {
    pub fn message(&self) -> &str {
        match self {
            TaskError::Transient(m) | TaskError::Permanent(m) => m,
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, TaskError::Transient(_))
    }
}

impl From<broker_adapters::AdapterError> for TaskError {
    fn from(e: broker_adapters::AdapterError) -> Self {
        if e.is_transient() {
            TaskError::Transient(e.to_string())
        } else {
            TaskError::Permanent(e.to_string())
        }
    }
}

impl From<DbError> for TaskError {
    fn from(e: DbError) -> Self {
        TaskError::Permanent(e.to_string())
    }
}

pub type StepFuture<'a> = Pin<Box<dyn Future<Output = Result<(), TaskError>> + Send + 'a>>;
pub type StepFn = for<'a> fn(&'a mut TaskContext, i64) -> StepFuture<'a>;

macro_rules! step_table {
    ($($name:expr => $func:path),* $(,)?) => {{
        let mut m: HashMap<&'static str, StepFn> = HashMap::new();
        $(m.insert($name, |ctx, operation_id| Box::pin($func(ctx, operation_id)));)*
        m
    }};
}

lazy_static! {
    /// Name → function table for task steps: a plain map is enough, no
    /// meta-programming layer needed.
    pub static ref STEPS: HashMap<&'static str, StepFn> = step_table! {
        "acme_register_account" => steps::acme_register_account,
        "create_csr_and_order" => steps::create_csr_and_order,
        "answer_dns01_challenges" => steps::answer_dns01_challenges,
        "retrieve_certificate" => steps::retrieve_certificate,
        "upload_certificate" => steps::upload_certificate,
        "apply_alb_listener" => steps::apply_alb_listener,
        "apply_cdn_distribution" => steps::apply_cdn_distribution,
        "create_waf_acl" => steps::create_waf_acl,
        "put_waf_logging_configuration" => steps::put_waf_logging_configuration,
        "create_route53_health_checks" => steps::create_route53_health_checks,
        "associate_shield_protection" => steps::associate_shield_protection,
        "swap_certificate" => steps::swap_certificate,
        "delete_old_certificate" => steps::delete_old_certificate,
        "remove_alb_certificate" => steps::remove_alb_certificate,
        "delete_cdn_distribution" => steps::delete_cdn_distribution,
        "disassociate_shield_protection" => steps::disassociate_shield_protection,
        "delete_route53_health_checks" => steps::delete_route53_health_checks,
        "delete_waf_acl" => steps::delete_waf_acl,
        "delete_all_certificates" => steps::delete_all_certificates,
        "deactivate_instance" => steps::deactivate_instance,
    };
}

pub fn lookup(name: &str) -> Option<StepFn> {
    STEPS.get(name).copied()
}
