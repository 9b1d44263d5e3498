/// Read-mostly, process-wide configuration threaded explicitly into handlers
/// and task steps rather than read from ambient globals.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub default_cloudfront_origin: String,
    pub cloudfront_hosted_zone_id: String,
    pub rate_limit_rule_arn: String,
    pub waf_log_group_arn: String,
    pub cname_validation_target: String,
    pub acme_contact_email: String,
    pub task_max_attempts: u32,
}

impl AppConfig {
    pub fn from_settings(settings: &broker_settings::Settings) -> Self {
        Self {
            default_cloudfront_origin: settings.default_cloudfront_origin.clone(),
            cloudfront_hosted_zone_id: settings.cloudfront_hosted_zone_id.clone(),
            rate_limit_rule_arn: settings.rate_limit_rule_arn.clone(),
            waf_log_group_arn: settings.waf_log_group_arn.clone(),
            cname_validation_target: settings.cname_validation_target.clone(),
            acme_contact_email: settings.acme_contact_email.clone(),
            task_max_attempts: settings.task_max_attempts,
        }
    }
}
