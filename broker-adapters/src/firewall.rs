use async_trait::async_trait;
use aws_sdk_shield::Client as ShieldClient;
use aws_sdk_wafv2::{
    types::{Scope, VisibilityConfig},
    Client as WafClient,
};

use crate::error::{AdapterError, AdapterResult};

/// Web-ACL create/get/delete plus Shield health-check-backed protection
/// association. `delete` surfaces a locked/transient error
/// when WAF reports the ACL is still associated; the caller (the
/// `delete_waf_acl` task step) owns the bounded retry budget — this
/// adapter issues one attempt per call.
#[async_trait]
pub trait Firewall: Send + Sync {
    async fn create_web_acl(&self, name: &str, rate_limit_rule_arn: &str) -> AdapterResult<(String, String)>;
    async fn get_web_acl(&self, id: &str, name: &str) -> AdapterResult<Option<String>>;
    async fn delete_web_acl(&self, id: &str, name: &str, lock_token: &str) -> AdapterResult<()>;
    async fn attach_logging(&self, web_acl_arn: &str, log_group_arn: &str) -> AdapterResult<()>;

    async fn associate_health_check_protection(
        &self,
        resource_arn: &str,
        health_check_arn: &str,
    ) -> AdapterResult<String>;
    async fn disassociate_protection(&self, protection_id: &str) -> AdapterResult<()>;
}

pub struct WafFirewall {
    waf: WafClient,
    shield: ShieldClient,
}

impl WafFirewall {
    pub fn new(waf: WafClient, shield: ShieldClient) -> Self {
        Self { waf, shield }
    }
}

#[async_trait]
impl Firewall for WafFirewall {
    async fn create_web_acl(&self, name: &str, rate_limit_rule_arn: &str) -> AdapterResult<(String, String)> {
        let visibility = VisibilityConfig::builder()
            .sampled_requests_enabled(true)
            .cloud_watch_metrics_enabled(true)
            .metric_name(name)
            .build()
            .map_err(|e| AdapterError::invalid_configuration(format!("malformed visibility config: {e}")))?;

        let resp = self
            .waf
            .create_web_acl()
            .name(name)
            .scope(Scope::CloudfrontScope)
            .default_action(aws_sdk_wafv2::types::DefaultAction::builder().allow(aws_sdk_wafv2::types::AllowAction::builder().build()).build())
            .visibility_config(visibility)
            .rule_group_reference_statement_arns(rate_limit_rule_arn)
            .send()
            .await
            .map_err(|e| classify(e.into_service_error().to_string()))?;

        let summary = resp
            .summary()
            .ok_or_else(|| AdapterError::internal("create_web_acl returned no summary"))?;
        let id = summary
            .id()
            .ok_or_else(|| AdapterError::internal("missing web acl id"))?
            .to_owned();
        let arn = summary
            .arn()
            .ok_or_else(|| AdapterError::internal("missing web acl arn"))?
            .to_owned();
        Ok((id, arn))
    }

    async fn get_web_acl(&self, id: &str, name: &str) -> AdapterResult<Option<String>> {
        match self.waf.get_web_acl().id(id).name(name).scope(Scope::CloudfrontScope).send().await {
            Ok(resp) => Ok(resp.lock_token().map(str::to_owned)),
            Err(e) => {
                let msg = e.into_service_error().to_string();
                if msg.contains("WAFNonexistentItemException") {
                    Ok(None)
                } else {
                    Err(classify(msg))
                }
            }
        }
    }

    async fn delete_web_acl(&self, id: &str, name: &str, lock_token: &str) -> AdapterResult<()> {
        match self
            .waf
            .delete_web_acl()
            .id(id)
            .name(name)
            .scope(Scope::CloudfrontScope)
            .lock_token(lock_token)
            .send()
            .await
        {
            Ok(_) => Ok(()),
            Err(e) => {
                let msg = e.into_service_error().to_string();
                if msg.contains("WAFNonexistentItemException") {
                    Ok(())
                } else if msg.contains("WAFAssociatedItemException") || msg.contains("WAFOptimisticLockException") {
                    Err(AdapterError::locked(msg))
                } else {
                    Err(classify(msg))
                }
            }
        }
    }

    async fn attach_logging(&self, web_acl_arn: &str, log_group_arn: &str) -> AdapterResult<()> {
        self.waf
            .put_logging_configuration()
            .logging_configuration(
                aws_sdk_wafv2::types::LoggingConfiguration::builder()
                    .resource_arn(web_acl_arn)
                    .log_destination_configs(log_group_arn)
                    .build()
                    .map_err(|e| AdapterError::invalid_configuration(format!("malformed logging configuration: {e}")))?,
            )
            .send()
            .await
            .map(|_| ())
            .map_err(|e| classify(e.into_service_error().to_string()))
    }

    async fn associate_health_check_protection(
        &self,
        resource_arn: &str,
        health_check_arn: &str,
    ) -> AdapterResult<String> {
        let resp = self
            .shield
            .create_protection()
            .name(format!("broker-{resource_arn}"))
            .resource_arn(resource_arn)
            .send()
            .await
            .map_err(|e| classify(e.into_service_error().to_string()))?;
        let protection_id = resp
            .protection_id()
            .ok_or_else(|| AdapterError::internal("create_protection returned no id"))?
            .to_owned();

        self.shield
            .associate_health_check()
            .protection_id(&protection_id)
            .health_check_arn(health_check_arn)
            .send()
            .await
            .map_err(|e| classify(e.into_service_error().to_string()))?;

        Ok(protection_id)
    }

    async fn disassociate_protection(&self, protection_id: &str) -> AdapterResult<()> {
        match self.shield.delete_protection().protection_id(protection_id).send().await {
            Ok(_) => Ok(()),
            Err(e) => {
                let msg = e.into_service_error().to_string();
                if msg.contains("ResourceNotFoundException") {
                    Ok(())
                } else {
                    Err(classify(msg))
                }
            }
        }
    }
}

fn classify(msg: String) -> AdapterError {
    if msg.contains("WAFLimitsExceededException") || msg.contains("Throttling") {
        AdapterError::rate_limited(msg)
    } else if msg.contains("WAFOptimisticLockException") || msg.contains("WAFAssociatedItemException") {
        AdapterError::locked(msg)
    } else if msg.contains("WAFNonexistentItemException") || msg.contains("ResourceNotFoundException") {
        AdapterError::not_found(msg)
    } else {
        AdapterError::internal(msg)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct LockingThenSucceedingFirewall {
        attempts_until_success: u32,
        attempts: AtomicU32,
    }

    #[async_trait]
    impl Firewall for LockingThenSucceedingFirewall {
        async fn create_web_acl(&self, _name: &str, _rate_limit_rule_arn: &str) -> AdapterResult<(String, String)> {
            unimplemented!()
        }

        async fn get_web_acl(&self, _id: &str, _name: &str) -> AdapterResult<Option<String>> {
            unimplemented!()
        }

        async fn delete_web_acl(&self, _id: &str, _name: &str, _lock_token: &str) -> AdapterResult<()> {
            let n = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if n < self.attempts_until_success {
                Err(AdapterError::locked("WAFAssociatedItemException"))
            } else {
                Ok(())
            }
        }

        async fn attach_logging(&self, _web_acl_arn: &str, _log_group_arn: &str) -> AdapterResult<()> {
            unimplemented!()
        }

        async fn associate_health_check_protection(
            &self,
            _resource_arn: &str,
            _health_check_arn: &str,
        ) -> AdapterResult<String> {
            unimplemented!()
        }

        async fn disassociate_protection(&self, _protection_id: &str) -> AdapterResult<()> {
            unimplemented!()
        }
    }

    #[tokio::test]
    async fn delete_reports_locked_as_transient() {
        let fw = LockingThenSucceedingFirewall {
            attempts_until_success: 3,
            attempts: AtomicU32::new(0),
        };
        let first = fw.delete_web_acl("id", "name", "token").await;
        assert!(first.is_err());
        assert!(first.unwrap_err().is_transient());
        let second = fw.delete_web_acl("id", "name", "token").await;
        assert!(second.is_err());
        let third = fw.delete_web_acl("id", "name", "token").await;
        assert!(third.is_ok());
    }
}
