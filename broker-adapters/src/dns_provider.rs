use async_trait::async_trait;
use aws_sdk_route53::{
    types::{
        Change, ChangeAction, ChangeBatch, HealthCheckConfig, HealthCheckType, RrType,
        ResourceRecord, ResourceRecordSet,
    },
    Client,
};

use crate::error::{AdapterError, AdapterResult};

/// Route53 control-plane operations: TXT challenge records, alias records for
/// CDN/ALB edges, and health checks backing Shield associations.
#[async_trait]
pub trait DnsProvider: Send + Sync {
    async fn upsert_txt_record(&self, name: &str, value: &str) -> AdapterResult<()>;
    async fn delete_txt_record(&self, name: &str, value: &str) -> AdapterResult<()>;

    async fn upsert_alias_record(
        &self,
        name: &str,
        target_hosted_zone_id: &str,
        target_dns_name: &str,
    ) -> AdapterResult<()>;
    async fn delete_alias_record(
        &self,
        name: &str,
        target_hosted_zone_id: &str,
        target_dns_name: &str,
    ) -> AdapterResult<()>;

    async fn create_health_check(&self, domain_name: &str) -> AdapterResult<String>;
    async fn delete_health_check(&self, health_check_id: &str) -> AdapterResult<()>;
}

pub struct Route53DnsProvider {
    client: Client,
    hosted_zone_id: String,
}

impl Route53DnsProvider {
    pub fn new(client: Client, hosted_zone_id: String) -> Self {
        Self {
            client,
            hosted_zone_id,
        }
    }

    async fn change(&self, action: ChangeAction, rrset: ResourceRecordSet) -> AdapterResult<()> {
        let batch = ChangeBatch::builder()
            .changes(Change::builder().action(action).resource_record_set(rrset).build().map_err(|e| {
                AdapterError::invalid_configuration(format!("malformed record change: {e}"))
            })?)
            .build()
            .map_err(|e| AdapterError::invalid_configuration(format!("malformed change batch: {e}")))?;

        self.client
            .change_resource_record_sets()
            .hosted_zone_id(&self.hosted_zone_id)
            .change_batch(batch)
            .send()
            .await
            .map(|_| ())
            .map_err(|e| classify(e.into_service_error().to_string()))
    }
}

#[async_trait]
impl DnsProvider for Route53DnsProvider {
    async fn upsert_txt_record(&self, name: &str, value: &str) -> AdapterResult<()> {
        let rrset = ResourceRecordSet::builder()
            .name(name)
            .r#type(RrType::Txt)
            .ttl(30)
            .resource_records(ResourceRecord::builder().value(format!("\"{value}\"")).build().map_err(|e| {
                AdapterError::invalid_configuration(format!("malformed TXT value: {e}"))
            })?)
            .build()
            .map_err(|e| AdapterError::invalid_configuration(format!("malformed TXT record: {e}")))?;
        self.change(ChangeAction::Upsert, rrset).await
    }

    async fn delete_txt_record(&self, name: &str, value: &str) -> AdapterResult<()> {
        let rrset = ResourceRecordSet::builder()
            .name(name)
            .r#type(RrType::Txt)
            .ttl(30)
            .resource_records(ResourceRecord::builder().value(format!("\"{value}\"")).build().map_err(|e| {
                AdapterError::invalid_configuration(format!("malformed TXT value: {e}"))
            })?)
            .build()
            .map_err(|e| AdapterError::invalid_configuration(format!("malformed TXT record: {e}")))?;
        self.change(ChangeAction::Delete, rrset).await
    }

    async fn upsert_alias_record(
        &self,
        name: &str,
        target_hosted_zone_id: &str,
        target_dns_name: &str,
    ) -> AdapterResult<()> {
        let alias = aws_sdk_route53::types::AliasTarget::builder()
            .hosted_zone_id(target_hosted_zone_id)
            .dns_name(target_dns_name)
            .evaluate_target_health(false)
            .build()
            .map_err(|e| AdapterError::invalid_configuration(format!("malformed alias target: {e}")))?;
        let rrset = ResourceRecordSet::builder()
            .name(name)
            .r#type(RrType::A)
            .alias_target(alias)
            .build()
            .map_err(|e| AdapterError::invalid_configuration(format!("malformed alias record: {e}")))?;
        self.change(ChangeAction::Upsert, rrset).await
    }

    async fn delete_alias_record(
        &self,
        name: &str,
        target_hosted_zone_id: &str,
        target_dns_name: &str,
    ) -> AdapterResult<()> {
        let alias = aws_sdk_route53::types::AliasTarget::builder()
            .hosted_zone_id(target_hosted_zone_id)
            .dns_name(target_dns_name)
            .evaluate_target_health(false)
            .build()
            .map_err(|e| AdapterError::invalid_configuration(format!("malformed alias target: {e}")))?;
        let rrset = ResourceRecordSet::builder()
            .name(name)
            .r#type(RrType::A)
            .alias_target(alias)
            .build()
            .map_err(|e| AdapterError::invalid_configuration(format!("malformed alias record: {e}")))?;
        self.change(ChangeAction::Delete, rrset).await
    }

    async fn create_health_check(&self, domain_name: &str) -> AdapterResult<String> {
        let config = HealthCheckConfig::builder()
            .fully_qualified_domain_name(domain_name)
            .r#type(HealthCheckType::Https)
            .port(443)
            .resource_path("/")
            .build();
        let resp = self
            .client
            .create_health_check()
            .caller_reference(format!("{domain_name}-{}", uuid::Uuid::new_v4()))
            .health_check_config(config)
            .send()
            .await
            .map_err(|e| classify(e.into_service_error().to_string()))?;
        resp.health_check()
            .and_then(|h| h.id())
            .map(|id| id.to_owned())
            .ok_or_else(|| AdapterError::internal("create_health_check returned no id"))
    }

    async fn delete_health_check(&self, health_check_id: &str) -> AdapterResult<()> {
        match self
            .client
            .delete_health_check()
            .health_check_id(health_check_id)
            .send()
            .await
        {
            Ok(_) => Ok(()),
            Err(e) => {
                let msg = e.into_service_error().to_string();
                if msg.contains("NoSuchHealthCheck") {
                    Ok(())
                } else {
                    Err(classify(msg))
                }
            }
        }
    }
}

fn classify(msg: String) -> AdapterError {
    if msg.contains("Throttling") || msg.contains("Rate exceeded") {
        AdapterError::rate_limited(msg)
    } else if msg.contains("PriorRequestNotComplete") {
        AdapterError::eventual_consistency(msg)
    } else {
        AdapterError::internal(msg)
    }
}
