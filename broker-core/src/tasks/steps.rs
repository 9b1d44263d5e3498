use broker_adapters::acme::{generate_csr, AcmeAccount, AcmeOrder};
use broker_db::{
    model::{Operation, OperationState, ServiceInstance},
    params,
};
use serde::{Deserialize, Serialize};

use super::{TaskContext, TaskError};

/// ACME progress scratchpad persisted in `Certificate::order_json`. Combines
/// the account (created once per instance) with the in-flight order so any
/// step can resume after a crash or requeue.
#[derive(Debug, Default, Serialize, Deserialize)]
struct AcmeProgress {
    account_key_pem: Option<String>,
    account_url: Option<String>,
    private_key_pem: Option<String>,
    csr_pem: Option<String>,
    order: Option<AcmeOrder>,
}

impl AcmeProgress {
    fn parse(raw: &Option<String>) -> Self {
        raw.as_deref()
            .and_then(|s| serde_json::from_str(s).ok())
            .unwrap_or_default()
    }

    fn to_json(&self) -> String {
        serde_json::to_string(self).expect("AcmeProgress always serializes")
    }

    fn account(&self) -> Result<Option<AcmeAccount>, TaskError> {
        match (&self.account_key_pem, &self.account_url) {
            (Some(key_pem), Some(url)) => Ok(Some(
                AcmeAccount::from_parts(key_pem, url.clone()).map_err(TaskError::from)?,
            )),
            _ => Ok(None),
        }
    }
}

async fn load(ctx: &mut TaskContext, operation_id: i64) -> Result<(Operation, ServiceInstance), TaskError> {
    let operation = ctx
        .db
        .get_operation_by_id(operation_id)
        .await
        .map_err(TaskError::from)?
        .ok_or_else(|| TaskError::Permanent(format!("operation {operation_id} not found")))?;
    let instance = ctx
        .db
        .get_instance(params::GetInstance {
            service_instance_id: operation.service_instance_id.clone(),
        })
        .await
        .map_err(TaskError::from)?
        .ok_or_else(|| TaskError::Permanent(format!("instance {} not found", operation.service_instance_id)))?;
    Ok((operation, instance))
}

async fn describe(ctx: &mut TaskContext, operation_id: i64, description: &str) -> Result<(), TaskError> {
    ctx.db
        .update_operation_state(params::UpdateOperationState {
            operation_id,
            state: OperationState::InProgress,
            step_description: description.to_owned(),
        })
        .await
        .map_err(TaskError::from)
}

async fn persist(ctx: &mut TaskContext, instance: ServiceInstance) -> Result<(), TaskError> {
    ctx.db
        .update_instance(params::UpdateInstance { instance })
        .await
        .map_err(TaskError::from)
}

fn new_certificate_id(instance: &ServiceInstance) -> Option<i64> {
    instance.core().new_certificate_id
}

pub async fn acme_register_account(ctx: &mut TaskContext, operation_id: i64) -> Result<(), TaskError> {
    let (_op, mut instance) = load(ctx, operation_id).await?;
    describe(ctx, operation_id, "Registering ACME account").await?;

    let cert_id = if let Some(id) = new_certificate_id(&instance) {
        id
    } else {
        let result = ctx
            .db
            .create_certificate(params::CreateCertificate {
                service_instance_id: instance.id().to_owned(),
                private_key_pem: None,
                csr_pem: None,
            })
            .await
            .map_err(TaskError::from)?;
        instance.core_mut().new_certificate_id = Some(result.id);
        persist(ctx, instance).await?;
        result.id
    };

    let certificate = ctx
        .db
        .get_certificate(cert_id)
        .await
        .map_err(TaskError::from)?
        .ok_or_else(|| TaskError::Permanent(format!("certificate {cert_id} not found")))?;
    let mut progress = AcmeProgress::parse(&certificate.order_json);
    if progress.account_url.is_some() {
        return Ok(());
    }

    let account = ctx.acme.register_account(&ctx.config.acme_contact_email).await.map_err(TaskError::from)?;
    progress.account_key_pem = Some(account.key_pem());
    progress.account_url = Some(account.account_url);

    ctx.db
        .update_certificate(params::UpdateCertificate {
            id: cert_id,
            leaf_pem: None,
            fullchain_pem: None,
            iam_server_certificate_id: None,
            iam_server_certificate_arn: None,
            order_json: Some(progress.to_json()),
        })
        .await
        .map_err(TaskError::from)
}

pub async fn create_csr_and_order(ctx: &mut TaskContext, operation_id: i64) -> Result<(), TaskError> {
    let (_op, instance) = load(ctx, operation_id).await?;
    describe(ctx, operation_id, "Requesting certificate").await?;

    let cert_id = new_certificate_id(&instance)
        .ok_or_else(|| TaskError::Permanent("no certificate row allocated before create_csr_and_order".to_owned()))?;
    if cert_id == instance.core().current_certificate_id.unwrap_or(-1) {
        // Update noop: the domain list didn't change, so the handler pinned
        // new_certificate back to current_certificate. Nothing to reissue.
        return Ok(());
    }

    let certificate = ctx
        .db
        .get_certificate(cert_id)
        .await
        .map_err(TaskError::from)?
        .ok_or_else(|| TaskError::Permanent(format!("certificate {cert_id} not found")))?;
    let mut progress = AcmeProgress::parse(&certificate.order_json);
    let account = progress
        .account()?
        .ok_or_else(|| TaskError::Permanent("ACME account not yet registered".to_owned()))?;

    if progress.order.is_some() {
        return Ok(());
    }

    let (private_key_pem, csr_pem) = generate_csr(instance.domain_names()).map_err(TaskError::from)?;
    let order = ctx.acme.submit_order(&account, instance.domain_names()).await.map_err(TaskError::from)?;
    progress.private_key_pem = Some(private_key_pem);
    progress.csr_pem = Some(csr_pem);
    progress.order = Some(order);

    ctx.db
        .update_certificate(params::UpdateCertificate {
            id: cert_id,
            leaf_pem: None,
            fullchain_pem: None,
            iam_server_certificate_id: None,
            iam_server_certificate_arn: None,
            order_json: Some(progress.to_json()),
        })
        .await
        .map_err(TaskError::from)
}

pub async fn answer_dns01_challenges(ctx: &mut TaskContext, operation_id: i64) -> Result<(), TaskError> {
    let (_op, instance) = load(ctx, operation_id).await?;
    describe(ctx, operation_id, "Answering DNS-01 challenges").await?;

    let cert_id = new_certificate_id(&instance)
        .ok_or_else(|| TaskError::Permanent("no certificate row allocated before answer_dns01_challenges".to_owned()))?;
    if cert_id == instance.core().current_certificate_id.unwrap_or(-1) {
        return Ok(());
    }

    let certificate = ctx
        .db
        .get_certificate(cert_id)
        .await
        .map_err(TaskError::from)?
        .ok_or_else(|| TaskError::Permanent(format!("certificate {cert_id} not found")))?;
    let progress = AcmeProgress::parse(&certificate.order_json);
    let account = progress
        .account()?
        .ok_or_else(|| TaskError::Permanent("ACME account not yet registered".to_owned()))?;
    let order = progress
        .order
        .clone()
        .ok_or_else(|| TaskError::Permanent("no ACME order submitted yet".to_owned()))?;

    if order.status == "ready" || order.status == "valid" {
        return Ok(());
    }

    let challenges = ctx.acme.dns01_challenges(&account, &order).await.map_err(TaskError::from)?;
    for challenge in &challenges {
        let record_name = format!("_acme-challenge.{}.", challenge.domain);
        ctx.dns_provider
            .upsert_txt_record(&record_name, &challenge.key_authorization)
            .await
            .map_err(TaskError::from)?;
        ctx.acme.answer_challenge(&account, &challenge.token).await.map_err(TaskError::from)?;
    }

    let updated_order = ctx.acme.poll_order(&account, &order).await.map_err(TaskError::from)?;
    if updated_order.status == "pending" {
        return Err(TaskError::Transient("ACME authorizations not yet validated".to_owned()));
    }

    let mut progress = progress;
    progress.order = Some(updated_order);
    ctx.db
        .update_certificate(params::UpdateCertificate {
            id: cert_id,
            leaf_pem: None,
            fullchain_pem: None,
            iam_server_certificate_id: None,
            iam_server_certificate_arn: None,
            order_json: Some(progress.to_json()),
        })
        .await
        .map_err(TaskError::from)
}

pub async fn retrieve_certificate(ctx: &mut TaskContext, operation_id: i64) -> Result<(), TaskError> {
    let (_op, instance) = load(ctx, operation_id).await?;
    describe(ctx, operation_id, "Retrieving signed certificate").await?;

    let cert_id = new_certificate_id(&instance)
        .ok_or_else(|| TaskError::Permanent("no certificate row allocated before retrieve_certificate".to_owned()))?;
    if cert_id == instance.core().current_certificate_id.unwrap_or(-1) {
        return Ok(());
    }

    let certificate = ctx
        .db
        .get_certificate(cert_id)
        .await
        .map_err(TaskError::from)?
        .ok_or_else(|| TaskError::Permanent(format!("certificate {cert_id} not found")))?;
    if certificate.fullchain_pem.is_some() {
        return Ok(());
    }

    let mut progress = AcmeProgress::parse(&certificate.order_json);
    let account = progress
        .account()?
        .ok_or_else(|| TaskError::Permanent("ACME account not yet registered".to_owned()))?;
    let mut order = progress
        .order
        .clone()
        .ok_or_else(|| TaskError::Permanent("no ACME order submitted yet".to_owned()))?;
    let csr_pem = progress
        .csr_pem
        .clone()
        .ok_or_else(|| TaskError::Permanent("no CSR generated yet".to_owned()))?;

    if order.status != "valid" {
        order = ctx.acme.finalize(&account, &order, &csr_pem).await.map_err(TaskError::from)?;
        if order.status != "valid" {
            return Err(TaskError::Transient("order not yet finalized".to_owned()));
        }
    }

    let fullchain_pem = ctx.acme.download_certificate(&account, &order).await.map_err(TaskError::from)?;
    let leaf_pem = fullchain_pem
        .split("-----END CERTIFICATE-----")
        .next()
        .map(|leaf| format!("{leaf}-----END CERTIFICATE-----\n"))
        .unwrap_or_else(|| fullchain_pem.clone());

    progress.order = Some(order);
    ctx.db
        .update_certificate(params::UpdateCertificate {
            id: cert_id,
            leaf_pem: Some(leaf_pem),
            fullchain_pem: Some(fullchain_pem),
            iam_server_certificate_id: None,
            iam_server_certificate_arn: None,
            order_json: Some(progress.to_json()),
        })
        .await
        .map_err(TaskError::from)
}

pub async fn upload_certificate(ctx: &mut TaskContext, operation_id: i64) -> Result<(), TaskError> {
    let (_op, instance) = load(ctx, operation_id).await?;
    describe(ctx, operation_id, "Uploading certificate").await?;

    let cert_id = new_certificate_id(&instance)
        .ok_or_else(|| TaskError::Permanent("no certificate row allocated before upload_certificate".to_owned()))?;
    if cert_id == instance.core().current_certificate_id.unwrap_or(-1) {
        return Ok(());
    }

    let certificate = ctx
        .db
        .get_certificate(cert_id)
        .await
        .map_err(TaskError::from)?
        .ok_or_else(|| TaskError::Permanent(format!("certificate {cert_id} not found")))?;
    if certificate.iam_server_certificate_id.is_some() {
        return Ok(());
    }
    let leaf_pem = certificate.leaf_pem.clone().ok_or_else(|| TaskError::Transient("certificate not yet issued".to_owned()))?;
    let fullchain_pem = certificate.fullchain_pem.clone().unwrap_or_default();
    let progress = AcmeProgress::parse(&certificate.order_json);
    let private_key_pem = progress
        .private_key_pem
        .clone()
        .ok_or_else(|| TaskError::Permanent("no private key generated yet".to_owned()))?;

    let name = format!("broker-{}-{}", instance.id(), cert_id);
    let (id, arn) = ctx
        .identity_store
        .upload(&name, &leaf_pem, &private_key_pem, &fullchain_pem)
        .await
        .map_err(TaskError::from)?;

    ctx.db
        .update_certificate(params::UpdateCertificate {
            id: cert_id,
            leaf_pem: None,
            fullchain_pem: None,
            iam_server_certificate_id: Some(id),
            iam_server_certificate_arn: Some(arn),
            order_json: None,
        })
        .await
        .map_err(TaskError::from)
}

pub async fn apply_alb_listener(ctx: &mut TaskContext, operation_id: i64) -> Result<(), TaskError> {
    let (_op, instance) = load(ctx, operation_id).await?;
    describe(ctx, operation_id, "Attaching certificate to load balancer").await?;

    let ServiceInstance::Alb(alb) = &instance else {
        return Ok(());
    };
    let listener_arn = alb.alb_listener_arn.clone().ok_or_else(|| TaskError::Permanent("ALB instance missing listener arn".to_owned()))?;
    let cert_id = new_certificate_id(&instance).ok_or_else(|| TaskError::Permanent("no certificate to attach".to_owned()))?;
    let certificate = ctx.db.get_certificate(cert_id).await.map_err(TaskError::from)?.ok_or_else(|| TaskError::Permanent("certificate missing".to_owned()))?;
    let arn = certificate.iam_server_certificate_arn.clone().ok_or_else(|| TaskError::Transient("certificate not yet uploaded".to_owned()))?;

    ctx.load_balancer.add_certificate(&listener_arn, &arn).await.map_err(TaskError::from)
}

pub async fn apply_cdn_distribution(ctx: &mut TaskContext, operation_id: i64) -> Result<(), TaskError> {
    let (_op, mut instance) = load(ctx, operation_id).await?;
    describe(ctx, operation_id, "Configuring CDN distribution").await?;

    let cert_id = new_certificate_id(&instance).ok_or_else(|| TaskError::Permanent("no certificate to attach".to_owned()))?;
    let certificate = ctx.db.get_certificate(cert_id).await.map_err(TaskError::from)?.ok_or_else(|| TaskError::Permanent("certificate missing".to_owned()))?;
    let cert_arn = certificate.iam_server_certificate_arn.clone().ok_or_else(|| TaskError::Transient("certificate not yet uploaded".to_owned()))?;

    let cdn_instance = instance.as_cdn().ok_or_else(|| TaskError::Permanent("non-CDN instance reached apply_cdn_distribution".to_owned()))?.clone();

    let distribution_id = if let Some(id) = cdn_instance.cloudfront_distribution_id.clone() {
        ctx.cdn.update_distribution(&id, &cdn_instance, &cert_arn).await.map_err(TaskError::from)?;
        id
    } else {
        ctx.cdn.create_distribution(&cdn_instance, &cert_arn).await.map_err(TaskError::from)?
    };

    if let Some(cdn) = instance.as_cdn_mut() {
        cdn.cloudfront_distribution_id = Some(distribution_id.clone());
    }
    persist(ctx, instance).await?;

    if !ctx.cdn.await_deployed(&distribution_id).await.map_err(TaskError::from)? {
        return Err(TaskError::Transient("distribution not yet deployed".to_owned()));
    }
    Ok(())
}

pub async fn create_waf_acl(ctx: &mut TaskContext, operation_id: i64) -> Result<(), TaskError> {
    let (_op, mut instance) = load(ctx, operation_id).await?;
    describe(ctx, operation_id, "Creating dedicated web ACL").await?;

    let ServiceInstance::CdnDedicatedWaf(waf_instance) = &instance else {
        return Ok(());
    };
    if waf_instance.dedicated_waf_web_acl_id.is_some() {
        return Ok(());
    }
    let name = format!("broker-{}", instance.id());
    let (id, arn) = ctx.firewall.create_web_acl(&name, &ctx.config.rate_limit_rule_arn).await.map_err(TaskError::from)?;

    if let ServiceInstance::CdnDedicatedWaf(waf_instance) = &mut instance {
        waf_instance.dedicated_waf_web_acl_id = Some(id);
        waf_instance.dedicated_waf_web_acl_name = Some(name);
        waf_instance.dedicated_waf_web_acl_arn = Some(arn);
    }
    persist(ctx, instance).await
}

pub async fn put_waf_logging_configuration(ctx: &mut TaskContext, operation_id: i64) -> Result<(), TaskError> {
    let (_op, instance) = load(ctx, operation_id).await?;
    describe(ctx, operation_id, "Attaching WAF logging configuration").await?;

    let ServiceInstance::CdnDedicatedWaf(waf_instance) = &instance else {
        return Ok(());
    };
    let Some(arn) = waf_instance.dedicated_waf_web_acl_arn.clone() else {
        return Ok(());
    };
    ctx.firewall.attach_logging(&arn, &ctx.config.waf_log_group_arn).await.map_err(TaskError::from)
}

pub async fn create_route53_health_checks(ctx: &mut TaskContext, operation_id: i64) -> Result<(), TaskError> {
    let (_op, mut instance) = load(ctx, operation_id).await?;
    describe(ctx, operation_id, "Creating Route53 health checks").await?;

    let ServiceInstance::CdnDedicatedWaf(waf_instance) = &instance else {
        return Ok(());
    };
    let existing: std::collections::HashSet<&str> = waf_instance.route53_health_checks.iter().map(|h| h.domain_name.as_str()).collect();
    let mut new_checks = Vec::new();
    for domain in &waf_instance.cdn.core.domain_names.clone() {
        if existing.contains(domain.as_str()) {
            continue;
        }
        let health_check_id = ctx.dns_provider.create_health_check(domain).await.map_err(TaskError::from)?;
        new_checks.push(broker_db::model::Route53HealthCheck {
            domain_name: domain.clone(),
            health_check_id,
        });
    }

    if !new_checks.is_empty() {
        if let ServiceInstance::CdnDedicatedWaf(waf_instance) = &mut instance {
            waf_instance.route53_health_checks.extend(new_checks);
        }
        persist(ctx, instance).await?;
    }
    Ok(())
}

pub async fn associate_shield_protection(ctx: &mut TaskContext, operation_id: i64) -> Result<(), TaskError> {
    let (_op, mut instance) = load(ctx, operation_id).await?;
    describe(ctx, operation_id, "Associating Shield protection").await?;

    let ServiceInstance::CdnDedicatedWaf(waf_instance) = &instance else {
        return Ok(());
    };
    if waf_instance.shield_associated_health_check.is_some() {
        return Ok(());
    }
    let Some(distribution_arn) = waf_instance.cdn.cloudfront_distribution_arn.clone() else {
        return Err(TaskError::Transient("distribution arn not yet known".to_owned()));
    };
    let Some(first_check) = waf_instance.route53_health_checks.first().cloned() else {
        return Err(TaskError::Transient("no health checks created yet".to_owned()));
    };
    let health_check_arn = format!("arn:aws:route53:::healthcheck/{}", first_check.health_check_id);

    let protection_id = ctx
        .firewall
        .associate_health_check_protection(&distribution_arn, &health_check_arn)
        .await
        .map_err(TaskError::from)?;

    if let ServiceInstance::CdnDedicatedWaf(waf_instance) = &mut instance {
        waf_instance.shield_associated_health_check = Some(broker_db::model::ShieldHealthCheck {
            domain_name: first_check.domain_name,
            protection_id,
            health_check_id: first_check.health_check_id,
        });
    }
    persist(ctx, instance).await
}

pub async fn swap_certificate(ctx: &mut TaskContext, operation_id: i64) -> Result<(), TaskError> {
    let (_op, mut instance) = load(ctx, operation_id).await?;
    describe(ctx, operation_id, "Swapping in new certificate").await?;

    let core = instance.core_mut();
    if let Some(new_id) = core.new_certificate_id.take() {
        core.current_certificate_id = Some(new_id);
    }
    persist(ctx, instance).await
}

pub async fn delete_old_certificate(ctx: &mut TaskContext, operation_id: i64) -> Result<(), TaskError> {
    let (_op, instance) = load(ctx, operation_id).await?;
    describe(ctx, operation_id, "Removing superseded certificate").await?;

    let duplicates = ctx.db.get_duplicate_certs_for_service(instance.id()).await.map_err(TaskError::from)?;
    let mut ids = Vec::with_capacity(duplicates.len());
    for cert in duplicates {
        if cert.iam_server_certificate_id.is_some() {
            ctx.identity_store.delete(&format!("broker-{}-{}", instance.id(), cert.id)).await.ok();
        }
        ids.push(cert.id);
    }
    if !ids.is_empty() {
        ctx.db.delete_certificates(&ids).await.map_err(TaskError::from)?;
    }
    Ok(())
}

pub async fn remove_alb_certificate(ctx: &mut TaskContext, operation_id: i64) -> Result<(), TaskError> {
    let (_op, instance) = load(ctx, operation_id).await?;
    describe(ctx, operation_id, "Detaching certificate from load balancer").await?;

    let ServiceInstance::Alb(alb) = &instance else {
        return Ok(());
    };
    let Some(listener_arn) = alb.alb_listener_arn.clone() else {
        return Ok(());
    };
    if let Some(cert_id) = instance.core().current_certificate_id {
        if let Some(certificate) = ctx.db.get_certificate(cert_id).await.map_err(TaskError::from)? {
            if let Some(arn) = certificate.iam_server_certificate_arn {
                ctx.load_balancer.remove_certificate(&listener_arn, &arn).await.map_err(TaskError::from)?;
            }
        }
    }
    Ok(())
}

pub async fn delete_cdn_distribution(ctx: &mut TaskContext, operation_id: i64) -> Result<(), TaskError> {
    let (_op, instance) = load(ctx, operation_id).await?;
    describe(ctx, operation_id, "Deleting CDN distribution").await?;

    let Some(cdn) = instance.as_cdn() else {
        return Ok(());
    };
    let Some(distribution_id) = cdn.cloudfront_distribution_id.clone() else {
        return Ok(());
    };
    ctx.cdn.delete_distribution(&distribution_id).await.map_err(TaskError::from)
}

pub async fn disassociate_shield_protection(ctx: &mut TaskContext, operation_id: i64) -> Result<(), TaskError> {
    let (_op, instance) = load(ctx, operation_id).await?;
    describe(ctx, operation_id, "Disassociating Shield protection").await?;

    let ServiceInstance::CdnDedicatedWaf(waf_instance) = &instance else {
        return Ok(());
    };
    let Some(shield) = waf_instance.shield_associated_health_check.clone() else {
        return Ok(());
    };
    ctx.firewall.disassociate_protection(&shield.protection_id).await.map_err(TaskError::from)
}

pub async fn delete_route53_health_checks(ctx: &mut TaskContext, operation_id: i64) -> Result<(), TaskError> {
    let (_op, instance) = load(ctx, operation_id).await?;
    describe(ctx, operation_id, "Deleting Route53 health checks").await?;

    let ServiceInstance::CdnDedicatedWaf(waf_instance) = &instance else {
        return Ok(());
    };
    for check in &waf_instance.route53_health_checks {
        ctx.dns_provider.delete_health_check(&check.health_check_id).await.map_err(TaskError::from)?;
    }
    Ok(())
}

/// Deletes the dedicated web ACL. Tolerates `WAFAssociatedItemException`/
/// `WAFOptimisticLockException` as a transient lock, retrying up to 10 times
/// inside the step before raising a permanent
/// failure; this budget is independent of the runtime's own backoff.
pub async fn delete_waf_acl(ctx: &mut TaskContext, operation_id: i64) -> Result<(), TaskError> {
    let (_op, instance) = load(ctx, operation_id).await?;
    describe(ctx, operation_id, "Deleting dedicated web ACL").await?;

    let ServiceInstance::CdnDedicatedWaf(waf_instance) = &instance else {
        return Ok(());
    };
    let (Some(id), Some(name)) = (waf_instance.dedicated_waf_web_acl_id.clone(), waf_instance.dedicated_waf_web_acl_name.clone()) else {
        return Ok(());
    };

    const MAX_ATTEMPTS: u32 = 10;
    for attempt in 1..=MAX_ATTEMPTS {
        let Some(lock_token) = ctx.firewall.get_web_acl(&id, &name).await.map_err(TaskError::from)? else {
            return Ok(());
        };
        match ctx.firewall.delete_web_acl(&id, &name, &lock_token).await {
            Ok(()) => return Ok(()),
            Err(e) if e.is_locked() && attempt < MAX_ATTEMPTS => continue,
            Err(e) => return Err(TaskError::Permanent(format!("web ACL delete did not converge after {attempt} attempts: {e}"))),
        }
    }
    Err(TaskError::Permanent(format!("web ACL delete exhausted its {MAX_ATTEMPTS}-attempt budget")))
}

pub async fn delete_all_certificates(ctx: &mut TaskContext, operation_id: i64) -> Result<(), TaskError> {
    let (_op, instance) = load(ctx, operation_id).await?;
    describe(ctx, operation_id, "Removing certificate identities").await?;

    let mut ids = Vec::new();
    for cert_id in [instance.core().current_certificate_id, instance.core().new_certificate_id].into_iter().flatten() {
        if let Some(certificate) = ctx.db.get_certificate(cert_id).await.map_err(TaskError::from)? {
            ctx.identity_store.delete(&format!("broker-{}-{}", instance.id(), cert_id)).await.ok();
            ids.push(certificate.id);
        }
    }
    if !ids.is_empty() {
        ctx.db.delete_certificates(&ids).await.map_err(TaskError::from)?;
    }
    Ok(())
}

pub async fn deactivate_instance(ctx: &mut TaskContext, operation_id: i64) -> Result<(), TaskError> {
    let (_op, instance) = load(ctx, operation_id).await?;
    describe(ctx, operation_id, "Deactivating instance").await?;

    ctx.db
        .deactivate_instance(params::DeactivateInstance {
            service_instance_id: instance.id().to_owned(),
        })
        .await
        .map_err(TaskError::from)
}

#[cfg(test)]
mod test {
    use std::sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    };

    use async_trait::async_trait;
    use broker_adapters::{
        acme::{AcmeAccount, AcmeClient, AcmeOrder, Challenge},
        cdn::Cdn,
        dns_provider::DnsProvider,
        error::{AdapterError, AdapterResult},
        identity_store::CertificateIdentityStore,
        load_balancer::LoadBalancer,
        Firewall,
    };
    use crate::config::AppConfig;
    use broker_db::{
        model::{CdnDedicatedWafInstance, CdnInstance, ForwardCookiePolicy, InstanceCore, OriginProtocolPolicy, ServiceInstance},
        params, Db,
    };
    use broker_db_memory::MemoryDb;

    use super::*;

    struct Unimplemented;

    #[async_trait]
    impl AcmeClient for Unimplemented {
        async fn register_account(&self, _contact_email: &str) -> AdapterResult<AcmeAccount> {
            unimplemented!()
        }
        async fn submit_order(&self, _account: &AcmeAccount, _domains: &[String]) -> AdapterResult<AcmeOrder> {
            unimplemented!()
        }
        async fn dns01_challenges(&self, _account: &AcmeAccount, _order: &AcmeOrder) -> AdapterResult<Vec<Challenge>> {
            unimplemented!()
        }
        async fn answer_challenge(&self, _account: &AcmeAccount, _challenge_url: &str) -> AdapterResult<()> {
            unimplemented!()
        }
        async fn poll_order(&self, _account: &AcmeAccount, _order: &AcmeOrder) -> AdapterResult<AcmeOrder> {
            unimplemented!()
        }
        async fn finalize(&self, _account: &AcmeAccount, _order: &AcmeOrder, _csr_pem: &str) -> AdapterResult<AcmeOrder> {
            unimplemented!()
        }
        async fn download_certificate(&self, _account: &AcmeAccount, _order: &AcmeOrder) -> AdapterResult<String> {
            unimplemented!()
        }
    }

    #[async_trait]
    impl DnsProvider for Unimplemented {
        async fn upsert_txt_record(&self, _name: &str, _value: &str) -> AdapterResult<()> {
            unimplemented!()
        }
        async fn delete_txt_record(&self, _name: &str, _value: &str) -> AdapterResult<()> {
            unimplemented!()
        }
        async fn upsert_alias_record(&self, _name: &str, _zone: &str, _target: &str) -> AdapterResult<()> {
            unimplemented!()
        }
        async fn delete_alias_record(&self, _name: &str, _zone: &str, _target: &str) -> AdapterResult<()> {
            unimplemented!()
        }
        async fn create_health_check(&self, _domain_name: &str) -> AdapterResult<String> {
            unimplemented!()
        }
        async fn delete_health_check(&self, _health_check_id: &str) -> AdapterResult<()> {
            unimplemented!()
        }
    }

    #[async_trait]
    impl CertificateIdentityStore for Unimplemented {
        async fn upload(&self, _name: &str, _cert: &str, _key: &str, _chain: &str) -> AdapterResult<(String, String)> {
            unimplemented!()
        }
        async fn list(&self) -> AdapterResult<Vec<String>> {
            unimplemented!()
        }
        async fn delete(&self, _name: &str) -> AdapterResult<()> {
            unimplemented!()
        }
    }

    #[async_trait]
    impl LoadBalancer for Unimplemented {
        async fn add_certificate(&self, _listener_arn: &str, _certificate_arn: &str) -> AdapterResult<()> {
            unimplemented!()
        }
        async fn remove_certificate(&self, _listener_arn: &str, _certificate_arn: &str) -> AdapterResult<()> {
            unimplemented!()
        }
        async fn list_certificates(&self, _listener_arn: &str) -> AdapterResult<Vec<String>> {
            unimplemented!()
        }
    }

    #[async_trait]
    impl Cdn for Unimplemented {
        async fn create_distribution(&self, _instance: &CdnInstance, _certificate_arn: &str) -> AdapterResult<String> {
            unimplemented!()
        }
        async fn update_distribution(&self, _distribution_id: &str, _instance: &CdnInstance, _certificate_arn: &str) -> AdapterResult<()> {
            unimplemented!()
        }
        async fn delete_distribution(&self, _distribution_id: &str) -> AdapterResult<()> {
            unimplemented!()
        }
        async fn await_deployed(&self, _distribution_id: &str) -> AdapterResult<bool> {
            unimplemented!()
        }
    }

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
            Ok(Some("lock-token".to_owned()))
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
        async fn associate_health_check_protection(&self, _resource_arn: &str, _health_check_arn: &str) -> AdapterResult<String> {
            unimplemented!()
        }
        async fn disassociate_protection(&self, _protection_id: &str) -> AdapterResult<()> {
            unimplemented!()
        }
    }

    async fn setup(firewall: Arc<dyn Firewall>) -> (TaskContext, i64) {
        let mut db = MemoryDb::new();

        let core = InstanceCore::new("waf-instance".to_owned(), vec!["example.gov".to_owned()]);
        let instance = ServiceInstance::CdnDedicatedWaf(CdnDedicatedWafInstance {
            cdn: CdnInstance {
                core,
                cloudfront_distribution_id: Some("EDFDVBD6EXAMPLE".to_owned()),
                cloudfront_distribution_arn: None,
                cloudfront_origin_hostname: "origin.example.gov".to_owned(),
                cloudfront_origin_path: String::new(),
                forward_cookie_policy: ForwardCookiePolicy::None,
                forwarded_cookies: vec![],
                forwarded_headers: vec![],
                origin_protocol_policy: OriginProtocolPolicy::HttpsOnly,
                error_responses: Default::default(),
            },
            dedicated_waf_web_acl_id: Some("waf-id".to_owned()),
            dedicated_waf_web_acl_name: Some("waf-name".to_owned()),
            dedicated_waf_web_acl_arn: Some("arn:aws:wafv2:acl".to_owned()),
            route53_health_checks: vec![],
            shield_associated_health_check: None,
        });
        db.create_instance(params::CreateInstance { instance }).await.unwrap();
        let operation = db
            .create_operation(params::CreateOperation {
                service_instance_id: "waf-instance".to_owned(),
                action: broker_db::model::OperationAction::Deprovision,
                step_description: "Queuing tasks".to_owned(),
            })
            .await
            .unwrap();

        let ctx = TaskContext {
            db: Box::new(db),
            dns_provider: Arc::new(Unimplemented),
            acme: Arc::new(Unimplemented),
            identity_store: Arc::new(Unimplemented),
            load_balancer: Arc::new(Unimplemented),
            cdn: Arc::new(Unimplemented),
            firewall,
            config: AppConfig {
                default_cloudfront_origin: "default.example.net".to_owned(),
                cloudfront_hosted_zone_id: "Z1".to_owned(),
                rate_limit_rule_arn: "arn:rule".to_owned(),
                waf_log_group_arn: "arn:loggroup".to_owned(),
                cname_validation_target: "edge.example.net".to_owned(),
                acme_contact_email: "broker@example.net".to_owned(),
                task_max_attempts: 5,
            },
            correlation_id: "test".to_owned(),
        };
        (ctx, operation.id)
    }

    #[tokio::test]
    async fn delete_waf_acl_retries_until_unlocked() {
        let firewall = Arc::new(LockingThenSucceedingFirewall {
            attempts_until_success: 3,
            attempts: AtomicU32::new(0),
        });
        let (mut ctx, operation_id) = setup(firewall.clone()).await;

        delete_waf_acl(&mut ctx, operation_id).await.unwrap();

        assert_eq!(firewall.attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn delete_waf_acl_gives_up_after_its_attempt_budget() {
        let firewall = Arc::new(LockingThenSucceedingFirewall {
            attempts_until_success: 100,
            attempts: AtomicU32::new(0),
        });
        let (mut ctx, operation_id) = setup(firewall.clone()).await;

        let result = delete_waf_acl(&mut ctx, operation_id).await;

        assert!(result.is_err());
        assert!(!matches!(result.unwrap_err(), TaskError::Transient(_)));
        assert_eq!(firewall.attempts.load(Ordering::SeqCst), 10);
    }
}
