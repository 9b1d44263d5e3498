use std::collections::{HashMap, HashSet};

use broker_adapters::LoadBalancer;
use broker_db::{model::ServiceInstance, Db, DbErrorIntrospect};

/// Maps each requested certificate ARN to the listener ARN it's attached to,
/// if any. Iterates `listener_arns` in order and stops as soon as every
/// requested ARN has been located: with all
/// certs on the first listener this issues exactly one `list_certificates`
/// call regardless of how many listeners exist.
pub async fn get_matching_alb_listener_arns_for_cert_arns(
    load_balancer: &dyn LoadBalancer,
    cert_arns: &[String],
    listener_arns: &[String],
) -> Result<HashMap<String, String>, broker_adapters::AdapterError> {
    let mut remaining: HashSet<&str> = cert_arns.iter().map(String::as_str).collect();
    let mut found = HashMap::new();

    for listener_arn in listener_arns {
        if remaining.is_empty() {
            break;
        }
        let attached = load_balancer.list_certificates(listener_arn).await?;
        for arn in attached {
            if remaining.remove(arn.as_str()) {
                found.insert(arn, listener_arn.clone());
            }
        }
    }
    Ok(found)
}

/// Sweeps every instance for duplicate certificate rows (ones left behind by
/// a pipeline that uploaded a new certificate but never completed the swap)
/// and deletes both the cloud-side certificate and the stale row.
pub async fn fix_duplicate_alb_certs<D>(
    db: &mut D,
    load_balancer: &dyn LoadBalancer,
    identity_store: &dyn broker_adapters::CertificateIdentityStore,
    candidate_listener_arns: &[String],
) -> Result<(), D::Error>
where
    D: Db,
    D::Error: DbErrorIntrospect,
{
    let instance_ids = db.list_instance_ids().await?;

    for instance_id in instance_ids {
        let Some(instance) = db.get_instance(broker_db::params::GetInstance {
            service_instance_id: instance_id.clone(),
        }).await? else {
            continue;
        };
        if !matches!(instance, ServiceInstance::Alb(_)) {
            continue;
        }

        let duplicates = db.get_duplicate_certs_for_service(&instance_id).await?;
        if duplicates.is_empty() {
            continue;
        }

        let cert_arns: Vec<String> = duplicates.iter().filter_map(|c| c.iam_server_certificate_arn.clone()).collect();
        if !cert_arns.is_empty() {
            let mapping = match get_matching_alb_listener_arns_for_cert_arns(load_balancer, &cert_arns, candidate_listener_arns).await {
                Ok(m) => m,
                Err(_) => HashMap::new(),
            };
            for (cert_arn, listener_arn) in &mapping {
                load_balancer.remove_certificate(listener_arn, cert_arn).await.ok();
            }
            for cert in &duplicates {
                if cert.iam_server_certificate_id.is_some() {
                    let name = format!("broker-{instance_id}-{}", cert.id);
                    identity_store.delete(&name).await.ok();
                }
            }
        }

        let ids: Vec<i64> = duplicates.into_iter().map(|c| c.id).collect();
        db.delete_certificates(&ids).await?;
    }

    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeLoadBalancer {
        listener_certs: HashMap<String, Vec<String>>,
        list_calls: AtomicUsize,
    }

    #[async_trait]
    impl LoadBalancer for FakeLoadBalancer {
        async fn add_certificate(&self, _listener_arn: &str, _certificate_arn: &str) -> broker_adapters::AdapterResult<()> {
            Ok(())
        }
        async fn remove_certificate(&self, _listener_arn: &str, _certificate_arn: &str) -> broker_adapters::AdapterResult<()> {
            Ok(())
        }
        async fn list_certificates(&self, listener_arn: &str) -> broker_adapters::AdapterResult<Vec<String>> {
            self.list_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.listener_certs.get(listener_arn).cloned().unwrap_or_default())
        }
    }

    #[tokio::test]
    async fn stops_once_every_cert_is_located() {
        let mut listener_certs = HashMap::new();
        listener_certs.insert("listener/1".to_owned(), vec!["cert/a".to_owned(), "cert/b".to_owned()]);
        listener_certs.insert("listener/2".to_owned(), vec!["cert/c".to_owned()]);
        let lb = FakeLoadBalancer {
            listener_certs,
            list_calls: AtomicUsize::new(0),
        };

        let result = get_matching_alb_listener_arns_for_cert_arns(
            &lb,
            &["cert/a".to_owned(), "cert/b".to_owned()],
            &["listener/1".to_owned(), "listener/2".to_owned()],
        )
        .await
        .unwrap();

        assert_eq!(result.get("cert/a"), Some(&"listener/1".to_owned()));
        assert_eq!(result.get("cert/b"), Some(&"listener/1".to_owned()));
        assert_eq!(lb.list_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn queries_every_listener_when_certs_are_scattered() {
        let mut listener_certs = HashMap::new();
        listener_certs.insert("listener/1".to_owned(), vec!["cert/a".to_owned()]);
        listener_certs.insert("listener/2".to_owned(), vec!["cert/b".to_owned()]);
        let lb = FakeLoadBalancer {
            listener_certs,
            list_calls: AtomicUsize::new(0),
        };

        let result = get_matching_alb_listener_arns_for_cert_arns(
            &lb,
            &["cert/a".to_owned(), "cert/b".to_owned()],
            &["listener/1".to_owned(), "listener/2".to_owned()],
        )
        .await
        .unwrap();

        assert_eq!(result.len(), 2);
        assert_eq!(lb.list_calls.load(Ordering::SeqCst), 2);
    }
}
