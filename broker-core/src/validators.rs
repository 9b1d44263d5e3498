use std::sync::Arc;

use broker_adapters::DnsResolver;
use broker_db::Db;

use crate::error::CoreError;

/// Confirms every domain in `domains` publishes a CNAME pointing at
/// `target`, the broker-owned well-known hostname tenants are told to point
/// at before provisioning.
pub async fn validate_cname(
    resolver: &Arc<dyn DnsResolver>,
    domains: &[String],
    target: &str,
) -> Result<(), CoreError> {
    for domain in domains {
        let resolved = resolver
            .resolve_cname(domain)
            .await
            .map_err(|e| CoreError::bad_request(format!("could not verify CNAME for {domain}: {e}")))?;
        match resolved {
            Some(cname) if cname.eq_ignore_ascii_case(target) => {}
            _ => {
                return Err(CoreError::bad_request(format!(
                    "{domain} does not have a CNAME record pointing at {target}"
                )))
            }
        }
    }
    Ok(())
}

/// Ensures none of `domains` is already claimed by some other
/// non-deactivated instance.
pub async fn validate_unique_domains<D: Db>(
    db: &mut D,
    domains: &[String],
    except_instance_id: Option<&str>,
) -> Result<(), CoreError>
where
    D::Error: std::fmt::Display + broker_db::DbErrorIntrospect,
{
    for domain in domains {
        let conflict = db
            .domain_in_use(broker_db::params::DomainInUse {
                domain: domain.clone(),
                except_instance_id: except_instance_id.map(str::to_owned),
            })
            .await
            .map_err(|e| CoreError::internal(e.to_string()))?;
        if let Some(conflicting_domain) = conflict {
            return Err(CoreError::bad_request(format!(
                "domain {conflicting_domain} is already in use by another service instance"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use async_trait::async_trait;
    use broker_adapters::AdapterResult;

    struct FakeResolver {
        answer: Option<String>,
    }

    #[async_trait]
    impl DnsResolver for FakeResolver {
        async fn resolve_cname(&self, _domain: &str) -> AdapterResult<Option<String>> {
            Ok(self.answer.clone())
        }
    }

    #[tokio::test]
    async fn cname_mismatch_is_bad_request() {
        let resolver: Arc<dyn DnsResolver> = Arc::new(FakeResolver {
            answer: Some("wrong.example.net".to_owned()),
        });
        let result = validate_cname(&resolver, &["foo.example".to_owned()], "edge.example.net").await;
        assert!(result.unwrap_err().is_bad_request());
    }

    #[tokio::test]
    async fn cname_match_succeeds() {
        let resolver: Arc<dyn DnsResolver> = Arc::new(FakeResolver {
            answer: Some("edge.example.net".to_owned()),
        });
        let result = validate_cname(&resolver, &["foo.example".to_owned()], "edge.example.net").await;
        assert!(result.is_ok());
    }
}
