use async_trait::async_trait;
use trust_dns_resolver::{config::*, TokioAsyncResolver};

use crate::error::{AdapterError, AdapterResult};

/// Outbound CNAME lookups used by the domain validator. Kept distinct from
/// [`crate::dns_provider::DnsProvider`], which manages Route53 records rather
/// than resolving them.
#[async_trait]
pub trait DnsResolver: Send + Sync {
    /// Returns the CNAME target for `domain`, if one is published, for the
    /// provisioning-time ownership check.
    async fn resolve_cname(&self, domain: &str) -> AdapterResult<Option<String>>;
}

pub struct TrustDnsResolver {
    resolver: TokioAsyncResolver,
}

impl TrustDnsResolver {
    pub fn new() -> AdapterResult<Self> {
        let resolver = TokioAsyncResolver::tokio(
            ResolverConfig::default(),
            ResolverOpts::default(),
        )
        .map_err(|e| AdapterError::internal(format!("failed to build DNS resolver: {e}")))?;
        Ok(Self { resolver })
    }
}

#[async_trait]
impl DnsResolver for TrustDnsResolver {
    async fn resolve_cname(&self, domain: &str) -> AdapterResult<Option<String>> {
        match self.resolver.lookup(domain, trust_dns_resolver::proto::rr::RecordType::CNAME).await {
            Ok(lookup) => Ok(lookup
                .iter()
                .find_map(|record| record.as_cname().map(|name| name.to_string().trim_end_matches('.').to_owned()))),
            Err(e) if e.is_no_records_found() || e.is_nx_domain() => Ok(None),
            Err(e) => Err(AdapterError::eventual_consistency(format!(
                "CNAME lookup for {domain} failed: {e}"
            ))),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    struct FakeResolver(Option<String>);

    #[async_trait]
    impl DnsResolver for FakeResolver {
        async fn resolve_cname(&self, _domain: &str) -> AdapterResult<Option<String>> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn returns_configured_target() {
        let resolver = FakeResolver(Some("edge.example.net".to_owned()));
        assert_eq!(
            resolver.resolve_cname("foo.example").await.unwrap(),
            Some("edge.example.net".to_owned())
        );
    }
}
