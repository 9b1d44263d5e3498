use async_trait::async_trait;
use aws_sdk_iam::Client;

use crate::error::{AdapterError, AdapterResult};

/// Upload/list/delete of server certificate identities.
/// Delete is idempotent: deleting an absent certificate is success.
#[async_trait]
pub trait CertificateIdentityStore: Send + Sync {
    async fn upload(
        &self,
        name: &str,
        certificate_body_pem: &str,
        private_key_pem: &str,
        certificate_chain_pem: &str,
    ) -> AdapterResult<(String, String)>;

    async fn list(&self) -> AdapterResult<Vec<String>>;

    async fn delete(&self, name: &str) -> AdapterResult<()>;
}

pub struct IamCertificateStore {
    client: Client,
}

impl IamCertificateStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl CertificateIdentityStore for IamCertificateStore {
    async fn upload(
        &self,
        name: &str,
        certificate_body_pem: &str,
        private_key_pem: &str,
        certificate_chain_pem: &str,
    ) -> AdapterResult<(String, String)> {
        let resp = self
            .client
            .upload_server_certificate()
            .server_certificate_name(name)
            .certificate_body(certificate_body_pem)
            .private_key(private_key_pem)
            .certificate_chain(certificate_chain_pem)
            .send()
            .await
            .map_err(|e| classify(e.into_service_error().to_string()))?;

        let meta = resp
            .server_certificate_metadata()
            .ok_or_else(|| AdapterError::internal("upload_server_certificate returned no metadata"))?;
        let id = meta
            .server_certificate_id()
            .ok_or_else(|| AdapterError::internal("missing server_certificate_id"))?
            .to_owned();
        let arn = meta
            .arn()
            .ok_or_else(|| AdapterError::internal("missing server_certificate_arn"))?
            .to_owned();
        Ok((id, arn))
    }

    async fn list(&self) -> AdapterResult<Vec<String>> {
        let mut names = Vec::new();
        let mut marker: Option<String> = None;
        loop {
            let mut req = self.client.list_server_certificates();
            if let Some(m) = &marker {
                req = req.marker(m);
            }
            let resp = req.send().await.map_err(|e| classify(e.into_service_error().to_string()))?;
            names.extend(
                resp.server_certificate_metadata_list()
                    .iter()
                    .filter_map(|m| m.server_certificate_name())
                    .map(|n| n.to_owned()),
            );
            if resp.is_truncated() {
                marker = resp.marker().map(str::to_owned);
            } else {
                break;
            }
        }
        Ok(names)
    }

    async fn delete(&self, name: &str) -> AdapterResult<()> {
        match self.client.delete_server_certificate().server_certificate_name(name).send().await {
            Ok(_) => Ok(()),
            Err(e) => {
                let msg = e.into_service_error().to_string();
                if msg.contains("NoSuchEntity") {
                    Ok(())
                } else {
                    Err(classify(msg))
                }
            }
        }
    }
}

fn classify(msg: String) -> AdapterError {
    if msg.contains("Throttling") {
        AdapterError::rate_limited(msg)
    } else if msg.contains("LimitExceeded") || msg.contains("DeleteConflict") {
        AdapterError::eventual_consistency(msg)
    } else if msg.contains("AccessDenied") {
        AdapterError::permission_denied(msg)
    } else if msg.contains("MalformedCertificate") {
        AdapterError::invalid_configuration(msg)
    } else {
        AdapterError::internal(msg)
    }
}
