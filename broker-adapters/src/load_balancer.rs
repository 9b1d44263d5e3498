use async_trait::async_trait;
use aws_sdk_elasticloadbalancingv2::{types::Certificate as AlbCertificate, Client};

use crate::error::{AdapterError, AdapterResult};

/// Listener certificate attach/detach/list for ALB instances.
#[async_trait]
pub trait LoadBalancer: Send + Sync {
    async fn add_certificate(&self, listener_arn: &str, certificate_arn: &str) -> AdapterResult<()>;
    async fn remove_certificate(&self, listener_arn: &str, certificate_arn: &str) -> AdapterResult<()>;
    async fn list_certificates(&self, listener_arn: &str) -> AdapterResult<Vec<String>>;
}

pub struct AlbLoadBalancer {
    client: Client,
}

impl AlbLoadBalancer {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl LoadBalancer for AlbLoadBalancer {
    async fn add_certificate(&self, listener_arn: &str, certificate_arn: &str) -> AdapterResult<()> {
        self.client
            .add_listener_certificates()
            .listener_arn(listener_arn)
            .certificates(AlbCertificate::builder().certificate_arn(certificate_arn).build())
            .send()
            .await
            .map(|_| ())
            .map_err(|e| classify(e.into_service_error().to_string()))
    }

    async fn remove_certificate(&self, listener_arn: &str, certificate_arn: &str) -> AdapterResult<()> {
        match self
            .client
            .remove_listener_certificates()
            .listener_arn(listener_arn)
            .certificates(AlbCertificate::builder().certificate_arn(certificate_arn).build())
            .send()
            .await
        {
            Ok(_) => Ok(()),
            Err(e) => {
                let msg = e.into_service_error().to_string();
                if msg.contains("CertificateNotFound") {
                    Ok(())
                } else {
                    Err(classify(msg))
                }
            }
        }
    }

    async fn list_certificates(&self, listener_arn: &str) -> AdapterResult<Vec<String>> {
        let resp = self
            .client
            .describe_listener_certificates()
            .listener_arn(listener_arn)
            .send()
            .await
            .map_err(|e| classify(e.into_service_error().to_string()))?;
        Ok(resp
            .certificates()
            .iter()
            .filter_map(|c| c.certificate_arn())
            .map(|arn| arn.to_owned())
            .collect())
    }
}

fn classify(msg: String) -> AdapterError {
    if msg.contains("Throttling") || msg.contains("TooManyRequests") {
        AdapterError::rate_limited(msg)
    } else {
        AdapterError::internal(msg)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use async_trait::async_trait as at;

    struct FakeAlb {
        certs: std::sync::Mutex<Vec<String>>,
    }

    #[at]
    impl LoadBalancer for FakeAlb {
        async fn add_certificate(&self, _listener_arn: &str, certificate_arn: &str) -> AdapterResult<()> {
            self.certs.lock().unwrap().push(certificate_arn.to_owned());
            Ok(())
        }

        async fn remove_certificate(&self, _listener_arn: &str, certificate_arn: &str) -> AdapterResult<()> {
            self.certs.lock().unwrap().retain(|c| c != certificate_arn);
            Ok(())
        }

        async fn list_certificates(&self, _listener_arn: &str) -> AdapterResult<Vec<String>> {
            Ok(self.certs.lock().unwrap().clone())
        }
    }

    #[tokio::test]
    async fn add_then_list_roundtrips() {
        let alb = FakeAlb {
            certs: std::sync::Mutex::new(vec![]),
        };
        alb.add_certificate("listener/1", "arn:cert:1").await.unwrap();
        assert_eq!(alb.list_certificates("listener/1").await.unwrap(), vec!["arn:cert:1"]);
    }
}
