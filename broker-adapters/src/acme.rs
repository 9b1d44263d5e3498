use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use broker_db::model::Challenge;
use rcgen::{CertificateParams, DistinguishedName, KeyPair, PKCS_ECDSA_P256_SHA256};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use crate::error::{AdapterError, AdapterResult};

/// An ACME account: the key pair used to sign every protocol request, and
/// the account URL the CA returned from `new-account`.
pub struct AcmeAccount {
    key: KeyPair,
    pub account_url: String,
}

impl AcmeAccount {
    /// Reconstructs an account from its persisted key PEM and account URL, so
    /// a later pipeline step (possibly a different process) can resume
    /// signing requests for an in-flight order.
    pub fn from_parts(key_pem: &str, account_url: String) -> AdapterResult<Self> {
        let key = KeyPair::from_pem(key_pem)
            .map_err(|e| AdapterError::internal(format!("invalid ACME account key: {e}")))?;
        Ok(Self { key, account_url })
    }

    pub fn key_pem(&self) -> String {
        self.key.serialize_pem()
    }
}

/// One in-flight certificate order, tracked across the provisioning pipeline
/// via `Certificate::order_json` so a later step can resume it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcmeOrder {
    pub order_url: String,
    pub finalize_url: String,
    pub certificate_url: Option<String>,
    pub authorizations: Vec<String>,
    pub status: String,
}

/// Generates an RSA-free ECDSA P-256 key pair and a CSR for the given domains,
/// the pairing `other_examples/manifests/houseme-acmex` uses (`rcgen` for CSR
/// generation alongside an ACME client).
pub fn generate_csr(domains: &[String]) -> AdapterResult<(String, String)> {
    let key_pair =
        KeyPair::generate_for(&PKCS_ECDSA_P256_SHA256).map_err(|e| AdapterError::internal(format!("key generation failed: {e}")))?;
    let mut params = CertificateParams::new(domains.to_vec())
        .map_err(|e| AdapterError::invalid_configuration(format!("invalid domain list for CSR: {e}")))?;
    params.distinguished_name = DistinguishedName::new();
    let csr = params
        .serialize_request(&key_pair)
        .map_err(|e| AdapterError::internal(format!("CSR generation failed: {e}")))?;
    Ok((key_pair.serialize_pem(), csr.pem().map_err(|e| AdapterError::internal(format!("CSR PEM encoding failed: {e}")))?))
}

/// Minimal ACME v2 (RFC 8555) client: account registration, order submission,
/// DNS-01 challenge polling, and certificate download. Kept to the calls the
/// provisioning pipeline actually drives; grounded in the instant-acme-shaped
/// client contract and `other_examples/manifests/houseme-acmex`'s crate
/// pairing (`rcgen` + an async ACME client) rather than reimplementing the
/// full RFC surface.
#[async_trait]
pub trait AcmeClient: Send + Sync {
    async fn register_account(&self, contact_email: &str) -> AdapterResult<AcmeAccount>;
    async fn submit_order(&self, account: &AcmeAccount, domains: &[String]) -> AdapterResult<AcmeOrder>;
    async fn dns01_challenges(&self, account: &AcmeAccount, order: &AcmeOrder) -> AdapterResult<Vec<Challenge>>;
    async fn answer_challenge(&self, account: &AcmeAccount, challenge_url: &str) -> AdapterResult<()>;
    async fn poll_order(&self, account: &AcmeAccount, order: &AcmeOrder) -> AdapterResult<AcmeOrder>;
    async fn finalize(&self, account: &AcmeAccount, order: &AcmeOrder, csr_pem: &str) -> AdapterResult<AcmeOrder>;
    async fn download_certificate(&self, account: &AcmeAccount, order: &AcmeOrder) -> AdapterResult<String>;
}

#[derive(Deserialize)]
struct Directory {
    #[serde(rename = "newAccount")]
    new_account: String,
    #[serde(rename = "newOrder")]
    new_order: String,
    #[serde(rename = "newNonce")]
    new_nonce: String,
}

pub struct HttpAcmeClient {
    http: reqwest::Client,
    directory_url: String,
}

impl HttpAcmeClient {
    pub fn new(directory_url: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            directory_url,
        }
    }

    async fn directory(&self) -> AdapterResult<Directory> {
        self.http
            .get(&self.directory_url)
            .send()
            .await
            .map_err(|e| AdapterError::eventual_consistency(format!("ACME directory fetch failed: {e}")))?
            .json()
            .await
            .map_err(|e| AdapterError::internal(format!("malformed ACME directory: {e}")))
    }

    async fn fresh_nonce(&self, new_nonce_url: &str) -> AdapterResult<String> {
        let resp = self
            .http
            .head(new_nonce_url)
            .send()
            .await
            .map_err(|e| AdapterError::eventual_consistency(format!("ACME nonce fetch failed: {e}")))?;
        resp.headers()
            .get("replay-nonce")
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned)
            .ok_or_else(|| AdapterError::internal("ACME server returned no Replay-Nonce header"))
    }

    fn jwk(key: &KeyPair) -> Value {
        let point = key.public_key_raw();
        // Uncompressed SEC1 point: 0x04 || X(32) || Y(32) for P-256.
        let (x, y) = point.split_at(33);
        let x = &x[1..];
        json!({
            "kty": "EC",
            "crv": "P-256",
            "x": URL_SAFE_NO_PAD.encode(x),
            "y": URL_SAFE_NO_PAD.encode(y),
        })
    }

    fn jwk_thumbprint(key: &KeyPair) -> String {
        let jwk = Self::jwk(key);
        let canonical = format!(
            "{{\"crv\":\"{}\",\"kty\":\"{}\",\"x\":\"{}\",\"y\":\"{}\"}}",
            jwk["crv"].as_str().expect("jwk always has a string crv"),
            jwk["kty"].as_str().expect("jwk always has a string kty"),
            jwk["x"].as_str().expect("jwk always has a string x"),
            jwk["y"].as_str().expect("jwk always has a string y"),
        );
        let digest = Sha256::digest(canonical.as_bytes());
        URL_SAFE_NO_PAD.encode(digest)
    }

    /// A JWS-signed POST, either keyed by JWK (account creation) or by `kid`
    /// (every subsequent request), per RFC 8555 §6.2.
    async fn post_jws(&self, key: &KeyPair, kid: Option<&str>, url: &str, nonce: &str, payload: Value) -> AdapterResult<reqwest::Response> {
        let protected = if let Some(kid) = kid {
            json!({ "alg": "ES256", "kid": kid, "nonce": nonce, "url": url })
        } else {
            json!({ "alg": "ES256", "jwk": Self::jwk(key), "nonce": nonce, "url": url })
        };
        let protected_b64 = URL_SAFE_NO_PAD.encode(protected.to_string());
        let payload_b64 = if payload.is_null() {
            String::new()
        } else {
            URL_SAFE_NO_PAD.encode(payload.to_string())
        };
        let signing_input = format!("{protected_b64}.{payload_b64}");
        let signature = key
            .sign(signing_input.as_bytes())
            .map_err(|e| AdapterError::internal(format!("JWS signing failed: {e}")))?;

        let body = json!({
            "protected": protected_b64,
            "payload": payload_b64,
            "signature": URL_SAFE_NO_PAD.encode(signature),
        });

        self.http
            .post(url)
            .header("content-type", "application/jose+json")
            .json(&body)
            .send()
            .await
            .map_err(|e| AdapterError::eventual_consistency(format!("ACME request to {url} failed: {e}")))
    }
}

#[async_trait]
impl AcmeClient for HttpAcmeClient {
    async fn register_account(&self, contact_email: &str) -> AdapterResult<AcmeAccount> {
        let dir = self.directory().await?;
        let key = KeyPair::generate_for(&PKCS_ECDSA_P256_SHA256)
            .map_err(|e| AdapterError::internal(format!("account key generation failed: {e}")))?;
        let nonce = self.fresh_nonce(&dir.new_nonce).await?;

        let payload = json!({
            "termsOfServiceAgreed": true,
            "contact": [format!("mailto:{contact_email}")],
        });
        let resp = self.post_jws(&key, None, &dir.new_account, &nonce, payload).await?;
        if !resp.status().is_success() {
            return Err(classify_status(resp.status(), "new-account"));
        }
        let account_url = resp
            .headers()
            .get("location")
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned)
            .ok_or_else(|| AdapterError::internal("ACME new-account returned no Location header"))?;

        Ok(AcmeAccount { key, account_url })
    }

    async fn submit_order(&self, account: &AcmeAccount, domains: &[String]) -> AdapterResult<AcmeOrder> {
        let dir = self.directory().await?;
        let nonce = self.fresh_nonce(&dir.new_nonce).await?;
        let identifiers: Vec<Value> = domains
            .iter()
            .map(|d| json!({ "type": "dns", "value": d }))
            .collect();
        let payload = json!({ "identifiers": identifiers });
        let resp = self
            .post_jws(&account.key, Some(&account.account_url), &dir.new_order, &nonce, payload)
            .await?;
        if !resp.status().is_success() {
            return Err(classify_status(resp.status(), "new-order"));
        }
        let order_url = resp
            .headers()
            .get("location")
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned)
            .ok_or_else(|| AdapterError::internal("ACME new-order returned no Location header"))?;
        let body: Value = resp
            .json()
            .await
            .map_err(|e| AdapterError::internal(format!("malformed ACME order body: {e}")))?;
        parse_order(order_url, body)
    }

    async fn dns01_challenges(&self, account: &AcmeAccount, order: &AcmeOrder) -> AdapterResult<Vec<Challenge>> {
        let dir = self.directory().await?;
        let thumbprint = Self::jwk_thumbprint(&account.key);
        let mut challenges = Vec::with_capacity(order.authorizations.len());

        for authz_url in &order.authorizations {
            let nonce = self.fresh_nonce(&dir.new_nonce).await?;
            let resp = self
                .post_jws(&account.key, Some(&account.account_url), authz_url, &nonce, Value::Null)
                .await?;
            if !resp.status().is_success() {
                return Err(classify_status(resp.status(), "authorization fetch"));
            }
            let body: Value = resp
                .json()
                .await
                .map_err(|e| AdapterError::internal(format!("malformed ACME authorization body: {e}")))?;
            let domain = body["identifier"]["value"]
                .as_str()
                .ok_or_else(|| AdapterError::internal("authorization missing identifier"))?
                .to_owned();
            let dns01 = body["challenges"]
                .as_array()
                .into_iter()
                .flatten()
                .find(|c| c["type"] == "dns-01")
                .ok_or_else(|| AdapterError::invalid_configuration("CA offered no dns-01 challenge"))?;
            let token = dns01["token"]
                .as_str()
                .ok_or_else(|| AdapterError::internal("challenge missing token"))?
                .to_owned();
            let key_authorization = format!("{token}.{thumbprint}");

            challenges.push(Challenge {
                domain,
                token: dns01["url"].as_str().unwrap_or_default().to_owned(),
                key_authorization,
                status: dns01["status"].as_str().unwrap_or("pending").to_owned(),
            });
            let _ = token;
        }

        Ok(challenges)
    }

    async fn answer_challenge(&self, account: &AcmeAccount, challenge_url: &str) -> AdapterResult<()> {
        let dir = self.directory().await?;
        let nonce = self.fresh_nonce(&dir.new_nonce).await?;
        let resp = self
            .post_jws(&account.key, Some(&account.account_url), challenge_url, &nonce, json!({}))
            .await?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(classify_status(resp.status(), "challenge response"))
        }
    }

    async fn poll_order(&self, account: &AcmeAccount, order: &AcmeOrder) -> AdapterResult<AcmeOrder> {
        let dir = self.directory().await?;
        let nonce = self.fresh_nonce(&dir.new_nonce).await?;
        let resp = self
            .post_jws(&account.key, Some(&account.account_url), &order.order_url, &nonce, Value::Null)
            .await?;
        if !resp.status().is_success() {
            return Err(classify_status(resp.status(), "order poll"));
        }
        let body: Value = resp
            .json()
            .await
            .map_err(|e| AdapterError::internal(format!("malformed ACME order body: {e}")))?;
        parse_order(order.order_url.clone(), body)
    }

    async fn finalize(&self, account: &AcmeAccount, order: &AcmeOrder, csr_pem: &str) -> AdapterResult<AcmeOrder> {
        let der = pem_to_der(csr_pem)?;
        let dir = self.directory().await?;
        let nonce = self.fresh_nonce(&dir.new_nonce).await?;
        let payload = json!({ "csr": URL_SAFE_NO_PAD.encode(der) });
        let resp = self
            .post_jws(&account.key, Some(&account.account_url), &order.finalize_url, &nonce, payload)
            .await?;
        if !resp.status().is_success() {
            return Err(classify_status(resp.status(), "order finalize"));
        }
        let body: Value = resp
            .json()
            .await
            .map_err(|e| AdapterError::internal(format!("malformed ACME order body: {e}")))?;
        parse_order(order.order_url.clone(), body)
    }

    async fn download_certificate(&self, account: &AcmeAccount, order: &AcmeOrder) -> AdapterResult<String> {
        let certificate_url = order
            .certificate_url
            .as_deref()
            .ok_or_else(|| AdapterError::internal("order has no certificate URL yet"))?;
        let dir = self.directory().await?;
        let nonce = self.fresh_nonce(&dir.new_nonce).await?;
        let resp = self
            .post_jws(&account.key, Some(&account.account_url), certificate_url, &nonce, Value::Null)
            .await?;
        if !resp.status().is_success() {
            return Err(classify_status(resp.status(), "certificate download"));
        }
        resp.text()
            .await
            .map_err(|e| AdapterError::internal(format!("malformed ACME certificate body: {e}")))
    }
}

fn parse_order(order_url: String, body: Value) -> AdapterResult<AcmeOrder> {
    let status = body["status"].as_str().unwrap_or("pending").to_owned();
    let finalize_url = body["finalize"]
        .as_str()
        .ok_or_else(|| AdapterError::internal("order missing finalize URL"))?
        .to_owned();
    let authorizations = body["authorizations"]
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(|v| v.as_str())
        .map(str::to_owned)
        .collect();
    let certificate_url = body["certificate"].as_str().map(str::to_owned);

    Ok(AcmeOrder {
        order_url,
        finalize_url,
        certificate_url,
        authorizations,
        status,
    })
}

fn pem_to_der(pem: &str) -> AdapterResult<Vec<u8>> {
    let body: String = pem
        .lines()
        .filter(|l| !l.starts_with("-----"))
        .collect::<Vec<_>>()
        .join("");
    base64::engine::general_purpose::STANDARD
        .decode(body)
        .map_err(|e| AdapterError::internal(format!("malformed CSR PEM: {e}")))
}

fn classify_status(status: reqwest::StatusCode, during: &str) -> AdapterError {
    if status.as_u16() == 429 {
        AdapterError::rate_limited(format!("ACME {during} was rate limited"))
    } else if status.is_server_error() {
        AdapterError::eventual_consistency(format!("ACME {during} returned {status}"))
    } else if status.as_u16() == 403 {
        AdapterError::permission_denied(format!("ACME {during} forbidden"))
    } else {
        AdapterError::invalid_configuration(format!("ACME {during} returned {status}"))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn generate_csr_produces_pem_for_each_domain() {
        let domains = vec!["foo.example".to_owned(), "bar.example".to_owned()];
        let (key_pem, csr_pem) = generate_csr(&domains).unwrap();
        assert!(key_pem.contains("PRIVATE KEY"));
        assert!(csr_pem.contains("CERTIFICATE REQUEST"));
    }
}
