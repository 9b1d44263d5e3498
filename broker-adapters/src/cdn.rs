use async_trait::async_trait;
use aws_sdk_cloudfront::{
    types::{
        CacheBehavior, CachedMethods, CookiePreference, CookiePreferenceForwardType,
        CustomErrorResponse, CustomErrorResponses, CustomOriginConfig, Distribution,
        DistributionConfig, ForwardedValues, Headers, Method, Methods, Origin,
        OriginProtocolPolicy as CfOriginProtocolPolicy, Origins, Restrictions, ViewerCertificate,
        ViewerProtocolPolicy,
    },
    Client,
};
use broker_db::model::{CdnInstance, ForwardCookiePolicy, OriginProtocolPolicy};

use crate::error::{AdapterError, AdapterResult};

/// CDN distribution lifecycle, grounded in the
/// create/update/delete + deployment-wait shape used for CloudFront
/// distributions elsewhere in the retrieved corpus.
#[async_trait]
pub trait Cdn: Send + Sync {
    async fn create_distribution(
        &self,
        instance: &CdnInstance,
        certificate_arn: &str,
    ) -> AdapterResult<String>;

    async fn update_distribution(
        &self,
        distribution_id: &str,
        instance: &CdnInstance,
        certificate_arn: &str,
    ) -> AdapterResult<()>;

    async fn delete_distribution(&self, distribution_id: &str) -> AdapterResult<()>;

    /// Polls until the distribution's status is `Deployed`. Callers invoke this
    /// from a pipeline step that re-raises a transient error while still
    /// `InProgress`, letting the runtime reschedule rather than block a worker.
    async fn await_deployed(&self, distribution_id: &str) -> AdapterResult<bool>;
}

pub struct CloudFrontCdn {
    client: Client,
}

impl CloudFrontCdn {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn distribution_config(instance: &CdnInstance, certificate_arn: &str, caller_reference: String) -> DistributionConfig {
        let origin_id = format!("origin-{}", instance.core.id);

        let origin_protocol_policy = match instance.origin_protocol_policy {
            OriginProtocolPolicy::HttpOnly => CfOriginProtocolPolicy::HttpOnly,
            OriginProtocolPolicy::HttpsOnly => CfOriginProtocolPolicy::HttpsOnly,
        };

        let custom_origin = CustomOriginConfig::builder()
            .http_port(80)
            .https_port(443)
            .origin_protocol_policy(origin_protocol_policy)
            .build()
            .expect("custom origin config is fully populated");

        let origin = Origin::builder()
            .id(&origin_id)
            .domain_name(&instance.cloudfront_origin_hostname)
            .origin_path(&instance.cloudfront_origin_path)
            .custom_origin_config(custom_origin)
            .build()
            .expect("origin is fully populated");

        let forward = match instance.forward_cookie_policy {
            ForwardCookiePolicy::None => CookiePreferenceForwardType::None,
            ForwardCookiePolicy::All => CookiePreferenceForwardType::All,
            ForwardCookiePolicy::Whitelist => CookiePreferenceForwardType::Whitelist,
        };

        let mut cookie_builder = CookiePreference::builder().forward(forward);
        if matches!(instance.forward_cookie_policy, ForwardCookiePolicy::Whitelist) {
            cookie_builder = cookie_builder.whitelisted_names(
                aws_sdk_cloudfront::types::CookieNames::builder()
                    .quantity(instance.forwarded_cookies.len() as i32)
                    .set_items(Some(instance.forwarded_cookies.clone()))
                    .build(),
            );
        }

        let headers = Headers::builder()
            .quantity(instance.forwarded_headers.len() as i32)
            .set_items(Some(instance.forwarded_headers.clone()))
            .build();

        let forwarded_values = ForwardedValues::builder()
            .query_string(true)
            .cookies(cookie_builder.build().expect("cookie preference is fully populated"))
            .headers(headers)
            .build()
            .expect("forwarded values is fully populated");

        let methods = Methods::builder()
            .quantity(2)
            .items(Method::Get)
            .items(Method::Head)
            .build()
            .expect("methods is fully populated");
        let cached_methods = CachedMethods::builder()
            .quantity(2)
            .items(Method::Get)
            .items(Method::Head)
            .build()
            .expect("cached methods is fully populated");

        let default_cache_behavior = CacheBehavior::builder()
            .target_origin_id(&origin_id)
            .viewer_protocol_policy(ViewerProtocolPolicy::RedirectToHttps)
            .forwarded_values(forwarded_values)
            .allowed_methods(
                aws_sdk_cloudfront::types::AllowedMethods::builder()
                    .quantity(2)
                    .items(Method::Get)
                    .items(Method::Head)
                    .cached_methods(cached_methods)
                    .build()
                    .expect("allowed methods is fully populated"),
            )
            .min_ttl(0)
            .set_compress(Some(true))
            .set_smooth_streaming(Some(false))
            .trusted_signers(
                aws_sdk_cloudfront::types::TrustedSigners::builder()
                    .enabled(false)
                    .quantity(0)
                    .build()
                    .expect("trusted signers is fully populated"),
            )
            .build()
            .expect("default cache behavior is fully populated");
        let _ = methods;

        let custom_errors: Vec<CustomErrorResponse> = instance
            .error_responses
            .iter()
            .filter_map(|(code, path)| {
                code.parse::<i32>().ok().map(|code| {
                    CustomErrorResponse::builder()
                        .error_code(code)
                        .response_page_path(path)
                        .response_code(code.to_string())
                        .error_caching_min_ttl(300)
                        .build()
                })
            })
            .collect();

        let viewer_certificate = ViewerCertificate::builder()
            .acm_certificate_arn(certificate_arn)
            .ssl_support_method(aws_sdk_cloudfront::types::SslSupportMethod::SniOnly)
            .minimum_protocol_version(aws_sdk_cloudfront::types::MinimumProtocolVersion::Tlsv122021)
            .build();

        DistributionConfig::builder()
            .caller_reference(caller_reference)
            .set_aliases(Some(
                aws_sdk_cloudfront::types::Aliases::builder()
                    .quantity(instance.core.domain_names.len() as i32)
                    .set_items(Some(instance.core.domain_names.clone()))
                    .build(),
            ))
            .default_root_object("")
            .origins(Origins::builder().quantity(1).items(origin).build().expect("origins is fully populated"))
            .default_cache_behavior(default_cache_behavior)
            .custom_error_responses(
                CustomErrorResponses::builder()
                    .quantity(custom_errors.len() as i32)
                    .set_items(Some(custom_errors))
                    .build(),
            )
            .comment(format!("broker instance {}", instance.core.id))
            .enabled(true)
            .viewer_certificate(viewer_certificate)
            .restrictions(
                Restrictions::builder()
                    .geo_restriction(
                        aws_sdk_cloudfront::types::GeoRestriction::builder()
                            .restriction_type(aws_sdk_cloudfront::types::GeoRestrictionType::None)
                            .quantity(0)
                            .build()
                            .expect("geo restriction is fully populated"),
                    )
                    .build()
                    .expect("restrictions is fully populated"),
            )
            .build()
            .expect("distribution config is fully populated")
    }
}

#[async_trait]
impl Cdn for CloudFrontCdn {
    async fn create_distribution(&self, instance: &CdnInstance, certificate_arn: &str) -> AdapterResult<String> {
        let config = Self::distribution_config(instance, certificate_arn, uuid::Uuid::new_v4().to_string());
        let resp = self
            .client
            .create_distribution()
            .distribution_config(config)
            .send()
            .await
            .map_err(|e| classify(e.into_service_error().to_string()))?;
        resp.distribution()
            .and_then(|d| d.id())
            .map(|id| id.to_owned())
            .ok_or_else(|| AdapterError::internal("create_distribution returned no id"))
    }

    async fn update_distribution(
        &self,
        distribution_id: &str,
        instance: &CdnInstance,
        certificate_arn: &str,
    ) -> AdapterResult<()> {
        let current = self
            .client
            .get_distribution_config()
            .id(distribution_id)
            .send()
            .await
            .map_err(|e| classify(e.into_service_error().to_string()))?;
        let etag = current
            .e_tag()
            .ok_or_else(|| AdapterError::internal("get_distribution_config returned no ETag"))?
            .to_owned();
        let caller_reference = current
            .distribution_config()
            .and_then(|c| c.caller_reference())
            .map(str::to_owned)
            .unwrap_or_else(|| distribution_id.to_owned());

        let config = Self::distribution_config(instance, certificate_arn, caller_reference);
        self.client
            .update_distribution()
            .id(distribution_id)
            .if_match(etag)
            .distribution_config(config)
            .send()
            .await
            .map(|_| ())
            .map_err(|e| classify(e.into_service_error().to_string()))
    }

    async fn delete_distribution(&self, distribution_id: &str) -> AdapterResult<()> {
        let current = match self.client.get_distribution_config().id(distribution_id).send().await {
            Ok(resp) => resp,
            Err(e) => {
                let msg = e.into_service_error().to_string();
                return if msg.contains("NoSuchDistribution") {
                    Ok(())
                } else {
                    Err(classify(msg))
                };
            }
        };
        let etag = current
            .e_tag()
            .ok_or_else(|| AdapterError::internal("get_distribution_config returned no ETag"))?
            .to_owned();

        if current.distribution_config().map(|c| c.enabled()).unwrap_or(false) {
            let existing = current
                .distribution_config()
                .cloned()
                .ok_or_else(|| AdapterError::internal("missing distribution config"))?;
            let disabled = DistributionConfig::builder()
                .caller_reference(existing.caller_reference().unwrap_or_default())
                .set_aliases(existing.aliases().cloned())
                .default_root_object(existing.default_root_object().unwrap_or_default())
                .origins(existing.origins().cloned().ok_or_else(|| AdapterError::internal("missing origins"))?)
                .default_cache_behavior(
                    existing
                        .default_cache_behavior()
                        .cloned()
                        .ok_or_else(|| AdapterError::internal("missing default cache behavior"))?,
                )
                .set_custom_error_responses(existing.custom_error_responses().cloned())
                .comment(existing.comment().unwrap_or_default())
                .enabled(false)
                .set_viewer_certificate(existing.viewer_certificate().cloned())
                .set_restrictions(existing.restrictions().cloned())
                .build()
                .map_err(|e| AdapterError::internal(format!("could not build disabled distribution config: {e}")))?;
            self.client
                .update_distribution()
                .id(distribution_id)
                .if_match(&etag)
                .distribution_config(disabled)
                .send()
                .await
                .map_err(|e| classify(e.into_service_error().to_string()))?;
            return Err(AdapterError::eventual_consistency(
                "distribution disabled, awaiting deployment before delete",
            ));
        }

        match self
            .client
            .delete_distribution()
            .id(distribution_id)
            .if_match(etag)
            .send()
            .await
        {
            Ok(_) => Ok(()),
            Err(e) => {
                let msg = e.into_service_error().to_string();
                if msg.contains("NoSuchDistribution") {
                    Ok(())
                } else if msg.contains("DistributionNotDisabled") || msg.contains("PreconditionFailed") {
                    Err(AdapterError::eventual_consistency(msg))
                } else {
                    Err(classify(msg))
                }
            }
        }
    }

    async fn await_deployed(&self, distribution_id: &str) -> AdapterResult<bool> {
        let resp = self
            .client
            .get_distribution()
            .id(distribution_id)
            .send()
            .await
            .map_err(|e| classify(e.into_service_error().to_string()))?;
        let status = resp
            .distribution()
            .and_then(|d: &Distribution| d.status())
            .unwrap_or_default();
        Ok(status == "Deployed")
    }
}

fn classify(msg: String) -> AdapterError {
    if msg.contains("Throttling") {
        AdapterError::rate_limited(msg)
    } else if msg.contains("PreconditionFailed") || msg.contains("DistributionNotDisabled") {
        AdapterError::eventual_consistency(msg)
    } else if msg.contains("AccessDenied") {
        AdapterError::permission_denied(msg)
    } else {
        AdapterError::internal(msg)
    }
}
