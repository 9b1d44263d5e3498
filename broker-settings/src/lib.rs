#[macro_use]
extern crate slog_scope;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use url::Url;

static PREFIX: &str = "broker";

/// Process-wide configuration for the custom domain broker.
///
/// Mirrors the read-mostly values threaded through task payloads at
/// provision/update time: the CloudFront defaults, the WAFv2 rate-limit
/// rule, and the CloudWatch log group backing WAF logging subscriptions.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub port: u16,
    pub host: String,
    pub actix_keep_alive: Option<u32>,

    /// HTTP basic-auth credentials the platform presents on every OSB call.
    pub broker_username: String,
    pub broker_password: String,

    pub database_url: String,
    pub database_pool_max_size: u32,

    pub human_logs: bool,

    pub statsd_host: Option<String>,
    pub statsd_port: u16,

    /// Default origin domain used for CDN instances that don't specify one.
    pub default_cloudfront_origin: String,
    /// Hosted zone id CloudFront aliases resolve to, used when emitting the
    /// Route53 alias target for a distribution.
    pub cloudfront_hosted_zone_id: String,

    /// ARN of the rate-limiting rule group attached to dedicated WAFv2 WebACLs.
    pub rate_limit_rule_arn: String,
    /// ARN of the CloudWatch log group WAF logging configurations ship to.
    pub waf_log_group_arn: String,

    /// ACME directory URL the CA client is built against.
    pub acme_directory_url: String,
    /// Contact email presented during ACME account registration.
    pub acme_contact_email: String,

    /// Number of instances the operation engine runs concurrently. Each
    /// instance's own queue stays FIFO; this bounds total parallelism.
    pub pipeline_concurrency: usize,
    /// Number of attempts a task step gets before the operation is failed.
    pub task_max_attempts: u32,

    /// CNAME target tenants are instructed to point their domains at, and
    /// the value the CNAME validator checks resolution against.
    pub cname_validation_target: String,
}

impl Settings {
    /// Load the settings from the config file if supplied, then the environment.
    pub fn with_env_and_config_file(filename: Option<&str>) -> Result<Self, ConfigError> {
        let mut s = Config::default();

        if let Some(config_filename) = filename {
            s.merge(File::with_name(config_filename))?;
        }

        // Accepts env vars specified as `BROKER_FOO__BAR_VALUE="gorp"` as
        // `foo.bar_value = "gorp"`. Uppercase by convention, though the
        // prefix match itself is case insensitive.
        s.merge(Environment::with_prefix(&PREFIX.to_uppercase()).separator("__"))?;

        match s.try_into::<Self>() {
            Ok(s) => Ok(s),
            // Configuration errors are not very sysop friendly, try to make them
            // a bit more 3AM useful.
            Err(ConfigError::Message(v)) => {
                println!("Bad configuration: {:?}", &v);
                println!("Please set in config file or use environment variable.");
                println!(
                    "For example to set `database_url` use env var `{}_DATABASE_URL`\n",
                    PREFIX.to_uppercase()
                );
                error!("Configuration error: Value undefined {:?}", &v);
                Err(ConfigError::NotFound(v))
            }
            Err(e) => {
                error!("Configuration error: Other: {:?}", &e);
                Err(e)
            }
        }
    }

    #[cfg(debug_assertions)]
    pub fn test_settings() -> Self {
        let mut settings =
            Self::with_env_and_config_file(None).expect("Could not get Settings in test_settings");
        settings.port = 8000;
        settings.database_pool_max_size = 1;
        settings
    }

    pub fn banner(&self) -> String {
        let db = Url::parse(&self.database_url)
            .map(|url| url.scheme().to_owned())
            .unwrap_or_else(|_| "<invalid db>".to_owned());
        format!(
            "http://{}:{} ({}) acme={}",
            self.host, self.port, db, self.acme_directory_url
        )
    }
}

impl Default for Settings {
    fn default() -> Settings {
        Settings {
            port: 8000,
            host: "127.0.0.1".to_string(),
            actix_keep_alive: None,
            broker_username: "broker".to_string(),
            broker_password: "".to_string(),
            database_url: "postgres://postgres@localhost/broker".to_string(),
            database_pool_max_size: 10,
            human_logs: false,
            statsd_host: Some("localhost".to_owned()),
            statsd_port: 8125,
            default_cloudfront_origin: "origin.example.com".to_string(),
            cloudfront_hosted_zone_id: "Z2FDTNDATAQYW2".to_string(),
            rate_limit_rule_arn: "".to_string(),
            waf_log_group_arn: "".to_string(),
            acme_directory_url: "https://acme-v02.api.letsencrypt.org/directory".to_string(),
            acme_contact_email: "".to_string(),
            pipeline_concurrency: 8,
            task_max_attempts: 10,
            cname_validation_target: "domains.example.gov".to_string(),
        }
    }
}

#[cfg(test)]
mod test {
    use std::env;

    use super::*;

    #[test]
    fn test_environment_variable_prefix() {
        env::set_var("BROKER_PORT", "9000");
        let settings = Settings::with_env_and_config_file(None).unwrap();
        assert_eq!(settings.port, 9000);
        env::remove_var("BROKER_PORT");

        env::set_var("BROKER__PORT", "9001");
        let settings = Settings::with_env_and_config_file(None).unwrap();
        assert_ne!(settings.port, 9001);
        env::remove_var("BROKER__PORT");
    }

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.port, 8000);
        assert_eq!(settings.pipeline_concurrency, 8);
    }
}
