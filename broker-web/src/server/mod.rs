//! Main application server: wires the durable store, outbound cloud
//! adapters, and the pipeline runtime into one `actix-web` app.

use std::{sync::Arc, time::Duration};

use actix_cors::Cors;
use actix_web::{dev, web, App, HttpResponse, HttpServer};
use broker_adapters::{
    acme::HttpAcmeClient, cdn::CloudFrontCdn, dns_provider::Route53DnsProvider,
    dns_resolver::TrustDnsResolver, firewall::WafFirewall, identity_store::IamCertificateStore,
    load_balancer::AlbLoadBalancer,
};
use broker_common::{metrics_from_opts, BlockingThreadpool};
use broker_core::{config::AppConfig, runtime::ContextFactory, BrokerHandler, PipelineRunner};
use broker_db::DbPool;
use broker_db_postgres::PostgresDbPool;
use broker_settings::Settings;
use cadence::StatsdClient;

use crate::{error::ApiError, web::handlers};

/// Global HTTP state shared by every worker thread.
pub struct ServerState {
    pub db_pool: Box<dyn DbPool<Error = broker_db::error::DbError>>,
    pub handler: Arc<BrokerHandler>,
    pub metrics: Arc<StatsdClient>,
    pub broker_username: String,
    pub broker_password: String,
}

pub struct Server;

impl Server {
    pub async fn with_settings(settings: Settings) -> Result<dev::Server, ApiError> {
        let metrics = metrics_from_opts("broker", settings.statsd_host.as_deref(), settings.statsd_port)
            .map_err(|e| ApiError::internal(e.to_string()))?;

        let blocking_threadpool = Arc::new(BlockingThreadpool::default());
        let db_pool = PostgresDbPool::new(&settings, blocking_threadpool.clone())
            .map_err(ApiError::from)?;
        db_pool.run_migrations().await.map_err(ApiError::from)?;

        let shared_config = aws_config::from_env().load().await;
        let acme = Arc::new(HttpAcmeClient::new(settings.acme_directory_url.clone()));
        let cdn = Arc::new(CloudFrontCdn::new(aws_sdk_cloudfront::Client::new(&shared_config)));
        let dns_provider = Arc::new(Route53DnsProvider::new(
            aws_sdk_route53::Client::new(&shared_config),
            settings.cloudfront_hosted_zone_id.clone(),
        ));
        let dns_resolver = Arc::new(TrustDnsResolver::new().map_err(|e| ApiError::internal(e.to_string()))?);
        let firewall = Arc::new(WafFirewall::new(
            aws_sdk_wafv2::Client::new(&shared_config),
            aws_sdk_shield::Client::new(&shared_config),
        ));
        let identity_store = Arc::new(IamCertificateStore::new(aws_sdk_iam::Client::new(&shared_config)));
        let load_balancer = Arc::new(AlbLoadBalancer::new(aws_sdk_elasticloadbalancingv2::Client::new(
            &shared_config,
        )));

        let config = AppConfig::from_settings(&settings);
        let context_factory = make_context_factory(
            db_pool.box_clone(),
            dns_provider,
            acme,
            identity_store,
            load_balancer,
            cdn,
            firewall,
            config.clone(),
        );
        let runner = PipelineRunner::new(settings.pipeline_concurrency, settings.task_max_attempts, context_factory);

        let handler = Arc::new(BrokerHandler::new(config, dns_resolver, Arc::new(runner)));

        let host = settings.host.clone();
        let port = settings.port;
        let broker_username = settings.broker_username.clone();
        let broker_password = settings.broker_password.clone();

        let server = HttpServer::new(move || {
            let state = ServerState {
                db_pool: db_pool.box_clone(),
                handler: handler.clone(),
                metrics: metrics.clone(),
                broker_username: broker_username.clone(),
                broker_password: broker_password.clone(),
            };

            App::new()
                .app_data(web::Data::new(state))
                .wrap(broker_common::middleware::SentryWrapper::<ApiError>::new(metrics.clone()))
                .wrap(build_cors())
                .service(web::resource("/v2/catalog").route(web::get().to(handlers::catalog)))
                .service(
                    web::resource("/v2/service_instances/{instance_id}")
                        .route(web::put().to(handlers::provision))
                        .route(web::patch().to(handlers::update))
                        .route(web::delete().to(handlers::deprovision)),
                )
                .service(
                    web::resource("/v2/service_instances/{instance_id}/last_operation")
                        .route(web::get().to(handlers::last_operation)),
                )
                .service(web::resource("/__heartbeat__").route(web::get().to(handlers::heartbeat)))
                .service(
                    web::resource("/__lbheartbeat__")
                        .route(web::get().to(|| async { HttpResponse::Ok().finish() })),
                )
                .service(web::resource("/__version__").route(web::get().to(|| async {
                    HttpResponse::Ok()
                        .content_type("application/json")
                        .body(include_str!("../../version.json"))
                })))
                .service(web::resource("/__error__").route(web::get().to(handlers::test_error)))
        });

        let server = server
            .bind(format!("{host}:{port}"))
            .map_err(|e| ApiError::internal(e.to_string()))?
            .run();
        Ok(server)
    }
}

#[allow(clippy::too_many_arguments)]
fn make_context_factory(
    db_pool: Box<dyn DbPool<Error = broker_db::error::DbError>>,
    dns_provider: Arc<dyn broker_adapters::DnsProvider>,
    acme: Arc<dyn broker_adapters::AcmeClient>,
    identity_store: Arc<dyn broker_adapters::CertificateIdentityStore>,
    load_balancer: Arc<dyn broker_adapters::LoadBalancer>,
    cdn: Arc<dyn broker_adapters::Cdn>,
    firewall: Arc<dyn broker_adapters::Firewall>,
    config: AppConfig,
) -> ContextFactory {
    let db_pool: Arc<Box<dyn DbPool<Error = broker_db::error::DbError>>> = Arc::new(db_pool);
    Box::new(move || {
        let db_pool = db_pool.clone();
        let dns_provider = dns_provider.clone();
        let acme = acme.clone();
        let identity_store = identity_store.clone();
        let load_balancer = load_balancer.clone();
        let cdn = cdn.clone();
        let firewall = firewall.clone();
        let config = config.clone();
        Box::pin(async move {
            let db = loop {
                match db_pool.get().await {
                    Ok(db) => break db,
                    Err(e) => {
                        error!("pipeline step couldn't check out a connection, retrying"; "error" => e.to_string());
                        tokio::time::sleep(Duration::from_millis(250)).await;
                    }
                }
            };

            broker_core::tasks::TaskContext {
                db,
                dns_provider,
                acme,
                identity_store,
                load_balancer,
                cdn,
                firewall,
                config,
                correlation_id: uuid::Uuid::new_v4().to_string(),
            }
        })
    })
}

fn build_cors() -> Cors {
    Cors::default()
        .allow_any_origin()
        .allow_any_method()
        .allow_any_header()
}
