//! Scans every ALB instance for duplicate certificates on its load balancer
//! listener and retires the ones the broker no longer considers current.
use std::{error::Error, sync::Arc};

use docopt::Docopt;
use serde::Deserialize;

use broker_adapters::{identity_store::IamCertificateStore, load_balancer::AlbLoadBalancer};
use broker_common::BlockingThreadpool;
use broker_core::reconcile::fix_duplicate_alb_certs;
use broker_db_postgres::PostgresDbPool;
use broker_settings::Settings;

const USAGE: &str = "
Usage: reconcile_alb_certs [options] <listener-arn>...

Options:
    -h, --help               Show this message.
    --config=CONFIGFILE      Broker configuration file path.
";

#[derive(Debug, Deserialize)]
struct Args {
    arg_listener_arn: Vec<String>,
    flag_config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::try_init()?;

    let args: Args = Docopt::new(USAGE)
        .and_then(|d| d.deserialize())
        .unwrap_or_else(|e| e.exit());

    let settings = Settings::with_env_and_config_file(args.flag_config.as_deref())?;

    let blocking_threadpool = Arc::new(BlockingThreadpool::default());
    let db_pool = PostgresDbPool::new(&settings, blocking_threadpool).map_err(|e| e.to_string())?;
    let mut db = db_pool.get().await.map_err(|e| e.to_string())?;

    let shared_config = aws_config::from_env().load().await;
    let load_balancer = AlbLoadBalancer::new(aws_sdk_elasticloadbalancingv2::Client::new(&shared_config));
    let identity_store = IamCertificateStore::new(aws_sdk_iam::Client::new(&shared_config));

    fix_duplicate_alb_certs(&mut db, &load_balancer, &identity_store, &args.arg_listener_arn)
        .await
        .map_err(|e| e.to_string())?;

    log::info!("Finished reconciling ALB certificates");
    Ok(())
}
