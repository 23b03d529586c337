use std::sync::Arc;

use structopt::StructOpt;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use azure_provider::config::{CliArgs, ProviderConfig};
use azure_provider::context::Context;
use azure_provider::estimator::{Estimator, FixedWindowEstimator, WorkerInfo};
use azure_provider::notify::{NotifyHook, TracingNotifyHook};
use azure_provider::registration::CaStore;
use azure_provider::{provisioner, scanner};
use common_lib::store::{MemStore, Store};
use common_lib::types::WorkerPool;
use shutdown::Shutdown;

fn init_tracing(jaeger: Option<&str>) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer());

    match jaeger {
        Some(endpoint) => {
            let tracer = opentelemetry_jaeger::new_pipeline()
                .with_service_name("azure-provider")
                .with_agent_endpoint(endpoint)
                .install_simple()
                .expect("failed to install jaeger pipeline");
            registry.with(tracing_opentelemetry::layer().with_tracer(tracer)).init();
        }
        None => registry.init(),
    }
}

/// The provisioning loop: every `provision_period`, estimate and top up
/// each pool's capacity against the most recent scan pass's observed
/// capacity (SPEC_FULL.md §4.9, §5.1).
async fn provisioning_loop<S: Store>(
    store: Arc<S>,
    estimator: Arc<dyn Estimator>,
    accumulator: Arc<scanner::ScanAccumulator>,
    period: std::time::Duration,
    shutdown: Shutdown,
) {
    let mut ticker = tokio::time::interval(period);
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.wait_for_trigger() => break,
        }
        let Some(_guard) = shutdown.guard() else { break };

        let pools: Vec<WorkerPool> = match store.list_prefix("worker-pool/").await {
            Ok(pools) => pools,
            Err(e) => {
                warn!(error = %e, "failed to list worker pools for provisioning");
                continue;
            }
        };
        for pool in pools {
            let info = WorkerInfo {
                existing_capacity: accumulator.seen_for(&pool.worker_pool_id),
                requested_capacity: pool.config.min_capacity,
            };
            if let Err(e) = provisioner::provision(&*store, &*estimator, &pool, info).await {
                warn!(worker_pool_id = %pool.worker_pool_id, error = %e, "provision failed");
            }
        }
    }
}

/// The scanning loop: every `reconcile_period`, run one full `checkWorker`
/// pass over every worker of every pool (SPEC_FULL.md §4.7, §5.1).
async fn scanning_loop<S: Store>(
    client: Arc<azure_provider::client::ArmClient>,
    store: Arc<S>,
    notify: Arc<dyn NotifyHook>,
    accumulator: Arc<scanner::ScanAccumulator>,
    root_url: String,
    concurrency: usize,
    period: std::time::Duration,
    shutdown: Shutdown,
) {
    let mut ticker = tokio::time::interval(period);
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.wait_for_trigger() => break,
        }
        let Some(_guard) = shutdown.guard() else { break };

        scanner::scan_all(client.clone(), store.clone(), &accumulator, &root_url, Some(concurrency)).await;
        scanner::scan_cleanup(&*store, &*notify, &accumulator).await;
    }
}

#[tokio::main]
async fn main() {
    let cli_args = CliArgs::from_args();
    init_tracing(cli_args.jaeger.as_deref());
    info!(?cli_args, "starting azure-provider");

    let config = match ProviderConfig::from_file(&cli_args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("failed to load provider config: {e}");
            std::process::exit(1);
        }
    };

    let ca_store = match CaStore::load(&config.ca_directory) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            eprintln!("failed to load pinned CA certificates: {e}");
            std::process::exit(1);
        }
    };

    let store = Arc::new(MemStore::new());
    let estimator: Arc<dyn Estimator> = Arc::new(FixedWindowEstimator);
    let notify: Arc<dyn NotifyHook> = Arc::new(TracingNotifyHook);

    let context = match Context::new(store.clone(), config.clone(), estimator.clone(), notify.clone(), ca_store) {
        Ok(context) => context,
        Err(e) => {
            eprintln!("failed to construct context: {e}");
            std::process::exit(1);
        }
    };

    let shutdown = shutdown::global();
    let accumulator = Arc::new(scanner::scan_prepare());

    let scan_handle = tokio::spawn(scanning_loop(
        context.client.clone(),
        context.store.clone(),
        context.notify.clone(),
        accumulator.clone(),
        config.root_url.clone(),
        cli_args.scan_concurrency,
        cli_args.reconcile_period.into(),
        shutdown.clone(),
    ));

    let provision_handle = tokio::spawn(provisioning_loop(
        context.store.clone(),
        context.estimator.clone(),
        accumulator,
        cli_args.provision_period.into(),
        shutdown.clone(),
    ));

    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("received SIGINT"),
        _ = sigterm.recv() => info!("received SIGTERM"),
    }

    info!("shutting down, draining in-flight scan/provision passes");
    shutdown.trigger();
    shutdown.wait_drained().await;
    let _ = provision_handle.await;
    let _ = scan_handle.await;

    opentelemetry::global::shutdown_tracer_provider();
}
