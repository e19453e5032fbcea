use anyhow::{Context, Result};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use tx_firewall::address_book::AddressBookStore;
use tx_firewall::admin::{self, UiConfig};
use tx_firewall::builder::TransactionBuilder;
use tx_firewall::config::{FirewallConfig, MetricsBackend};
use tx_firewall::metrics::{InMemoryMetricsStore, MetricsCollector, MetricsStore, RedisMetricsStore};
use tx_firewall::proxy::ValidatingProxy;
use tx_firewall::upstream::Upstream;
use tx_firewall::validator::create_validator;

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for Ctrl+C");
    }
}

/// Resolves once the shutdown broadcast fires
async fn wait_for_shutdown(mut rx: watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}

type ServerTask = JoinHandle<std::io::Result<()>>;

/// What ended the serving phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stop {
    Signal,
    Proxy,
    Admin,
}

fn log_server_exit(name: &str, result: Result<std::io::Result<()>, tokio::task::JoinError>) {
    match result {
        Ok(Ok(())) => warn!(server = name, "Server stopped"),
        Ok(Err(e)) => error!(server = name, error = %e, "Server failed"),
        Err(e) => error!(server = name, error = %e, "Server task panicked"),
    }
}

/// Wait until the signal fires or either server exits
async fn first_stop<S>(signal: S, proxy_task: &mut ServerTask, admin_task: &mut ServerTask) -> Stop
where
    S: Future<Output = ()>,
{
    tokio::select! {
        _ = signal => {
            info!("Shutdown signal received");
            Stop::Signal
        }
        result = proxy_task => {
            log_server_exit("proxy", result);
            Stop::Proxy
        }
        result = admin_task => {
            log_server_exit("admin", result);
            Stop::Admin
        }
    }
}

/// Await a server task that was not the one to stop first
async fn drain(name: &str, task: ServerTask) {
    match task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(server = name, error = %e, "Server failed during shutdown"),
        Err(e) => error!(server = name, error = %e, "Server task panicked during shutdown"),
    }
}

async fn build_collector(config: &FirewallConfig) -> Result<Option<Arc<MetricsCollector>>> {
    let store: Arc<dyn MetricsStore> = match config.metrics {
        MetricsBackend::None => return Ok(None),
        MetricsBackend::Stdout => Arc::new(InMemoryMetricsStore::new()),
        MetricsBackend::Redis => Arc::new(
            RedisMetricsStore::connect(&config.redis_url)
                .await
                .with_context(|| format!("Failed to connect to Redis at {}", config.redis_url))?,
        ),
    };

    let collector = Arc::new(MetricsCollector::new(store, config.collector()));
    collector.init().await.context("Failed to start metrics collector")?;
    Ok(Some(collector))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = FirewallConfig::from_env()?;
    info!(
        mode = %config.mode,
        upstream = %config.rpc_endpoint,
        proxy_port = config.proxy_port,
        server_port = config.server_port,
        "Starting transaction firewall"
    );

    let book = AddressBookStore::load(config.address_book_paths())
        .context("Failed to load address book")?;
    let builder = TransactionBuilder::new(Arc::new(book));

    let validator = create_validator(config.mode, config.interactive(), config.rules_paths());
    validator.init().await.context("Failed to initialize validator")?;

    let collector = build_collector(&config).await?;
    let upstream = Upstream::new(config.upstream()).context("Invalid FIREWALL_RPC_ENDPOINT")?;

    let mut proxy = ValidatingProxy::new(builder, Arc::clone(&validator), upstream)
        .with_high_fee_factor(config.high_fee_factor);
    if let Some(collector) = &collector {
        proxy = proxy.with_metrics(Arc::clone(collector));
    }
    let proxy = Arc::new(proxy);

    let router = admin::build_router(
        Arc::clone(&proxy),
        UiConfig {
            mode: config.mode,
            wss_url: config.reviewer_url(),
            timeout_secs: config.interactive_timeout_secs,
        },
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut admin_task = tokio::spawn(admin::serve(
        router,
        config.server_port,
        wait_for_shutdown(shutdown_rx.clone()),
    ));
    let mut proxy_task = tokio::spawn(
        Arc::clone(&proxy).listen(config.proxy_port, wait_for_shutdown(shutdown_rx)),
    );

    let stop = first_stop(shutdown_signal(), &mut proxy_task, &mut admin_task).await;

    let _ = shutdown_tx.send(true);
    if stop != Stop::Proxy {
        drain("proxy", proxy_task).await;
    }
    if stop != Stop::Admin {
        drain("admin", admin_task).await;
    }

    if let Err(e) = validator.close().await {
        warn!(error = %e, "Failed to close validator");
    }
    if let Some(collector) = collector {
        if let Err(e) = collector.close().await {
            warn!(error = %e, "Failed to flush metrics on shutdown");
        }
    }

    info!("Transaction firewall stopped");
    Ok(())
}
