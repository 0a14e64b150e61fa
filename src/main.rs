use anyhow::{anyhow, Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{self, EnvFilter};
use url::Url;

use block_metrics_indexer::indexer::client::{HttpTransport, RetrySettings, RetryingClient};
use block_metrics_indexer::indexer::run_pipeline;
use block_metrics_indexer::metrics::Metrics;
use block_metrics_indexer::storage::InfluxStore;
use block_metrics_indexer::utils::load_config;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    info!("=========================== INITIALIZING ===========================");

    // Load config
    let config_path = std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config.yml".to_string());
    let config = match load_config(&config_path) {
        Ok(config) => {
            info!("Config loaded successfully");
            config
        }
        Err(e) => {
            error!("Failed to load config: {:#}", e);
            return Err(anyhow!(e));
        }
    };

    // Initialize optional metrics
    if config.metrics.enabled {
        let metrics = Metrics::init()?;
        metrics
            .start_metrics_server(&config.metrics.address, config.metrics.port)
            .await?;
    } else {
        info!("Metrics are disabled");
    }

    // Cancel everything on Ctrl+C or SIGTERM
    let cancel = CancellationToken::new();
    tokio::spawn(shutdown_on_signal(cancel.clone()));

    let rpc_url: Url = config
        .ethereum_uri
        .parse()
        .with_context(|| format!("invalid ETHEREUM_URI {}", config.ethereum_uri))?;
    info!("RPC URL: {}", rpc_url);

    let client = Arc::new(RetryingClient::new(
        Arc::new(HttpTransport::new(rpc_url)),
        RetrySettings {
            timeout: Duration::from_millis(config.rpc_timeout_ms),
            ..RetrySettings::default()
        },
        cancel.clone(),
    ));

    let store = InfluxStore::new(&config)?;
    info!(
        "Influx: {} database '{}'",
        config.influx_url(),
        config.influx_database_name
    );
    store.ensure_database().await?;

    info!("========================= STARTING INDEXER =========================");

    if let Err(e) = run_pipeline(&config, client, Arc::new(store), cancel).await {
        error!("Indexer stopped: {:#}", e);
        return Err(e);
    }

    info!("Indexer shut down cleanly");
    Ok(())
}

async fn shutdown_on_signal(cancel: CancellationToken) {
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        result = signal::ctrl_c() => {
            if let Err(e) = result {
                error!("Failed to listen for Ctrl+C: {}", e);
                return;
            }
            info!("Received Ctrl+C signal, initiating shutdown...");
        }
        _ = terminate => info!("Received SIGTERM, initiating shutdown..."),
    }

    cancel.cancel();
}
