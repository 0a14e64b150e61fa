use anyhow::{Context, Result};
use once_cell::sync::OnceCell;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info};

use axum::{http::StatusCode, routing::get, Router};
use opentelemetry::metrics::{Counter, Gauge, Histogram, MeterProvider};
use opentelemetry::KeyValue;
use opentelemetry_sdk::metrics::{MetricError, SdkMeterProvider};
use prometheus::{Encoder, TextEncoder};

static METRICS: OnceCell<Metrics> = OnceCell::new();

pub struct Metrics {
    registry: Arc<prometheus::Registry>,
    _provider: SdkMeterProvider,

    // Block processing metrics
    pub blocks_committed: Counter<u64>,
    pub blocks_purged: Counter<u64>,
    pub blocks_failed: Counter<u64>,
    pub latest_processed_block: Gauge<u64>,
    pub latest_block_processing_time: Gauge<f64>,

    // Chain metrics
    pub chain_tip_block: Gauge<u64>,
    pub reorgs_detected: Counter<u64>,
    pub reorg_depth: Histogram<f64>,

    // RPC metrics
    pub rpc_requests: Counter<u64>,
    pub rpc_errors: Counter<u64>,
    pub rpc_timeouts: Counter<u64>,
    pub rpc_latency: Histogram<f64>,

    // Event queue metrics
    pub event_queue_capacity: Gauge<u64>,
}

impl Metrics {
    pub fn new() -> Result<Self, MetricError> {
        // Create a new prometheus registry
        let registry = prometheus::Registry::new();

        // Configure OpenTelemetry to use this registry
        let exporter = opentelemetry_prometheus::exporter()
            .with_registry(registry.clone())
            .build()?;

        let provider = SdkMeterProvider::builder().with_reader(exporter).build();
        let meter = provider.meter("indexer_metrics");

        let blocks_committed = meter
            .u64_counter("indexer_blocks_committed")
            .with_description("Blocks whose metrics were written to the store")
            .build();

        let blocks_purged = meter
            .u64_counter("indexer_blocks_purged")
            .with_description("Blocks whose metrics were deleted after a reorg")
            .build();

        let blocks_failed = meter
            .u64_counter("indexer_blocks_failed")
            .with_description("Block events that failed and were skipped")
            .build();

        let latest_processed_block = meter
            .u64_gauge("indexer_latest_processed_block_number")
            .with_description("Latest block number committed")
            .build();

        let latest_block_processing_time = meter
            .f64_gauge("indexer_latest_block_processing")
            .with_description("Time spent processing the latest block")
            .with_unit("s")
            .build();

        let chain_tip_block = meter
            .u64_gauge("indexer_chain_tip_block_number")
            .with_description("Latest block number reported by the node")
            .build();

        let reorgs_detected = meter
            .u64_counter("indexer_reorgs_detected")
            .with_description("Chain reorganizations replayed")
            .build();

        let reorg_depth = meter
            .f64_histogram("indexer_reorg_depth")
            .with_description("Number of blocks removed per reorganization")
            .with_boundaries(vec![1.0, 2.0, 3.0, 5.0, 10.0, 25.0, 50.0, 100.0])
            .build();

        let rpc_requests = meter
            .u64_counter("indexer_rpc_requests")
            .with_description("Number of logical RPC calls made")
            .build();

        let rpc_errors = meter
            .u64_counter("indexer_rpc_errors")
            .with_description("Number of RPC calls that resolved with an error")
            .build();

        let rpc_timeouts = meter
            .u64_counter("indexer_rpc_timeouts")
            .with_description("Number of RPC attempts that timed out and were retried")
            .build();

        let rpc_latency = meter
            .f64_histogram("indexer_rpc_latency")
            .with_description("RPC call latency, including retries")
            .with_boundaries(vec![
                0.025, 0.05, 0.075, 0.1, 0.15, 0.2, 0.3, 0.5, 1.0, 5.0, 10.0, 60.0,
            ])
            .with_unit("s")
            .build();

        let event_queue_capacity = meter
            .u64_gauge("indexer_event_queue_capacity")
            .with_description("Free slots in the block event queue")
            .build();

        Ok(Self {
            registry: Arc::new(registry),
            _provider: provider,
            blocks_committed,
            blocks_purged,
            blocks_failed,
            latest_processed_block,
            latest_block_processing_time,
            chain_tip_block,
            reorgs_detected,
            reorg_depth,
            rpc_requests,
            rpc_errors,
            rpc_timeouts,
            rpc_latency,
            event_queue_capacity,
        })
    }

    /// Install the process-wide instance. Later calls are ignored.
    pub fn init() -> Result<&'static Metrics> {
        METRICS
            .get_or_try_init(Metrics::new)
            .context("failed to initialize metrics")
    }

    /// `None` when metrics are disabled.
    pub fn global() -> Option<&'static Metrics> {
        METRICS.get()
    }

    pub fn record_rpc_call(&self, method: &str, seconds: f64, failed: bool) {
        let labels = [KeyValue::new("method", method.to_string())];
        self.rpc_requests.add(1, &labels);
        self.rpc_latency.record(seconds, &labels);
        if failed {
            self.rpc_errors.add(1, &labels);
        }
    }

    pub fn record_rpc_timeout(&self, method: &str) {
        self.rpc_timeouts
            .add(1, &[KeyValue::new("method", method.to_string())]);
    }

    pub fn record_reorg(&self, depth: usize) {
        self.reorgs_detected.add(1, &[]);
        self.reorg_depth.record(depth as f64, &[]);
    }

    pub async fn start_metrics_server(&self, addr: &str, port: u16) -> Result<()> {
        let addr = format!("{addr}:{port}")
            .parse::<SocketAddr>()
            .context("invalid metrics address")?;
        let registry = self.registry.clone();

        let app = Router::new().route("/metrics", get(move || metrics_handler(registry.clone())));

        // Determine the access URL based on the binding address. Only used for logging.
        let access_url = if addr.ip().is_unspecified() {
            format!("http://localhost:{port}/metrics")
        } else {
            format!("http://{}:{port}/metrics", addr.ip())
        };

        info!(
            "Starting metrics server - binding to {} (accessible at {})",
            addr, access_url
        );

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind metrics server to {}", addr))?;

        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                error!("Metrics server stopped: {}", e);
            }
        });

        Ok(())
    }
}

async fn metrics_handler(registry: Arc<prometheus::Registry>) -> Result<String, StatusCode> {
    let encoder = TextEncoder::new();
    let metric_families = registry.gather();
    let mut buffer = vec![];
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    String::from_utf8(buffer).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}
