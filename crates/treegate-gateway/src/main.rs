//! treegate-gateway — the write-coordination gateway daemon.
//!
//! Serves the publisher API (lease arbitration, authenticated payload
//! submission) on one listener and Prometheus metrics on a second,
//! loopback-only listener. The lease store backend is a configuration
//! toggle: a local `SQLite` file for a single gateway node, or a
//! `hiqlite` Raft cluster shared by several.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use axum::routing::get;
use clap::Parser;
use tokio::signal::unix::{SignalKind, signal};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use treegate_core::clock::SystemClock;
use treegate_gateway::access::AccessConfig;
use treegate_gateway::config::{GatewayConfig, StoreBackend};
use treegate_gateway::http::{self, GatewayState};
use treegate_gateway::ingest::{PayloadIngest, SpoolSink};
use treegate_gateway::manager::LeaseManager;
use treegate_gateway::metrics::{GatewayMetrics, SharedMetrics};
use treegate_gateway::store::{HiqliteLeaseStore, LeaseStore, SqliteLeaseStore};

/// treegate gateway - lease arbitration for a content-addressed filesystem
#[derive(Parser, Debug)]
#[command(name = "treegate-gateway")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the gateway configuration file
    #[arg(short, long, default_value = "treegate.toml")]
    config: PathBuf,

    /// Override the configured listen address
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Log to file instead of stdout
    #[arg(long)]
    log_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging before anything can fail.
    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    if let Some(log_file) = &args.log_file {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_file)
            .context("failed to open log file")?;
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(file)
                    .with_ansi(false),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    let mut config = if args.config.exists() {
        GatewayConfig::from_file(&args.config).context("failed to load configuration")?
    } else {
        info!(path = ?args.config, "no config file found, using defaults");
        GatewayConfig::default()
    };
    if let Some(listen) = args.listen {
        config.listen_addr = listen;
    }

    let access = Arc::new(
        AccessConfig::load(&config.access_config)
            .context("loading repository access configuration failed")?,
    );

    // The store backend is a configuration toggle behind one contract.
    let (store, replicated): (Arc<dyn LeaseStore>, Option<HiqliteLeaseStore>) =
        match config.store.backend {
            StoreBackend::Embedded => {
                info!(db_path = ?config.store.db_path, "using embedded lease store");
                let store = SqliteLeaseStore::open(&config.store.db_path)
                    .context("could not open embedded lease store")?;
                (Arc::new(store), None)
            }
            StoreBackend::Replicated => {
                info!("using replicated lease store");
                let store = HiqliteLeaseStore::start_from_env()
                    .await
                    .context("could not start replicated lease store")?;
                (Arc::new(store.clone()), Some(store))
            }
        };

    let manager = Arc::new(LeaseManager::new(
        store,
        Arc::new(SystemClock),
        config.max_lease_time(),
    ));
    let sink = SpoolSink::create(config.spool_dir.clone())
        .map_err(|err| anyhow::anyhow!("{err}"))
        .context("could not prepare payload spool")?;
    let ingest = PayloadIngest::new(manager.clone(), Arc::new(sink));

    let metrics = GatewayMetrics::new().context("failed to initialize metrics registry")?;
    let live = manager
        .list()
        .await
        .map(|leases| leases.len())
        .unwrap_or_default();
    metrics.set_leases_active(i64::try_from(live).unwrap_or(i64::MAX));

    let state = Arc::new(GatewayState {
        manager,
        ingest,
        access,
        metrics: metrics.clone(),
    });
    let app = http::router(state);

    // Metrics get their own loopback listener so the publisher-facing
    // port never exposes them.
    let metrics_task = if config.metrics_port == 0 {
        info!("metrics endpoint disabled");
        None
    } else {
        let addr: SocketAddr = ([127, 0, 0, 1], config.metrics_port).into();
        info!(addr = %addr, "starting metrics server");
        Some(tokio::spawn(run_metrics_server(metrics, addr)))
    };

    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .context("failed to bind API listener")?;
    info!(
        addr = %config.listen_addr,
        max_lease_time_ms = config.max_lease_time_ms,
        "treegate gateway started"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("API server error")?;

    info!("shutting down gateway");
    if let Some(task) = metrics_task {
        task.abort();
    }
    if let Some(store) = replicated {
        // Skipping this forces a Raft log replay on the next start.
        store.shutdown().await;
    }
    info!("gateway shutdown complete");
    Ok(())
}

/// Resolves when SIGTERM or SIGINT arrives.
async fn shutdown_signal() {
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to register SIGTERM");
    let mut sigint = signal(SignalKind::interrupt()).expect("failed to register SIGINT");
    tokio::select! {
        _ = sigterm.recv() => info!("received SIGTERM"),
        _ = sigint.recv() => info!("received SIGINT"),
    }
}

/// Serves `/metrics` in the Prometheus text format.
async fn run_metrics_server(metrics: SharedMetrics, addr: SocketAddr) {
    use axum::http::StatusCode;
    use axum::response::IntoResponse;

    let handler = move || {
        let metrics = metrics.clone();
        async move {
            match metrics.encode_text() {
                Ok(body) => (
                    StatusCode::OK,
                    [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                    body,
                )
                    .into_response(),
                Err(err) => {
                    error!(error = %err, "failed to encode metrics");
                    (StatusCode::INTERNAL_SERVER_ERROR, "metrics unavailable").into_response()
                }
            }
        }
    };
    let app = Router::new().route("/metrics", get(handler));

    match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => {
            if let Err(err) = axum::serve(listener, app).await {
                error!(error = %err, "metrics server error");
            }
        }
        Err(err) => warn!(error = %err, "failed to bind metrics listener"),
    }
}
