//! Key Visual Service Binary
//!
//! Polls region statistics, keeps the layered history and serves heatmaps.

use keyvisual::api::{self, ApiServerConfig};
use keyvisual::config::{ComponentFactory, ComponentSettings, StoreBackend};
use keyvisual::service::{KeyVisualConfig, Policy, Service, ServiceConfig};
use keyvisual::telemetry::Telemetry;
use keyvisual::Error;

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Key Visual Service
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// HTTP API port
    #[arg(long, env = "KEYVISUAL_HTTP_PORT", default_value = "8080")]
    http_port: u16,

    /// Axis store backend (memory, file); overrides KEYVISUAL_STORE
    #[arg(long)]
    store: Option<String>,

    /// Directory of the file store; implies --store file
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// PD endpoint; overrides PD_ADDR
    #[arg(long)]
    pd_addr: Option<String>,

    /// TiDB status endpoint; overrides TIDB_STATUS_ADDR
    #[arg(long)]
    tidb_status_addr: Option<String>,

    /// Initial label policy (db, kv)
    #[arg(long, env = "KEYVISUAL_POLICY", default_value = "db")]
    policy: String,

    /// Key separator of the kv policy
    #[arg(long, env = "KEYVISUAL_KV_SEPARATOR", default_value = "/")]
    kv_separator: String,

    /// Start with automatic collection disabled
    #[arg(long, env = "KEYVISUAL_DISABLED")]
    disable_auto_collection: bool,

    /// Seconds between region statistic polls
    #[arg(long, default_value = "60")]
    poll_interval_secs: u64,

    /// Upper bound on rendered heatmap rows
    #[arg(long, default_value = "1536")]
    max_display_rows: usize,

    /// Bucket cap of merged snapshots; unset keeps full resolution
    #[arg(long, env = "KEYVISUAL_MAX_STORAGE_BUCKETS")]
    max_storage_buckets: Option<usize>,

    /// Disable CORS headers
    #[arg(long)]
    disable_cors: bool,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let _telemetry = Telemetry::init_for_component("keyvisual", &args.log_level)?;

    info!("Starting Key Visual service");

    let settings = resolve_settings(&args)?;
    let components = Arc::new(ComponentFactory::new(settings).await?);

    let policy = args.policy.parse::<Policy>()?;
    let initial = KeyVisualConfig {
        auto_collection_disabled: args.disable_auto_collection,
        policy,
        policy_kv_separator: args.kv_separator.clone(),
    };

    if args.poll_interval_secs == 0 {
        return Err(Error::Config("--poll-interval-secs must be positive".to_string()).into());
    }
    let mut service_config = ServiceConfig {
        poll_interval: Duration::from_secs(args.poll_interval_secs),
        max_display_rows: args.max_display_rows,
        ..Default::default()
    };
    service_config.stat.max_storage_buckets = args.max_storage_buckets;

    let service = Arc::new(Service::new(service_config, components, initial));

    let shutdown = CancellationToken::new();
    let manager = {
        let service = service.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { service.run_manager(shutdown).await })
    };

    let api_config = ApiServerConfig {
        http_port: args.http_port,
        enable_cors: !args.disable_cors,
    };
    let router = api::build_http_router(service, &api_config);

    let addr = SocketAddr::from(([0, 0, 0, 0], args.http_port));
    let listener = TcpListener::bind(addr).await?;

    info!(
        http_port = args.http_port,
        policy = %policy,
        poll_interval_secs = args.poll_interval_secs,
        "Key Visual service ready"
    );

    let server_shutdown = shutdown.clone();
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            server_shutdown.cancel();
        })
        .await
        .map_err(|e| Error::Internal(format!("HTTP server error: {e}")))?;

    shutdown.cancel();
    if let Err(e) = manager.await {
        return Err(Error::Internal(format!("manager task failed: {e}")).into());
    }

    info!("Key Visual service shutting down");

    Ok(())
}

fn resolve_settings(args: &Args) -> keyvisual::Result<ComponentSettings> {
    let mut settings = ComponentSettings::from_env()?;

    match (args.store.as_deref(), &args.data_dir) {
        (Some("memory"), _) => settings.store = StoreBackend::Memory,
        (Some("file") | None, Some(dir)) => settings.store = StoreBackend::File(dir.clone()),
        (Some("file"), None) => {
            if settings.store == StoreBackend::Memory {
                settings.store = StoreBackend::File(PathBuf::from("./data/keyvisual"));
            }
        }
        (Some(other), _) => {
            return Err(Error::Config(format!(
                "Unknown --store: {}. Use 'memory' or 'file'",
                other
            )))
        }
        (None, None) => {}
    }
    if let Some(pd_addr) = &args.pd_addr {
        settings.pd_addr = pd_addr.clone();
    }
    if let Some(addr) = &args.tidb_status_addr {
        settings.tidb_status_addr = addr.clone();
    }
    Ok(settings)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
