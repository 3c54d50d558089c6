// BrandEye orchestrator
// Detection → grouping → visualization behind POST /process

use brandeye_core::BrandEyeConfig;
use brandeye_server::{create_router, AppState, Metrics, PipelineOrchestrator, WorkerPool};
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "brandeye-server")]
#[command(about = "Product detection and brand grouping pipeline", long_about = None)]
#[command(version)]
struct Args {
    /// Configuration file (JSON, TOML or YAML)
    #[arg(long, short, env = "BRANDEYE_CONFIG")]
    config: Option<String>,

    /// Bind address, overrides server.bind_address
    #[arg(long)]
    bind: Option<String>,

    /// Port, overrides server.port
    #[arg(long, short)]
    port: Option<u16>,

    #[arg(long)]
    detection_url: Option<String>,

    #[arg(long)]
    grouping_url: Option<String>,

    #[arg(long)]
    visualization_url: Option<String>,

    /// Secondary detection collaborator for sparse results
    #[arg(long)]
    fallback_detection_url: Option<String>,

    /// Directory served under /static/results
    #[arg(long)]
    results_dir: Option<String>,

    /// Emit JSON log lines
    #[arg(long)]
    json_logs: bool,
}

fn load_config(args: &Args) -> anyhow::Result<BrandEyeConfig> {
    let mut config = match &args.config {
        Some(path) => BrandEyeConfig::from_file(path)?,
        None => BrandEyeConfig::default(),
    };
    config.apply_env();

    if let Some(bind) = &args.bind {
        config.server.bind_address = bind.clone();
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(url) = &args.detection_url {
        config.services.detection_url = url.clone();
    }
    if let Some(url) = &args.grouping_url {
        config.services.grouping_url = url.clone();
    }
    if let Some(url) = &args.visualization_url {
        config.services.visualization_url = url.clone();
    }
    if let Some(url) = &args.fallback_detection_url {
        config.detection.fallback_url = Some(url.clone());
    }
    if let Some(dir) = &args.results_dir {
        config.artifacts.results_dir = dir.clone();
    }
    if args.json_logs {
        config.logging.json = true;
    }

    config.validate()?;
    Ok(config)
}

fn init_tracing(config: &BrandEyeConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false);
    if config.logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;
    init_tracing(&config);

    info!("🚀 Starting BrandEye orchestrator...");
    info!("🔎 Detection:     {}", config.services.detection_url);
    info!("🏷️  Grouping:      {}", config.services.grouping_url);
    info!("🎨 Visualization: {}", config.services.visualization_url);
    if let Some(url) = &config.detection.fallback_url {
        info!("🔁 Fallback detection: {}", url);
    }

    tokio::fs::create_dir_all(&config.artifacts.results_dir).await?;

    let metrics = Arc::new(Metrics::new());
    let orchestrator = Arc::new(PipelineOrchestrator::from_config(&config, metrics)?);

    let snapshot = orchestrator.health().check_all().await;
    for (stage, healthy) in &snapshot.services {
        if *healthy {
            info!("✅ {} service is up", stage);
        } else {
            warn!("⚠️  {} service is not responding", stage);
        }
    }

    let _poller = if config.health.poll_interval_secs > 0 {
        let interval = Duration::from_secs(config.health.poll_interval_secs);
        Some(orchestrator.health().clone().spawn_polling(interval))
    } else {
        None
    };

    let workers = WorkerPool::new(
        config.server.max_concurrent_requests,
        Duration::from_millis(config.server.worker_acquire_timeout_ms),
    );
    let state = AppState::new(orchestrator, workers, &config.artifacts.results_dir);

    let addr: SocketAddr = format!("{}:{}", config.server.bind_address, config.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("🌐 BrandEye listening on http://{}", addr);

    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(wait_for_shutdown())
        .await?;

    info!("👋 BrandEye orchestrator stopped");
    Ok(())
}

async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
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

    info!("🛑 Shutdown signal received");
}
