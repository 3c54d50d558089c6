// BrandEye grouping service
// Brand matching + appearance clustering behind POST /group

use brandeye_core::BrandEyeConfig;
use brandeye_grouping::{create_router, BrandDatabase, GroupingEngine};
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "brandeye-grouping")]
#[command(about = "Groups shelf detections by brand and appearance", long_about = None)]
#[command(version)]
struct Args {
    /// Configuration file (JSON, TOML or YAML)
    #[arg(long, short, env = "BRANDEYE_CONFIG")]
    config: Option<String>,

    /// Bind address, overrides grouping.bind_address
    #[arg(long)]
    bind: Option<String>,

    /// Port, overrides grouping.port
    #[arg(long, short)]
    port: Option<u16>,

    /// Brand catalogue file, overrides grouping.brand_database
    #[arg(long)]
    brands: Option<String>,

    /// OCR collaborator base URL
    #[arg(long)]
    ocr_url: Option<String>,

    /// Feature-extraction collaborator base URL
    #[arg(long)]
    embedding_url: Option<String>,

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
        config.grouping.bind_address = bind.clone();
    }
    if let Some(port) = args.port {
        config.grouping.port = port;
    }
    if let Some(brands) = &args.brands {
        config.grouping.brand_database = Some(brands.clone());
    }
    if let Some(url) = &args.ocr_url {
        config.services.ocr_url = Some(url.clone());
    }
    if let Some(url) = &args.embedding_url {
        config.services.embedding_url = Some(url.clone());
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

    info!("🚀 Starting BrandEye grouping service...");

    let db = match &config.grouping.brand_database {
        Some(path) => {
            info!("📋 Loading brand catalogue from {}", path);
            BrandDatabase::from_file(path)?
        }
        None => BrandDatabase::builtin(),
    };
    info!("✅ {} brands loaded", db.len());

    let engine = Arc::new(GroupingEngine::from_config(&config, Arc::new(db))?);
    if !engine.ocr_available() {
        warn!("⚠️  No OCR endpoint configured; every detection will be grouped by appearance");
    }
    if !engine.embedding_available() {
        warn!("⚠️  No embedding endpoint configured; using local colour/texture features");
    }

    let addr: SocketAddr = format!("{}:{}", config.grouping.bind_address, config.grouping.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("🌐 Grouping service listening on http://{}", addr);

    axum::serve(listener, create_router(engine))
        .with_graceful_shutdown(wait_for_shutdown())
        .await?;

    info!("👋 Grouping service stopped");
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
