use apijson::{build_state, create_router, metadata, ServerConfig, StorageEngine};
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "apijson")]
#[command(about = "APIJSON - declarative JSON queries over RocksDB", long_about = None)]
struct Args {
    /// Config file (defaults to ./apijson.toml when present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Data directory path
    #[arg(long)]
    data_dir: Option<String>,

    /// JSON file with access rules, request templates and rows to import
    #[arg(long)]
    seed: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "apijson=info,apijson_core=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = ServerConfig::load(args.config.as_deref())?;
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(dir) = args.data_dir {
        config.data_dir = dir;
    }
    if let Some(seed) = args.seed {
        config.seed = Some(seed);
    }
    if config.engine.access_verify && config.auth.jwt_secret.is_none() {
        tracing::warn!("Access verification is on without JWT_SECRET: the Authorization header is trusted as the user id");
    }

    let storage = StorageEngine::new(&config.data_dir)?;
    tracing::info!("Storage opened at {}", config.data_dir);

    if let Some(seed) = &config.seed {
        let rows = metadata::seed_from_file(&storage, seed)?;
        tracing::info!("Seeded {} rows", rows);
    }

    let state = build_state(&config, storage)?;
    let storage_for_shutdown = state.storage().clone();
    let app = create_router(state);

    // Start server with graceful shutdown
    let addr = config.addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(storage_for_shutdown))
        .await?;

    Ok(())
}

async fn shutdown_signal(storage: std::sync::Arc<StorageEngine>) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install signal handler: {}", e);
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

    tracing::info!("Shutdown signal received, flushing...");
    if let Err(e) = storage.flush() {
        tracing::error!("Flush failed: {}", e);
    }
    tracing::info!("Shutdown complete");
}
