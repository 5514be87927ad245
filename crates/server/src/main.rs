//! Thumbwell server binary.

use anyhow::{Context, Result};
use clap::Parser;
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use std::net::SocketAddr;
use std::sync::Arc;
use thumbwell_coordinator::{CoordinationStore, MemoryStore, RenderCoordinator, SqliteStore};
use thumbwell_core::config::{AppConfig, StorageConfig};
use thumbwell_server::repo::{AllowAll, LocalRepo};
use thumbwell_server::{AppState, create_router};
use thumbwell_storage::BlobStore;
use thumbwell_storage::backends::FilesystemBackend;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Thumbwell - a thumbnail rendering and delivery server
#[derive(Parser, Debug)]
#[command(name = "thumbwelld")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(
        short,
        long,
        env = "THUMBWELL_CONFIG",
        default_value = "config/server.toml"
    )]
    config: String,
}

fn load_config(args: &Args) -> Result<AppConfig> {
    let figment = Figment::new()
        .merge(Toml::file(&args.config))
        .merge(Env::prefixed("THUMBWELL_").split("__"));
    figment
        .extract()
        .with_context(|| format!("loading configuration from {}", args.config))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            "thumbwell_server=info,thumbwell_coordinator=info,tower_http=warn".into()
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = load_config(&args)?;

    let storage: Arc<dyn BlobStore> = match &config.storage {
        StorageConfig::Filesystem { path } => Arc::new(
            FilesystemBackend::new(path)
                .await
                .context("initializing filesystem storage")?,
        ),
    };
    storage
        .health_check()
        .await
        .context("storage health check")?;

    let store: Arc<dyn CoordinationStore> = match &config.coordinator.database {
        Some(path) => {
            tracing::info!(database = %path.display(), "using shared SQLite coordination store");
            Arc::new(
                SqliteStore::new(path)
                    .await
                    .context("opening coordination database")?,
            )
        }
        None => {
            tracing::info!("using in-process coordination store (single-node mode)");
            Arc::new(MemoryStore::new())
        }
    };
    let coordinator = Arc::new(RenderCoordinator::new(store, config.coordinator.clone()));

    if config.server.show_hostname {
        let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "thumbwell".to_string());
        thumbwell_server::error::set_renderer_identity(hostname);
    }

    let repo = Arc::new(LocalRepo::new(storage.clone(), config.repo.clone()));
    let bind = config.server.bind.clone();
    let state = AppState::new(config, storage, repo, Arc::new(AllowAll), coordinator);
    let app = create_router(state);

    let addr: SocketAddr = bind.parse().with_context(|| format!("invalid bind address {bind}"))?;
    tracing::info!(%addr, "thumbwelld listening");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .context("server error")?;

    Ok(())
}
