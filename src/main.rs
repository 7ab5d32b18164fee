//! Keyed Embeddings - Main Entry Point
//!
//! Startup order: logging, env-config file, configuration, API key, model
//! cache, model load. The listener binds only after all of them succeed.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use keyed_embeddings::config::{Config, DEFAULT_ENV_FILE};
use keyed_embeddings::handlers::{self, AppState};
use keyed_embeddings::provisioner::{HubFetcher, ModelProvisioner};
use keyed_embeddings::secrets::{provision_api_key, EnvFileStore};
use keyed_embeddings::{LocalEmbeddingClient, LocalModelConfig};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "keyed_embeddings=info,tower_http=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load the env-config file, then configuration
    let env_file = std::env::var("ENV_FILE")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_ENV_FILE));
    match dotenvy::from_path(&env_file) {
        Ok(()) => info!("Loaded {}", env_file.display()),
        Err(e) if e.not_found() => info!("No {} found, using process environment", env_file.display()),
        Err(e) => warn!("Ignoring unreadable {}: {}", env_file.display(), e),
    }

    let config = Config::from_env().context("Invalid configuration")?;

    info!("🚀 Starting Keyed Embeddings v{}", env!("CARGO_PKG_VERSION"));
    info!("📦 Model: {} ({}D)", config.model_name, config.model_dimension);
    info!("🔧 Listening address: {}", config.bind_addr());

    let store = EnvFileStore::new(&config.env_file);
    let api_key = provision_api_key(config.api_key.clone(), &store);

    let provisioner = ModelProvisioner::new(Arc::new(HubFetcher::new(
        config.hf_endpoint.clone(),
        config.hf_token.clone(),
    )));
    let model_dir = match provisioner
        .provision(&config.repo_id(), &config.model_cache_dir())
        .await
    {
        Ok(dir) => dir,
        Err(e) => {
            error!("❌ Model provisioning failed: {}", e);
            error!("Check network access, MODEL and MODEL_DIR permissions, then restart.");
            return Err(e.into());
        }
    };

    let client = match LocalEmbeddingClient::new(LocalModelConfig::from_service_config(
        &config, &model_dir,
    )) {
        Ok(client) => {
            info!("✅ Local embedding model initialized");
            Arc::new(client)
        }
        Err(e) => {
            error!("Failed to load model from {}: {:#}", model_dir.display(), e);
            return Err(e);
        }
    };

    let addr = config.bind_addr();
    let state = Arc::new(AppState { client, api_key });

    let app = handlers::router(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("✅ Keyed Embeddings listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shut down cleanly");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
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

    info!("Shutdown signal received");
}
