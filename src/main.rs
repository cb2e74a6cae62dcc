//! PlugHost: in-process plugin host
//!
//! Main entry point that wires the plugin manager, the file watcher and the
//! hot-reloaded plugin configuration together.

mod demo;

use std::sync::Arc;

use serde_json::json;
use tracing_subscriber::{EnvFilter, fmt};

use plughost_config::ConfigStore;
use plughost_core::config::RuntimeConfig;
use plughost_core::error::AppError;
use plughost_plugin::{Message, PluginManager};
use plughost_watcher::FileWatcher;

#[tokio::main]
async fn main() {
    let config = match load_configuration() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    init_logging(&config);

    if let Err(e) = run(config).await {
        tracing::error!("Host error: {}", e);
        std::process::exit(1);
    }
}

/// Load runtime configuration from `config/` and the environment
fn load_configuration() -> Result<RuntimeConfig, AppError> {
    let env = std::env::var("PLUGHOST_ENV").unwrap_or_else(|_| "development".to_string());
    RuntimeConfig::load(&env)
}

/// Initialize tracing/logging
fn init_logging(config: &RuntimeConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format.as_str() {
        "json" => {
            fmt()
                .json()
                .with_env_filter(filter)
                .with_target(true)
                .with_thread_ids(true)
                .init();
        }
        _ => {
            fmt()
                .pretty()
                .with_env_filter(filter)
                .with_target(true)
                .init();
        }
    }
}

/// Main host run function
async fn run(config: RuntimeConfig) -> Result<(), AppError> {
    tracing::info!("Starting PlugHost v{}", env!("CARGO_PKG_VERSION"));

    // ── Step 1: Plugin manager ───────────────────────────────────
    let manager = Arc::new(PluginManager::with_config(config.dispatcher.clone()));
    let counter = demo::register(&manager).await?;
    tracing::info!(plugins = manager.plugin_count().await, "Plugins registered");

    // ── Step 2: Plugin configuration ─────────────────────────────
    let store = Arc::new(ConfigStore::new(Arc::clone(&manager)));
    demo::subscribe(&store).await;

    let watcher = FileWatcher::new(config.watcher.clone());
    if let Err(e) = store.watch(&watcher, &config.host.plugin_config).await {
        // Plugins keep their defaults until the file becomes valid.
        tracing::warn!(
            "Plugin configuration '{}' not applied: {}",
            config.host.plugin_config,
            e
        );
    }

    // ── Step 3: Start plugins ────────────────────────────────────
    manager.start().await?;

    manager.dispatch(json!({"event": "host.started"})).await;
    manager
        .dispatch(Message::new(demo::ACTION_RESET, json!(null)))
        .await;

    tracing::info!("PlugHost running, press Ctrl+C to stop");
    shutdown_signal().await;
    tracing::info!("Shutdown signal received, stopping...");

    // ── Step 4: Shutdown ─────────────────────────────────────────
    watcher.stop().await;
    manager.stop().await?;

    tracing::info!(messages = counter.count(), "PlugHost stopped");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
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
                tracing::error!("Failed to install SIGTERM handler: {}", e);
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
