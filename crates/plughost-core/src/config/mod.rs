//! Runtime settings schemas.
//!
//! These configure the host process itself (queue sizes, backoff, logging),
//! not the plugins. Plugin settings live in the hot-reloaded plugin file
//! handled by `plughost-config`.

pub mod dispatcher;
pub mod logging;
pub mod watcher;

use std::path::Path;

use serde::{Deserialize, Serialize};

use self::dispatcher::DispatcherConfig;
use self::logging::LoggingConfig;
use self::watcher::WatcherConfig;

use crate::error::AppError;

/// Root runtime configuration.
///
/// Deserialized from `config/default.toml`, an optional environment overlay
/// `config/{env}.toml`, and `PLUGHOST__*` environment variables.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Host process settings.
    #[serde(default)]
    pub host: HostConfig,
    /// Dispatcher settings.
    #[serde(default)]
    pub dispatcher: DispatcherConfig,
    /// Watcher settings.
    #[serde(default)]
    pub watcher: WatcherConfig,
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Host process settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostConfig {
    /// Path of the hot-reloaded plugin configuration file.
    #[serde(default = "default_plugin_config")]
    pub plugin_config: String,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            plugin_config: default_plugin_config(),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from the `config/` directory of the working directory.
    pub fn load(env: &str) -> Result<Self, AppError> {
        Self::load_from(Path::new("config"), env)
    }

    /// Load configuration from `dir/default.toml` and `dir/{env}.toml`.
    ///
    /// Both files are optional; missing keys fall back to defaults.
    pub fn load_from(dir: &Path, env: &str) -> Result<Self, AppError> {
        let default_path = dir.join("default");
        let env_path = dir.join(env);

        tracing::info!("Loading runtime config from '{}' (env: {})", dir.display(), env);

        let config = config::Config::builder()
            .add_source(config::File::from(default_path).required(false))
            .add_source(config::File::from(env_path).required(false))
            .add_source(
                config::Environment::with_prefix("PLUGHOST")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| AppError::configuration(format!("Failed to build config: {e}")))?;

        let runtime: Self = config
            .try_deserialize()
            .map_err(|e| AppError::configuration(format!("Failed to deserialize config: {e}")))?;

        tracing::debug!(
            plugin_config = %runtime.host.plugin_config,
            queue_capacity = runtime.dispatcher.queue_capacity,
            error_backoff_ms = runtime.watcher.error_backoff_ms,
            "Runtime config loaded"
        );
        Ok(runtime)
    }
}

fn default_plugin_config() -> String {
    "config/plugins.toml".to_string()
}
