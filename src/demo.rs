//! Built-in plugins registered by the host binary.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Deserialize;
use serde_json::Value;

use plughost_config::ConfigStore;
use plughost_core::AppResult;
use plughost_plugin::{ConfigValue, FnPlugin, Plugin, PluginId, PluginManager};

/// Action that resets the message counter.
pub const ACTION_RESET: &str = "reset";

/// `[audit]` table of the plugin configuration file.
#[derive(Debug, Clone, Deserialize)]
pub struct AuditConfig {
    #[serde(default = "default_prefix")]
    pub prefix: String,
    #[serde(default)]
    pub verbose: bool,
}

fn default_prefix() -> String {
    "audit".to_string()
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
            verbose: false,
        }
    }
}

/// `[counter]` table of the plugin configuration file.
#[derive(Debug, Clone, Deserialize)]
pub struct CounterConfig {
    /// Log the running total every this many messages; 0 disables it.
    #[serde(default)]
    pub report_every: u64,
}

/// Counts payload messages; the `reset` action zeroes the count.
#[derive(Debug, Default)]
pub struct CounterPlugin {
    activated: AtomicBool,
    count: AtomicU64,
    report_every: AtomicU64,
}

impl CounterPlugin {
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Plugin for CounterPlugin {
    fn id(&self) -> PluginId {
        PluginId::new("counter")
    }

    async fn start(&self) -> AppResult<()> {
        self.activated.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) -> AppResult<()> {
        self.activated.store(false, Ordering::SeqCst);
        tracing::info!(total = self.count(), "Counter stopped");
        Ok(())
    }

    fn is_activated(&self) -> bool {
        self.activated.load(Ordering::SeqCst)
    }

    async fn configure(&self, config: ConfigValue) {
        if let Some(config) = config.downcast_ref::<CounterConfig>() {
            self.report_every.store(config.report_every, Ordering::SeqCst);
        }
    }

    async fn handle(&self, _payload: &Value) -> AppResult<()> {
        let total = self.count.fetch_add(1, Ordering::SeqCst) + 1;
        let every = self.report_every.load(Ordering::SeqCst);
        if every > 0 && total % every == 0 {
            tracing::info!(total, "Counter report");
        }
        Ok(())
    }

    async fn handle_action(&self, action: &str, _payload: &Value) -> AppResult<()> {
        if action == ACTION_RESET {
            self.count.store(0, Ordering::SeqCst);
        }
        Ok(())
    }
}

/// Registers the built-in plugins, returning the counter for reporting.
pub async fn register(manager: &PluginManager) -> AppResult<Arc<CounterPlugin>> {
    let settings = Arc::new(RwLock::new(AuditConfig::default()));

    let applied = Arc::clone(&settings);
    let read = Arc::clone(&settings);
    let audit = FnPlugin::builder("audit")
        .on_configure(move |config| {
            if let Some(config) = config.downcast_ref::<AuditConfig>() {
                *applied.write() = config.clone();
            }
        })
        .on_message(move |payload| {
            let settings = read.read().clone();
            async move {
                if settings.verbose {
                    tracing::info!(prefix = %settings.prefix, %payload, "Message observed");
                } else {
                    tracing::debug!(prefix = %settings.prefix, "Message observed");
                }
                Ok(())
            }
        })
        .build();

    manager.register_plugin(Arc::new(audit), 0).await?;
    let counter = Arc::new(CounterPlugin::default());
    manager.register_plugin(counter.clone(), 10).await?;
    Ok(counter)
}

/// Subscribes the built-in plugins to their configuration tables.
pub async fn subscribe(store: &ConfigStore) {
    store.subscribe::<AuditConfig>("audit").await;
    store.subscribe::<CounterConfig>("counter").await;
}
