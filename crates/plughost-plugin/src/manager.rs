//! Plugin manager: lifecycle management and asynchronous message dispatch.
//!
//! States: `Stopped` (initial) → [`PluginManager::start`] → `Running` →
//! [`PluginManager::stop`] → `Stopped`. While running, a single dispatcher
//! task delivers queued messages one at a time; it is the only serialization
//! point for message delivery, so a slow plugin delays every later message.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};

use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use plughost_core::config::dispatcher::DispatcherConfig;
use plughost_core::{AppError, AppResult};

use crate::dispatcher::Dispatcher;
use crate::message::Message;
use crate::registry::PluginRegistry;
use crate::traits::{ConfigValue, Plugin, PluginId};

/// Handle on the running dispatcher task.
#[derive(Debug)]
struct Worker {
    cancel: watch::Sender<bool>,
    join: JoinHandle<()>,
}

/// Manages the plugin lifecycle and the message dispatcher.
#[derive(Debug)]
pub struct PluginManager {
    /// Plugin registry.
    registry: Arc<PluginRegistry>,
    /// Message dispatcher.
    dispatcher: Arc<Dispatcher>,
    /// Dispatcher settings.
    config: DispatcherConfig,
    /// Whether the manager is running; read by `dispatch`.
    activated: AtomicBool,
    /// Priority handed out by `add_plugin`.
    next_priority: AtomicI32,
    /// Producer side of the message queue while running.
    sender: RwLock<Option<mpsc::Sender<Message>>>,
    /// Worker handle; the lock also serializes start, stop, and registration.
    worker: Mutex<Option<Worker>>,
}

impl PluginManager {
    /// Creates a stopped manager with default dispatcher settings.
    pub fn new() -> Self {
        Self::with_config(DispatcherConfig::default())
    }

    /// Creates a stopped manager.
    pub fn with_config(config: DispatcherConfig) -> Self {
        let registry = Arc::new(PluginRegistry::new());
        let dispatcher = Arc::new(Dispatcher::new(registry.clone()));

        Self {
            registry,
            dispatcher,
            config,
            activated: AtomicBool::new(false),
            next_priority: AtomicI32::new(0),
            sender: RwLock::new(None),
            worker: Mutex::new(None),
        }
    }

    /// Registers a plugin at a priority (lower = started and served first).
    ///
    /// Fails with a conflict if a plugin with the same id exists, and with an
    /// invalid-state error while the manager is running.
    pub async fn register_plugin(&self, plugin: Arc<dyn Plugin>, priority: i32) -> AppResult<()> {
        let worker = self.worker.lock().await;
        self.register_locked(&worker, plugin, priority).await
    }

    /// Registers a plugin at the next automatic priority.
    ///
    /// Automatic priorities count up from zero in registration order.
    pub async fn add_plugin(&self, plugin: Arc<dyn Plugin>) -> AppResult<()> {
        let worker = self.worker.lock().await;
        let priority = self.next_priority.load(Ordering::SeqCst);
        self.register_locked(&worker, plugin, priority).await?;
        self.next_priority.store(priority + 1, Ordering::SeqCst);
        Ok(())
    }

    /// Registration body; the caller holds the worker lock.
    async fn register_locked(
        &self,
        worker: &Option<Worker>,
        plugin: Arc<dyn Plugin>,
        priority: i32,
    ) -> AppResult<()> {
        if worker.is_some() {
            return Err(AppError::invalid_state(format!(
                "Cannot register plugin '{}' while the manager is running",
                plugin.id()
            )));
        }

        let id = plugin.id();
        if !self.registry.put(priority, plugin).await {
            return Err(AppError::conflict(format!(
                "Plugin '{id}' is already registered"
            )));
        }
        Ok(())
    }

    /// Starts the dispatcher and every plugin that is not yet activated.
    ///
    /// Plugins are started in ascending priority order. A failing plugin does
    /// not prevent later plugins from starting; all failures are reported in
    /// one lifecycle error. Calling `start` while running is a no-op.
    pub async fn start(&self) -> AppResult<()> {
        let mut worker = self.worker.lock().await;
        if worker.is_some() {
            warn!("Plugin manager is already running");
            return Ok(());
        }

        // Sorted before the dispatcher exists, so no message sees the old order.
        self.registry.sort_by_priority().await;

        let (sender, queue) = mpsc::channel(self.config.queue_capacity.max(1));
        let (cancel, cancel_rx) = watch::channel(false);
        let dispatcher = self.dispatcher.clone();
        let join = tokio::spawn(dispatcher.run(queue, cancel_rx));

        *self.sender.write() = Some(sender);
        self.activated.store(true, Ordering::SeqCst);
        *worker = Some(Worker { cancel, join });

        info!(
            queue_capacity = self.config.queue_capacity,
            "Plugin manager started"
        );

        let mut failures = Vec::new();
        for registration in self.registry.each().await.registrations() {
            let plugin = &registration.plugin;
            if plugin.is_activated() {
                continue;
            }
            match plugin.start().await {
                Ok(()) => {
                    info!(plugin_id = %registration.id, priority = registration.priority, "Plugin started");
                }
                Err(e) => {
                    error!(plugin_id = %registration.id, error = %e, "Plugin start failed");
                    failures.push((registration.id.clone(), e));
                }
            }
        }

        lifecycle_result("start", failures)
    }

    /// Stops the dispatcher, then every activated plugin.
    ///
    /// Plugins are stopped in descending priority order. Safe to call when
    /// the manager was never started.
    pub async fn stop(&self) -> AppResult<()> {
        let mut worker = self.worker.lock().await;
        let Some(Worker { cancel, join }) = worker.take() else {
            debug!("Plugin manager is not running");
            return Ok(());
        };

        // The worker may already be gone; a closed channel is fine here.
        let _ = cancel.send(true);
        self.activated.store(false, Ordering::SeqCst);
        *self.sender.write() = None;

        if let Err(e) = join.await {
            error!(error = %e, "Dispatcher task ended abnormally");
        }

        let mut failures = Vec::new();
        for registration in self.registry.each_reverse().await.registrations() {
            let plugin = &registration.plugin;
            if !plugin.is_activated() {
                continue;
            }
            match plugin.stop().await {
                Ok(()) => info!(plugin_id = %registration.id, "Plugin stopped"),
                Err(e) => {
                    error!(plugin_id = %registration.id, error = %e, "Plugin stop failed");
                    failures.push((registration.id.clone(), e));
                }
            }
        }

        info!("Plugin manager stopped");
        lifecycle_result("stop", failures)
    }

    /// Queues a message for asynchronous delivery.
    ///
    /// Dropped silently when the manager is not running. While running, waits
    /// for queue space if the queue is full. Delivery errors never reach the
    /// caller.
    pub async fn dispatch(&self, message: impl Into<Message>) {
        if !self.activated.load(Ordering::SeqCst) {
            trace!("Plugin manager not running, message dropped");
            return;
        }

        let Some(sender) = self.sender.read().clone() else {
            return;
        };

        let message = message.into();
        let message_id = message.id;
        if sender.send(message).await.is_err() {
            debug!(message_id = %message_id, "Dispatcher closed, message dropped");
        }
    }

    /// Delivers a payload to every activated plugin now, returning the first error.
    pub async fn handle(&self, payload: &Value) -> AppResult<()> {
        self.dispatcher.broadcast(payload).await
    }

    /// Delivers an action to every registered plugin now, returning the first error.
    pub async fn handle_action(&self, action: &str, payload: &Value) -> AppResult<()> {
        self.dispatcher.broadcast_action(action, payload).await
    }

    /// Hands a configuration value to the plugin with the given id.
    pub async fn configure_plugin(&self, id: &str, config: ConfigValue) -> AppResult<()> {
        let plugin = self
            .registry
            .get(id)
            .await
            .ok_or_else(|| AppError::not_found(format!("Plugin '{id}' not found")))?;

        plugin.configure(config).await;
        debug!(plugin_id = %id, "Plugin configured");
        Ok(())
    }

    /// Gets a registered plugin by id.
    pub async fn get_plugin(&self, id: &str) -> Option<Arc<dyn Plugin>> {
        self.registry.get(id).await
    }

    /// Ids of all registered plugins in traversal order.
    pub async fn plugin_ids(&self) -> Vec<PluginId> {
        self.registry.ids().await
    }

    /// Returns the number of registered plugins.
    pub async fn plugin_count(&self) -> usize {
        self.registry.len().await
    }

    /// Whether the manager is running.
    pub fn is_running(&self) -> bool {
        self.activated.load(Ordering::SeqCst)
    }

    /// Returns the plugin registry.
    pub fn registry(&self) -> &Arc<PluginRegistry> {
        &self.registry
    }
}

impl Default for PluginManager {
    fn default() -> Self {
        Self::new()
    }
}

fn lifecycle_result(phase: &str, failures: Vec<(PluginId, AppError)>) -> AppResult<()> {
    if failures.is_empty() {
        return Ok(());
    }

    let detail = failures
        .iter()
        .map(|(id, e)| format!("{id} ({e})"))
        .collect::<Vec<_>>()
        .join(", ");

    Err(AppError::lifecycle(format!(
        "{} plugin(s) failed to {phase}: {detail}",
        failures.len()
    )))
}
