//! Closure-based plugin for quick plugin creation.
//!
//! [`FnPlugin`] tracks its own activation flag and routes actions through a
//! table of registered action names, so a plugin can be assembled from a few
//! closures instead of a hand-written [`Plugin`] impl.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::RwLock;
use serde_json::Value;
use tracing::debug;

use plughost_core::AppResult;

use crate::traits::{ConfigValue, Plugin, PluginId};

type LifecycleFn = Arc<dyn Fn() -> BoxFuture<'static, AppResult<()>> + Send + Sync>;
type MessageFn = Arc<dyn Fn(Value) -> BoxFuture<'static, AppResult<()>> + Send + Sync>;
type ConfigureFn = Arc<dyn Fn(ConfigValue) + Send + Sync>;

/// A plugin assembled from optional closures.
pub struct FnPlugin {
    id: PluginId,
    activated: AtomicBool,
    on_start: Option<LifecycleFn>,
    on_stop: Option<LifecycleFn>,
    on_configure: Option<ConfigureFn>,
    on_message: Option<MessageFn>,
    /// Action name → dedicated callback, or `None` to reuse `on_message`.
    actions: RwLock<HashMap<String, Option<MessageFn>>>,
}

impl std::fmt::Debug for FnPlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnPlugin")
            .field("id", &self.id)
            .field("activated", &self.is_activated())
            .field("actions", &self.actions.read().keys().collect::<Vec<_>>())
            .finish()
    }
}

impl FnPlugin {
    /// Starts building a plugin with the given id.
    pub fn builder(id: impl Into<PluginId>) -> FnPluginBuilder {
        FnPluginBuilder {
            id: id.into(),
            on_start: None,
            on_stop: None,
            on_configure: None,
            on_message: None,
        }
    }

    /// Routes an action to the plugin's message handler.
    pub fn register_action(&self, action: &str) {
        self.actions.write().insert(action.to_string(), None);
        debug!(plugin_id = %self.id, action, "Action registered");
    }

    /// Routes an action to a dedicated callback.
    pub fn register_action_callback<F, Fut>(&self, action: &str, callback: F)
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = AppResult<()>> + Send + 'static,
    {
        let callback: MessageFn = Arc::new(move |payload| callback(payload).boxed());
        self.actions
            .write()
            .insert(action.to_string(), Some(callback));
        debug!(plugin_id = %self.id, action, "Action callback registered");
    }

    /// Whether an action name is registered.
    pub fn has_action(&self, action: &str) -> bool {
        self.actions.read().contains_key(action)
    }
}

#[async_trait]
impl Plugin for FnPlugin {
    fn id(&self) -> PluginId {
        self.id.clone()
    }

    async fn start(&self) -> AppResult<()> {
        if let Some(on_start) = &self.on_start {
            on_start().await?;
        }
        self.activated.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) -> AppResult<()> {
        self.activated.store(false, Ordering::SeqCst);
        if let Some(on_stop) = &self.on_stop {
            on_stop().await?;
        }
        Ok(())
    }

    fn is_activated(&self) -> bool {
        self.activated.load(Ordering::SeqCst)
    }

    async fn configure(&self, config: ConfigValue) {
        if let Some(on_configure) = &self.on_configure {
            on_configure(config);
        }
    }

    async fn handle(&self, payload: &Value) -> AppResult<()> {
        match &self.on_message {
            Some(on_message) => on_message(payload.clone()).await,
            None => Ok(()),
        }
    }

    async fn handle_action(&self, action: &str, payload: &Value) -> AppResult<()> {
        let route = self.actions.read().get(action).cloned();
        match route {
            Some(Some(callback)) => callback(payload.clone()).await,
            Some(None) => self.handle(payload).await,
            None => Ok(()),
        }
    }
}

/// Builder for [`FnPlugin`].
pub struct FnPluginBuilder {
    id: PluginId,
    on_start: Option<LifecycleFn>,
    on_stop: Option<LifecycleFn>,
    on_configure: Option<ConfigureFn>,
    on_message: Option<MessageFn>,
}

impl FnPluginBuilder {
    /// Runs before the plugin reports itself activated; an error keeps it inactive.
    pub fn on_start<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = AppResult<()>> + Send + 'static,
    {
        self.on_start = Some(Arc::new(move || f().boxed()));
        self
    }

    /// Runs after the plugin is marked inactive.
    pub fn on_stop<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = AppResult<()>> + Send + 'static,
    {
        self.on_stop = Some(Arc::new(move || f().boxed()));
        self
    }

    /// Receives every configuration value applied to the plugin.
    pub fn on_configure<F>(mut self, f: F) -> Self
    where
        F: Fn(ConfigValue) + Send + Sync + 'static,
    {
        self.on_configure = Some(Arc::new(f));
        self
    }

    /// Handles payload messages and actions registered without a callback.
    pub fn on_message<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = AppResult<()>> + Send + 'static,
    {
        self.on_message = Some(Arc::new(move |payload| f(payload).boxed()));
        self
    }

    /// Builds the plugin.
    pub fn build(self) -> FnPlugin {
        FnPlugin {
            id: self.id,
            activated: AtomicBool::new(false),
            on_start: self.on_start,
            on_stop: self.on_stop,
            on_configure: self.on_configure,
            on_message: self.on_message,
            actions: RwLock::new(HashMap::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plughost_core::AppError;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn test_activation_follows_start_result() {
        let ok = FnPlugin::builder("ok").build();
        ok.start().await.unwrap();
        assert!(ok.is_activated());
        ok.stop().await.unwrap();
        assert!(!ok.is_activated());

        let broken = FnPlugin::builder("broken")
            .on_start(|| async { Err(AppError::lifecycle("no disk")) })
            .build();
        assert!(broken.start().await.is_err());
        assert!(!broken.is_activated());
    }

    #[tokio::test]
    async fn test_action_routing() {
        let messages = Arc::new(AtomicUsize::new(0));
        let flushes = Arc::new(AtomicUsize::new(0));

        let counter = messages.clone();
        let plugin = FnPlugin::builder("cache")
            .on_message(move |_| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .build();

        plugin.register_action("refresh");
        let counter = flushes.clone();
        plugin.register_action_callback("flush", move |payload| {
            let counter = counter.clone();
            async move {
                assert_eq!(payload, json!({"all": true}));
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        plugin.handle_action("refresh", &json!(null)).await.unwrap();
        plugin.handle_action("flush", &json!({"all": true})).await.unwrap();
        plugin.handle_action("unknown", &json!(null)).await.unwrap();
        plugin.handle(&json!(1)).await.unwrap();

        assert_eq!(messages.load(Ordering::SeqCst), 2);
        assert_eq!(flushes.load(Ordering::SeqCst), 1);
        assert!(plugin.has_action("flush"));
        assert!(!plugin.has_action("unknown"));
    }

    #[tokio::test]
    async fn test_configure_callback() {
        let seen = Arc::new(parking_lot::Mutex::new(None));
        let slot = seen.clone();
        let plugin = FnPlugin::builder("cfg")
            .on_configure(move |config| {
                *slot.lock() = config.downcast_ref::<u16>().copied();
            })
            .build();

        plugin.configure(ConfigValue::new(8080u16)).await;
        assert_eq!(*seen.lock(), Some(8080));
    }
}
