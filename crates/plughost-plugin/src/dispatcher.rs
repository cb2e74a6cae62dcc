//! Message dispatcher: delivers messages to plugins in priority order.
//!
//! For payload-only messages:
//! - Only activated plugins are called, in ascending priority order.
//! - The first error stops delivery; later plugins do not see the message.
//!
//! For action messages:
//! - Every registered plugin is called, activated or not.
//! - The first error stops delivery, as above.
//!
//! Plugins may rely on actions reaching them while they are inactive.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use plughost_core::{AppError, AppResult, ErrorKind};

use crate::message::Message;
use crate::registry::PluginRegistry;

/// Delivers messages to the plugins of a registry.
#[derive(Debug)]
pub struct Dispatcher {
    registry: Arc<PluginRegistry>,
}

impl Dispatcher {
    /// Creates a dispatcher over a registry.
    pub fn new(registry: Arc<PluginRegistry>) -> Self {
        Self { registry }
    }

    /// Calls `handle` on every activated plugin, stopping at the first error.
    pub async fn broadcast(&self, payload: &Value) -> AppResult<()> {
        for plugin in self.registry.each().await.iter() {
            if !plugin.is_activated() {
                continue;
            }
            if let Err(e) = plugin.handle(payload).await {
                let id = plugin.id();
                return Err(AppError::with_source(
                    ErrorKind::Lifecycle,
                    format!("Plugin '{id}' failed to handle message"),
                    e,
                ));
            }
        }
        Ok(())
    }

    /// Calls `handle_action` on every registered plugin, stopping at the first error.
    pub async fn broadcast_action(&self, action: &str, payload: &Value) -> AppResult<()> {
        for plugin in self.registry.each().await.iter() {
            if let Err(e) = plugin.handle_action(action, payload).await {
                let id = plugin.id();
                return Err(AppError::with_source(
                    ErrorKind::Lifecycle,
                    format!("Plugin '{id}' failed to handle action '{action}'"),
                    e,
                ));
            }
        }
        Ok(())
    }

    /// Delivers one message according to whether it carries an action.
    pub async fn deliver(&self, message: &Message) -> AppResult<()> {
        match message.action() {
            Some(action) => self.broadcast_action(action, &message.payload).await,
            None => self.broadcast(&message.payload).await,
        }
    }

    /// Worker loop: pops one message at a time until cancelled.
    ///
    /// On cancel the queue is closed and messages already accepted are still
    /// delivered before the loop returns. Delivery errors are logged only.
    pub(crate) async fn run(
        self: Arc<Self>,
        mut queue: mpsc::Receiver<Message>,
        mut cancel: watch::Receiver<bool>,
    ) {
        info!("Dispatcher started");

        loop {
            tokio::select! {
                biased;
                changed = cancel.changed() => {
                    if changed.is_err() || *cancel.borrow() {
                        debug!("Dispatcher received shutdown signal");
                        break;
                    }
                }
                message = queue.recv() => match message {
                    Some(message) => self.process(message).await,
                    None => break,
                },
            }
        }

        queue.close();
        let mut drained = 0usize;
        while let Some(message) = queue.recv().await {
            self.process(message).await;
            drained += 1;
        }

        info!(drained, "Dispatcher stopped");
    }

    async fn process(&self, message: Message) {
        if let Err(e) = self.deliver(&message).await {
            warn!(
                message_id = %message.id,
                action = message.action().unwrap_or(""),
                error = %e,
                "Message delivery stopped at failing plugin"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RecordingPlugin, journal};
    use crate::traits::Plugin;
    use serde_json::json;

    #[tokio::test]
    async fn test_broadcast_skips_inactive_and_fails_fast() {
        let log = journal();
        let registry = Arc::new(PluginRegistry::new());
        let first = RecordingPlugin::new("first", &log).failing_handle().arc();
        let second = RecordingPlugin::new("second", &log).arc();
        let idle = RecordingPlugin::new("idle", &log).arc();
        registry.put(0, idle).await;
        registry.put(1, first.clone()).await;
        registry.put(2, second.clone()).await;
        first.start().await.unwrap();
        second.start().await.unwrap();
        log.lock().clear();

        let dispatcher = Dispatcher::new(registry);
        let err = dispatcher.broadcast(&json!(1)).await.unwrap_err();

        assert_eq!(err.kind, ErrorKind::Lifecycle);
        assert_eq!(*log.lock(), vec!["handle:first:1"]);
    }

    #[tokio::test]
    async fn test_action_reaches_inactive_plugins() {
        let log = journal();
        let registry = Arc::new(PluginRegistry::new());
        registry.put(0, RecordingPlugin::new("a", &log).arc()).await;
        registry.put(1, RecordingPlugin::new("b", &log).arc()).await;

        let dispatcher = Dispatcher::new(registry);
        dispatcher
            .deliver(&Message::new("shutdown", json!(null)))
            .await
            .unwrap();

        assert_eq!(*log.lock(), vec!["action:a:shutdown", "action:b:shutdown"]);
    }

    #[tokio::test]
    async fn test_run_drains_queue_on_cancel() {
        let log = journal();
        let registry = Arc::new(PluginRegistry::new());
        registry.put(0, RecordingPlugin::new("a", &log).arc()).await;
        let dispatcher = Arc::new(Dispatcher::new(registry));

        let (tx, rx) = mpsc::channel(8);
        let (cancel_tx, cancel_rx) = watch::channel(false);
        for i in 0..3 {
            tx.send(Message::new(format!("op{i}"), json!(i))).await.unwrap();
        }
        cancel_tx.send(true).unwrap();

        dispatcher.run(rx, cancel_rx).await;

        assert_eq!(
            *log.lock(),
            vec!["action:a:op0", "action:a:op1", "action:a:op2"]
        );
        assert!(tx.send(Message::new("late", json!(null))).await.is_err());
    }
}
