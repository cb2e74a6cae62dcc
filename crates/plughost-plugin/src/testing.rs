//! Test doubles shared by the unit tests of this crate.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use plughost_core::{AppError, AppResult};

use crate::traits::{ConfigValue, Plugin, PluginId};

/// Ordered record of every call made on a set of plugins.
pub(crate) type Journal = Arc<Mutex<Vec<String>>>;

pub(crate) fn journal() -> Journal {
    Arc::new(Mutex::new(Vec::new()))
}

/// Plugin that writes each call into a shared journal.
#[derive(Debug)]
pub(crate) struct RecordingPlugin {
    id: PluginId,
    journal: Journal,
    activated: AtomicBool,
    fail_start: bool,
    fail_handle: bool,
}

impl RecordingPlugin {
    pub(crate) fn new(id: &str, journal: &Journal) -> Self {
        Self {
            id: PluginId::new(id),
            journal: journal.clone(),
            activated: AtomicBool::new(false),
            fail_start: false,
            fail_handle: false,
        }
    }

    pub(crate) fn failing_start(mut self) -> Self {
        self.fail_start = true;
        self
    }

    pub(crate) fn failing_handle(mut self) -> Self {
        self.fail_handle = true;
        self
    }

    pub(crate) fn arc(self) -> Arc<dyn Plugin> {
        Arc::new(self)
    }

    fn record(&self, entry: String) {
        self.journal.lock().push(entry);
    }
}

#[async_trait]
impl Plugin for RecordingPlugin {
    fn id(&self) -> PluginId {
        self.id.clone()
    }

    async fn start(&self) -> AppResult<()> {
        self.record(format!("start:{}", self.id));
        if self.fail_start {
            return Err(AppError::lifecycle("refused to start"));
        }
        self.activated.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) -> AppResult<()> {
        self.activated.store(false, Ordering::SeqCst);
        self.record(format!("stop:{}", self.id));
        Ok(())
    }

    fn is_activated(&self) -> bool {
        self.activated.load(Ordering::SeqCst)
    }

    async fn configure(&self, config: ConfigValue) {
        self.record(format!("configure:{}:{}", self.id, config.type_name()));
    }

    async fn handle(&self, payload: &Value) -> AppResult<()> {
        self.record(format!("handle:{}:{}", self.id, payload));
        if self.fail_handle {
            return Err(AppError::lifecycle("cannot handle payload"));
        }
        Ok(())
    }

    async fn handle_action(&self, action: &str, _payload: &Value) -> AppResult<()> {
        self.record(format!("action:{}:{}", self.id, action));
        if self.fail_handle {
            return Err(AppError::lifecycle("cannot handle action"));
        }
        Ok(())
    }
}
