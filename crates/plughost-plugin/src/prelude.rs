//! Prelude for convenient imports when writing plugins.

pub use async_trait::async_trait;

pub use plughost_core::{AppError, AppResult};

pub use crate::base::{FnPlugin, FnPluginBuilder};
pub use crate::message::Message;
pub use crate::traits::{ConfigValue, Plugin, PluginId};
