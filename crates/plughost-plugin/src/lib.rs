//! # plughost-plugin
//!
//! Plugin runtime for PlugHost. Provides:
//!
//! - The plugin capability contract ([`Plugin`])
//! - A priority-ordered registry with one plugin per id
//! - Plugin lifecycle management (ordered start, reverse-ordered stop)
//! - A single-worker asynchronous message dispatcher with a bounded queue
//! - A closure-based plugin for quick plugin creation

pub mod base;
pub mod dispatcher;
pub mod manager;
pub mod message;
pub mod prelude;
pub mod registry;
pub mod traits;

#[cfg(test)]
pub(crate) mod testing;

pub use base::FnPlugin;
pub use dispatcher::Dispatcher;
pub use manager::PluginManager;
pub use message::Message;
pub use registry::{PluginRegistry, Registration, RegistrySnapshot};
pub use traits::{ConfigValue, Plugin, PluginId};
