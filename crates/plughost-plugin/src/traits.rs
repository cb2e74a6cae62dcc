//! The plugin capability contract.

use std::any::Any;
use std::borrow::Borrow;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use plughost_core::AppResult;

/// Explicit identity of a plugin.
///
/// At most one plugin per id may be registered, and the id doubles as the
/// name of the plugin's table in the configuration file.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PluginId(Arc<str>);

impl PluginId {
    /// Creates a plugin id.
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for PluginId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PluginId({})", self.0)
    }
}

impl fmt::Display for PluginId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for PluginId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for PluginId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for PluginId {
    fn from(id: String) -> Self {
        Self(Arc::from(id))
    }
}

/// A decoded configuration value handed to [`Plugin::configure`].
///
/// The concrete type is whatever shape the plugin subscribed with; plugins
/// recover it with [`ConfigValue::downcast_ref`].
#[derive(Clone)]
pub struct ConfigValue {
    inner: Arc<dyn Any + Send + Sync>,
    type_name: &'static str,
}

impl ConfigValue {
    /// Wraps a decoded configuration value.
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self {
            inner: Arc::new(value),
            type_name: std::any::type_name::<T>(),
        }
    }

    /// Borrows the value as `T`, if that is its type.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.inner.downcast_ref::<T>()
    }

    /// Returns a shared handle to the value as `T`, if that is its type.
    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.inner.clone().downcast::<T>().ok()
    }

    /// Name of the wrapped type, for diagnostics.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }
}

impl fmt::Debug for ConfigValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigValue")
            .field("type_name", &self.type_name)
            .finish()
    }
}

/// Trait that all plugins must implement.
///
/// The runtime trusts registered plugins: they run in-process, on the
/// manager's dispatcher task, without isolation.
#[async_trait]
pub trait Plugin: Send + Sync + fmt::Debug {
    /// Returns the plugin identity.
    fn id(&self) -> PluginId;

    /// Called when the manager starts. A plugin must report itself activated
    /// only after this returns `Ok`.
    async fn start(&self) -> AppResult<()>;

    /// Called when the manager stops, for activated plugins only.
    async fn stop(&self) -> AppResult<()>;

    /// Whether the plugin is currently activated.
    fn is_activated(&self) -> bool;

    /// Applies a new configuration value.
    async fn configure(&self, _config: ConfigValue) {}

    /// Handles a message without an action. Only activated plugins receive these.
    async fn handle(&self, _payload: &Value) -> AppResult<()> {
        Ok(())
    }

    /// Handles an action message. Every registered plugin receives these,
    /// activated or not.
    async fn handle_action(&self, _action: &str, _payload: &Value) -> AppResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct AuditSettings {
        level: u8,
    }

    #[test]
    fn test_config_value_downcast() {
        let value = ConfigValue::new(AuditSettings { level: 3 });
        assert_eq!(
            value.downcast_ref::<AuditSettings>(),
            Some(&AuditSettings { level: 3 })
        );
        assert!(value.downcast_ref::<String>().is_none());

        let shared = value.downcast::<AuditSettings>().unwrap();
        assert_eq!(shared.level, 3);
        assert!(value.type_name().ends_with("AuditSettings"));
    }

    #[test]
    fn test_plugin_id_borrows_as_str() {
        let mut map = std::collections::HashMap::new();
        map.insert(PluginId::new("audit"), 1);
        assert_eq!(map.get("audit"), Some(&1));
        assert_eq!(PluginId::from("audit").to_string(), "audit");
    }
}
