//! Plugin registry: priority-ordered, one plugin per id.
//!
//! The registry keeps two views of the same registrations: an index keyed by
//! plugin id and a sequence used for lifecycle and dispatch traversal. Both
//! live in one struct behind one lock, so readers never see them diverge.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::traits::{Plugin, PluginId};

/// A plugin together with the priority it was registered at.
#[derive(Debug)]
pub struct Registration {
    /// Plugin id, captured at registration time.
    pub id: PluginId,
    /// Priority (lower = earlier in start and dispatch order).
    pub priority: i32,
    /// The plugin instance.
    pub plugin: Arc<dyn Plugin>,
}

#[derive(Debug, Default)]
struct RegistryState {
    /// Plugin id → registration.
    index: HashMap<PluginId, Arc<Registration>>,
    /// Registrations in traversal order.
    ordered: Vec<Arc<Registration>>,
}

/// Registry of all plugins known to a manager.
#[derive(Debug, Default)]
pub struct PluginRegistry {
    state: RwLock<RegistryState>,
}

impl PluginRegistry {
    /// Creates a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a plugin at a priority.
    ///
    /// Returns `false` without touching the registry if a plugin with the
    /// same id is already registered.
    pub async fn put(&self, priority: i32, plugin: Arc<dyn Plugin>) -> bool {
        let id = plugin.id();
        let mut state = self.state.write().await;

        if state.index.contains_key(&id) {
            warn!(plugin_id = %id, "Plugin is already registered");
            return false;
        }

        let registration = Arc::new(Registration {
            id: id.clone(),
            priority,
            plugin,
        });
        state.index.insert(id.clone(), registration.clone());
        state.ordered.push(registration);

        info!(plugin_id = %id, priority, "Plugin registered");
        true
    }

    /// Gets a plugin by id.
    pub async fn get(&self, id: &str) -> Option<Arc<dyn Plugin>> {
        let state = self.state.read().await;
        state.index.get(id).map(|r| r.plugin.clone())
    }

    /// Gets the full registration (priority and plugin) by id.
    pub async fn get_info(&self, id: &str) -> Option<Arc<Registration>> {
        let state = self.state.read().await;
        state.index.get(id).cloned()
    }

    /// Checks whether a plugin is registered.
    pub async fn contains(&self, id: &str) -> bool {
        self.state.read().await.index.contains_key(id)
    }

    /// Returns the number of registered plugins.
    pub async fn len(&self) -> usize {
        self.state.read().await.index.len()
    }

    /// Returns `true` if no plugin is registered.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Stably sorts the traversal order by ascending priority.
    ///
    /// Plugins with equal priority keep their registration order.
    pub async fn sort_by_priority(&self) {
        let mut state = self.state.write().await;
        state.ordered.sort_by_key(|r| r.priority);
        debug!(count = state.ordered.len(), "Registry sorted by priority");
    }

    /// Snapshot of the traversal order, ascending.
    pub async fn each(&self) -> RegistrySnapshot {
        let state = self.state.read().await;
        RegistrySnapshot {
            entries: state.ordered.clone(),
        }
    }

    /// Snapshot of the traversal order, descending.
    pub async fn each_reverse(&self) -> RegistrySnapshot {
        let state = self.state.read().await;
        RegistrySnapshot {
            entries: state.ordered.iter().rev().cloned().collect(),
        }
    }

    /// Ids of all registered plugins in traversal order.
    pub async fn ids(&self) -> Vec<PluginId> {
        let state = self.state.read().await;
        state.ordered.iter().map(|r| r.id.clone()).collect()
    }
}

/// A consistent copy of the registry's traversal order.
///
/// Taken under the registry lock, so it never skips or repeats an entry.
/// Iterating it does not hold any lock and can be restarted freely.
#[derive(Debug, Clone, Default)]
pub struct RegistrySnapshot {
    entries: Vec<Arc<Registration>>,
}

impl RegistrySnapshot {
    /// Iterates the plugins in snapshot order.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &Arc<dyn Plugin>> + ExactSizeIterator {
        self.entries.iter().map(|r| &r.plugin)
    }

    /// The registrations in snapshot order.
    pub fn registrations(&self) -> &[Arc<Registration>] {
        &self.entries
    }

    /// Number of plugins in the snapshot.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the snapshot is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
