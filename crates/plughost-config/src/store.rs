//! Configuration store: one TOML file, one table per plugin.
//!
//! A plugin subscribes with the Rust type its table decodes into. On every
//! load the store renders each subscribed table back to TOML and hashes it;
//! only tables whose digest moved since the last successful apply are decoded
//! and handed to the plugin.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, trace, warn};

use plughost_core::{AppError, AppResult, ContentDigest, ErrorKind};
use plughost_plugin::{ConfigValue, PluginId, PluginManager};
use plughost_watcher::{FileWatcher, callback, path::normalize};

use crate::persist::write_atomic;
use crate::tree::{set_path, split_key};

type Decoder = Arc<dyn Fn(toml::Value) -> AppResult<ConfigValue> + Send + Sync>;

struct Subscription {
    id: PluginId,
    shape: &'static str,
    decode: Decoder,
}

/// A subscribed table whose digest changed during a load.
struct PendingApply {
    id: PluginId,
    decode: Decoder,
    table: toml::Value,
    digest: ContentDigest,
}

#[derive(Debug, Default)]
struct LoadedFile {
    path: Option<PathBuf>,
    tree: toml::Table,
}

/// Hot-reloading plugin configuration backed by a TOML file.
pub struct ConfigStore {
    manager: Arc<PluginManager>,
    subscribers: RwLock<Vec<Subscription>>,
    /// Digest of the table last applied to each plugin.
    digests: Mutex<HashMap<PluginId, ContentDigest>>,
    loaded: RwLock<LoadedFile>,
    /// Held for a whole load or write; the file and the cached tree change together.
    file_guard: Mutex<()>,
}

impl std::fmt::Debug for ConfigStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigStore").finish_non_exhaustive()
    }
}

impl ConfigStore {
    /// Creates a store that configures plugins through `manager`.
    pub fn new(manager: Arc<PluginManager>) -> Self {
        Self {
            manager,
            subscribers: RwLock::new(Vec::new()),
            digests: Mutex::new(HashMap::new()),
            loaded: RwLock::new(LoadedFile::default()),
            file_guard: Mutex::new(()),
        }
    }

    /// Subscribes a plugin to the table named after its id, decoded as `C`.
    ///
    /// Subscribing the same id again replaces the decoder and forgets the
    /// last applied digest, so the next load configures the plugin.
    pub async fn subscribe<C>(&self, id: impl Into<PluginId>)
    where
        C: DeserializeOwned + Send + Sync + 'static,
    {
        let id = id.into();
        let shape = std::any::type_name::<C>();
        let owner = id.clone();
        let decode: Decoder = Arc::new(move |table: toml::Value| {
            let config = table.try_into::<C>().map_err(|e: toml::de::Error| {
                AppError::with_source(
                    ErrorKind::Configuration,
                    format!("Failed to decode configuration for '{owner}'"),
                    e,
                )
            })?;
            Ok(ConfigValue::new(config))
        });

        {
            let mut subscribers = self.subscribers.write().await;
            subscribers.retain(|s| s.id != id);
            subscribers.push(Subscription {
                id: id.clone(),
                shape,
                decode,
            });
        }
        self.digests.lock().await.remove(&id);

        debug!(plugin_id = %id, shape, "Configuration subscribed");
    }

    /// Reads `path` and reconfigures every plugin whose table changed.
    ///
    /// A file that cannot be read or parsed leaves the store untouched.
    /// Otherwise the new tree is adopted even if some plugins fail to decode;
    /// those failures are collected into the returned error and their digests
    /// stay unset so the next load retries them.
    pub async fn load(&self, path: impl AsRef<Path>) -> AppResult<()> {
        let path = path.as_ref().to_path_buf();
        let _guard = self.file_guard.lock().await;

        let text = tokio::fs::read_to_string(&path).await.map_err(|e| {
            AppError::with_source(
                ErrorKind::Configuration,
                format!("Failed to read '{}'", path.display()),
                e,
            )
        })?;
        let tree: toml::Table = text.parse()?;

        let pending = self.changed_tables(&tree).await?;

        {
            let mut loaded = self.loaded.write().await;
            loaded.path = Some(path.clone());
            loaded.tree = tree;
        }

        let mut failures: Vec<(PluginId, AppError)> = Vec::new();
        for apply in pending {
            let config = match (apply.decode)(apply.table) {
                Ok(config) => config,
                Err(e) => {
                    warn!(plugin_id = %apply.id, error = %e, "Configuration rejected");
                    failures.push((apply.id, e));
                    continue;
                }
            };

            match self.manager.configure_plugin(apply.id.as_str(), config).await {
                Ok(()) => {
                    info!(
                        plugin_id = %apply.id,
                        digest = %apply.digest.short(),
                        "Plugin reconfigured"
                    );
                    self.digests.lock().await.insert(apply.id, apply.digest);
                }
                Err(e) => {
                    warn!(plugin_id = %apply.id, error = %e, "Configuration not applied");
                    failures.push((apply.id, e));
                }
            }
        }

        if failures.is_empty() {
            return Ok(());
        }

        let detail = failures
            .iter()
            .map(|(id, e)| format!("{id}: {}", e.message))
            .collect::<Vec<_>>()
            .join("; ");
        Err(AppError::configuration(format!(
            "Configuration failed for {} plugin(s) from '{}': {detail}",
            failures.len(),
            path.display()
        )))
    }

    /// Subscribed tables in `tree` whose digest differs from the last apply.
    async fn changed_tables(&self, tree: &toml::Table) -> AppResult<Vec<PendingApply>> {
        let subscribers = self.subscribers.read().await;
        let digests = self.digests.lock().await;

        let mut pending = Vec::new();
        for subscription in subscribers.iter() {
            let Some(toml::Value::Table(table)) = tree.get(subscription.id.as_str()) else {
                trace!(plugin_id = %subscription.id, "No configuration table");
                continue;
            };

            let digest = ContentDigest::of(toml::to_string(table)?);
            if digests.get(&subscription.id) == Some(&digest) {
                trace!(plugin_id = %subscription.id, "Configuration unchanged");
                continue;
            }

            debug!(
                plugin_id = %subscription.id,
                shape = subscription.shape,
                digest = %digest.short(),
                "Configuration changed"
            );
            pending.push(PendingApply {
                id: subscription.id.clone(),
                decode: subscription.decode.clone(),
                table: toml::Value::Table(table.clone()),
                digest,
            });
        }
        Ok(pending)
    }

    /// Sets `key` (dotted, relative to the plugin's table) and persists the file.
    ///
    /// Plugins are not reconfigured here; the change reaches them on the next
    /// load, typically triggered by the file watcher. Writes and loads never
    /// overlap, so a load cannot replace the cached tree with a copy read
    /// before the rename.
    pub async fn write<T: Serialize>(&self, id: &str, key: &str, value: T) -> AppResult<()> {
        let _guard = self.file_guard.lock().await;

        let (path, mut tree) = {
            let loaded = self.loaded.read().await;
            let path = loaded
                .path
                .clone()
                .ok_or_else(|| AppError::invalid_state("No configuration file loaded"))?;
            (path, loaded.tree.clone())
        };

        let mut keys = vec![id.to_string()];
        keys.extend(split_key(key)?);
        set_path(&mut tree, &keys, toml::Value::try_from(value)?)?;

        write_atomic(&path, toml::to_string(&tree)?.as_bytes()).await?;
        self.loaded.write().await.tree = tree;

        info!(plugin_id = id, key, path = %path.display(), "Configuration written");
        Ok(())
    }

    /// Loads `path` and reloads it whenever the file content changes.
    ///
    /// The watch is registered even if the initial load fails; the load
    /// error is returned first.
    pub async fn watch(self: &Arc<Self>, watcher: &FileWatcher, path: impl AsRef<Path>) -> AppResult<()> {
        let path = normalize(path)?;
        let loaded = self.load(&path).await;

        let store = Arc::clone(self);
        let watched = watcher
            .add(
                &path,
                callback(move |changed: PathBuf| {
                    let store = store.clone();
                    async move {
                        if let Err(e) = store.load(&changed).await {
                            warn!(path = %changed.display(), error = %e, "Configuration reload failed");
                        }
                    }
                }),
            )
            .await;

        loaded?;
        watched
    }

    /// Path of the last successfully parsed file.
    pub async fn path(&self) -> Option<PathBuf> {
        self.loaded.read().await.path.clone()
    }

    /// The current table for a plugin, if the file has one.
    pub async fn table(&self, id: &str) -> Option<toml::Table> {
        match self.loaded.read().await.tree.get(id) {
            Some(toml::Value::Table(table)) => Some(table.clone()),
            _ => None,
        }
    }

    /// Ids of subscribed plugins.
    pub async fn subscribers(&self) -> Vec<PluginId> {
        self.subscribers
            .read()
            .await
            .iter()
            .map(|s| s.id.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persist::sibling;
    use plughost_plugin::FnPlugin;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Deserialize)]
    struct AuditConfig {
        level: u8,
        #[serde(default)]
        a: Option<Nested>,
    }

    #[derive(Debug, Clone, PartialEq, Deserialize)]
    struct Nested {
        b: i64,
    }

    #[derive(Debug, Clone, PartialEq, Deserialize)]
    struct CacheConfig {
        size: u32,
    }

    type Seen<T> = Arc<parking_lot::Mutex<Vec<T>>>;

    async fn recording<T: Clone + Send + Sync + 'static>(
        manager: &PluginManager,
        id: &str,
    ) -> Seen<T> {
        let seen: Seen<T> = Arc::default();
        let slot = seen.clone();
        let plugin = FnPlugin::builder(id)
            .on_configure(move |config| {
                if let Some(value) = config.downcast_ref::<T>() {
                    slot.lock().push(value.clone());
                }
            })
            .build();
        manager.add_plugin(Arc::new(plugin)).await.unwrap();
        seen
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        path: PathBuf,
        store: Arc<ConfigStore>,
        audit: Seen<AuditConfig>,
        cache: Seen<CacheConfig>,
    }

    async fn fixture(contents: &str) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plugins.toml");
        std::fs::write(&path, contents).unwrap();

        let manager = Arc::new(PluginManager::new());
        let audit = recording::<AuditConfig>(&manager, "audit").await;
        let cache = recording::<CacheConfig>(&manager, "cache").await;

        let store = Arc::new(ConfigStore::new(manager));
        store.subscribe::<AuditConfig>("audit").await;
        store.subscribe::<CacheConfig>("cache").await;

        Fixture {
            _dir: dir,
            path,
            store,
            audit,
            cache,
        }
    }

    #[tokio::test]
    async fn test_unchanged_reload_does_not_reconfigure() {
        let f = fixture("[audit]\nlevel = 1\n\n[cache]\nsize = 64\n").await;

        f.store.load(&f.path).await.unwrap();
        f.store.load(&f.path).await.unwrap();

        assert_eq!(f.audit.lock().len(), 1);
        assert_eq!(f.cache.lock().len(), 1);
        assert_eq!(f.cache.lock()[0], CacheConfig { size: 64 });
    }

    #[tokio::test]
    async fn test_only_changed_table_is_applied() {
        let f = fixture("[audit]\nlevel = 1\n\n[cache]\nsize = 64\n").await;
        f.store.load(&f.path).await.unwrap();

        // Formatting changes alone do not count as a change.
        std::fs::write(&f.path, "[cache]\nsize   =   128\n\n[audit]\nlevel = 1\n").unwrap();
        f.store.load(&f.path).await.unwrap();

        assert_eq!(f.audit.lock().len(), 1);
        assert_eq!(
            *f.cache.lock(),
            vec![CacheConfig { size: 64 }, CacheConfig { size: 128 }]
        );
    }

    #[tokio::test]
    async fn test_malformed_file_keeps_state() {
        let f = fixture("[audit]\nlevel = 1\n").await;
        f.store.load(&f.path).await.unwrap();

        std::fs::write(&f.path, "[audit\nlevel = ").unwrap();
        let err = f.store.load(&f.path).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Configuration);

        let table = f.store.table("audit").await.unwrap();
        assert_eq!(table["level"].as_integer(), Some(1));

        // Same content as before the bad write: nothing to apply.
        std::fs::write(&f.path, "[audit]\nlevel = 1\n").unwrap();
        f.store.load(&f.path).await.unwrap();
        assert_eq!(f.audit.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_decode_failure_does_not_block_others() {
        let f = fixture("[audit]\nlevel = \"loud\"\n\n[cache]\nsize = 8\n").await;

        let err = f.store.load(&f.path).await.unwrap_err();
        assert!(err.message.contains("audit"));
        assert!(f.audit.lock().is_empty());
        assert_eq!(f.cache.lock().len(), 1);

        // The failed table is retried once it decodes.
        std::fs::write(&f.path, "[audit]\nlevel = 2\n\n[cache]\nsize = 8\n").unwrap();
        f.store.load(&f.path).await.unwrap();
        assert_eq!(f.audit.lock()[0].level, 2);
        assert_eq!(f.cache.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_unregistered_subscriber_is_reported() {
        let f = fixture("[ghost]\nsize = 1\n\n[cache]\nsize = 2\n").await;
        f.store.subscribe::<CacheConfig>("ghost").await;

        let err = f.store.load(&f.path).await.unwrap_err();
        assert!(err.message.contains("ghost"));
        assert_eq!(f.cache.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_write_then_reload() {
        let f = fixture("[audit]\nlevel = 1\n").await;
        f.store.load(&f.path).await.unwrap();

        f.store.write("audit", "a.b", 5).await.unwrap();

        let backup = std::fs::read_to_string(sibling(&f.path, "old")).unwrap();
        assert_eq!(backup, "[audit]\nlevel = 1\n");
        assert!(!sibling(&f.path, "tmp").exists());

        f.store.load(&f.path).await.unwrap();
        let applied = f.audit.lock().last().cloned().unwrap();
        assert_eq!(applied.level, 1);
        assert_eq!(applied.a, Some(Nested { b: 5 }));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_load_keeps_written_key() {
        let f = fixture("[cache]\nsize = 1\n").await;
        f.store.load(&f.path).await.unwrap();

        for round in 0..20i64 {
            let (written, loaded) = tokio::join!(
                f.store.write("cache", "first", round),
                f.store.load(&f.path)
            );
            written.unwrap();
            loaded.unwrap();
            f.store.write("cache", "second", round).await.unwrap();

            let on_disk: toml::Table = std::fs::read_to_string(&f.path).unwrap().parse().unwrap();
            assert_eq!(on_disk["cache"]["first"].as_integer(), Some(round));
            assert_eq!(on_disk["cache"]["second"].as_integer(), Some(round));
        }
    }

    #[tokio::test]
    async fn test_write_requires_loaded_file() {
        let f = fixture("").await;
        let err = f.store.write("audit", "level", 3).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidState);
    }

    #[tokio::test]
    async fn test_write_through_scalar_fails() {
        let f = fixture("[audit]\nlevel = 1\n").await;
        f.store.load(&f.path).await.unwrap();

        assert!(f.store.write("audit", "level.deep", true).await.is_err());
        assert_eq!(std::fs::read_to_string(&f.path).unwrap(), "[audit]\nlevel = 1\n");
        assert!(!sibling(&f.path, "old").exists());
    }

    #[tokio::test]
    async fn test_resubscribe_reapplies() {
        let f = fixture("[cache]\nsize = 4\n").await;
        f.store.load(&f.path).await.unwrap();

        f.store.subscribe::<CacheConfig>("cache").await;
        f.store.load(&f.path).await.unwrap();

        assert_eq!(f.cache.lock().len(), 2);
        assert_eq!(f.store.subscribers().await.len(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_watch_reloads_on_change() {
        let f = fixture("[cache]\nsize = 1\n").await;
        let watcher = FileWatcher::new(Default::default());

        f.store.watch(&watcher, &f.path).await.unwrap();
        assert_eq!(f.cache.lock().len(), 1);

        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        std::fs::write(&f.path, "[cache]\nsize = 2\n").unwrap();

        let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(5);
        while f.cache.lock().len() < 2 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        watcher.stop().await;

        assert_eq!(f.cache.lock().last().cloned(), Some(CacheConfig { size: 2 }));
    }
}
