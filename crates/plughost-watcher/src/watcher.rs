//! File watcher: runs one background loop over the OS change notifications.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::FutureExt;
use futures::future::BoxFuture;
use notify::event::ModifyKind;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{Mutex, RwLock, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use plughost_core::config::watcher::WatcherConfig;
use plughost_core::{AppError, AppResult, ContentDigest};

use crate::path::{normalize, parent_dir};

/// Callback invoked with the changed path.
pub type WatchCallback = Arc<dyn Fn(PathBuf) -> BoxFuture<'static, ()> + Send + Sync>;

/// Wraps an async closure into a [`WatchCallback`].
pub fn callback<F, Fut>(f: F) -> WatchCallback
where
    F: Fn(PathBuf) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |path| f(path).boxed())
}

/// Handle on the running watch loop.
struct LoopHandle {
    cancel: watch::Sender<bool>,
    join: JoinHandle<()>,
}

/// State shared between the public handle and the watch loop.
struct WatcherInner {
    config: WatcherConfig,
    /// OS watch backend; `None` while stopped. Dropping it ends the event stream.
    backend: parking_lot::Mutex<Option<RecommendedWatcher>>,
    /// Normalized path → callbacks, in registration order.
    callbacks: RwLock<HashMap<PathBuf, Vec<WatchCallback>>>,
    /// Normalized path → digest of the content last reported.
    digests: Mutex<HashMap<PathBuf, ContentDigest>>,
    /// Missing path → parent directory watched in its place.
    fallbacks: parking_lot::Mutex<HashMap<PathBuf, PathBuf>>,
    running: AtomicBool,
}

/// Watches files and calls back when their content changes.
pub struct FileWatcher {
    inner: Arc<WatcherInner>,
    task: Mutex<Option<LoopHandle>>,
}

impl std::fmt::Debug for FileWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileWatcher")
            .field("config", &self.inner.config)
            .field("running", &self.is_running())
            .finish()
    }
}

impl FileWatcher {
    /// Creates an idle watcher. The loop starts on the first [`add`](Self::add).
    pub fn new(config: WatcherConfig) -> Self {
        Self {
            inner: Arc::new(WatcherInner {
                config,
                backend: parking_lot::Mutex::new(None),
                callbacks: RwLock::new(HashMap::new()),
                digests: Mutex::new(HashMap::new()),
                fallbacks: parking_lot::Mutex::new(HashMap::new()),
                running: AtomicBool::new(false),
            }),
            task: Mutex::new(None),
        }
    }

    /// Watches `path` and calls `callback` whenever its content changes.
    ///
    /// A path that does not exist yet is caught through its parent directory.
    /// Several callbacks may be added for one path; all of them fire.
    pub async fn add(&self, path: impl AsRef<Path>, callback: WatchCallback) -> AppResult<()> {
        let path = normalize(path)?;

        {
            let mut task = self.task.lock().await;
            if task.is_none() {
                *task = Some(self.spawn_loop()?);
            }
        }

        self.inner.watch_path(&path)?;
        self.inner.register(path.clone(), callback).await;

        info!(path = %path.display(), "Watching file");
        Ok(())
    }

    /// Stops watching `path` and forgets its callbacks.
    ///
    /// A parent directory watched in place of a missing file is released
    /// once no other missing path relies on it.
    pub async fn remove(&self, path: impl AsRef<Path>) -> AppResult<()> {
        let path = normalize(path)?;

        if let Some(backend) = self.inner.backend.lock().as_mut() {
            if let Err(e) = backend.unwatch(&path) {
                debug!(path = %path.display(), error = %e, "Unwatch failed");
            }
        }
        self.inner.release_fallback(&path);

        self.inner.callbacks.write().await.remove(&path);
        self.inner.digests.lock().await.remove(&path);

        info!(path = %path.display(), "Stopped watching file");
        Ok(())
    }

    /// Stops the watch loop and waits for it to exit. Idempotent.
    pub async fn stop(&self) {
        let mut task = self.task.lock().await;
        let Some(LoopHandle { cancel, join }) = task.take() else {
            return;
        };

        // The loop may already have exited; a closed channel is fine here.
        let _ = cancel.send(true);
        self.inner.backend.lock().take();

        if let Err(e) = join.await {
            error!(error = %e, "Watch loop ended abnormally");
        }

        self.inner.callbacks.write().await.clear();
        self.inner.digests.lock().await.clear();
        self.inner.fallbacks.lock().clear();
        info!("File watcher stopped");
    }

    /// Whether the watch loop is running.
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Paths that currently have callbacks.
    pub async fn watched_paths(&self) -> Vec<PathBuf> {
        self.inner.callbacks.read().await.keys().cloned().collect()
    }

    fn spawn_loop(&self) -> AppResult<LoopHandle> {
        let (tx, events) = mpsc::unbounded_channel();
        let backend = RecommendedWatcher::new(
            move |result: notify::Result<Event>| {
                // Receiver gone means the loop is shutting down.
                let _ = tx.send(result);
            },
            notify::Config::default(),
        )?;
        *self.inner.backend.lock() = Some(backend);

        let (cancel, cancel_rx) = watch::channel(false);
        self.inner.running.store(true, Ordering::SeqCst);
        let join = tokio::spawn(self.inner.clone().run(events, cancel_rx));

        Ok(LoopHandle { cancel, join })
    }
}

impl WatcherInner {
    async fn register(&self, path: PathBuf, callback: WatchCallback) {
        self.callbacks
            .write()
            .await
            .entry(path)
            .or_default()
            .push(callback);
    }

    /// Registers `path` with the backend, falling back to its parent
    /// directory when the path does not exist.
    fn watch_path(&self, path: &Path) -> AppResult<()> {
        let mut backend = self.backend.lock();
        let Some(backend) = backend.as_mut() else {
            return Err(AppError::invalid_state("File watcher is stopped"));
        };

        match backend.watch(path, RecursiveMode::NonRecursive) {
            Ok(()) => Ok(()),
            Err(e) if !path.exists() => {
                let folder = parent_dir(path);
                if !folder.exists() {
                    return Err(e.into());
                }
                backend.watch(&folder, RecursiveMode::NonRecursive)?;
                self.fallbacks.lock().insert(path.to_path_buf(), folder.clone());
                debug!(
                    path = %path.display(),
                    folder = %folder.display(),
                    "File missing, watching parent directory"
                );
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn run(
        self: Arc<Self>,
        mut events: mpsc::UnboundedReceiver<notify::Result<Event>>,
        mut cancel: watch::Receiver<bool>,
    ) {
        debug!("Watch loop started");

        loop {
            tokio::select! {
                biased;
                changed = cancel.changed() => {
                    if changed.is_err() || *cancel.borrow() {
                        break;
                    }
                }
                event = events.recv() => match event {
                    Some(Ok(event)) => self.process_event(event).await,
                    Some(Err(e)) => {
                        warn!(error = %e, "File watch backend error");
                        tokio::time::sleep(self.config.error_backoff()).await;
                    }
                    None => break,
                },
            }
        }

        self.running.store(false, Ordering::SeqCst);
        debug!("Watch loop exited");
    }

    async fn process_event(&self, event: Event) {
        let replaced = matches!(
            event.kind,
            EventKind::Remove(_) | EventKind::Modify(ModifyKind::Name(_))
        );
        let written = matches!(
            event.kind,
            EventKind::Create(_)
                | EventKind::Modify(ModifyKind::Data(_))
                | EventKind::Modify(ModifyKind::Any)
        );

        for path in event.paths {
            let callbacks = match self.callbacks.read().await.get(&path) {
                Some(callbacks) if !callbacks.is_empty() => callbacks.clone(),
                _ => continue,
            };

            let mut changed = written;
            if replaced {
                if path.exists() {
                    // Saved through rename/replace: the backend lost the old inode.
                    changed = self.rewatch(&path);
                } else {
                    self.watch_folder(&path);
                }
            }

            if !changed {
                continue;
            }

            match ContentDigest::of_file(&path).await {
                Ok(digest) => {
                    let mut digests = self.digests.lock().await;
                    if digests.get(&path) == Some(&digest) {
                        trace!(path = %path.display(), "Content unchanged, event suppressed");
                        continue;
                    }
                    digests.insert(path.clone(), digest);
                }
                Err(e) => {
                    debug!(path = %path.display(), error = %e, "Could not hash changed file");
                }
            }

            debug!(
                path = %path.display(),
                callbacks = callbacks.len(),
                "File changed"
            );
            for callback in &callbacks {
                callback(path.clone()).await;
            }
        }
    }

    fn rewatch(&self, path: &Path) -> bool {
        let mut backend = self.backend.lock();
        match backend.as_mut() {
            Some(backend) => match backend.watch(path, RecursiveMode::NonRecursive) {
                Ok(()) => true,
                Err(e) => {
                    debug!(path = %path.display(), error = %e, "Re-watch failed");
                    false
                }
            },
            None => false,
        }
    }

    fn watch_folder(&self, path: &Path) {
        let folder = parent_dir(path);
        if let Some(backend) = self.backend.lock().as_mut() {
            match backend.watch(&folder, RecursiveMode::NonRecursive) {
                Ok(()) => {
                    self.fallbacks.lock().insert(path.to_path_buf(), folder);
                }
                Err(e) => {
                    debug!(folder = %folder.display(), error = %e, "Folder watch failed");
                }
            }
        }
    }

    /// Unwatches the directory standing in for `path`, unless another
    /// missing path still depends on it.
    fn release_fallback(&self, path: &Path) {
        let folder = {
            let mut fallbacks = self.fallbacks.lock();
            let Some(folder) = fallbacks.remove(path) else {
                return;
            };
            if fallbacks.values().any(|other| *other == folder) {
                return;
            }
            folder
        };

        if let Some(backend) = self.backend.lock().as_mut() {
            if let Err(e) = backend.unwatch(&folder) {
                debug!(folder = %folder.display(), error = %e, "Folder unwatch failed");
            }
        }
    }
}
