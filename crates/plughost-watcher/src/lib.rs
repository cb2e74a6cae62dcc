//! # plughost-watcher
//!
//! Watches files for changes and invokes registered callbacks.
//!
//! - Paths that do not exist yet are caught through their parent directory
//! - Files replaced by rename (editor saves, atomic writes) are re-watched
//! - Repeated notifications for unchanged content are suppressed by digest

pub mod path;
pub mod watcher;

pub use watcher::{FileWatcher, WatchCallback, callback};
