//! Path normalization for watch registrations.

use std::path::{Component, Path, PathBuf};

use plughost_core::{AppError, AppResult};

/// Expands a leading `~`, makes the path absolute, and removes `.` and `..`
/// components lexically.
///
/// The result is the key callbacks are stored under, and matches the paths
/// the watch backend reports for it.
pub fn normalize(path: impl AsRef<Path>) -> AppResult<PathBuf> {
    let path = path.as_ref();

    let expanded = match path.strip_prefix("~") {
        Ok(rest) => dirs::home_dir()
            .ok_or_else(|| AppError::internal("Cannot expand '~': no home directory"))?
            .join(rest),
        Err(_) => path.to_path_buf(),
    };

    let absolute = std::path::absolute(&expanded)?;

    let mut clean = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                clean.pop();
            }
            other => clean.push(other),
        }
    }
    Ok(clean)
}

/// Directory containing `path`, used to catch a file that does not exist yet.
pub fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}
