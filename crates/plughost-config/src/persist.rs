//! Crash-safe file replacement.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;
use tracing::debug;

use plughost_core::{AppError, AppResult, ErrorKind};

/// `path` with `suffix` appended to its file name, e.g. `plugins.toml.tmp`.
pub fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

/// Replaces the file at `path` with `contents`.
///
/// The contents go to `<path>.tmp` first and are synced; the current file is
/// copied to `<path>.old`; then the temp file is renamed over `path`. The
/// rename is the only step that changes `path`, so a failure anywhere leaves
/// it as it was.
pub async fn write_atomic(path: &Path, contents: &[u8]) -> AppResult<()> {
    let tmp = sibling(path, "tmp");
    let backup = sibling(path, "old");

    let result = replace(path, &tmp, &backup, contents).await;
    if let Err(e) = result {
        // Best effort; the temp file may not exist.
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(AppError::with_source(
            ErrorKind::Persistence,
            format!("Failed to write '{}'", path.display()),
            e,
        ));
    }

    debug!(path = %path.display(), bytes = contents.len(), "Configuration file written");
    Ok(())
}

async fn replace(path: &Path, tmp: &Path, backup: &Path, contents: &[u8]) -> std::io::Result<()> {
    let mut file = tokio::fs::File::create(tmp).await?;
    file.write_all(contents).await?;
    file.sync_all().await?;
    drop(file);

    if tokio::fs::try_exists(path).await? {
        tokio::fs::copy(path, backup).await?;
    }

    tokio::fs::rename(tmp, path).await
}
