//! SHA-256 content digests used to detect whether a file or a configuration
//! subtree actually changed.

use std::fmt;
use std::path::Path;

use sha2::{Digest, Sha256};

/// A 32-byte SHA-256 digest of some content.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentDigest([u8; 32]);

impl ContentDigest {
    /// Computes the digest of a byte slice.
    pub fn of(bytes: impl AsRef<[u8]>) -> Self {
        Self(Sha256::digest(bytes.as_ref()).into())
    }

    /// Reads a file and computes the digest of its contents.
    pub async fn of_file(path: &Path) -> std::io::Result<Self> {
        let bytes = tokio::fs::read(path).await?;
        Ok(Self::of(bytes))
    }

    /// Returns the raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Returns a short hex prefix, for log lines.
    pub fn short(&self) -> String {
        self.0[..6].iter().map(|b| format!("{b:02x}")).collect()
    }
}

impl fmt::Debug for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentDigest({})", self.short())
    }
}

impl fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.0 {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_content_same_digest() {
        assert_eq!(ContentDigest::of("level = 3"), ContentDigest::of("level = 3"));
        assert_ne!(ContentDigest::of("level = 3"), ContentDigest::of("level = 4"));
    }

    #[test]
    fn test_display_is_full_hex() {
        let digest = ContentDigest::of("");
        let hex = digest.to_string();
        assert_eq!(hex.len(), 64);
        assert!(hex.starts_with("e3b0c442"));
        assert_eq!(digest.short(), "e3b0c44298fc");
    }

    #[tokio::test]
    async fn test_of_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plugins.toml");
        std::fs::write(&path, "[audit]\nlevel = 1\n").unwrap();

        let digest = ContentDigest::of_file(&path).await.unwrap();
        assert_eq!(digest, ContentDigest::of("[audit]\nlevel = 1\n"));
    }
}
