//! Transcript blob storage
//!
//! Plain-text transcripts keyed by video id. A key always maps to the same
//! location, and writes replace the previous blob atomically.

use async_trait::async_trait;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use crate::error::{PipelineError, Result};

/// Check a catalog identifier before it becomes a row key or a file name.
pub fn validate_video_id(video_id: &str) -> Result<()> {
    static VIDEO_ID: OnceLock<Option<Regex>> = OnceLock::new();
    let re = VIDEO_ID.get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]{1,64}$").ok());
    if re.as_ref().is_some_and(|re| re.is_match(video_id)) {
        Ok(())
    } else {
        Err(PipelineError::InvalidInput(format!(
            "invalid video id '{}'",
            video_id
        )))
    }
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `text` under `key`, replacing any previous blob. Returns the
    /// path recorded on the video row.
    async fn put(&self, key: &str, text: &str) -> Result<String>;

    async fn get(&self, key: &str) -> Result<Option<String>>;
}

/// Transcripts as `<root>/<video_id>.txt` on the local filesystem.
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        validate_video_id(key)?;
        Ok(self.root.join(format!("{}.txt", key)))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, key: &str, text: &str) -> Result<String> {
        let path = self.path_for(key)?;
        tokio::fs::create_dir_all(&self.root).await?;

        // Write beside the target then rename over it
        let tmp = self.root.join(format!(".{}.txt.{}.tmp", key, uuid::Uuid::new_v4()));
        if let Err(e) = tokio::fs::write(&tmp, text.as_bytes()).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }

        log::info!("Stored transcript {} ({} bytes)", path.display(), text.len());
        Ok(path.to_string_lossy().to_string())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let path = self.path_for(key)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_video_id_validation() {
        assert!(validate_video_id("dQw4w9WgXcQ").is_ok());
        assert!(validate_video_id("a-b_c").is_ok());
        assert!(validate_video_id("").is_err());
        assert!(validate_video_id("../etc/passwd").is_err());
        assert!(validate_video_id("has space").is_err());
        assert!(validate_video_id(&"x".repeat(65)).is_err());
    }

    #[tokio::test]
    async fn test_put_overwrites_same_path() {
        let temp = TempDir::new().unwrap();
        let store = FsBlobStore::new(temp.path().join("transcripts"));

        let first = store.put("v1", "first take").await.unwrap();
        let second = store.put("v1", "second take").await.unwrap();
        assert_eq!(first, second);
        assert!(first.ends_with("v1.txt"));
        assert_eq!(store.get("v1").await.unwrap().as_deref(), Some("second take"));

        // No temp files left behind
        let entries: Vec<_> = std::fs::read_dir(store.root()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn test_get_missing_blob() {
        let temp = TempDir::new().unwrap();
        let store = FsBlobStore::new(temp.path());
        assert!(store.get("nothing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rejects_unsafe_keys() {
        let temp = TempDir::new().unwrap();
        let store = FsBlobStore::new(temp.path());
        assert!(store.put("../escape", "x").await.is_err());
    }
}
