use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use super::KeyValueStore;
use crate::error::{AutosignError, Result};

/// One `<key>.json` file per key inside a data directory
///
/// Writes go to a temporary sibling which is fsynced and then renamed over
/// the target, so a crash leaves either the old or the new document. The
/// directory is fsynced after the rename so the new entry survives power loss.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    /// Open the store, creating the directory when missing
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await?;
        info!(dir = %dir.display(), "Opened JSON file store");
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(AutosignError::InvalidRequest(format!(
                "invalid storage key: {:?}",
                key
            )));
        }
        Ok(self.dir.join(format!("{}.json", key)))
    }
}

/// Flush directory entries (renames) to disk
#[cfg(unix)]
async fn sync_dir(dir: &Path) -> Result<()> {
    fs::File::open(dir).await?.sync_all().await?;
    Ok(())
}

#[cfg(not(unix))]
async fn sync_dir(_dir: &Path) -> Result<()> {
    Ok(())
}

#[async_trait]
impl KeyValueStore for JsonFileStore {
    async fn load(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(key)?;
        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path_for(key)?;
        let tmp = self.dir.join(format!(".{}.json.tmp", key));

        let mut file = fs::File::create(&tmp).await?;
        file.write_all(bytes).await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&tmp, &path).await?;
        sync_dir(&self.dir).await?;
        debug!(key = key, bytes = bytes.len(), "Persisted document");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir() -> PathBuf {
        std::env::temp_dir().join(format!("autosign-store-{}", uuid::Uuid::new_v4()))
    }

    #[tokio::test]
    async fn test_file_store_missing_key_is_none() {
        let dir = temp_dir();
        let store = JsonFileStore::open(&dir).await.unwrap();
        assert_eq!(store.load("proxy_pool").await.unwrap(), None);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn test_file_store_overwrite_leaves_no_temp_file() {
        let dir = temp_dir();
        let store = JsonFileStore::open(&dir).await.unwrap();

        store.save("status", b"{\"a\":1}").await.unwrap();
        store.save("status", b"{\"a\":2}").await.unwrap();

        assert_eq!(
            store.load("status").await.unwrap().as_deref(),
            Some(&b"{\"a\":2}"[..])
        );
        assert!(!dir.join(".status.json.tmp").exists());
        assert!(dir.join("status.json").exists());
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn test_file_store_survives_reopen() {
        let dir = temp_dir();
        {
            let store = JsonFileStore::open(&dir).await.unwrap();
            store.save("accounts", b"[]").await.unwrap();
        }
        let reopened = JsonFileStore::open(&dir).await.unwrap();
        assert_eq!(
            reopened.load("accounts").await.unwrap().as_deref(),
            Some(&b"[]"[..])
        );
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn test_file_store_rejects_path_like_keys() {
        let dir = temp_dir();
        let store = JsonFileStore::open(&dir).await.unwrap();
        assert!(store.save("../escape", b"x").await.is_err());
        assert!(store.load("").await.is_err());
        let _ = std::fs::remove_dir_all(dir);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_sync_dir_requires_existing_directory() {
        let dir = temp_dir();
        let store = JsonFileStore::open(&dir).await.unwrap();
        assert!(sync_dir(store.dir()).await.is_ok());

        std::fs::remove_dir_all(&dir).unwrap();
        assert!(sync_dir(&dir).await.is_err());
        assert!(store.save("status", b"{}").await.is_err());
    }
}
