use async_trait::async_trait;
use service_core::error::AppError;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::fs;

#[async_trait]
pub trait Storage: Send + Sync {
    async fn upload(&self, key: &str, data: Vec<u8>) -> Result<(), AppError>;
    async fn delete(&self, key: &str) -> Result<(), AppError>;
    /// Local filesystem path for `key`, for tools that need a real file.
    fn path(&self, key: &str) -> PathBuf;
    /// Remove stored files last modified more than `age` ago. Returns how many were removed.
    async fn purge_older_than(&self, age: Duration) -> Result<usize, AppError>;
}

pub struct LocalStorage {
    base_path: PathBuf,
}

impl LocalStorage {
    pub async fn new(base_path: impl Into<PathBuf>) -> Result<Self, AppError> {
        let base_path = base_path.into();
        if !base_path.exists() {
            fs::create_dir_all(&base_path).await?;
        }
        Ok(Self { base_path })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }
}

#[async_trait]
impl Storage for LocalStorage {
    async fn upload(&self, key: &str, data: Vec<u8>) -> Result<(), AppError> {
        let path = self.base_path.join(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(path, data).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), AppError> {
        let path = self.base_path.join(key);
        if path.exists() {
            fs::remove_file(path).await?;
        }
        Ok(())
    }

    fn path(&self, key: &str) -> PathBuf {
        self.base_path.join(key)
    }

    async fn purge_older_than(&self, age: Duration) -> Result<usize, AppError> {
        let cutoff = SystemTime::now()
            .checked_sub(age)
            .unwrap_or(SystemTime::UNIX_EPOCH);

        let mut removed = 0;
        let mut entries = fs::read_dir(&self.base_path).await?;
        while let Some(entry) = entries.next_entry().await? {
            let metadata = entry.metadata().await?;
            if !metadata.is_file() {
                continue;
            }
            let modified = metadata.modified()?;
            if modified < cutoff {
                match fs::remove_file(entry.path()).await {
                    Ok(()) => removed += 1,
                    Err(e) => {
                        tracing::warn!(path = ?entry.path(), error = %e, "Failed to remove stale upload")
                    }
                }
            }
        }

        if removed > 0 {
            tracing::info!(removed = removed, "Removed stale uploads");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn upload_then_delete() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path().join("uploads")).await.unwrap();

        storage.upload("a.pdf", b"%PDF-1.4".to_vec()).await.unwrap();
        assert_eq!(std::fs::read(storage.path("a.pdf")).unwrap(), b"%PDF-1.4");

        storage.delete("a.pdf").await.unwrap();
        assert!(!storage.path("a.pdf").exists());
        // deleting a missing key is a no-op
        storage.delete("a.pdf").await.unwrap();
    }

    #[tokio::test]
    async fn purge_respects_age() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path()).await.unwrap();
        storage.upload("fresh.png", vec![1, 2, 3]).await.unwrap();

        assert_eq!(storage.purge_older_than(Duration::from_secs(3600)).await.unwrap(), 0);
        assert!(storage.path("fresh.png").exists());

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(storage.purge_older_than(Duration::ZERO).await.unwrap(), 1);
        assert!(!storage.path("fresh.png").exists());
    }
}
