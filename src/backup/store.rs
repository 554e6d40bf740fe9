//! Remote destinations for backup archives.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use crate::config::BackupConfig;
use crate::error::{AppError, Result};

const UPLOAD_TIMEOUT: Duration = Duration::from_secs(3600);

#[async_trait]
pub trait BackupStore: Send + Sync {
    /// Upload the archive, returning where it ended up.
    async fn put(&self, archive: &Path) -> Result<String>;
}

/// Copies archives into a directory, e.g. a mounted share.
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    dir: PathBuf,
}

impl DirectoryStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

fn archive_name(archive: &Path) -> Result<String> {
    archive
        .file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .ok_or_else(|| AppError::backup(format!("Invalid archive path {:?}", archive)))
}

#[async_trait]
impl BackupStore for DirectoryStore {
    async fn put(&self, archive: &Path) -> Result<String> {
        let target = self.dir.join(archive_name(archive)?);
        fs::create_dir_all(&self.dir).map_err(|e| {
            AppError::backup(format!("Failed to create upload dir {:?}: {}", self.dir, e))
        })?;
        tokio::fs::copy(archive, &target).await.map_err(|e| {
            AppError::backup(format!("Failed to copy {:?} to {:?}: {}", archive, target, e))
        })?;
        Ok(target.display().to_string())
    }
}

/// PUTs archives below a base URL; credentials may be part of the URL.
pub struct HttpStore {
    base_url: String,
    client: Client,
}

impl HttpStore {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(UPLOAD_TIMEOUT)
            .build()
            .map_err(|e| AppError::network(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }
}

#[async_trait]
impl BackupStore for HttpStore {
    async fn put(&self, archive: &Path) -> Result<String> {
        let url = format!("{}/{}", self.base_url, archive_name(archive)?);
        let body = tokio::fs::read(archive).await?;
        let resp = self
            .client
            .put(&url)
            .body(body)
            .send()
            .await
            .map_err(|e| AppError::network_with_url(&url, e.to_string()))?;
        if !resp.status().is_success() {
            return Err(AppError::network_with_url(&url, resp.status().to_string()));
        }
        Ok(url)
    }
}

/// Store named by the backup config: upload dir first, then upload URL.
pub fn store_from_config(config: &BackupConfig) -> Result<Option<Arc<dyn BackupStore>>> {
    if let Some(dir) = &config.upload_dir {
        return Ok(Some(Arc::new(DirectoryStore::new(dir))));
    }
    match config.upload_url.as_deref() {
        Some(url) if !url.trim().is_empty() => Ok(Some(Arc::new(HttpStore::new(url)?))),
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn directory_store_copies_archive() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("20260101120000.backup.zip");
        fs::write(&archive, "zip").unwrap();

        let store = DirectoryStore::new(dir.path().join("share"));
        let location = store.put(&archive).await.unwrap();
        assert!(location.ends_with("20260101120000.backup.zip"));
        assert_eq!(fs::read_to_string(location).unwrap(), "zip");
    }

    #[test]
    fn no_target_means_no_store() {
        let config = BackupConfig::default();
        assert!(store_from_config(&config).unwrap().is_none());
        let config = BackupConfig {
            upload_url: Some("https://backups.example.com/aem".to_string()),
            ..BackupConfig::default()
        };
        assert!(store_from_config(&config).unwrap().is_some());
    }
}
