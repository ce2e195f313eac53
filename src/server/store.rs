use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

use crate::errors::{Result, SessionError};

/// Where a stored object ended up
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredObject {
    pub key: String,
    pub size: u64,
    pub content_type: Option<String>,
    pub location: String,
}

/// Durable storage for uploaded artifacts
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store a new object. Fails when `key` is already taken.
    async fn put(&self, key: &str, body: Bytes, content_type: Option<&str>) -> Result<StoredObject>;

    /// `Ok(None)` when no object exists under `key`
    async fn get(&self, key: &str) -> Result<Option<Bytes>>;
}

/// Objects stored as plain files below a root directory
#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }
}

/// Keys are relative, `/`-separated and may not escape the store.
pub fn validate_key(key: &str) -> Result<()> {
    let invalid = key.is_empty()
        || key.starts_with('/')
        || key.contains('\\')
        || key
            .split('/')
            .any(|segment| segment.is_empty() || segment == "." || segment == "..");
    if invalid {
        return Err(SessionError::Io(format!("invalid object key {:?}", key)));
    }
    Ok(())
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn put(&self, key: &str, body: Bytes, content_type: Option<&str>) -> Result<StoredObject> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(SessionError::Io(format!("object {} already exists", key)));
            }
            Err(e) => return Err(e.into()),
        };
        file.write_all(&body).await?;
        file.flush().await?;
        log::info!("Stored {} ({} bytes)", key, body.len());

        Ok(StoredObject {
            key: key.to_string(),
            size: body.len() as u64,
            content_type: content_type.map(str::to_string),
            location: path.to_string_lossy().to_string(),
        })
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
