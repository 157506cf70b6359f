//! Filesystem-backed object storage.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::{fs, io::AsyncWriteExt};
use uuid::Uuid;

use crate::application::storage::{ObjectStore, StorageError, StoredObject};

/// Objects live at `root/<key>`; keys use `/` separators and never escape the root.
#[derive(Debug)]
pub struct FilesystemObjectStore {
    root: PathBuf,
}

impl FilesystemObjectStore {
    /// Initialise storage rooted at the provided directory, creating it if necessary.
    pub fn new(root: PathBuf) -> Result<Self, std::io::Error> {
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn resolve(&self, key: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(key);
        if key.is_empty()
            || relative.is_absolute()
            || relative
                .components()
                .any(|component| !matches!(component, Component::Normal(_)))
        {
            return Err(StorageError::AccessDenied(key.to_string()));
        }

        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl ObjectStore for FilesystemObjectStore {
    async fn get(&self, key: &str) -> Result<StoredObject, StorageError> {
        let absolute = self.resolve(key)?;
        let data = match fs::read(&absolute).await {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::NotFound(key.to_string()));
            }
            Err(err) if err.kind() == std::io::ErrorKind::PermissionDenied => {
                return Err(StorageError::AccessDenied(key.to_string()));
            }
            Err(err) => return Err(err.into()),
        };

        let content_type = mime_guess::from_path(&absolute)
            .first_or_octet_stream()
            .essence_str()
            .to_string();
        Ok(StoredObject {
            bytes: Bytes::from(data),
            content_type,
        })
    }

    /// Writes through a sibling temp file and renames it over the target, so readers never
    /// observe a partially written artifact.
    async fn put(&self, key: &str, bytes: Bytes, _content_type: &str) -> Result<(), StorageError> {
        let absolute = self.resolve(key)?;
        if let Some(parent) = absolute.parent() {
            fs::create_dir_all(parent).await?;
        }

        let staging = absolute.with_extension(format!("{}.partial", Uuid::new_v4().simple()));
        let mut file = fs::File::create(&staging).await?;
        if let Err(err) = file.write_all(&bytes).await {
            drop(file);
            let _ = fs::remove_file(&staging).await;
            return Err(err.into());
        }
        file.flush().await?;
        drop(file);

        if let Err(err) = fs::rename(&staging, &absolute).await {
            let _ = fs::remove_file(&staging).await;
            return Err(err.into());
        }
        Ok(())
    }
}
