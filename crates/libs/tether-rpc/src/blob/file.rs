use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tether_proto::{BlobError, BlobReference, BlobStore, OffloadedBlob};

use super::{new_reference, split_reference};
use crate::helpers::now_millis_u64;

/// Blob store keeping one file per reply under a root directory.
pub struct FileBlobStore {
    root: PathBuf,
}

impl FileBlobStore {
    pub fn new(root: &Path) -> Self {
        Self { root: root.to_path_buf() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_of(&self, reference: &BlobReference) -> Result<PathBuf, BlobError> {
        let (folder, name) = split_reference(reference)?;
        Ok(self.root.join(folder).join(name))
    }
}

#[async_trait]
impl BlobStore for FileBlobStore {
    async fn write(
        &self,
        bytes: &[u8],
        suggested_name: &str,
        folder: &str,
    ) -> Result<OffloadedBlob, BlobError> {
        let reference = new_reference(suggested_name, folder);
        let path = self.path_of(&reference)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, bytes).await?;
        log::debug!("blob: wrote {} bytes to {}", bytes.len(), path.display());
        Ok(OffloadedBlob { reference, size_bytes: bytes.len() as u64, created_at_ms: now_millis_u64() })
    }

    async fn read(&self, reference: &BlobReference) -> Result<Vec<u8>, BlobError> {
        let path = self.path_of(reference)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                Err(BlobError::NotFound(reference.clone()))
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn delete(&self, reference: &BlobReference) -> Result<bool, BlobError> {
        let path = self.path_of(reference)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    async fn exists(&self, reference: &BlobReference) -> Result<bool, BlobError> {
        let path = self.path_of(reference)?;
        Ok(tokio::fs::try_exists(&path).await?)
    }
}
