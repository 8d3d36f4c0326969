use async_trait::async_trait;

use crate::error::BlobError;
use crate::types::{BlobReference, OffloadedBlob};

/// Side store for replies too large to travel inline.
///
/// References are opaque to callers. Folder and name sanitization is the
/// store's responsibility and must be traversal-safe.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn write(
        &self,
        bytes: &[u8],
        suggested_name: &str,
        folder: &str,
    ) -> Result<OffloadedBlob, BlobError>;

    async fn read(&self, reference: &BlobReference) -> Result<Vec<u8>, BlobError>;

    /// Returns `false` when nothing was stored under `reference`.
    async fn delete(&self, reference: &BlobReference) -> Result<bool, BlobError>;

    async fn exists(&self, reference: &BlobReference) -> Result<bool, BlobError>;
}
