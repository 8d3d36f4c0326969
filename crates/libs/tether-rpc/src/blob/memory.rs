use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use tether_proto::{BlobError, BlobReference, BlobStore, OffloadedBlob};

use super::{new_reference, split_reference};
use crate::helpers::now_millis_u64;

/// Process-local blob store, mainly for tests and the diagnostic harness.
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<HashMap<BlobReference, (OffloadedBlob, Vec<u8>)>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.lock().expect("blobs mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn metadata(&self, reference: &BlobReference) -> Option<OffloadedBlob> {
        self.blobs.lock().expect("blobs mutex poisoned").get(reference).map(|(meta, _)| meta.clone())
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn write(
        &self,
        bytes: &[u8],
        suggested_name: &str,
        folder: &str,
    ) -> Result<OffloadedBlob, BlobError> {
        let blob = OffloadedBlob {
            reference: new_reference(suggested_name, folder),
            size_bytes: bytes.len() as u64,
            created_at_ms: now_millis_u64(),
        };
        self.blobs
            .lock()
            .expect("blobs mutex poisoned")
            .insert(blob.reference.clone(), (blob.clone(), bytes.to_vec()));
        Ok(blob)
    }

    async fn read(&self, reference: &BlobReference) -> Result<Vec<u8>, BlobError> {
        split_reference(reference)?;
        self.blobs
            .lock()
            .expect("blobs mutex poisoned")
            .get(reference)
            .map(|(_, bytes)| bytes.clone())
            .ok_or_else(|| BlobError::NotFound(reference.clone()))
    }

    async fn delete(&self, reference: &BlobReference) -> Result<bool, BlobError> {
        split_reference(reference)?;
        Ok(self.blobs.lock().expect("blobs mutex poisoned").remove(reference).is_some())
    }

    async fn exists(&self, reference: &BlobReference) -> Result<bool, BlobError> {
        split_reference(reference)?;
        Ok(self.blobs.lock().expect("blobs mutex poisoned").contains_key(reference))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_read_delete() {
        let store = MemoryBlobStore::new();
        let blob = store.write(b"payload", "reply", "replies").await.expect("write");
        assert_eq!(blob.size_bytes, 7);
        assert!(blob.reference.as_str().starts_with("replies/reply-"));
        assert_eq!(store.metadata(&blob.reference), Some(blob.clone()));

        assert_eq!(store.read(&blob.reference).await.expect("read"), b"payload");
        assert!(store.exists(&blob.reference).await.expect("exists"));
        assert!(store.delete(&blob.reference).await.expect("delete"));
        assert!(!store.delete(&blob.reference).await.expect("second delete"));
        assert!(store.is_empty());

        let err = store.read(&blob.reference).await.expect_err("gone");
        assert!(matches!(err, BlobError::NotFound(_)));
    }
}
