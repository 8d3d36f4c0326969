use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{BlobError, TransportError};
use crate::traits::*;
use crate::types::*;

/// A transport with no links. Every send fails with `Closed`.
///
/// Useful as a placeholder while wiring a gateway, and in tests that must
/// prove no delivery path was taken.
pub struct NullTransport;

#[async_trait]
impl TransportAdapter for NullTransport {
    async fn send_to_connection(
        &self,
        _connection_id: &ConnectionId,
        _envelope: &InvocationEnvelope,
    ) -> Result<(), TransportError> {
        Err(TransportError::Closed("null transport".into()))
    }

    async fn send_to_user(
        &self,
        _user_id: &UserId,
        _envelope: &InvocationEnvelope,
    ) -> Result<(), TransportError> {
        Err(TransportError::Closed("null transport".into()))
    }

    async fn send_to_users(
        &self,
        _user_ids: &[UserId],
        _envelope: &InvocationEnvelope,
    ) -> Result<(), TransportError> {
        Err(TransportError::Closed("null transport".into()))
    }

    async fn send_to_all(&self, _envelope: &InvocationEnvelope) -> Result<(), TransportError> {
        Err(TransportError::Closed("null transport".into()))
    }

    fn register_reply_handler(&self, _handler: Arc<dyn ReplyHandler>) {}
}

/// A blob store that is never reachable.
pub struct NullBlobStore;

#[async_trait]
impl BlobStore for NullBlobStore {
    async fn write(
        &self,
        _bytes: &[u8],
        _suggested_name: &str,
        _folder: &str,
    ) -> Result<OffloadedBlob, BlobError> {
        Err(BlobError::Unavailable("null blob store".into()))
    }

    async fn read(&self, _reference: &BlobReference) -> Result<Vec<u8>, BlobError> {
        Err(BlobError::Unavailable("null blob store".into()))
    }

    async fn delete(&self, _reference: &BlobReference) -> Result<bool, BlobError> {
        Err(BlobError::Unavailable("null blob store".into()))
    }

    async fn exists(&self, _reference: &BlobReference) -> Result<bool, BlobError> {
        Err(BlobError::Unavailable("null blob store".into()))
    }
}
