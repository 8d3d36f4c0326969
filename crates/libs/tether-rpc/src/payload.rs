//! Inline-or-offload decisions for reply payloads.
//!
//! Producing side: a value whose encoding stays under the threshold travels
//! inline; anything larger is written to the [`BlobStore`] and only its
//! reference crosses the transport. Consuming side: the reverse, with the
//! blob optionally deleted once read.

use std::sync::Arc;

use serde::{de::DeserializeOwned, Serialize};
use tether_proto::codec::{decode_payload, encode_payload, NIL_PAYLOAD};
use tether_proto::{BlobError, BlobReference, BlobStore, InvokeError, ReplyEnvelope};
use tokio::time::Instant;

use crate::config::{GatewayConfig, DEFAULT_BLOB_FOLDER, DEFAULT_INLINE_THRESHOLD_BYTES};

const OFFLOAD_NAME: &str = "reply";

#[derive(Clone)]
pub struct PayloadPolicy {
    threshold: usize,
    store: Option<Arc<dyn BlobStore>>,
    auto_delete: bool,
    folder: String,
}

impl Default for PayloadPolicy {
    fn default() -> Self {
        Self::inline_only()
    }
}

impl PayloadPolicy {
    /// Never offloads; offloaded replies cannot be consumed.
    pub fn inline_only() -> Self {
        Self {
            threshold: DEFAULT_INLINE_THRESHOLD_BYTES,
            store: None,
            auto_delete: true,
            folder: DEFAULT_BLOB_FOLDER.to_string(),
        }
    }

    pub fn new(threshold: usize, store: Arc<dyn BlobStore>) -> Self {
        Self { threshold, store: Some(store), ..Self::inline_only() }
    }

    pub fn from_config(config: &GatewayConfig, store: Option<Arc<dyn BlobStore>>) -> Self {
        Self {
            threshold: config.inline_threshold_bytes,
            store,
            auto_delete: config.auto_delete_offloaded,
            folder: config.blob_folder.clone(),
        }
    }

    pub fn with_auto_delete(mut self, enabled: bool) -> Self {
        self.auto_delete = enabled;
        self
    }

    pub fn with_folder(mut self, folder: impl Into<String>) -> Self {
        self.folder = folder.into();
        self
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn has_store(&self) -> bool {
        self.store.is_some()
    }

    /// Encode `value` and pick its reply form. Encoding failures become a
    /// `Fault` reply rather than an error, since the caller is remote.
    pub async fn produce_reply<T: Serialize + ?Sized>(&self, value: &T) -> ReplyEnvelope {
        match encode_payload(value) {
            Ok(bytes) => self.produce_from_bytes(bytes).await,
            Err(err) => ReplyEnvelope::fault(format!("serialization failed: {err}")),
        }
    }

    pub async fn produce_from_bytes(&self, bytes: Vec<u8>) -> ReplyEnvelope {
        if bytes.as_slice() == NIL_PAYLOAD {
            return ReplyEnvelope::Empty;
        }
        if bytes.len() <= self.threshold {
            return ReplyEnvelope::Inline { payload: bytes };
        }
        let Some(store) = self.store.as_ref() else {
            log::warn!(
                "payload: {} byte reply exceeds inline threshold {} but no blob store is configured",
                bytes.len(),
                self.threshold
            );
            return ReplyEnvelope::Inline { payload: bytes };
        };
        match store.write(&bytes, OFFLOAD_NAME, &self.folder).await {
            Ok(blob) => {
                log::debug!("payload: offloaded {} bytes to {}", blob.size_bytes, blob.reference);
                ReplyEnvelope::Offloaded { reference: blob.reference, size_bytes: blob.size_bytes }
            }
            Err(err) => {
                log::warn!("payload: offload of {} bytes failed, sending inline: {}", bytes.len(), err);
                ReplyEnvelope::Inline { payload: bytes }
            }
        }
    }

    /// Turn a reply into the caller's value type.
    pub async fn consume_reply<T: DeserializeOwned>(
        &self,
        envelope: ReplyEnvelope,
    ) -> Result<T, InvokeError> {
        self.consume(envelope, None).await
    }

    /// Like [`consume_reply`](Self::consume_reply), but a blob read still
    /// outstanding at `deadline` fails with `BlobUnavailable`.
    pub async fn consume_reply_before<T: DeserializeOwned>(
        &self,
        envelope: ReplyEnvelope,
        deadline: Instant,
    ) -> Result<T, InvokeError> {
        self.consume(envelope, Some(deadline)).await
    }

    async fn consume<T: DeserializeOwned>(
        &self,
        envelope: ReplyEnvelope,
        deadline: Option<Instant>,
    ) -> Result<T, InvokeError> {
        match envelope {
            ReplyEnvelope::Empty => decode_payload(NIL_PAYLOAD).map_err(InvokeError::serialization),
            ReplyEnvelope::Inline { payload } => {
                decode_payload(&payload).map_err(InvokeError::serialization)
            }
            ReplyEnvelope::Fault { message } => Err(InvokeError::RemoteFault { message }),
            ReplyEnvelope::Offloaded { reference, size_bytes } => {
                let Some(store) = self.store.as_ref() else {
                    return Err(InvokeError::blob_unavailable(format!(
                        "offloaded reply {reference} but no blob store is configured"
                    )));
                };
                let bytes = match read_blob(store.as_ref(), &reference, deadline).await {
                    Ok(bytes) => bytes,
                    Err(BlobError::NotFound(reference)) => {
                        return Err(InvokeError::blob_unavailable(format!(
                            "blob not found: {reference}"
                        )));
                    }
                    Err(err) => return Err(err.into()),
                };
                if bytes.len() as u64 != size_bytes {
                    return Err(InvokeError::blob_unavailable(format!(
                        "malformed blob {reference}: expected {size_bytes} bytes, read {}",
                        bytes.len()
                    )));
                }
                let value = decode_payload(&bytes).map_err(|err| {
                    InvokeError::blob_unavailable(format!("malformed blob {reference}: {err}"))
                })?;
                if self.auto_delete {
                    let store = Arc::clone(store);
                    tokio::spawn(async move {
                        match store.delete(&reference).await {
                            Ok(true) => {}
                            Ok(false) => log::debug!("payload: blob {} already gone", reference),
                            Err(err) => log::warn!("payload: failed to delete blob {}: {}", reference, err),
                        }
                    });
                }
                Ok(value)
            }
        }
    }
}

async fn read_blob(
    store: &dyn BlobStore,
    reference: &BlobReference,
    deadline: Option<Instant>,
) -> Result<Vec<u8>, BlobError> {
    let Some(deadline) = deadline else {
        return store.read(reference).await;
    };
    match tokio::time::timeout_at(deadline, store.read(reference)).await {
        Ok(read) => read,
        Err(_) => {
            log::warn!("payload: read of blob {} did not finish before the call deadline", reference);
            Err(BlobError::TimedOut(reference.clone()))
        }
    }
}
