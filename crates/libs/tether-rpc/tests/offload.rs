mod common;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use common::Harness;
use serde::{Deserialize, Serialize};
use tether_proto::{BlobStore, InvokeError, ReplyEnvelope};
use tether_rpc::{FileBlobStore, GatewayConfig, MemoryBlobStore, MethodTable, PayloadPolicy};

const THRESHOLD: usize = 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Export {
    name: String,
    body: String,
}

fn export() -> Export {
    Export { name: "audit.log".into(), body: "x".repeat(10 * THRESHOLD) }
}

fn exporting_client(store: Arc<dyn BlobStore>) -> MethodTable {
    let mut methods = MethodTable::new().with_policy(PayloadPolicy::new(THRESHOLD, store));
    methods.register("Export", |_: ()| async move { Ok(export()) });
    methods
}

fn files_in(dir: &Path) -> usize {
    std::fs::read_dir(dir).map(|entries| entries.count()).unwrap_or(0)
}

#[tokio::test]
async fn oversized_reply_is_offloaded_read_back_and_deleted() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store: Arc<dyn BlobStore> = Arc::new(FileBlobStore::new(dir.path()));
    let config = GatewayConfig::default().with_inline_threshold(THRESHOLD);
    let gateway_store = store.clone();
    let harness = Harness::customized(config, move |gateway| gateway.with_blob_store(gateway_store));
    let conn = harness.connect_with("c1", "u1", exporting_client(store));

    let value: Export = harness.gateway.invoke_one(&conn, "Export", &()).await.expect("export");
    assert_eq!(value, export());

    let replies = dir.path().join("replies");
    assert!(replies.is_dir(), "blob was written under the configured folder");
    for _ in 0..200 {
        if files_in(&replies) == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(files_in(&replies), 0, "auto-delete removed the blob");
}

#[tokio::test]
async fn retention_keeps_the_blob_when_auto_delete_is_off() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store: Arc<dyn BlobStore> = Arc::new(FileBlobStore::new(dir.path()));
    let config = GatewayConfig::default().with_inline_threshold(THRESHOLD).with_auto_delete(false);
    let gateway_store = store.clone();
    let harness = Harness::customized(config, move |gateway| gateway.with_blob_store(gateway_store));
    let conn = harness.connect_with("c1", "u1", exporting_client(store));

    let value: Export = harness.gateway.invoke_one(&conn, "Export", &()).await.expect("export");
    assert_eq!(value, export());
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(files_in(&dir.path().join("replies")), 1);
}

#[tokio::test]
async fn gateway_without_a_store_cannot_read_offloaded_replies() {
    let client_store = Arc::new(MemoryBlobStore::new());
    let harness = Harness::new(GatewayConfig::default());
    let conn = harness.connect_with("c1", "u1", exporting_client(client_store.clone()));

    let err = harness.gateway.invoke_one::<_, Export>(&conn, "Export", &()).await.expect_err("no reader");
    assert!(
        matches!(err, InvokeError::BlobUnavailable { ref reason } if reason.contains("no blob store is configured")),
        "{err:?}"
    );
    assert_eq!(client_store.len(), 1);
}

#[tokio::test]
async fn missing_blob_is_reported_not_fatal() {
    let client_store = Arc::new(MemoryBlobStore::new());
    let gateway_store = Arc::new(MemoryBlobStore::new());
    let harness = Harness::customized(GatewayConfig::default(), move |gateway| gateway.with_blob_store(gateway_store));
    let conn = harness.connect_with("c1", "u1", exporting_client(client_store));

    let err = harness.gateway.invoke_one::<_, Export>(&conn, "Export", &()).await.expect_err("wrong store");
    assert!(matches!(err, InvokeError::BlobUnavailable { ref reason } if reason.starts_with("blob not found")));
    assert_eq!(err.user_message(), "request failed");
}

#[tokio::test]
async fn threshold_boundary_is_inclusive() {
    let store = Arc::new(MemoryBlobStore::new());
    let payload = tether_proto::codec::encode_payload(&"y".repeat(100)).expect("encode");
    let policy = PayloadPolicy::new(payload.len(), store.clone());
    assert!(matches!(policy.produce_from_bytes(payload.clone()).await, ReplyEnvelope::Inline { .. }));

    let policy = PayloadPolicy::new(payload.len() - 1, store.clone());
    assert!(matches!(policy.produce_from_bytes(payload).await, ReplyEnvelope::Offloaded { .. }));
    assert_eq!(store.len(), 1);
}
