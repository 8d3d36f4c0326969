mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::{Harness, Pong};
use tether_proto::{BlobError, BlobReference, BlobStore, InvokeError, OffloadedBlob};
use tether_rpc::{
    CallOptions, CancellationToken, GatewayConfig, LinkBehavior, MemoryBlobStore, MethodTable, PayloadPolicy,
    Target,
};
use tokio::time::Instant;

/// Upper bound on how long any test call may take before it counts as hung.
const HUNG: Duration = Duration::from_secs(30);

/// Blob store whose reads never complete.
struct HungStore;

#[async_trait]
impl BlobStore for HungStore {
    async fn write(&self, _: &[u8], _: &str, _: &str) -> Result<OffloadedBlob, BlobError> {
        Err(BlobError::Unavailable("read-only".into()))
    }

    async fn read(&self, _: &BlobReference) -> Result<Vec<u8>, BlobError> {
        std::future::pending().await
    }

    async fn delete(&self, _: &BlobReference) -> Result<bool, BlobError> {
        Ok(false)
    }

    async fn exists(&self, _: &BlobReference) -> Result<bool, BlobError> {
        Ok(true)
    }
}

fn exporting_client() -> MethodTable {
    let mut methods = MethodTable::new().with_policy(PayloadPolicy::new(64, Arc::new(MemoryBlobStore::new())));
    methods.register("Export", |_: ()| async move { Ok("x".repeat(4096)) });
    methods
}

#[tokio::test(start_paused = true)]
async fn stalled_send_ends_at_the_deadline() {
    let harness = Harness::new(GatewayConfig::default());
    let conn = harness.connect("c1", "u1");
    harness.transport.set_behavior(&conn, LinkBehavior::Stalled);

    let options = CallOptions::default().with_timeout(Duration::from_secs(1));
    let started = Instant::now();
    let err = tokio::time::timeout(
        HUNG,
        harness.gateway.invoke::<_, Pong>(Target::Connection(conn), "Ping", &(), options),
    )
    .await
    .expect("call returned")
    .expect_err("send never completes");

    assert!(matches!(err, InvokeError::Timeout { ref method, .. } if method == "Ping"));
    assert!(started.elapsed() < Duration::from_millis(1100), "{:?}", started.elapsed());
    assert_eq!(harness.gateway.responses().pending_len(), 0);
    assert_eq!(harness.gateway.in_flight(), 0);
}

#[tokio::test(start_paused = true)]
async fn cancelled_token_ends_a_stalled_send() {
    let harness = Harness::new(GatewayConfig::default());
    let conn = harness.connect("c1", "u1");
    harness.transport.set_behavior(&conn, LinkBehavior::Stalled);

    let token = CancellationToken::new();
    token.cancel();
    let options = CallOptions::default().with_cancel(token);
    let err = tokio::time::timeout(
        HUNG,
        harness.gateway.invoke::<_, Pong>(Target::Connection(conn), "Ping", &(), options),
    )
    .await
    .expect("call returned")
    .expect_err("cancelled");

    assert!(matches!(err, InvokeError::Timeout { elapsed_ms: 0, .. }));
    assert_eq!(harness.gateway.responses().pending_len(), 0);
    assert_eq!(harness.gateway.in_flight(), 0);
}

#[tokio::test(start_paused = true)]
async fn stalled_target_does_not_hold_up_the_rest_of_a_fan_out() {
    let harness = Harness::new(GatewayConfig::default());
    let stuck = harness.connect("stuck", "u1");
    let live = harness.connect("live", "u2");
    harness.transport.set_behavior(&stuck, LinkBehavior::Stalled);

    let options = CallOptions::default().with_timeout(Duration::from_secs(1));
    let started = Instant::now();
    let mut stream = tokio::time::timeout(
        HUNG,
        harness.gateway.invoke_many_streaming_with::<_, Pong>(&[stuck.clone(), live.clone()], "Ping", &(), options),
    )
    .await
    .expect("fan-out returned")
    .expect("fan-out");
    assert!(started.elapsed() < Duration::from_millis(1100), "{:?}", started.elapsed());

    let item = stream.next().await.expect("live reply");
    assert_eq!(item.connection_id, live);
    assert_eq!(item.result, Ok(Pong { pong: true }));
    assert!(item.received_at.duration_since(started) < Duration::from_millis(10));

    assert!(stream.next().await.is_none());
    assert!(stream.is_expired());
    assert_eq!(stream.pending_targets(), vec![stuck]);
    assert_eq!(harness.gateway.in_flight(), 0);
    assert_eq!(harness.gateway.responses().streaming_len(), 0);
}

#[tokio::test(start_paused = true)]
async fn hung_blob_read_surfaces_as_blob_unavailable() {
    let harness =
        Harness::customized(GatewayConfig::default(), |gateway| gateway.with_blob_store(Arc::new(HungStore)));
    let conn = harness.connect_with("c1", "u1", exporting_client());

    let options = CallOptions::default().with_timeout(Duration::from_secs(2));
    let started = Instant::now();
    let err = tokio::time::timeout(
        HUNG,
        harness.gateway.invoke::<_, String>(Target::Connection(conn.clone()), "Export", &(), options),
    )
    .await
    .expect("call returned")
    .expect_err("blob read hangs");
    assert!(
        matches!(err, InvokeError::BlobUnavailable { ref reason } if reason.starts_with("blob read timed out")),
        "{err:?}"
    );
    assert!(started.elapsed() < Duration::from_millis(2100), "{:?}", started.elapsed());
    assert_eq!(harness.gateway.in_flight(), 0);

    let options = CallOptions::default().with_timeout(Duration::from_secs(2));
    let mut stream = harness
        .gateway
        .invoke_many_streaming_with::<_, String>(&[conn], "Export", &(), options)
        .await
        .expect("fan-out");
    let item = tokio::time::timeout(HUNG, stream.next()).await.expect("item returned").expect("item");
    assert!(matches!(item.result, Err(InvokeError::BlobUnavailable { .. })));
    assert!(stream.next().await.is_none());
}
