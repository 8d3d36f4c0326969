mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{Harness, Pong};
use tether_proto::{ConnectionId, CorrelationId, InvokeError, ReplyEnvelope, UserId};
use tether_rpc::{CallOptions, GatewayConfig, LinkBehavior, SequentialCorrelationIds, Target};

#[tokio::test]
async fn invoke_one_returns_the_targets_reply() {
    let harness = Harness::new(GatewayConfig::default());
    let conn = harness.connect("conn-1", "user-1");

    let reply: Pong = tokio::time::timeout(
        Duration::from_millis(50),
        harness.gateway.invoke_one(&conn, "Ping", &()),
    )
    .await
    .expect("replied within 50ms")
    .expect("ping");
    assert_eq!(reply, Pong { pong: true });
    assert_eq!(harness.gateway.in_flight(), 0);
    assert_eq!(harness.gateway.responses().pending_len(), 0);
}

#[tokio::test]
async fn user_without_connections_is_not_connected_and_nothing_is_sent() {
    let harness = Harness::new(GatewayConfig::default());
    harness.connect("conn-1", "user-1");

    let err = harness
        .gateway
        .invoke_user::<_, Pong>(&UserId::new("user-x"), "Ping", &())
        .await
        .expect_err("no connections");
    assert_eq!(err, InvokeError::NotConnected { target: "user user-x".into() });
    assert_eq!(err.user_message(), "recipient unavailable");
    assert_eq!(harness.transport.sent_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn silent_target_times_out_and_late_reply_is_dropped() {
    let harness = Harness::customized(GatewayConfig::default(), |gateway| {
        gateway.with_id_source(Arc::new(SequentialCorrelationIds::new("slow")))
    });
    let conn = harness.connect("conn-2", "user-2");
    harness.transport.set_behavior(&conn, LinkBehavior::Silent);

    let options = CallOptions::default().with_timeout(Duration::from_secs(2));
    let started = tokio::time::Instant::now();
    let err = harness
        .gateway
        .invoke::<_, Pong>(Target::Connection(conn), "Slow", &(), options)
        .await
        .expect_err("timeout");
    let elapsed = started.elapsed();

    assert!(matches!(err, InvokeError::Timeout { ref method, .. } if method == "Slow"));
    assert!(err.is_retryable());
    assert!(elapsed >= Duration::from_secs(2) && elapsed < Duration::from_millis(2100), "{elapsed:?}");
    assert!(!harness.gateway.responses().resolve_single(&CorrelationId::new("slow-0"), ReplyEnvelope::Empty));
    assert_eq!(harness.gateway.responses().pending_len(), 0);
    assert_eq!(harness.gateway.in_flight(), 0);
}

#[tokio::test(start_paused = true)]
async fn streaming_yields_in_arrival_order_with_synthesized_faults() {
    let harness = Harness::new(GatewayConfig::default());
    let a = harness.connect("a", "user-a");
    let b = harness.connect("b", "user-b");
    let c = harness.connect("c", "user-c");
    harness.transport.set_behavior(&b, LinkBehavior::Delayed(Duration::from_secs(1)));
    harness.transport.set_behavior(&c, LinkBehavior::RefuseSends);

    let mut stream = harness
        .gateway
        .invoke_many_streaming::<_, String>(&[a.clone(), b.clone(), c.clone()], "Whoami", &())
        .await
        .expect("fan-out");
    assert_eq!(harness.gateway.in_flight(), 1);

    let first = stream.next().await.expect("a");
    assert_eq!(first.connection_id, a);
    assert_eq!(first.result.as_deref(), Ok("a"));

    let second = stream.next().await.expect("c");
    assert_eq!(second.connection_id, c);
    assert!(
        matches!(second.result, Err(InvokeError::RemoteFault { ref message }) if message.starts_with("send failed"))
    );

    let third = stream.next().await.expect("b");
    assert_eq!(third.connection_id, b);
    assert_eq!(third.result.as_deref(), Ok("b"));
    assert!(third.received_at.duration_since(first.received_at) >= Duration::from_secs(1));

    assert!(stream.next().await.is_none());
    assert!(stream.pending_targets().is_empty());
    assert!(!stream.is_expired());
    assert_eq!(harness.gateway.in_flight(), 0);
    assert_eq!(harness.gateway.responses().streaming_len(), 0);
}

#[tokio::test(start_paused = true)]
async fn streaming_deadline_closes_early_and_keeps_delivered_items() {
    let harness = Harness::customized(GatewayConfig::default(), |gateway| {
        gateway.with_id_source(Arc::new(SequentialCorrelationIds::new("fan")))
    });
    let live = harness.connect("live", "u1");
    let mute = harness.connect("mute", "u2");
    harness.transport.set_behavior(&mute, LinkBehavior::Silent);

    let options = CallOptions::default().with_timeout(Duration::from_secs(1));
    let mut stream = harness
        .gateway
        .invoke_many_streaming_with::<_, Pong>(&[live.clone(), mute.clone()], "Ping", &(), options)
        .await
        .expect("fan-out");

    let item = stream.next().await.expect("live reply");
    assert_eq!(item.connection_id, live);
    assert!(stream.next().await.is_none());
    assert!(stream.is_expired());
    assert_eq!(stream.pending_targets(), vec![mute.clone()]);
    assert_eq!(harness.gateway.responses().streaming_len(), 0);

    // late reply for the expired fan-out
    assert!(!harness.gateway.responses().append_streaming(&CorrelationId::new("fan-0"), &mute, ReplyEnvelope::Empty));
}

#[tokio::test]
async fn first_reply_wins_across_a_users_connections() {
    let harness = Harness::new(GatewayConfig::default());
    harness.connect("phone", "alice");
    harness.connect("laptop", "alice");

    let who: String = harness.gateway.invoke_user(&UserId::new("alice"), "Whoami", &()).await.expect("reply");
    assert_eq!(who, "laptop");
    assert_eq!(harness.transport.sent_count(), 2);

    let who: String = harness
        .gateway
        .invoke_users(&[UserId::new("nobody"), UserId::new("alice")], "Whoami", &())
        .await
        .expect("reply");
    assert_eq!(who, "laptop");

    let echoed: serde_json::Value =
        harness.gateway.invoke_all("Echo", &serde_json::json!({"n": 1})).await.expect("echo");
    assert_eq!(echoed, serde_json::json!({"n": 1}));
}

#[tokio::test]
async fn remote_faults_are_typed() {
    let harness = Harness::new(GatewayConfig::default());
    let conn = harness.connect("c1", "u1");

    let err = harness.gateway.invoke_one::<_, Pong>(&conn, "Missing", &()).await.expect_err("unknown method");
    assert_eq!(err, InvokeError::RemoteFault { message: "unknown method: Missing".into() });
    assert_eq!(err.user_message(), "request failed");

    let err = harness.gateway.invoke_one::<_, u64>(&conn, "Ping", &()).await.expect_err("wrong type");
    assert!(matches!(err, InvokeError::SerializationFault { .. }));
}

#[tokio::test]
async fn stale_directory_entry_reports_not_connected() {
    let harness = Harness::new(GatewayConfig::default());
    let conn = harness.connect("c1", "u1");
    harness.transport.drop_link(&conn);

    let err = harness
        .gateway
        .invoke_one::<_, Pong>(&ConnectionId::new("c1"), "Ping", &())
        .await
        .expect_err("link gone");
    assert!(matches!(err, InvokeError::NotConnected { .. }));
    assert_eq!(harness.gateway.responses().pending_len(), 0);
}
