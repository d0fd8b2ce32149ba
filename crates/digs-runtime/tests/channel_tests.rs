//! Integration tests for the channel client against a broker.
//!
//! Covers:
//! - FIFO request ordering as seen on the wire
//! - Rejection of pending requests when the session drops
//! - Request timeouts
//! - The TCP broker carrying a full request/reply exchange

use digs_protocol::{LogLevel, Message, RequestId};
use digs_runtime::{
    ChannelClient, ClientError, ClientEvent, ClientEvents, Connector, LocalBroker, Packet,
    TcpBroker, TcpConnector,
};
use serde_json::json;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

// =============================================================================
// Test Fixtures
// =============================================================================

async fn caller(connector: &dyn Connector, peer: &str) -> (ChannelClient, ClientEvents) {
    ChannelClient::builder("caller")
        .subscribe_to(peer)
        .request_timeout(None)
        .connect(connector)
        .await
        .unwrap()
}

fn ping(n: u64) -> Message {
    Message::command("ping", &json!({ "n": n })).unwrap()
}

async fn next_request(inbound: &mut mpsc::UnboundedReceiver<Packet>) -> Packet {
    loop {
        let packet = tokio::time::timeout(Duration::from_secs(2), inbound.recv())
            .await
            .expect("timed out waiting for a packet")
            .expect("inbound closed");
        if packet.topic.contains("~req-") {
            return packet;
        }
    }
}

async fn wait_for_pending(client: &ChannelClient, count: usize) {
    for _ in 0..200 {
        if client.pending_requests() == count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!(
        "expected {count} pending requests, got {}",
        client.pending_requests()
    );
}

// =============================================================================
// FIFO ordering
// =============================================================================

#[tokio::test]
async fn only_the_head_request_is_on_the_wire() {
    let broker = LocalBroker::new();
    let mut server = broker.connect("server").await.unwrap();
    server.link.subscribe("digs/home/caller/#").await.unwrap();
    let (client, _events) = caller(&broker, "server").await;

    let requests = tokio::spawn({
        let client = client.clone();
        async move { tokio::join!(client.request(ping(1)), client.request(ping(2)), client.request(ping(3))) }
    });
    wait_for_pending(&client, 3).await;

    let first = next_request(&mut server.inbound).await;
    assert_eq!(first.topic, "digs/home/caller/ping~req-1");
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(server.inbound.try_recv().is_err(), "second request sent early");

    for n in 1..=3u64 {
        server
            .link
            .publish(Packet::new(
                format!("digs/home/server/ping~req-{n}"),
                json!({ "pong": n }).to_string(),
            ))
            .await
            .unwrap();
        if n < 3 {
            let next = next_request(&mut server.inbound).await;
            assert_eq!(next.topic, format!("digs/home/caller/ping~req-{}", n + 1));
        }
    }

    let (a, b, c) = requests.await.unwrap();
    assert_eq!(a.unwrap().into_payload(), json!({"pong": 1}));
    assert_eq!(b.unwrap().into_payload(), json!({"pong": 2}));
    assert_eq!(c.unwrap().into_payload(), json!({"pong": 3}));
    assert_eq!(client.pending_requests(), 0);
}

#[tokio::test]
async fn reply_for_a_non_head_id_is_not_a_response() {
    let broker = LocalBroker::new();
    let mut server = broker.connect("server").await.unwrap();
    server.link.subscribe("digs/home/caller/#").await.unwrap();
    let (client, mut events) = caller(&broker, "server").await;

    let pending = tokio::spawn({
        let client = client.clone();
        async move { client.request(ping(1)).await }
    });
    next_request(&mut server.inbound).await;

    // Stale id: surfaces as an inbound request, head stays pending.
    server
        .link
        .publish(Packet::new("digs/home/server/ping~req-9", "{}"))
        .await
        .unwrap();
    match events.recv().await.unwrap() {
        ClientEvent::Request { topic, .. } => {
            assert_eq!(topic.request_id(), Some(RequestId::new(9)));
        }
        other => panic!("expected Request, got: {other:?}"),
    }
    assert_eq!(client.pending_requests(), 1);

    server
        .link
        .publish(Packet::new("digs/home/server/ping~req-1", r#"{"ok":true}"#))
        .await
        .unwrap();
    let reply = pending.await.unwrap().unwrap();
    assert_eq!(reply.into_payload(), json!({"ok": true}));
}

// =============================================================================
// Failure paths
// =============================================================================

#[tokio::test]
async fn dropped_session_rejects_every_pending_request() {
    let broker = LocalBroker::new();
    let (client, mut events) = caller(&broker, "server").await;

    let requests = tokio::spawn({
        let client = client.clone();
        async move { tokio::join!(client.request(ping(1)), client.request(ping(2))) }
    });
    wait_for_pending(&client, 2).await;

    assert_eq!(broker.drop_client("caller"), 1);

    let (a, b) = requests.await.unwrap();
    assert!(matches!(a, Err(ClientError::Disconnected)), "got {a:?}");
    assert!(matches!(b, Err(ClientError::Disconnected)), "got {b:?}");
    assert!(!client.is_connected());
    assert!(matches!(events.recv().await, Some(ClientEvent::Disconnected)));
}

#[tokio::test]
async fn timed_out_request_frees_the_queue() {
    let broker = LocalBroker::new();
    let mut tap = broker.tap();
    let (client, _events) = ChannelClient::builder("caller")
        .subscribe_to("nobody")
        .request_timeout(Some(Duration::from_millis(40)))
        .connect(&broker)
        .await
        .unwrap();

    match client.request(ping(1)).await {
        Err(ClientError::Timeout {
            request_id,
            timeout_ms,
        }) => {
            assert_eq!(request_id, RequestId::new(1));
            assert_eq!(timeout_ms, 40);
        }
        other => panic!("expected Timeout, got: {other:?}"),
    }
    assert_eq!(client.pending_requests(), 0);

    let _ = client.request(ping(2)).await;
    let topics: Vec<String> = std::iter::from_fn(|| tap.try_recv().ok())
        .map(|p| p.topic)
        .collect();
    assert_eq!(
        topics,
        vec![
            "digs/home/caller/online",
            "digs/home/caller/ping~req-1",
            "digs/home/caller/ping~req-2",
        ]
    );
}

#[tokio::test]
async fn queued_request_timeout_starts_at_the_head() {
    let broker = LocalBroker::new();
    let mut server = broker.connect("server").await.unwrap();
    server.link.subscribe("digs/home/caller/#").await.unwrap();
    let (client, _events) = ChannelClient::builder("caller")
        .subscribe_to("server")
        .request_timeout(Some(Duration::from_millis(300)))
        .connect(&broker)
        .await
        .unwrap();

    let requests = tokio::spawn({
        let client = client.clone();
        async move { tokio::join!(client.request(ping(1)), client.request(ping(2))) }
    });
    wait_for_pending(&client, 2).await;

    // Each reply lands within the limit, but together they exceed it.
    next_request(&mut server.inbound).await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    server
        .link
        .publish(Packet::new("digs/home/server/ping~req-1", r#"{"n":1}"#))
        .await
        .unwrap();
    let second = next_request(&mut server.inbound).await;
    assert_eq!(second.topic, "digs/home/caller/ping~req-2");
    tokio::time::sleep(Duration::from_millis(150)).await;
    server
        .link
        .publish(Packet::new("digs/home/server/ping~req-2", r#"{"n":2}"#))
        .await
        .unwrap();

    let (a, b) = requests.await.unwrap();
    assert_eq!(a.unwrap().into_payload(), json!({"n": 1}));
    assert_eq!(b.unwrap().into_payload(), json!({"n": 2}));
}

// =============================================================================
// TCP transport
// =============================================================================

#[tokio::test]
async fn request_and_reply_over_tcp() {
    let broker = TcpBroker::bind("127.0.0.1:0").await.unwrap();
    let addr = broker.local_addr().unwrap().to_string();
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    tokio::spawn(broker.serve(async move {
        let _ = stop_rx.await;
    }));

    let connector = TcpConnector::new(addr);
    let (server, mut server_events) = ChannelClient::builder("server")
        .subscribe_to("caller")
        .connect(&connector)
        .await
        .unwrap();
    let (client, mut events) = caller(&connector, "server").await;

    tokio::spawn(async move {
        let _server = server;
        while let Some(event) = server_events.recv().await {
            if let ClientEvent::Request {
                message, responder, ..
            } = event
            {
                let n = message.into_payload()["n"].as_u64().unwrap_or(0);
                responder.reply_value(json!({ "doubled": n * 2 })).await.unwrap();
            }
        }
    });

    let reply = client.request(ping(21)).await.unwrap();
    assert_eq!(reply.into_payload(), json!({"doubled": 42}));

    client
        .publish(&Message::log(LogLevel::Info, "still here"))
        .await
        .unwrap();

    stop_tx.send(()).unwrap();
    loop {
        match tokio::time::timeout(Duration::from_secs(2), events.recv()).await {
            Ok(Some(ClientEvent::Disconnected)) => break,
            Ok(Some(_)) => continue,
            other => panic!("expected Disconnected, got: {other:?}"),
        }
    }
    assert!(!client.is_connected());
}
