//! Live channel behavior against an in-process websocket server, plus the
//! polling fallback against an unreachable one.

use futures::{SinkExt, StreamExt};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{WebSocketStream, accept_async};
use voltek_api::source::mock::MockSource;
use voltek_realtime::{
    ChannelState, ClientFrame, RealtimeChannel, RealtimeConfig, backoff_delay,
};
use voltek_types::{ChangeKind, Item};

fn make_item(id: i64, name: &str) -> Item {
    Item::from_value(json!({ "id": id, "name": name })).unwrap()
}

fn make_config(url: &str) -> RealtimeConfig {
    RealtimeConfig {
        ws_url: url.to_string(),
        access_token: Some("workshop-token".to_string()),
        reconnect_base: Duration::from_millis(10),
        reconnect_cap: Duration::from_millis(40),
        max_reconnect_attempts: 2,
        poll_interval: Duration::from_millis(25),
        auth_timeout: Duration::from_secs(5),
    }
}

/// A ws:// url nothing listens on.
async fn dead_endpoint() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);
    format!("ws://{addr}")
}

async fn next_client_frame(socket: &mut WebSocketStream<TcpStream>) -> ClientFrame {
    loop {
        let message = timeout(Duration::from_secs(5), socket.next())
            .await
            .expect("timed out waiting for a client frame")
            .expect("socket closed before the expected frame")
            .expect("socket error");
        if let Message::Text(text) = message {
            return serde_json::from_str(text.as_str()).expect("client frame should decode");
        }
    }
}

async fn send_server_frame(socket: &mut WebSocketStream<TcpStream>, frame: serde_json::Value) {
    socket
        .send(Message::Text(frame.to_string().into()))
        .await
        .expect("server send");
}

async fn wait_for_state(channel: &RealtimeChannel, state: ChannelState) {
    timeout(Duration::from_secs(5), async {
        while channel.state().await != state {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("channel never reached {state}"));
}

// ── Backoff ──────────────────────────────────────────────────────────────

#[test]
fn backoff_doubles_per_attempt_and_caps() {
    let base = Duration::from_secs(1);
    let cap = Duration::from_secs(30);

    assert_eq!(backoff_delay(1, base, cap), Duration::from_secs(1));
    assert_eq!(backoff_delay(2, base, cap), Duration::from_secs(2));
    assert_eq!(backoff_delay(3, base, cap), Duration::from_secs(4));
    assert_eq!(backoff_delay(5, base, cap), Duration::from_secs(16));
    assert_eq!(backoff_delay(6, base, cap), cap);
    assert_eq!(backoff_delay(100, base, cap), cap);
}

// ── Socket sessions ──────────────────────────────────────────────────────

#[tokio::test]
async fn channel_starts_disconnected() {
    let channel = RealtimeChannel::new(RealtimeConfig::default(), Arc::new(MockSource::new()));

    assert_eq!(channel.state().await, ChannelState::Disconnected);
    assert_eq!(channel.reconnect_attempts(), 0);
}

#[tokio::test]
async fn shutdown_without_connect_is_a_no_op() {
    let channel = RealtimeChannel::new(RealtimeConfig::default(), Arc::new(MockSource::new()));
    channel.shutdown().await;

    assert_eq!(channel.state().await, ChannelState::Disconnected);
}

#[tokio::test]
async fn delivers_subscription_events_over_the_socket() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.expect("accept");
        let mut socket = accept_async(stream).await.expect("handshake");

        let auth = next_client_frame(&mut socket).await;
        assert_eq!(
            auth,
            ClientFrame::Auth {
                access_token: "workshop-token".to_string()
            }
        );
        send_server_frame(&mut socket, json!({ "type": "auth", "status": "ok" })).await;

        let subscribe = next_client_frame(&mut socket).await;
        assert_eq!(subscribe, ClientFrame::subscribe("products"));

        // An init burst precedes real events; it must not reach subscribers.
        send_server_frame(
            &mut socket,
            json!({
                "type": "subscription",
                "event": "init",
                "collection": "products",
                "data": [{ "id": 1, "name": "stale" }],
            }),
        )
        .await;
        send_server_frame(
            &mut socket,
            json!({
                "type": "subscription",
                "event": "update",
                "collection": "products",
                "data": [{ "id": 7, "name": "Relay board" }],
            }),
        )
        .await;

        // Hold the socket open until the client side is done.
        let _ = timeout(Duration::from_secs(5), socket.next()).await;
    });

    let channel = RealtimeChannel::new(
        make_config(&format!("ws://{addr}")),
        Arc::new(MockSource::new()),
    );
    let mut products = channel.subscribe("products").await;

    let event = timeout(Duration::from_secs(5), products.recv())
        .await
        .expect("timed out waiting for an event")
        .expect("channel closed");
    assert_eq!(event.kind, ChangeKind::Update);
    assert_eq!(event.collection, "products");
    assert_eq!(event.key.as_str(), "7");
    let item = event.item.expect("update should carry the record");
    assert_eq!(item.display("name"), "Relay board");

    channel.shutdown().await;
    server.abort();
}

#[tokio::test]
async fn answers_server_ping_with_pong() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.expect("accept");
        let mut socket = accept_async(stream).await.expect("handshake");
        let _auth = next_client_frame(&mut socket).await;
        send_server_frame(&mut socket, json!({ "type": "auth", "status": "ok" })).await;
        send_server_frame(&mut socket, json!({ "type": "ping" })).await;
        next_client_frame(&mut socket).await
    });

    let channel = RealtimeChannel::new(
        make_config(&format!("ws://{addr}")),
        Arc::new(MockSource::new()),
    );
    channel.connect().await;

    let answer = timeout(Duration::from_secs(5), server)
        .await
        .expect("timed out waiting for the pong")
        .expect("server task");
    assert_eq!(answer, ClientFrame::Pong);

    channel.shutdown().await;
}

#[tokio::test]
async fn wildcard_subscriber_sees_every_collection() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.expect("accept");
        let mut socket = accept_async(stream).await.expect("handshake");
        let _auth = next_client_frame(&mut socket).await;
        send_server_frame(&mut socket, json!({ "type": "auth", "status": "ok" })).await;

        send_server_frame(
            &mut socket,
            json!({
                "type": "subscription",
                "event": "create",
                "collection": "products",
                "data": [{ "id": 1, "name": "Relay board" }],
            }),
        )
        .await;
        send_server_frame(
            &mut socket,
            json!({
                "type": "subscription",
                "event": "delete",
                "collection": "pages",
                "data": ["about"],
            }),
        )
        .await;

        let _ = timeout(Duration::from_secs(5), socket.next()).await;
    });

    let channel = RealtimeChannel::new(
        make_config(&format!("ws://{addr}")),
        Arc::new(MockSource::new()),
    );
    let mut all = channel.subscribe_all().await;

    let first = timeout(Duration::from_secs(5), all.recv())
        .await
        .expect("timed out waiting for the create")
        .expect("channel closed");
    assert_eq!(first.collection, "products");
    assert_eq!(first.kind, ChangeKind::Create);

    let second = timeout(Duration::from_secs(5), all.recv())
        .await
        .expect("timed out waiting for the delete")
        .expect("channel closed");
    assert_eq!(second.collection, "pages");
    assert_eq!(second.kind, ChangeKind::Delete);
    assert_eq!(second.key.as_str(), "about");
    assert!(second.item.is_none());

    channel.shutdown().await;
    server.abort();
}

#[tokio::test]
async fn last_unsubscribe_announces_on_the_wire() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.expect("accept");
        let mut socket = accept_async(stream).await.expect("handshake");
        let _auth = next_client_frame(&mut socket).await;
        send_server_frame(&mut socket, json!({ "type": "auth", "status": "ok" })).await;

        let subscribe = next_client_frame(&mut socket).await;
        assert_eq!(subscribe, ClientFrame::subscribe("products"));

        let unsubscribe = next_client_frame(&mut socket).await;
        assert_eq!(
            unsubscribe,
            ClientFrame::Unsubscribe {
                collection: "products".to_string()
            }
        );
    });

    let channel = RealtimeChannel::new(
        make_config(&format!("ws://{addr}")),
        Arc::new(MockSource::new()),
    );
    let products = channel.subscribe("products").await;
    wait_for_state(&channel, ChannelState::Connected).await;

    channel.unsubscribe(&products).await;

    timeout(Duration::from_secs(5), server)
        .await
        .expect("timed out waiting for the unsubscribe")
        .expect("server task");
    channel.shutdown().await;
}

#[tokio::test]
async fn reconnects_after_the_server_drops_the_socket() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");

    let server = tokio::spawn(async move {
        // First session: greet, then drop the socket mid-flight.
        let (stream, _) = listener.accept().await.expect("accept");
        let mut socket = accept_async(stream).await.expect("handshake");
        let _auth = next_client_frame(&mut socket).await;
        send_server_frame(&mut socket, json!({ "type": "auth", "status": "ok" })).await;
        drop(socket);

        // Second session delivers.
        let (stream, _) = listener.accept().await.expect("accept again");
        let mut socket = accept_async(stream).await.expect("handshake again");
        let _auth = next_client_frame(&mut socket).await;
        send_server_frame(&mut socket, json!({ "type": "auth", "status": "ok" })).await;
        let subscribe = next_client_frame(&mut socket).await;
        assert_eq!(subscribe, ClientFrame::subscribe("products"));
        send_server_frame(
            &mut socket,
            json!({
                "type": "subscription",
                "event": "create",
                "collection": "products",
                "data": [{ "id": 5, "name": "Fuse kit" }],
            }),
        )
        .await;
        let _ = timeout(Duration::from_secs(5), socket.next()).await;
    });

    let mut config = make_config(&format!("ws://{addr}"));
    config.reconnect_base = Duration::from_millis(5);
    config.max_reconnect_attempts = 3;
    let channel = RealtimeChannel::new(config, Arc::new(MockSource::new()));
    let mut products = channel.subscribe("products").await;

    let event = timeout(Duration::from_secs(5), products.recv())
        .await
        .expect("timed out waiting for an event after the reconnect")
        .expect("channel closed");
    assert_eq!(event.kind, ChangeKind::Create);
    assert_eq!(event.key.as_str(), "5");
    // The successful handshake reset the failure streak.
    assert_eq!(channel.reconnect_attempts(), 0);

    channel.shutdown().await;
    server.abort();
}

#[tokio::test]
async fn rejected_auth_burns_a_reconnect_attempt() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.expect("accept");
        let mut socket = accept_async(stream).await.expect("handshake");
        let _auth = next_client_frame(&mut socket).await;
        send_server_frame(&mut socket, json!({ "type": "auth", "status": "error" })).await;
        let _ = socket.close(None).await;
    });

    let mut config = make_config(&format!("ws://{addr}"));
    config.max_reconnect_attempts = 1;
    let channel = RealtimeChannel::new(config, Arc::new(MockSource::new()));
    channel.connect().await;

    wait_for_state(&channel, ChannelState::Fallback).await;
    assert_eq!(channel.reconnect_attempts(), 1);

    channel.shutdown().await;
    server.abort();
}

#[tokio::test]
async fn dropped_subscriber_leaves_others_delivering() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.expect("accept");
        let mut socket = accept_async(stream).await.expect("handshake");
        let _auth = next_client_frame(&mut socket).await;
        send_server_frame(&mut socket, json!({ "type": "auth", "status": "ok" })).await;
        let subscribe = next_client_frame(&mut socket).await;
        assert_eq!(subscribe, ClientFrame::subscribe("products"));

        send_server_frame(
            &mut socket,
            json!({
                "type": "subscription",
                "event": "create",
                "collection": "products",
                "data": [{ "id": 1, "name": "Relay board" }],
            }),
        )
        .await;
        send_server_frame(
            &mut socket,
            json!({
                "type": "subscription",
                "event": "update",
                "collection": "products",
                "data": [{ "id": 1, "name": "Relay board v2" }],
            }),
        )
        .await;

        let _ = timeout(Duration::from_secs(5), socket.next()).await;
    });

    let channel = RealtimeChannel::new(
        make_config(&format!("ws://{addr}")),
        Arc::new(MockSource::new()),
    );
    let mut kept = channel.subscribe("products").await;
    let dropped = channel.subscribe("products").await;
    drop(dropped);

    let first = timeout(Duration::from_secs(5), kept.recv())
        .await
        .expect("timed out waiting for the create")
        .expect("channel closed");
    assert_eq!(first.kind, ChangeKind::Create);

    let second = timeout(Duration::from_secs(5), kept.recv())
        .await
        .expect("timed out waiting for the update")
        .expect("channel closed");
    assert_eq!(second.kind, ChangeKind::Update);

    channel.shutdown().await;
    server.abort();
}

// ── Polling fallback ─────────────────────────────────────────────────────

#[tokio::test]
async fn exhausted_reconnects_degrade_to_polling() {
    let source = Arc::new(MockSource::new());
    source.set_collection("products", vec![make_item(1, "Relay board")]);

    let mut config = make_config(&dead_endpoint().await);
    config.max_reconnect_attempts = 1;
    config.reconnect_base = Duration::from_millis(1);

    let channel = RealtimeChannel::new(config, source.clone());
    let mut products = channel.subscribe("products").await;
    wait_for_state(&channel, ChannelState::Fallback).await;

    // The baseline seed is silent; only changes after it produce events.
    source.set_collection(
        "products",
        vec![make_item(1, "Relay board"), make_item(2, "Wiring loom")],
    );

    let event = timeout(Duration::from_secs(5), products.recv())
        .await
        .expect("timed out waiting for a polled event")
        .expect("channel closed");
    assert_eq!(event.kind, ChangeKind::Create);
    assert_eq!(event.collection, "products");
    assert_eq!(event.key.as_str(), "2");

    channel.shutdown().await;
}

#[tokio::test]
async fn fallback_subscription_seeds_without_history_events() {
    let source = Arc::new(MockSource::new());
    source.set_collection("pages", vec![make_item(1, "Home"), make_item(2, "Contact")]);

    let mut config = make_config(&dead_endpoint().await);
    config.max_reconnect_attempts = 1;
    config.reconnect_base = Duration::from_millis(1);

    let channel = RealtimeChannel::new(config, source.clone());
    channel.connect().await;
    wait_for_state(&channel, ChannelState::Fallback).await;

    let mut pages = channel.subscribe("pages").await;

    // Let a few unchanged polls pass; they must stay quiet.
    tokio::time::sleep(Duration::from_millis(60)).await;
    source.set_collection("pages", vec![make_item(1, "Home")]);

    let event = timeout(Duration::from_secs(5), pages.recv())
        .await
        .expect("timed out waiting for the delete")
        .expect("channel closed");
    assert_eq!(event.kind, ChangeKind::Delete);
    assert_eq!(event.key.as_str(), "2");
    assert!(event.item.is_none());

    channel.shutdown().await;
}
