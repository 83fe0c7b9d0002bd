use std::net::{SocketAddr, TcpListener};

use chitchat::api::{build_router, AppState};
use chitchat::config::Config;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage, MaybeTlsStream, WebSocketStream};

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn spawn_server() -> (SocketAddr, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    listener.set_nonblocking(true).unwrap();
    let config = Config {
        bind: addr.to_string(),
        origin: None,
        logging_enabled: false,
    };
    let state = AppState::new(config);
    let app = build_router(state);
    let server = tokio::spawn(async move {
        axum::Server::from_tcp(listener)
            .unwrap()
            .serve(app.into_make_service())
            .await
            .unwrap();
    });
    (addr, server)
}

async fn connect(addr: SocketAddr) -> Ws {
    let (ws, _) = connect_async(format!("ws://{}/ws", addr)).await.unwrap();
    ws
}

async fn send(ws: &mut Ws, frame: Value) {
    ws.send(WsMessage::Text(frame.to_string())).await.unwrap();
}

async fn recv(ws: &mut Ws) -> Value {
    loop {
        let msg = timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("timed out waiting for event")
            .unwrap()
            .unwrap();
        if let WsMessage::Text(text) = msg {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

/// Skip unrelated traffic until a frame with the given event tag arrives.
async fn recv_event(ws: &mut Ws, event: &str) -> Value {
    loop {
        let frame = recv(ws).await;
        if frame["event"] == event {
            return frame;
        }
    }
}

fn join_frame(name: &str, room: &str, secret: Option<&str>) -> Value {
    let mut data = json!({"name": name, "room": room});
    if let Some(secret) = secret {
        data["secret"] = json!(secret);
    }
    json!({"event": "join", "data": data})
}

#[tokio::test]
async fn health_endpoint_responds() {
    let (addr, server) = spawn_server().await;
    let body = reqwest::get(format!("http://{}/api/health", addr))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(body, "ok");
    server.abort();
}

#[tokio::test]
async fn public_join_history_and_broadcast_flow() {
    let (addr, server) = spawn_server().await;

    let mut alice = connect(addr).await;
    send(&mut alice, join_frame("alice", "lobby", None)).await;
    let history = recv_event(&mut alice, "message-history").await;
    assert_eq!(history["data"], json!([]));
    let users = recv_event(&mut alice, "room-users").await;
    assert_eq!(users["data"], json!(["alice"]));

    let mut bob = connect(addr).await;
    send(&mut bob, join_frame("bob", "lobby", None)).await;
    let peer = recv_event(&mut alice, "peer-joined").await;
    assert_eq!(peer["data"]["name"], "bob");
    let notice = recv_event(&mut alice, "message").await;
    assert_eq!(notice["data"]["is_system"], true);
    assert_eq!(notice["data"]["text"], "bob has joined the room");
    let users = recv_event(&mut alice, "room-users").await;
    assert_eq!(users["data"], json!(["alice", "bob"]));
    recv_event(&mut bob, "message-history").await;

    send(
        &mut bob,
        json!({"event": "message", "data": {"id": "m1", "user": "bob", "type": "text", "text": "hi"}}),
    )
    .await;
    let msg = recv_event(&mut alice, "message").await;
    assert_eq!(msg["data"]["id"], "m1");
    // chat messages echo back to the sender as well
    let echo = recv_event(&mut bob, "message").await;
    assert_eq!(echo["data"]["id"], "m1");

    let mut carol = connect(addr).await;
    send(&mut carol, join_frame("carol", "lobby", None)).await;
    let history = recv_event(&mut carol, "message-history").await;
    let entries = history["data"].as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["id"], "m1");

    server.abort();
}

#[tokio::test]
async fn private_room_password_flow() {
    let (addr, server) = spawn_server().await;

    let mut alice = connect(addr).await;
    send(&mut alice, join_frame("alice", "vip", Some("pw1"))).await;
    recv_event(&mut alice, "message-history").await;

    let mut bob = connect(addr).await;
    send(&mut bob, join_frame("bob", "vip", None)).await;
    let err = recv_event(&mut bob, "join-error").await;
    assert_eq!(err["data"]["reason"], "Password required");

    send(&mut bob, join_frame("bob", "vip", Some("pw2"))).await;
    let err = recv_event(&mut bob, "join-error").await;
    assert_eq!(err["data"]["reason"], "Incorrect password");

    send(&mut bob, join_frame("bob", "vip", Some("pw1"))).await;
    recv_event(&mut bob, "message-history").await;
    let users = recv_event(&mut bob, "room-users").await;
    assert_eq!(users["data"], json!(["alice", "bob"]));

    server.abort();
}

#[tokio::test]
async fn join_request_approval_is_consumed_once() {
    let (addr, server) = spawn_server().await;

    let mut alice = connect(addr).await;
    send(&mut alice, join_frame("alice", "vip", Some("pw1"))).await;
    recv_event(&mut alice, "message-history").await;

    let mut bob = connect(addr).await;
    send(
        &mut bob,
        json!({"event": "join-request", "data": {"name": "bob", "room": "vip"}}),
    )
    .await;
    recv_event(&mut bob, "join-request-pending").await;
    let request = recv_event(&mut alice, "join-request-received").await;
    assert_eq!(request["data"]["name"], "bob");
    let requester = request["data"]["requester"].clone();

    send(
        &mut alice,
        json!({"event": "approve-request", "data": {"requester": requester, "room": "vip"}}),
    )
    .await;
    let approved = recv_event(&mut bob, "request-approved").await;
    assert_eq!(approved["data"]["room"], "vip");

    // the approved name enters without the secret, exactly once
    send(&mut bob, join_frame("bob", "vip", None)).await;
    recv_event(&mut bob, "message-history").await;

    let mut impostor = connect(addr).await;
    send(&mut impostor, join_frame("bob", "vip", None)).await;
    let err = recv_event(&mut impostor, "join-error").await;
    assert_eq!(err["data"]["reason"], "Password required");

    server.abort();
}

#[tokio::test]
async fn denied_request_grants_nothing() {
    let (addr, server) = spawn_server().await;

    let mut alice = connect(addr).await;
    send(&mut alice, join_frame("alice", "vip", Some("pw1"))).await;
    recv_event(&mut alice, "message-history").await;

    let mut bob = connect(addr).await;
    send(
        &mut bob,
        json!({"event": "join-request", "data": {"name": "bob", "room": "vip"}}),
    )
    .await;
    let request = recv_event(&mut alice, "join-request-received").await;
    let requester = request["data"]["requester"].clone();

    send(
        &mut alice,
        json!({"event": "deny-request", "data": {"requester": requester, "room": "vip"}}),
    )
    .await;
    let err = recv_event(&mut bob, "join-error").await;
    assert_eq!(err["data"]["reason"], "Join request denied");

    send(&mut bob, join_frame("bob", "vip", None)).await;
    let err = recv_event(&mut bob, "join-error").await;
    assert_eq!(err["data"]["reason"], "Password required");

    server.abort();
}

#[tokio::test]
async fn approval_from_non_member_is_ignored() {
    let (addr, server) = spawn_server().await;

    let mut alice = connect(addr).await;
    send(&mut alice, join_frame("alice", "vip", Some("pw1"))).await;
    recv_event(&mut alice, "message-history").await;

    let mut bob = connect(addr).await;
    send(
        &mut bob,
        json!({"event": "join-request", "data": {"name": "bob", "room": "vip"}}),
    )
    .await;
    let request = recv_event(&mut alice, "join-request-received").await;
    let requester = request["data"]["requester"].clone();

    // an outsider tries to approve bob's request
    let mut mallory = connect(addr).await;
    send(&mut mallory, join_frame("mallory", "lobby", None)).await;
    recv_event(&mut mallory, "message-history").await;
    send(
        &mut mallory,
        json!({"event": "approve-request", "data": {"requester": requester, "room": "vip"}}),
    )
    .await;

    // bob still has no grant
    send(&mut bob, join_frame("bob", "vip", None)).await;
    let err = recv_event(&mut bob, "join-error").await;
    assert_eq!(err["data"]["reason"], "Password required");

    server.abort();
}

#[tokio::test]
async fn request_against_public_room_proceeds_directly() {
    let (addr, server) = spawn_server().await;

    let mut alice = connect(addr).await;
    send(&mut alice, join_frame("alice", "lobby", None)).await;
    recv_event(&mut alice, "message-history").await;

    let mut bob = connect(addr).await;
    send(
        &mut bob,
        json!({"event": "join-request", "data": {"name": "bob", "room": "lobby"}}),
    )
    .await;
    let approved = recv_event(&mut bob, "request-approved").await;
    assert_eq!(approved["data"]["room"], "lobby");

    server.abort();
}

#[tokio::test]
async fn room_list_snapshot_and_debounced_broadcast() {
    let (addr, server) = spawn_server().await;

    // a roomless observer receives the debounced directory broadcast
    let mut observer = connect(addr).await;

    let mut alice = connect(addr).await;
    send(&mut alice, join_frame("alice", "vip", Some("pw1"))).await;
    recv_event(&mut alice, "message-history").await;
    let mut bob = connect(addr).await;
    send(&mut bob, join_frame("bob", "lobby", None)).await;
    recv_event(&mut bob, "message-history").await;

    let list = recv_event(&mut observer, "room-list").await;
    let rooms = list["data"].as_array().unwrap();
    assert!(rooms
        .iter()
        .any(|r| r["name"] == "vip" && r["user_count"] == 1 && r["is_private"] == true));

    // the on-demand snapshot answers only the requester
    tokio::time::sleep(Duration::from_millis(200)).await;
    send(&mut observer, json!({"event": "get-rooms"})).await;
    let list = recv_event(&mut observer, "room-list").await;
    let rooms = list["data"].as_array().unwrap();
    assert!(rooms
        .iter()
        .any(|r| r["name"] == "lobby" && r["user_count"] == 1 && r["is_private"] == false));

    server.abort();
}

#[tokio::test]
async fn emptied_private_room_loses_its_secret() {
    let (addr, server) = spawn_server().await;

    let mut alice = connect(addr).await;
    send(&mut alice, join_frame("alice", "vip", Some("pw1"))).await;
    recv_event(&mut alice, "message-history").await;
    alice.close(None).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    // metadata went with the last member; the name is free again
    let mut bob = connect(addr).await;
    send(&mut bob, join_frame("bob", "vip", None)).await;
    recv_event(&mut bob, "message-history").await;
    let users = recv_event(&mut bob, "room-users").await;
    assert_eq!(users["data"], json!(["bob"]));

    server.abort();
}

#[tokio::test]
async fn malformed_frames_are_ignored() {
    let (addr, server) = spawn_server().await;

    let mut alice = connect(addr).await;
    alice
        .send(WsMessage::Text("not json".into()))
        .await
        .unwrap();
    alice
        .send(WsMessage::Text(json!({"event": "no-such-event"}).to_string()))
        .await
        .unwrap();

    // the connection survives and still works
    send(&mut alice, join_frame("alice", "lobby", None)).await;
    recv_event(&mut alice, "message-history").await;

    server.abort();
}
