use axum::{
    Json, Router,
    extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
    extract::{Path, Query},
    response::IntoResponse,
    routing::get,
};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::time::Duration;

use chat_sync::protocol::encode_outbound;
use chat_sync::{
    AccessToken, ChannelEvent, ChatId, ChatSession, Connector, Endpoint, ReconnectPolicy,
    SessionId, SessionPhase, SessionSupervisor, SessionUpdate, TransportChannel, TransportError,
    Update, UserId,
};
use support_chat::{ApiClient, WsConnector};

async fn spawn_backend(app: Router) -> std::net::SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn frame(sender: &str, content: &str) -> String {
    json!({ "sender_external_id": sender, "content": content }).to_string()
}

/// Greets with the token it was given, then echoes every `{content}` frame
/// back as a message from `u-1`. "bye" makes the server hang up.
async fn chat_room(mut socket: WebSocket, token: String) {
    let greeting = frame("agent", &format!("hello {token}"));
    if socket.send(WsMessage::Text(greeting.into())).await.is_err() {
        return;
    }
    while let Some(Ok(msg)) = socket.recv().await {
        let WsMessage::Text(text) = msg else { continue };
        let body: Value = serde_json::from_str(text.as_str()).unwrap_or_default();
        let content = body["content"].as_str().unwrap_or_default().to_string();
        if content == "bye" {
            let _ = socket.send(WsMessage::Close(None)).await;
            return;
        }
        if socket
            .send(WsMessage::Text(frame("u-1", &content).into()))
            .await
            .is_err()
        {
            return;
        }
    }
}

async fn chat_ws(
    ws: WebSocketUpgrade,
    Path(_chat): Path<String>,
    Query(query): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let token = query.get("token").cloned().unwrap_or_default();
    ws.on_upgrade(move |socket| chat_room(socket, token))
}

/// Sends one chat-list snapshot, then idles.
async fn dashboard(mut socket: WebSocket) {
    let snapshot = json!([
        { "chat_external_id": "c1", "user_external_id": "user-aaaa", "status": "open",
          "updated_at": "2024-05-01T10:00:00Z" },
        { "chat_external_id": "c2", "user_external_id": "user-bbbb", "status": "pending",
          "updated_at": "2024-05-01T10:05:00Z" }
    ]);
    let _ = socket.send(WsMessage::Text(snapshot.to_string().into())).await;
    while let Some(Ok(_)) = socket.recv().await {}
}

async fn dashboard_ws(ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(dashboard)
}

async fn history() -> Json<Value> {
    Json(json!([
        { "message_external_id": "m2", "sender_external_id": "agent", "content": "how can I help?" },
        { "message_external_id": "m1", "sender_external_id": "u-1", "content": "hi" }
    ]))
}

fn app() -> Router {
    Router::new()
        .route("/ws/chats/{id}", get(chat_ws))
        .route("/ws/admin/chats", get(dashboard_ws))
        .route("/chats/{id}/messages/recent", get(history))
}

async fn next_event(channel: &mut TransportChannel) -> Option<ChannelEvent> {
    tokio::time::timeout(Duration::from_secs(5), channel.recv())
        .await
        .expect("timed out waiting for channel event")
}

fn connector(addr: std::net::SocketAddr, timeout: Option<Duration>) -> WsConnector {
    WsConnector::new(format!("ws://{addr}"), timeout)
}

#[tokio::test]
async fn opens_streams_and_sends() {
    let addr = spawn_backend(app()).await;
    let mut channel = connector(addr, Some(Duration::from_secs(5)))
        .open(Endpoint::ChatRoom(ChatId::new("c1")), &AccessToken::new("secret"));

    assert_eq!(next_event(&mut channel).await, Some(ChannelEvent::Opened));
    assert!(channel.is_open());
    assert_eq!(
        next_event(&mut channel).await,
        Some(ChannelEvent::Message(frame("agent", "hello secret")))
    );

    channel.send(encode_outbound("ping")).unwrap();
    assert_eq!(
        next_event(&mut channel).await,
        Some(ChannelEvent::Message(frame("u-1", "ping")))
    );

    channel.close();
    assert_eq!(
        next_event(&mut channel).await,
        Some(ChannelEvent::Closed { error: None })
    );
    assert_eq!(next_event(&mut channel).await, None);
}

#[tokio::test]
async fn server_hangup_closes_channel() {
    let addr = spawn_backend(app()).await;
    let mut channel =
        connector(addr, None).open(Endpoint::ChatRoom(ChatId::new("c1")), &AccessToken::new("t"));

    assert_eq!(next_event(&mut channel).await, Some(ChannelEvent::Opened));
    next_event(&mut channel).await; // greeting
    channel.send(encode_outbound("bye")).unwrap();

    match next_event(&mut channel).await {
        Some(ChannelEvent::Closed { .. }) => {}
        other => panic!("expected Closed, got {other:?}"),
    }
    assert!(!channel.is_open());
}

#[tokio::test]
async fn refused_connection_reports_connect_error() {
    let mut channel = WsConnector::new("ws://127.0.0.1:1", None)
        .open(Endpoint::Dashboard, &AccessToken::new("t"));
    match next_event(&mut channel).await {
        Some(ChannelEvent::Closed {
            error: Some(TransportError::Connect(_)),
        }) => {}
        other => panic!("expected connect error, got {other:?}"),
    }
}

#[tokio::test]
async fn stalled_handshake_times_out() {
    // Accepts TCP but never answers the upgrade request.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let limit = Duration::from_millis(200);
    let mut channel = connector(addr, Some(limit)).open(Endpoint::Dashboard, &AccessToken::new("t"));
    assert_eq!(
        next_event(&mut channel).await,
        Some(ChannelEvent::Closed {
            error: Some(TransportError::ConnectTimeout(limit)),
        })
    );
    drop(listener);
}

#[tokio::test]
async fn dropped_stream_reports_receive_error() {
    // Completes the upgrade, sends one frame, then drops the socket with no close frame.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
        futures::SinkExt::send(
            &mut ws,
            tokio_tungstenite::tungstenite::Message::Text(frame("agent", "hi").into()),
        )
        .await
        .unwrap();
        drop(ws);
    });

    let mut channel = connector(addr, Some(Duration::from_secs(5)))
        .open(Endpoint::ChatRoom(ChatId::new("c1")), &AccessToken::new("t"));
    assert_eq!(next_event(&mut channel).await, Some(ChannelEvent::Opened));
    assert_eq!(
        next_event(&mut channel).await,
        Some(ChannelEvent::Message(frame("agent", "hi")))
    );
    match next_event(&mut channel).await {
        Some(ChannelEvent::Closed {
            error: Some(TransportError::Receive(_)),
        }) => {}
        other => panic!("expected receive error, got {other:?}"),
    }
    assert!(!channel.is_open());
}

// -- full stack --

#[tokio::test]
async fn customer_session_replays_history_then_streams() {
    let addr = spawn_backend(app()).await;
    let token = AccessToken::new("tok");
    let api = ApiClient::new(format!("http://{addr}")).with_token(token.clone());
    let ws = connector(addr, Some(Duration::from_secs(5)));

    let mut session = ChatSession::connect(SessionId(1), ChatId::new("c1"), &api, &ws, &token)
        .await
        .unwrap();
    assert_eq!(session.phase(), SessionPhase::Streaming);
    let contents: Vec<&str> = session.log().iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents, vec!["hi", "how can I help?"]);

    let mut live = Vec::new();
    while live.len() < 2 {
        let event = tokio::time::timeout(Duration::from_secs(5), session.next_event())
            .await
            .unwrap()
            .unwrap();
        match session.apply_event(event) {
            SessionUpdate::Opened => session.send("my order is late").unwrap(),
            SessionUpdate::Appended(message) => live.push(message),
            other => panic!("unexpected {other:?}"),
        }
    }
    assert_eq!(live[0].content, "hello tok");
    assert_eq!(live[1].content, "my order is late");
    assert!(live[1].is_from(&UserId::new("u-1")));
    assert_eq!(session.log().len(), 4);

    session.close().unwrap();
}

#[tokio::test]
async fn dashboard_feed_populates_chat_list() {
    let addr = spawn_backend(app()).await;
    let token = AccessToken::new("tok");
    let api = ApiClient::new(format!("http://{addr}")).with_token(token.clone());
    let mut sup = SessionSupervisor::new(
        connector(addr, Some(Duration::from_secs(5))),
        api,
        token,
        ReconnectPolicy::default(),
    );

    sup.open_dashboard();
    let mut updates = Vec::new();
    while !updates.contains(&Update::ChatListChanged) {
        let update = tokio::time::timeout(Duration::from_secs(5), sup.next_update())
            .await
            .unwrap();
        updates.push(update);
    }
    assert_eq!(updates[0], Update::DashboardOpened);

    let order: Vec<&str> = sup
        .current_order()
        .iter()
        .map(|c| c.chat_id.as_str())
        .collect();
    assert_eq!(order, vec!["c2", "c1"]);

    sup.select_chat(ChatId::new("c1"));
    let update = tokio::time::timeout(Duration::from_secs(5), sup.next_update())
        .await
        .unwrap();
    assert_eq!(
        update,
        Update::HistoryLoaded {
            chat_id: ChatId::new("c1"),
            messages: 2
        }
    );
    assert_eq!(sup.current_log().len(), 2);
}
