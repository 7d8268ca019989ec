//! In-process stand-in for the chat backend: JSON routes plus the `/ws` event stream.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ai_chat_client::config::{ApiConfig, StreamConfig};
use ai_chat_client::stream::{EventSubscription, StreamEvent};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde_json::{json, Value};

pub const TOKEN: &str = "tok-valid-123456";
pub const PASSWORD: &str = "secret";

#[derive(Default)]
pub struct BackendState {
    pub conversations: Mutex<Vec<Value>>,
    /// Every frame the event-stream clients sent, in arrival order.
    pub intents: Mutex<Vec<Value>>,
    pub ws_connections: AtomicU32,
    /// When set, the server closes each event-stream connection right after greeting it.
    pub close_after_connect: AtomicBool,
    /// When set, the next event-stream connection is dropped after the greeting without a
    /// close frame, the way a lost network link looks to the client.
    pub drop_next_connection: AtomicBool,
    next_id: AtomicU32,
}

impl BackendState {
    pub fn intent_names(&self) -> Vec<String> {
        self.intents
            .lock()
            .unwrap()
            .iter()
            .filter_map(|f| f["event"].as_str().map(str::to_string))
            .collect()
    }
}

pub struct FakeBackend {
    pub addr: SocketAddr,
    pub state: Arc<BackendState>,
}

impl FakeBackend {
    pub async fn spawn() -> Self {
        let state = Arc::new(BackendState::default());
        let app = Router::new()
            .route("/api/auth/login", post(login))
            .route("/api/auth/logout", post(logout))
            .route("/api/auth/profile", get(profile))
            .route("/api/chat/conversations", get(list_conversations).post(create_conversation))
            .route("/api/chat/conversations/{id}", get(get_conversation).delete(delete_conversation))
            .route("/api/chat/conversations/{id}/title", put(update_title))
            .route("/api/chat/conversations/{id}/messages", post(send_message))
            .route("/api/chat/models", get(models))
            .route("/ws", get(ws_handler))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Self { addr, state }
    }

    pub fn api_config(&self) -> ApiConfig {
        ApiConfig { base_url: format!("http://{}", self.addr), timeout: Duration::from_secs(5) }
    }

    pub fn stream_config(&self) -> StreamConfig {
        StreamConfig {
            url: format!("ws://{}/ws", self.addr),
            connect_timeout: Duration::from_secs(5),
            max_reconnect_attempts: 3,
            reconnect_delay: Duration::from_millis(20),
            typing_debounce: Duration::from_millis(50),
        }
    }
}

/// A stream config pointing at a port nothing listens on.
pub async fn unreachable_stream_config() -> StreamConfig {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    StreamConfig {
        url: format!("ws://{addr}/ws"),
        connect_timeout: Duration::from_secs(2),
        max_reconnect_attempts: 3,
        reconnect_delay: Duration::from_millis(20),
        typing_debounce: Duration::from_millis(50),
    }
}

// ── Test helpers ──────────────────────────────────────────────────────────────

/// Waits for the next event matching `predicate`, skipping the rest.
pub async fn expect_event(
    subscription: &mut EventSubscription,
    predicate: impl Fn(&StreamEvent) -> bool,
) -> StreamEvent {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let event = subscription.recv().await.expect("event bus closed");
            if predicate(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

/// Polls `condition` until it holds or a few seconds pass.
pub async fn eventually(condition: impl Fn() -> bool) -> bool {
    for _ in 0..250 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    condition()
}

// ── Handlers ──────────────────────────────────────────────────────────────────

type Shared = State<Arc<BackendState>>;

fn user_json() -> Value {
    json!({ "_id": "u1", "username": "ada", "email": "ada@example.com" })
}

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == format!("Bearer {TOKEN}"))
}

fn unauthorized() -> Response {
    (StatusCode::UNAUTHORIZED, Json(json!({ "success": false, "error": "Unauthorized" })))
        .into_response()
}

fn not_found() -> Response {
    (StatusCode::NOT_FOUND, Json(json!({ "success": false, "error": "Conversation not found" })))
        .into_response()
}

async fn login(Json(body): Json<Value>) -> Response {
    if body["password"] == PASSWORD {
        Json(json!({ "success": true, "data": { "user": user_json(), "token": TOKEN } }))
            .into_response()
    } else {
        (StatusCode::BAD_REQUEST, Json(json!({ "success": false, "error": "Invalid credentials" })))
            .into_response()
    }
}

async fn logout() -> Response {
    Json(json!({ "success": true, "message": "Logged out" })).into_response()
}

async fn profile(headers: HeaderMap) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    Json(json!({ "success": true, "data": user_json() })).into_response()
}

async fn list_conversations(State(state): Shared, headers: HeaderMap) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    let conversations = state.conversations.lock().unwrap().clone();
    Json(json!({
        "success": true,
        "data": { "conversations": conversations, "total": conversations.len(), "page": 1, "pages": 1 }
    }))
    .into_response()
}

async fn create_conversation(State(state): Shared, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    let id = format!("c{}", state.next_id.fetch_add(1, Ordering::SeqCst) + 1);
    let conversation = json!({
        "_id": id,
        "title": body["title"].as_str().unwrap_or("New Chat"),
        "model": body["model"].as_str().unwrap_or("gpt-4o-mini"),
        "messages": [],
        "totalTokens": 0,
        "totalMessages": 0
    });
    state.conversations.lock().unwrap().insert(0, conversation.clone());
    Json(json!({ "success": true, "data": { "conversation": conversation } })).into_response()
}

async fn get_conversation(State(state): Shared, headers: HeaderMap, Path(id): Path<String>) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    let found = state.conversations.lock().unwrap().iter().find(|c| c["_id"] == id).cloned();
    match found {
        Some(conversation) => {
            Json(json!({ "success": true, "data": { "conversation": conversation } })).into_response()
        }
        None => not_found(),
    }
}

async fn update_title(
    State(state): Shared,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    let mut conversations = state.conversations.lock().unwrap();
    match conversations.iter_mut().find(|c| c["_id"] == id) {
        Some(conversation) => {
            conversation["title"] = body["title"].clone();
            Json(json!({ "success": true, "data": { "conversation": conversation.clone() } }))
                .into_response()
        }
        None => not_found(),
    }
}

async fn delete_conversation(State(state): Shared, headers: HeaderMap, Path(id): Path<String>) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    let mut conversations = state.conversations.lock().unwrap();
    let before = conversations.len();
    conversations.retain(|c| c["_id"] != id);
    if conversations.len() == before {
        return not_found();
    }
    // Deletes answer with an empty body.
    StatusCode::OK.into_response()
}

async fn send_message(
    State(state): Shared,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    let mut conversations = state.conversations.lock().unwrap();
    let Some(conversation) = conversations.iter_mut().find(|c| c["_id"] == id) else {
        return not_found();
    };
    let user = json!({ "id": "m-user", "role": "user", "content": body["message"] });
    let reply = json!({ "id": "m-reply", "role": "assistant", "content": "Hello from the server" });
    conversation["messages"] = json!([user, reply]);
    conversation["totalMessages"] = json!(2);
    Json(json!({ "success": true, "data": { "message": reply, "conversation": conversation.clone() } }))
        .into_response()
}

async fn models() -> Response {
    Json(json!({
        "success": true,
        "data": { "models": [
            { "id": "claude-3", "name": "Claude 3", "description": "", "price": 0.0 },
            { "id": "gpt-4o", "name": "GPT-4o", "description": "", "price": 0.0 }
        ] }
    }))
    .into_response()
}

// ── Event stream ──────────────────────────────────────────────────────────────

async fn ws_handler(ws: WebSocketUpgrade, headers: HeaderMap, State(state): Shared) -> Response {
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    state.ws_connections.fetch_add(1, Ordering::SeqCst);
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn send_frame(socket: &mut WebSocket, event: &str, data: Value) {
    let frame = json!({ "event": event, "data": data });
    let _ = socket.send(Message::Text(frame.to_string().into())).await;
}

async fn handle_socket(mut socket: WebSocket, state: Arc<BackendState>) {
    send_frame(&mut socket, "connected", json!({ "socketId": "s-1" })).await;
    if state.close_after_connect.load(Ordering::SeqCst) {
        let _ = socket.send(Message::Close(None)).await;
        return;
    }
    if state.drop_next_connection.swap(false, Ordering::SeqCst) {
        drop(socket);
        return;
    }

    while let Some(Ok(message)) = socket.recv().await {
        let text = match message {
            Message::Text(t) => t.to_string(),
            Message::Close(_) => break,
            _ => continue,
        };
        let Ok(frame) = serde_json::from_str::<Value>(&text) else {
            continue;
        };
        state.intents.lock().unwrap().push(frame.clone());

        let data = frame["data"].clone();
        let conversation_id = data["conversationId"].clone();
        match frame["event"].as_str() {
            Some("join-conversation") => {
                send_frame(&mut socket, "joined-conversation", json!({ "conversationId": conversation_id }))
                    .await;
            }
            Some("stream-message") => {
                send_frame(&mut socket, "ai-typing-start", json!({ "conversationId": conversation_id }))
                    .await;
                for chunk in ["Hel", "lo"] {
                    send_frame(
                        &mut socket,
                        "ai-stream-chunk",
                        json!({ "conversationId": conversation_id, "chunk": chunk }),
                    )
                    .await;
                }
                send_frame(
                    &mut socket,
                    "ai-stream-complete",
                    json!({
                        "conversationId": conversation_id,
                        "conversation": {
                            "_id": conversation_id,
                            "title": "Streamed",
                            "totalTokens": 42,
                            "totalMessages": 2
                        }
                    }),
                )
                .await;
                send_frame(&mut socket, "ai-typing-stop", json!({ "conversationId": conversation_id }))
                    .await;
            }
            _ => {}
        }
    }
}
