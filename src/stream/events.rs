use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::{Conversation, Message};

// ── Wire payloads ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationRef {
    pub conversation_id: String,
}

impl ConversationRef {
    pub fn new(conversation_id: &str) -> Self {
        Self { conversation_id: conversation_id.to_string() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageCommitted {
    pub conversation_id: String,
    pub message: Message,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamChunk {
    pub conversation_id: String,
    pub chunk: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamComplete {
    pub conversation_id: String,
    /// The server's authoritative copy of the conversation after the reply.
    #[serde(default)]
    pub conversation: Option<Conversation>,
    #[serde(default)]
    pub message: Option<Message>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamFailure {
    pub conversation_id: String,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerTyping {
    pub conversation_id: String,
    pub user_id: String,
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerNotice {
    #[serde(default)]
    pub message: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamRequest {
    pub conversation_id: String,
    pub message: String,
    pub model: String,
}

// ── Frames ────────────────────────────────────────────────────────────────────

/// Named events pushed by the server: `{ "event": "...", "data": { ... } }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "connected", rename_all = "camelCase")]
    Connected { socket_id: String },
    #[serde(rename = "joined-conversation")]
    JoinedConversation(ConversationRef),
    #[serde(rename = "message-sent")]
    MessageSent(MessageCommitted),
    #[serde(rename = "ai-typing-start")]
    AiTypingStart(ConversationRef),
    #[serde(rename = "ai-stream-chunk")]
    AiStreamChunk(StreamChunk),
    #[serde(rename = "ai-stream-complete")]
    AiStreamComplete(StreamComplete),
    #[serde(rename = "ai-typing-stop")]
    AiTypingStop(ConversationRef),
    #[serde(rename = "ai-stream-error")]
    AiStreamError(StreamFailure),
    #[serde(rename = "typing-start")]
    TypingStart(PeerTyping),
    #[serde(rename = "typing-stopped")]
    TypingStopped(PeerTyping),
    #[serde(rename = "notification")]
    Notification(ServerNotice),
    #[serde(rename = "broadcast")]
    Broadcast(ServerNotice),
    #[serde(rename = "error")]
    Error(ServerNotice),
}

impl ServerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::Connected { .. } => "connected",
            ServerEvent::JoinedConversation(_) => "joined-conversation",
            ServerEvent::MessageSent(_) => "message-sent",
            ServerEvent::AiTypingStart(_) => "ai-typing-start",
            ServerEvent::AiStreamChunk(_) => "ai-stream-chunk",
            ServerEvent::AiStreamComplete(_) => "ai-stream-complete",
            ServerEvent::AiTypingStop(_) => "ai-typing-stop",
            ServerEvent::AiStreamError(_) => "ai-stream-error",
            ServerEvent::TypingStart(_) => "typing-start",
            ServerEvent::TypingStopped(_) => "typing-stopped",
            ServerEvent::Notification(_) => "notification",
            ServerEvent::Broadcast(_) => "broadcast",
            ServerEvent::Error(_) => "error",
        }
    }
}

/// Room-scoped intents sent to the server, framed like [`ServerEvent`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientIntent {
    #[serde(rename = "join-conversation")]
    JoinConversation(ConversationRef),
    #[serde(rename = "leave-conversation")]
    LeaveConversation(ConversationRef),
    #[serde(rename = "typing-start")]
    TypingStart(ConversationRef),
    #[serde(rename = "typing-stop")]
    TypingStop(ConversationRef),
    #[serde(rename = "stream-message")]
    StreamMessage(StreamRequest),
}

// ── Subscriber-facing events ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectErrorReason {
    /// No token in the credential store. Expected while a session is still bootstrapping.
    NoToken,
    Transport(String),
}

impl std::fmt::Display for ConnectErrorReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectErrorReason::NoToken => f.write_str("No authentication token found"),
            ConnectErrorReason::Transport(reason) => f.write_str(reason),
        }
    }
}

/// Everything a subscriber of the event stream sees: locally synthesised lifecycle events plus
/// the server's named events, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Connected,
    Disconnected { reason: String },
    ConnectionError { reason: ConnectErrorReason, attempts: u32 },
    Server(ServerEvent),
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn parses_stream_chunk_frame() {
        let frame = json!({
            "event": "ai-stream-chunk",
            "data": { "conversationId": "c1", "chunk": "Hel" }
        });
        let event: ServerEvent = serde_json::from_value(frame).unwrap();
        assert_eq!(
            event,
            ServerEvent::AiStreamChunk(StreamChunk {
                conversation_id: "c1".into(),
                chunk: "Hel".into()
            })
        );
        assert_eq!(event.name(), "ai-stream-chunk");
    }

    #[test]
    fn parses_connected_frame_with_socket_id() {
        let event: ServerEvent =
            serde_json::from_str(r#"{"event": "connected", "data": {"socketId": "s-9"}}"#).unwrap();
        assert_eq!(event, ServerEvent::Connected { socket_id: "s-9".into() });
    }

    #[test]
    fn notice_tolerates_sparse_payloads() {
        let event: ServerEvent = serde_json::from_str(r#"{"event": "error", "data": {}}"#).unwrap();
        assert_eq!(event, ServerEvent::Error(ServerNotice::default()));
    }

    #[test]
    fn unknown_events_are_rejected() {
        assert!(serde_json::from_str::<ServerEvent>(r#"{"event": "mystery", "data": {}}"#).is_err());
    }

    #[test]
    fn intents_serialise_as_named_frames() {
        let intent = ClientIntent::TypingStart(ConversationRef::new("c7"));
        assert_eq!(
            serde_json::to_value(&intent).unwrap(),
            json!({ "event": "typing-start", "data": { "conversationId": "c7" } })
        );

        let intent = ClientIntent::StreamMessage(StreamRequest {
            conversation_id: "c7".into(),
            message: "hi".into(),
            model: "gpt-4o".into(),
        });
        assert_eq!(
            serde_json::to_value(&intent).unwrap(),
            json!({
                "event": "stream-message",
                "data": { "conversationId": "c7", "message": "hi", "model": "gpt-4o" }
            })
        );
    }
}
