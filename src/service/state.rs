use crate::models::{default_models, Conversation, Message, MessageRole, ModelInfo, User};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Success,
    Error,
}

/// A user-facing toast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub text: String,
}

impl Notice {
    pub fn info(text: impl Into<String>) -> Self {
        Self { level: NoticeLevel::Info, text: text.into() }
    }

    pub fn success(text: impl Into<String>) -> Self {
        Self { level: NoticeLevel::Success, text: text.into() }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self { level: NoticeLevel::Error, text: text.into() }
    }
}

/// Everything the presentation layer renders. Owned and mutated only by the coordinator;
/// readers get clones via `ChatCoordinator::snapshot`.
#[derive(Debug, Clone)]
pub struct ChatState {
    pub user: Option<User>,
    pub conversations: Vec<Conversation>,
    pub current_conversation: Option<Conversation>,
    pub messages: Vec<Message>,
    pub loading: bool,
    pub sending: bool,
    pub streaming: bool,
    pub ai_typing: bool,
    /// Peers currently composing in the active conversation, without duplicates.
    pub typing_users: Vec<String>,
    pub models: Vec<ModelInfo>,
    pub selected_model: String,
    pub is_connected: bool,
    /// Contents of the input box.
    pub draft: String,
    pub(crate) model_chosen: bool,
    /// Id of the assistant message currently receiving stream chunks.
    pub(crate) in_flight: Option<String>,
    pub(crate) joined_room: Option<String>,
}

impl ChatState {
    pub fn new(default_model: &str) -> Self {
        Self {
            user: None,
            conversations: Vec::new(),
            current_conversation: None,
            messages: Vec::new(),
            loading: false,
            sending: false,
            streaming: false,
            ai_typing: false,
            typing_users: Vec::new(),
            models: default_models(),
            selected_model: default_model.to_string(),
            is_connected: false,
            draft: String::new(),
            model_chosen: false,
            in_flight: None,
            joined_room: None,
        }
    }

    pub fn current_id(&self) -> Option<&str> {
        self.current_conversation.as_ref().map(|c| c.id.as_str())
    }

    pub fn is_active(&self, conversation_id: &str) -> bool {
        self.current_id() == Some(conversation_id)
    }

    /// Makes `conversation` the active one and drops per-conversation ephemera.
    pub(crate) fn select(&mut self, conversation: Conversation, messages: Vec<Message>) {
        self.current_conversation = Some(conversation);
        self.messages = messages;
        self.typing_users.clear();
        self.in_flight = None;
        self.streaming = false;
        self.ai_typing = false;
    }

    pub(crate) fn clear_selection(&mut self) {
        self.current_conversation = None;
        self.messages.clear();
        self.typing_users.clear();
        self.in_flight = None;
        self.streaming = false;
        self.ai_typing = false;
    }

    /// Replaces the matching entry of the conversation list, keeping its position.
    pub(crate) fn replace_in_list(&mut self, conversation: &Conversation) {
        if let Some(slot) = self.conversations.iter_mut().find(|c| c.id == conversation.id) {
            *slot = conversation.clone();
        }
    }

    pub(crate) fn add_typing_user(&mut self, user_id: &str) {
        if !self.typing_users.iter().any(|u| u == user_id) {
            self.typing_users.push(user_id.to_string());
        }
    }

    pub(crate) fn remove_typing_user(&mut self, user_id: &str) {
        self.typing_users.retain(|u| u != user_id);
    }

    /// Appends `chunk` to the in-flight assistant message, starting one if none is in flight.
    pub(crate) fn append_chunk(&mut self, chunk: &str) {
        let in_flight = self
            .in_flight
            .as_deref()
            .and_then(|id| self.messages.iter().rposition(|m| m.id == id));
        match in_flight {
            Some(index) => self.messages[index].content.push_str(chunk),
            // Nothing in flight, e.g. a reply started from another client or session: the
            // first chunk opens its own assistant message.
            None => {
                let mut message = Message::new(MessageRole::Assistant, chunk);
                message.model = Some(self.selected_model.clone());
                self.in_flight = Some(message.id.clone());
                self.messages.push(message);
            }
        }
    }
}
