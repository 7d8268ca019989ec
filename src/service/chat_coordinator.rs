use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::agent::OfflineResponder;
use crate::api::ChatBackend;
use crate::config::{CoordinatorConfig, ReplyMode};
use crate::credentials::CredentialStore;
use crate::errors::AppError;
use crate::models::{
    ApiResponse, ChatMessage, Conversation, CreateConversationRequest, Message, MessageRole, User,
};
use crate::service::state::{ChatState, Notice};
use crate::stream::{ConnectErrorReason, EventSubscription, RealtimeChannel, ServerEvent, StreamEvent};

/// Title given to conversations created implicitly by the first message.
pub const NEW_CHAT_TITLE: &str = "New Chat";

/// Ids the UI uses to mean "no conversation"; never worth a network call.
fn is_placeholder_id(id: &str) -> bool {
    let id = id.trim();
    id.is_empty() || id == "undefined" || id == "null"
}

/// Unwraps a successful envelope, or turns an unsuccessful one into [`AppError::Rejected`].
fn require<T>(response: ApiResponse<T>) -> Result<T, AppError> {
    if response.success {
        if let Some(data) = response.data {
            return Ok(data);
        }
    }
    let reason = response.reason().unwrap_or("empty response").to_string();
    Err(AppError::rejected(200, reason))
}

struct Inner {
    backend: Arc<dyn ChatBackend>,
    realtime: Arc<dyn RealtimeChannel>,
    credentials: Arc<dyn CredentialStore>,
    responder: OfflineResponder,
    config: CoordinatorConfig,
    state: Mutex<ChatState>,
    notices: broadcast::Sender<Notice>,
    event_pump: Mutex<Option<JoinHandle<()>>>,
}

/// Owns conversation and message state for one session and reconciles it with the backend and
/// the event stream.
///
/// Every intent catches its own failures and turns them into a [`Notice`]; the returned
/// `Result` is for callers that want to react further (e.g. restoring input).
#[derive(Clone)]
pub struct ChatCoordinator {
    inner: Arc<Inner>,
}

impl ChatCoordinator {
    pub fn new(
        backend: Arc<dyn ChatBackend>,
        realtime: Arc<dyn RealtimeChannel>,
        credentials: Arc<dyn CredentialStore>,
        config: CoordinatorConfig,
    ) -> Self {
        let (notices, _) = broadcast::channel(64);
        let state = ChatState::new(&config.default_model);
        Self {
            inner: Arc::new(Inner {
                backend,
                realtime,
                credentials,
                responder: OfflineResponder::new(),
                config,
                state: Mutex::new(state),
                notices,
                event_pump: Mutex::new(None),
            }),
        }
    }

    pub async fn snapshot(&self) -> ChatState {
        self.inner.state.lock().await.clone()
    }

    pub fn notices(&self) -> broadcast::Receiver<Notice> {
        self.inner.notices.subscribe()
    }

    fn notify(&self, notice: Notice) {
        // Nobody listening is fine.
        let _ = self.inner.notices.send(notice);
    }

    // ── Session bootstrap ────────────────────────────────────────────────────

    /// Re-runs the session bootstrap every time the authenticated user changes identity.
    pub fn watch_user(&self, mut users: watch::Receiver<Option<User>>) -> JoinHandle<()> {
        let coordinator = self.clone();
        tokio::spawn(async move {
            let mut current = users.borrow_and_update().clone();
            let mut current_id = current.as_ref().map(|u| u.id.clone());
            coordinator.on_user_changed(current.take()).await;

            while users.changed().await.is_ok() {
                let user = users.borrow_and_update().clone();
                let id = user.as_ref().map(|u| u.id.clone());
                if id == current_id {
                    coordinator.inner.state.lock().await.user = user;
                    continue;
                }
                current_id = id;
                coordinator.on_user_changed(user).await;
            }
        })
    }

    /// Without a user the event stream is torn down and the session state reset. With one, the
    /// token is polled for (it can lag behind the login response) and the stream connected.
    pub async fn on_user_changed(&self, user: Option<User>) {
        let Some(user) = user else {
            self.teardown().await;
            return;
        };

        info!("Session started for {}", user.username);
        self.inner.state.lock().await.user = Some(user);

        if !self.wait_for_token().await {
            warn!("Failed to get token after waiting; real-time features disabled");
            return;
        }
        self.start_realtime().await;
    }

    async fn wait_for_token(&self) -> bool {
        let policy = self.inner.config.token_poll;
        let max_attempts = policy.max_attempts.max(1);
        for attempt in 1..=max_attempts {
            if self.inner.credentials.get().is_some() {
                debug!("Token found after {attempt} attempts");
                return true;
            }
            if attempt < max_attempts {
                debug!("Token not available yet, attempt {attempt}/{max_attempts}");
                tokio::time::sleep(policy.interval).await;
            }
        }
        warn!("Token not available after {max_attempts} attempts");
        false
    }

    async fn start_realtime(&self) {
        {
            let mut pump = self.inner.event_pump.lock().await;
            if let Some(previous) = pump.take() {
                previous.abort();
            }
            // Subscribe before connecting so the first lifecycle event is not missed.
            let subscription = self.inner.realtime.subscribe();
            *pump = Some(self.spawn_event_pump(subscription));
        }
        if let Err(e) = self.inner.realtime.connect() {
            warn!("Real-time connection not started: {e}");
        }
    }

    fn spawn_event_pump(&self, mut subscription: EventSubscription) -> JoinHandle<()> {
        let coordinator = self.clone();
        tokio::spawn(async move {
            while let Some(event) = subscription.recv().await {
                coordinator.apply_stream_event(event).await;
            }
            debug!("Event subscription closed");
        })
    }

    /// Ends the session: disconnects, unsubscribes and forgets all session state.
    pub async fn teardown(&self) {
        self.inner.realtime.destroy();
        if let Some(pump) = self.inner.event_pump.lock().await.take() {
            pump.abort();
        }
        let mut state = self.inner.state.lock().await;
        *state = ChatState::new(&self.inner.config.default_model);
        debug!("Session state cleared");
    }

    // ── Stream reconciliation ────────────────────────────────────────────────

    /// Folds one event-stream event into local state. Events naming a conversation other than
    /// the active one are ignored.
    pub async fn apply_stream_event(&self, event: StreamEvent) {
        match event {
            StreamEvent::Connected => {
                let mut state = self.inner.state.lock().await;
                state.is_connected = true;
                state.joined_room = None;
                if let Some(id) = state.current_id().map(str::to_string) {
                    self.enter_room(&mut state, &id);
                }
                info!("Real-time connection established");
            }
            StreamEvent::Disconnected { reason } => {
                let mut state = self.inner.state.lock().await;
                state.is_connected = false;
                state.joined_room = None;
                info!("Real-time connection closed: {reason}");
            }
            StreamEvent::ConnectionError { reason, attempts } => {
                self.inner.state.lock().await.is_connected = false;
                error!("Real-time connection error (attempt {attempts}): {reason}");
                if reason != ConnectErrorReason::NoToken {
                    self.notify(Notice::error("Real-time connection failed"));
                }
            }
            StreamEvent::Server(event) => self.apply_server_event(event).await,
        }
    }

    async fn apply_server_event(&self, event: ServerEvent) {
        let mut state = self.inner.state.lock().await;
        match event {
            ServerEvent::Connected { socket_id } => debug!("Socket id {socket_id}"),
            ServerEvent::JoinedConversation(room) => {
                debug!("Joined conversation {}", room.conversation_id)
            }
            ServerEvent::MessageSent(committed) => {
                if state.is_active(&committed.conversation_id)
                    && !state.messages.iter().any(|m| m.id == committed.message.id)
                {
                    state.messages.push(committed.message);
                }
            }
            ServerEvent::AiTypingStart(r) => {
                if state.is_active(&r.conversation_id) {
                    state.ai_typing = true;
                }
            }
            ServerEvent::AiStreamChunk(chunk) => {
                if state.is_active(&chunk.conversation_id) {
                    state.streaming = true;
                    state.append_chunk(&chunk.chunk);
                }
            }
            ServerEvent::AiStreamComplete(done) => {
                if state.is_active(&done.conversation_id) {
                    state.streaming = false;
                    state.ai_typing = false;
                    state.sending = false;
                    state.in_flight = None;
                    if let Some(conversation) = done.conversation {
                        state.replace_in_list(&conversation);
                        state.current_conversation = Some(conversation);
                    }
                }
            }
            ServerEvent::AiTypingStop(r) => {
                if state.is_active(&r.conversation_id) {
                    state.ai_typing = false;
                }
            }
            ServerEvent::AiStreamError(failure) => {
                if state.is_active(&failure.conversation_id) {
                    // Partial content stays visible.
                    state.streaming = false;
                    state.ai_typing = false;
                    state.sending = false;
                    state.in_flight = None;
                    self.notify(Notice::error("AI response failed"));
                }
            }
            ServerEvent::TypingStart(peer) => {
                if state.is_active(&peer.conversation_id) {
                    state.add_typing_user(&peer.user_id);
                }
            }
            ServerEvent::TypingStopped(peer) => {
                if state.is_active(&peer.conversation_id) {
                    state.remove_typing_user(&peer.user_id);
                }
            }
            ServerEvent::Notification(notice) | ServerEvent::Broadcast(notice) => {
                self.notify(Notice::info(notice.message));
            }
            ServerEvent::Error(notice) => {
                error!("Socket error: {}", notice.message);
                self.notify(Notice::error("Real-time connection error"));
            }
        }
    }

    /// Leaves the previously joined room and joins `conversation_id`, when connected.
    fn enter_room(&self, state: &mut ChatState, conversation_id: &str) {
        if !state.is_connected {
            return;
        }
        match state.joined_room.take() {
            Some(previous) if previous == conversation_id => {
                state.joined_room = Some(previous);
                return;
            }
            Some(previous) => self.inner.realtime.leave_conversation(&previous),
            None => {}
        }
        self.inner.realtime.join_conversation(conversation_id);
        state.joined_room = Some(conversation_id.to_string());
    }

    // ── Conversations ────────────────────────────────────────────────────────

    /// Replaces the conversation list. On failure the existing list is kept.
    pub async fn load_conversations(&self) -> Result<(), AppError> {
        self.inner.state.lock().await.loading = true;
        let result = self.inner.backend.list_conversations().await.and_then(require);

        let mut state = self.inner.state.lock().await;
        state.loading = false;
        match result {
            Ok(page) => {
                debug!("Loaded {} conversations", page.conversations.len());
                state.conversations = page.conversations;
                Ok(())
            }
            Err(e) => {
                error!("Failed to load conversations: {e}");
                self.notify(Notice::error("Failed to load conversations"));
                Err(e)
            }
        }
    }

    pub async fn create_conversation(
        &self,
        title: Option<&str>,
        model: Option<&str>,
    ) -> Result<Conversation, AppError> {
        let model = match model {
            Some(model) => model.to_string(),
            None => self.inner.state.lock().await.selected_model.clone(),
        };
        let request = CreateConversationRequest {
            title: title.map(str::to_string),
            model: Some(model),
        };

        match self.inner.backend.create_conversation(request).await.and_then(require) {
            Ok(conversation) if !conversation.has_id() => {
                error!("New conversation missing id: {conversation:?}");
                self.notify(Notice::error("Failed to create conversation - missing ID"));
                Err(AppError::MissingConversationId)
            }
            Ok(conversation) => {
                info!("Created conversation {}", conversation.id);
                let mut state = self.inner.state.lock().await;
                state.conversations.insert(0, conversation.clone());
                state.select(conversation.clone(), Vec::new());
                self.enter_room(&mut state, &conversation.id);
                Ok(conversation)
            }
            Err(e) => {
                error!("Failed to create conversation: {e}");
                self.notify(Notice::error("Failed to create conversation"));
                Err(e)
            }
        }
    }

    pub async fn load_conversation(&self, id: &str) -> Result<(), AppError> {
        if is_placeholder_id(id) {
            info!("Invalid conversation ID provided: {id:?}");
            self.notify(Notice::error("Invalid conversation ID"));
            return Err(AppError::InvalidConversationId { id: id.to_string() });
        }

        self.inner.state.lock().await.loading = true;
        let result = self.inner.backend.get_conversation(id).await;

        let mut state = self.inner.state.lock().await;
        state.loading = false;
        match result.map(ApiResponse::into_data) {
            Ok(Some(conversation)) => {
                debug!("Conversation {} loaded", conversation.id);
                let messages = conversation.messages.clone();
                if !conversation.model.is_empty() {
                    state.selected_model = conversation.model.clone();
                    state.model_chosen = true;
                }
                state.select(conversation, messages);
                self.enter_room(&mut state, id);
                Ok(())
            }
            Ok(None) => {
                info!("Conversation not found for id {id}");
                self.notify(Notice::error("Conversation not found"));
                Err(AppError::ConversationNotFound { id: id.to_string() })
            }
            Err(e) if e.is_not_found() => {
                self.notify(Notice::error("Conversation not found"));
                Err(AppError::ConversationNotFound { id: id.to_string() })
            }
            Err(e) => {
                error!("Failed to load conversation {id}: {e}");
                self.notify(Notice::error("Failed to load conversation"));
                Err(e)
            }
        }
    }

    /// Renames the active conversation.
    pub async fn update_conversation_title(&self, title: &str) -> Result<(), AppError> {
        let Some(id) = self.inner.state.lock().await.current_id().map(str::to_string) else {
            return Ok(());
        };
        let title = title.trim();
        if title.is_empty() {
            self.notify(Notice::error("Title cannot be empty"));
            return Err(AppError::EmptyField { field_name: "title".to_string() });
        }

        match self.inner.backend.update_conversation_title(&id, title).await.and_then(require) {
            Ok(updated) => {
                let new_title = if updated.title.is_empty() { title.to_string() } else { updated.title };
                let mut state = self.inner.state.lock().await;
                if let Some(current) = state.current_conversation.as_mut().filter(|c| c.id == id) {
                    current.title = new_title.clone();
                }
                if let Some(entry) = state.conversations.iter_mut().find(|c| c.id == id) {
                    entry.title = new_title;
                }
                self.notify(Notice::success("Title updated successfully"));
                Ok(())
            }
            Err(e) => {
                error!("Failed to update title of {id}: {e}");
                self.notify(Notice::error("Failed to update title"));
                Err(e)
            }
        }
    }

    pub async fn delete_conversation(&self, id: &str) -> Result<(), AppError> {
        let result = self.inner.backend.delete_conversation(id).await.and_then(|resp| {
            if resp.success {
                Ok(())
            } else {
                Err(AppError::rejected(200, resp.reason().unwrap_or("delete refused")))
            }
        });

        match result {
            Ok(()) => {
                let mut state = self.inner.state.lock().await;
                state.conversations.retain(|c| c.id != id);
                if state.is_active(id) {
                    if state.joined_room.as_deref() == Some(id) {
                        self.inner.realtime.leave_conversation(id);
                        state.joined_room = None;
                    }
                    state.clear_selection();
                }
                info!("Deleted conversation {id}");
                self.notify(Notice::success("Conversation deleted"));
                Ok(())
            }
            Err(e) => {
                error!("Failed to delete conversation {id}: {e}");
                self.notify(Notice::error("Failed to delete conversation"));
                Err(e)
            }
        }
    }

    // ── Models ───────────────────────────────────────────────────────────────

    /// Fetches the model catalogue; on failure the built-in defaults stay.
    pub async fn load_models(&self) -> Result<(), AppError> {
        match self.inner.backend.list_models().await.and_then(require) {
            Ok(models) => {
                let mut state = self.inner.state.lock().await;
                if !state.model_chosen {
                    if let Some(first) = models.first() {
                        state.selected_model = first.id.clone();
                    }
                }
                debug!("Loaded {} models", models.len());
                state.models = models;
                Ok(())
            }
            Err(e) => {
                warn!("Failed to load models, keeping defaults: {e}");
                Err(e)
            }
        }
    }

    pub async fn set_selected_model(&self, model: &str) {
        let mut state = self.inner.state.lock().await;
        state.selected_model = model.to_string();
        state.model_chosen = true;
    }

    // ── Sending ──────────────────────────────────────────────────────────────

    /// Sends into the active conversation. A no-op without one or with blank text.
    pub async fn send_message(&self, text: &str, model: Option<&str>) -> Result<(), AppError> {
        // Whitespace only decides whether there is anything to send; the text goes out as typed.
        let content = text;
        let (conversation_id, model) = {
            let mut state = self.inner.state.lock().await;
            let Some(id) = state.current_id().map(str::to_string) else {
                debug!("No active conversation; message not sent");
                return Ok(());
            };
            if content.trim().is_empty() {
                return Ok(());
            }
            let model = model.map(str::to_string).unwrap_or_else(|| state.selected_model.clone());
            if state.is_connected {
                self.inner.realtime.stop_typing(&id);
            }
            state.sending = true;
            state.streaming = false;
            state.in_flight = None;
            state.messages.push(Message::new(MessageRole::User, content));
            (id, model)
        };

        let result = match self.inner.config.reply_mode {
            ReplyMode::Offline { delay } => {
                self.reply_offline(&conversation_id, content, &model, delay).await;
                Ok(())
            }
            ReplyMode::Server => self.reply_from_server(&conversation_id, content, &model).await,
        };

        let mut state = self.inner.state.lock().await;
        if let Err(e) = &result {
            error!("Failed to send message to {conversation_id}: {e}");
            state.sending = false;
            state.ai_typing = false;
            drop(state);
            self.notify(Notice::error("Failed to send message"));
        } else if !state.streaming && state.in_flight.is_none() {
            state.sending = false;
        }
        result
    }

    async fn reply_offline(&self, conversation_id: &str, content: &str, model: &str, delay: Duration) {
        self.inner.state.lock().await.ai_typing = true;
        tokio::time::sleep(delay).await;
        let reply = self.inner.responder.reply(content);

        let mut state = self.inner.state.lock().await;
        state.ai_typing = false;
        if !state.is_active(conversation_id) {
            warn!("Conversation {conversation_id} is no longer active; dropping reply");
            return;
        }
        state.messages.push(Message::new(MessageRole::Assistant, reply.as_str()).with_model(model));

        // Character counts, not model tokens.
        let added = (content.chars().count() + reply.chars().count()) as u64;
        if let Some(current) = state.current_conversation.as_mut() {
            current.total_messages += 2;
            current.total_tokens += added;
            let updated = current.clone();
            state.replace_in_list(&updated);
        }
    }

    async fn reply_from_server(
        &self,
        conversation_id: &str,
        content: &str,
        model: &str,
    ) -> Result<(), AppError> {
        {
            let mut state = self.inner.state.lock().await;
            if state.is_connected && self.inner.realtime.is_connected() {
                let placeholder = Message::new(MessageRole::Assistant, "").with_model(model);
                state.in_flight = Some(placeholder.id.clone());
                state.messages.push(placeholder);
                state.ai_typing = true;
                self.inner.realtime.stream_message(conversation_id, content, model);
                return Ok(());
            }
        }

        let message = ChatMessage {
            message: content.to_string(),
            model: Some(model.to_string()),
            attachments: Vec::new(),
        };
        self.inner.state.lock().await.ai_typing = true;
        let result = self.inner.backend.send_message(conversation_id, message).await.and_then(require);

        let mut state = self.inner.state.lock().await;
        state.ai_typing = false;
        let sent = result?;
        if !state.is_active(conversation_id) {
            warn!("Conversation {conversation_id} is no longer active; dropping reply");
            return Ok(());
        }
        if sent.conversation.messages.is_empty() {
            if !state.messages.iter().any(|m| m.id == sent.message.id) {
                state.messages.push(sent.message);
            }
        } else {
            state.messages = sent.conversation.messages.clone();
        }
        if sent.conversation.has_id() {
            state.replace_in_list(&sent.conversation);
            state.current_conversation = Some(sent.conversation);
        }
        Ok(())
    }

    /// Sends the input box contents, creating a "New Chat" conversation first when none is
    /// active. On failure the text is put back into the input box.
    pub async fn submit_draft(&self) -> Result<(), AppError> {
        let text = {
            let mut state = self.inner.state.lock().await;
            let text = state.draft.trim().to_string();
            if text.is_empty() {
                return Ok(());
            }
            state.draft.clear();
            text
        };

        let result = self.submit(&text).await;
        if result.is_err() {
            self.inner.state.lock().await.draft = text;
        }
        result
    }

    async fn submit(&self, text: &str) -> Result<(), AppError> {
        let (has_conversation, model) = {
            let state = self.inner.state.lock().await;
            (state.current_conversation.is_some(), state.selected_model.clone())
        };
        if !has_conversation {
            self.create_conversation(Some(NEW_CHAT_TITLE), Some(&model)).await?;
        }
        self.send_message(text, Some(&model)).await
    }

    // ── Input & typing ───────────────────────────────────────────────────────

    /// Updates the input box. Non-empty input signals (self-expiring) typing, empty input stops it.
    pub async fn set_draft(&self, text: &str) {
        let mut state = self.inner.state.lock().await;
        state.draft = text.to_string();
        if !state.is_connected {
            return;
        }
        if let Some(id) = state.current_id() {
            if text.is_empty() {
                self.inner.realtime.stop_typing(id);
            } else {
                self.inner.realtime.debounced_typing(id);
            }
        }
    }

    pub async fn start_typing(&self) {
        let state = self.inner.state.lock().await;
        if let (true, Some(id)) = (state.is_connected, state.current_id()) {
            self.inner.realtime.start_typing(id);
        }
    }

    pub async fn stop_typing(&self) {
        let state = self.inner.state.lock().await;
        if let (true, Some(id)) = (state.is_connected, state.current_id()) {
            self.inner.realtime.stop_typing(id);
        }
    }

    pub async fn join_conversation(&self, id: &str) {
        let mut state = self.inner.state.lock().await;
        if state.is_connected {
            self.inner.realtime.join_conversation(id);
            state.joined_room = Some(id.to_string());
        }
    }

    pub async fn leave_conversation(&self, id: &str) {
        let mut state = self.inner.state.lock().await;
        if state.is_connected {
            self.inner.realtime.leave_conversation(id);
            if state.joined_room.as_deref() == Some(id) {
                state.joined_room = None;
            }
        }
    }
}
