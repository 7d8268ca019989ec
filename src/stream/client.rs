use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use super::bus::{EventBus, EventSubscription};
use super::events::{
    ClientIntent, ConnectErrorReason, ConversationRef, ServerEvent, StreamEvent, StreamRequest,
};
use crate::config::StreamConfig;
use crate::credentials::{token_preview, CredentialStore};
use crate::errors::AppError;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
}

/// Why a live socket went away.
#[derive(Debug, Clone, PartialEq, Eq)]
enum DisconnectReason {
    Client,
    Server,
    Transport(String),
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DisconnectReason::Client => f.write_str("io client disconnect"),
            DisconnectReason::Server => f.write_str("io server disconnect"),
            DisconnectReason::Transport(reason) => write!(f, "transport error: {reason}"),
        }
    }
}

struct Connection {
    outbound: mpsc::UnboundedSender<ClientIntent>,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

struct TypingTimer {
    token: u64,
    handle: JoinHandle<()>,
}

struct Shared {
    config: StreamConfig,
    credentials: Arc<dyn CredentialStore>,
    bus: EventBus,
    state: watch::Sender<ConnectionState>,
    reconnect_attempts: AtomicU32,
    /// Bumped on every connect/disconnect; background tasks from older generations go quiet.
    generation: AtomicU64,
    session_id: Mutex<Option<String>>,
    connection: Mutex<Option<Connection>>,
    typing_timers: Mutex<HashMap<String, TypingTimer>>,
    next_timer: AtomicU64,
}

impl Shared {
    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    fn set_state(&self, generation: u64, state: ConnectionState) {
        if self.is_current(generation) {
            self.state.send_replace(state);
        }
    }

    fn publish(&self, generation: u64, event: StreamEvent) {
        if self.is_current(generation) {
            self.bus.publish(event);
        }
    }

    fn dispatch(&self, generation: u64, text: &str) {
        let event = match serde_json::from_str::<ServerEvent>(text) {
            Ok(event) => event,
            Err(e) => {
                warn!("Skipping unrecognised event frame: {e}");
                return;
            }
        };
        match &event {
            ServerEvent::Connected { socket_id } => {
                info!("Event stream session id {socket_id}");
                *self.session_id.lock().unwrap_or_else(|e| e.into_inner()) = Some(socket_id.clone());
            }
            ServerEvent::AiStreamChunk(_) => {}
            ServerEvent::AiStreamError(failure) => {
                error!("AI streaming error in {}: {:?}", failure.conversation_id, failure.error)
            }
            ServerEvent::Error(notice) => error!("Event stream error: {}", notice.message),
            other => debug!("Event stream: {}", other.name()),
        }
        self.publish(generation, StreamEvent::Server(event));
    }
}

/// One bidirectional event connection per authenticated session.
///
/// The token is read from the credential store at connect time and presented in the handshake.
/// Failed or dropped connections are retried automatically, at most
/// `StreamConfig::max_reconnect_attempts` times after the attempt that failed, with a fixed
/// delay in between. The retry budget resets after every successful open. A missing token
/// is reported once and never retried here.
#[derive(Clone)]
pub struct EventStreamClient {
    shared: Arc<Shared>,
}

impl EventStreamClient {
    pub fn new(config: StreamConfig, credentials: Arc<dyn CredentialStore>) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        debug!("Event stream client targeting {}", config.url);
        Self {
            shared: Arc::new(Shared {
                config,
                credentials,
                bus: EventBus::new(),
                state,
                reconnect_attempts: AtomicU32::new(0),
                generation: AtomicU64::new(0),
                session_id: Mutex::new(None),
                connection: Mutex::new(None),
                typing_timers: Mutex::new(HashMap::new()),
                next_timer: AtomicU64::new(0),
            }),
        }
    }

    pub fn subscribe(&self) -> EventSubscription {
        self.shared.bus.subscribe()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.shared.reconnect_attempts.load(Ordering::SeqCst)
    }

    pub fn session_id(&self) -> Option<String> {
        self.shared.session_id.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Opens the connection in the background. Any existing connection is torn down first so
    /// events are never delivered twice.
    pub fn connect(&self) -> Result<(), AppError> {
        self.disconnect();

        let Some(token) = self.shared.credentials.get() else {
            error!("No authentication token found; not connecting");
            self.shared.bus.publish(StreamEvent::ConnectionError {
                reason: ConnectErrorReason::NoToken,
                attempts: self.reconnect_attempts(),
            });
            return Err(AppError::NoToken);
        };

        info!(
            "Connecting event stream to {} with token {}",
            self.shared.config.url,
            token_preview(&token)
        );
        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.state.send_replace(ConnectionState::Connecting);

        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (shutdown, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(run_connection(
            self.shared.clone(),
            generation,
            token,
            outbound_rx,
            shutdown_rx,
        ));

        *self.shared.connection.lock().unwrap_or_else(|e| e.into_inner()) =
            Some(Connection { outbound, shutdown: Some(shutdown), task });
        Ok(())
    }

    /// Closes the connection, if any. Safe to call from any state, any number of times.
    pub fn disconnect(&self) {
        let connection = self.shared.connection.lock().unwrap_or_else(|e| e.into_inner()).take();
        let Some(mut connection) = connection else {
            return;
        };

        self.shared.generation.fetch_add(1, Ordering::SeqCst);
        let was_connected = self.shared.state.send_replace(ConnectionState::Disconnected)
            == ConnectionState::Connected;
        *self.shared.session_id.lock().unwrap_or_else(|e| e.into_inner()) = None;

        if let Some(shutdown) = connection.shutdown.take() {
            if shutdown.send(()).is_err() {
                // The task already exited on its own.
                connection.task.abort();
            }
        }
        if was_connected {
            info!("Disconnected from event stream: {}", DisconnectReason::Client);
            self.shared.bus.publish(StreamEvent::Disconnected {
                reason: DisconnectReason::Client.to_string(),
            });
        }
    }

    pub fn join_conversation(&self, conversation_id: &str) {
        self.emit(ClientIntent::JoinConversation(ConversationRef::new(conversation_id)));
    }

    pub fn leave_conversation(&self, conversation_id: &str) {
        self.emit(ClientIntent::LeaveConversation(ConversationRef::new(conversation_id)));
    }

    pub fn start_typing(&self, conversation_id: &str) {
        self.emit(ClientIntent::TypingStart(ConversationRef::new(conversation_id)));
    }

    pub fn stop_typing(&self, conversation_id: &str) {
        self.emit(ClientIntent::TypingStop(ConversationRef::new(conversation_id)));
    }

    pub fn stream_message(&self, conversation_id: &str, message: &str, model: &str) {
        self.emit(ClientIntent::StreamMessage(StreamRequest {
            conversation_id: conversation_id.to_string(),
            message: message.to_string(),
            model: model.to_string(),
        }));
    }

    /// Signals typing now and schedules a stop after `typing_debounce`. Calling again before the
    /// timer fires restarts it.
    pub fn debounced_typing(&self, conversation_id: &str) {
        let token = self.shared.next_timer.fetch_add(1, Ordering::SeqCst);
        let mut timers = self.shared.typing_timers.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = timers.remove(conversation_id) {
            previous.handle.abort();
        }

        self.start_typing(conversation_id);

        let client = self.clone();
        let conversation = conversation_id.to_string();
        let delay = self.shared.config.typing_debounce;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            client.stop_typing(&conversation);
            let mut timers = client.shared.typing_timers.lock().unwrap_or_else(|e| e.into_inner());
            if timers.get(&conversation).is_some_and(|t| t.token == token) {
                timers.remove(&conversation);
            }
        });
        timers.insert(conversation_id.to_string(), TypingTimer { token, handle });
    }

    pub fn pending_typing_timers(&self) -> usize {
        self.shared.typing_timers.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Cancels typing timers and forcibly disconnects. Idempotent.
    pub fn destroy(&self) {
        let timers: Vec<TypingTimer> = self
            .shared
            .typing_timers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain()
            .map(|(_, timer)| timer)
            .collect();
        for timer in timers {
            timer.handle.abort();
        }
        self.disconnect();
    }

    fn emit(&self, intent: ClientIntent) {
        if !self.is_connected() {
            debug!("Not connected; dropping {intent:?}");
            return;
        }
        let connection = self.shared.connection.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(connection) = connection.as_ref() {
            if connection.outbound.send(intent).is_err() {
                warn!("Event stream task has exited; intent dropped");
            }
        }
    }
}

async fn open_socket(config: &StreamConfig, token: &str) -> Result<Socket, AppError> {
    let mut request = config.url.as_str().into_client_request()?;
    let header = HeaderValue::from_str(&format!("Bearer {token}"))
        .map_err(|e| AppError::Unexpected(format!("token is not a valid header value: {e}")))?;
    request.headers_mut().insert(AUTHORIZATION, header);

    match tokio::time::timeout(config.connect_timeout, connect_async(request)).await {
        Ok(Ok((socket, _response))) => Ok(socket),
        Ok(Err(e)) => Err(AppError::Stream(e)),
        Err(_) => Err(AppError::Timeout {
            action: "connecting to the event stream".to_string(),
            seconds: config.connect_timeout.as_secs(),
        }),
    }
}

/// Background connection loop: connect, pump frames, and reconnect after transport failures.
async fn run_connection(
    shared: Arc<Shared>,
    generation: u64,
    mut token: String,
    mut outbound: mpsc::UnboundedReceiver<ClientIntent>,
    mut shutdown: oneshot::Receiver<()>,
) {
    let max_retries = shared.config.max_reconnect_attempts;
    // Retries since the last successful open; the first attempt is not a retry.
    let mut retries = 0;
    loop {
        let opened = tokio::select! {
            _ = &mut shutdown => return,
            opened = open_socket(&shared.config, &token) => opened,
        };

        match opened {
            Ok(socket) => {
                retries = 0;
                shared.reconnect_attempts.store(0, Ordering::SeqCst);
                shared.set_state(generation, ConnectionState::Connected);
                info!("Connected to event stream");
                shared.publish(generation, StreamEvent::Connected);

                let reason = pump(&shared, generation, socket, &mut outbound, &mut shutdown).await;
                if reason == DisconnectReason::Client {
                    return;
                }
                info!("Disconnected from event stream: {reason}");
                shared.set_state(generation, ConnectionState::Disconnected);
                *shared.session_id.lock().unwrap_or_else(|e| e.into_inner()) = None;
                shared.publish(generation, StreamEvent::Disconnected { reason: reason.to_string() });
                if reason == DisconnectReason::Server {
                    return;
                }
            }
            Err(e) => {
                let attempts = shared.reconnect_attempts.fetch_add(1, Ordering::SeqCst) + 1;
                warn!("Event stream connection error (attempt {attempts}): {e}");
                shared.publish(
                    generation,
                    StreamEvent::ConnectionError {
                        reason: ConnectErrorReason::Transport(e.to_string()),
                        attempts,
                    },
                );
            }
        }

        if retries >= max_retries {
            error!("Giving up on event stream after {retries} reconnection attempts");
            shared.set_state(generation, ConnectionState::Disconnected);
            return;
        }
        retries += 1;
        shared.set_state(generation, ConnectionState::Reconnecting { attempt: retries });

        tokio::select! {
            _ = &mut shutdown => return,
            _ = tokio::time::sleep(shared.config.reconnect_delay) => {}
        }

        match shared.credentials.get() {
            Some(fresh) => token = fresh,
            None => {
                warn!("Token disappeared while reconnecting; stopping");
                shared.set_state(generation, ConnectionState::Disconnected);
                shared.publish(
                    generation,
                    StreamEvent::ConnectionError {
                        reason: ConnectErrorReason::NoToken,
                        attempts: shared.reconnect_attempts.load(Ordering::SeqCst),
                    },
                );
                return;
            }
        }
    }
}

async fn pump(
    shared: &Shared,
    generation: u64,
    socket: Socket,
    outbound: &mut mpsc::UnboundedReceiver<ClientIntent>,
    shutdown: &mut oneshot::Receiver<()>,
) -> DisconnectReason {
    let (mut sink, mut frames) = socket.split();
    loop {
        tokio::select! {
            _ = &mut *shutdown => {
                let _ = sink.send(WsMessage::Close(None)).await;
                return DisconnectReason::Client;
            }
            intent = outbound.recv() => {
                let Some(intent) = intent else {
                    let _ = sink.send(WsMessage::Close(None)).await;
                    return DisconnectReason::Client;
                };
                match serde_json::to_string(&intent) {
                    Ok(json) => {
                        if let Err(e) = sink.send(WsMessage::text(json)).await {
                            return DisconnectReason::Transport(e.to_string());
                        }
                    }
                    Err(e) => error!("Failed to encode {intent:?}: {e}"),
                }
            }
            frame = frames.next() => match frame {
                Some(Ok(WsMessage::Text(text))) => shared.dispatch(generation, text.as_str()),
                Some(Ok(WsMessage::Close(_))) => return DisconnectReason::Server,
                Some(Ok(_)) => {}
                Some(Err(e)) => return DisconnectReason::Transport(e.to_string()),
                None => return DisconnectReason::Transport("transport close".to_string()),
            },
        }
    }
}
