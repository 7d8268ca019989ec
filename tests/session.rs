mod common;

use std::sync::Arc;
use std::time::Duration;

use ai_chat_client::api::ApiClient;
use ai_chat_client::config::{CoordinatorConfig, ReplyMode, RetryPolicy};
use ai_chat_client::credentials::{CredentialStore, MemoryCredentialStore};
use ai_chat_client::models::MessageRole;
use ai_chat_client::service::{AuthService, ChatCoordinator, ChatState};
use ai_chat_client::stream::EventStreamClient;
use common::{FakeBackend, PASSWORD};

struct Session {
    auth: AuthService,
    coordinator: ChatCoordinator,
    stream: EventStreamClient,
    store: Arc<MemoryCredentialStore>,
}

fn session(backend: &FakeBackend, reply_mode: ReplyMode) -> Session {
    let store = Arc::new(MemoryCredentialStore::default());
    let credentials: Arc<dyn CredentialStore> = store.clone();
    let api = ApiClient::new(&backend.api_config(), credentials.clone()).unwrap();
    let stream = EventStreamClient::new(backend.stream_config(), credentials.clone());
    let auth = AuthService::new(api.clone());
    let coordinator = ChatCoordinator::new(
        Arc::new(api),
        Arc::new(stream.clone()),
        credentials,
        CoordinatorConfig {
            default_model: "gpt-4o-mini".into(),
            token_poll: RetryPolicy::new(10, Duration::from_millis(20)),
            reply_mode,
        },
    );
    coordinator.watch_user(auth.watch_user());
    Session { auth, coordinator, stream, store }
}

async fn wait_for_state(coordinator: &ChatCoordinator, check: impl Fn(&ChatState) -> bool) -> ChatState {
    for _ in 0..250 {
        let state = coordinator.snapshot().await;
        if check(&state) {
            return state;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("coordinator never reached the expected state");
}

#[tokio::test]
async fn login_connects_and_a_streamed_reply_lands_in_the_conversation() {
    let backend = FakeBackend::spawn().await;
    let s = session(&backend, ReplyMode::Server);

    s.auth.login("ada@example.com", PASSWORD).await.unwrap();
    wait_for_state(&s.coordinator, |state| state.is_connected).await;

    s.coordinator.set_draft("Hi there").await;
    s.coordinator.submit_draft().await.unwrap();

    let state = wait_for_state(&s.coordinator, |state| {
        !state.streaming && !state.ai_typing && state.messages.len() == 2 && !state.sending
    })
    .await;
    assert_eq!(state.current_id(), Some("c1"));
    assert_eq!(state.messages[0].role, MessageRole::User);
    assert_eq!(state.messages[1].role, MessageRole::Assistant);
    assert_eq!(state.messages[1].content, "Hello");
    assert_eq!(state.current_conversation.as_ref().unwrap().total_tokens, 42);

    let names = backend.state.intent_names();
    assert!(names.contains(&"join-conversation".to_string()));
    assert!(names.contains(&"stream-message".to_string()));
}

#[tokio::test]
async fn offline_mode_answers_locally() {
    let backend = FakeBackend::spawn().await;
    let s = session(&backend, ReplyMode::Offline { delay: Duration::from_millis(10) });

    s.auth.login("ada@example.com", PASSWORD).await.unwrap();
    wait_for_state(&s.coordinator, |state| state.is_connected).await;

    s.coordinator.set_draft("Explain quantum computing").await;
    s.coordinator.submit_draft().await.unwrap();

    let state = s.coordinator.snapshot().await;
    assert_eq!(state.messages.len(), 2);
    assert!(state.messages[1].content.starts_with("Quantum computing"));
    assert!(!backend.state.intent_names().contains(&"stream-message".to_string()));
}

#[tokio::test]
async fn logout_tears_the_stream_down() {
    let backend = FakeBackend::spawn().await;
    let s = session(&backend, ReplyMode::Server);

    s.auth.login("ada@example.com", PASSWORD).await.unwrap();
    wait_for_state(&s.coordinator, |state| state.is_connected).await;
    s.coordinator.load_conversations().await.unwrap();

    s.auth.logout().await;
    let state = wait_for_state(&s.coordinator, |state| state.user.is_none()).await;
    assert!(!state.is_connected);
    assert!(!s.stream.is_connected());
    assert!(s.store.get().is_none());
}

#[tokio::test]
async fn models_come_from_the_backend() {
    let backend = FakeBackend::spawn().await;
    let s = session(&backend, ReplyMode::Server);
    s.auth.login("ada@example.com", PASSWORD).await.unwrap();

    s.coordinator.load_models().await.unwrap();
    let state = s.coordinator.snapshot().await;
    assert_eq!(state.models.len(), 2);
    assert_eq!(state.selected_model, "claude-3");
}
