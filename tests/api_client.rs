mod common;

use std::sync::Arc;

use ai_chat_client::api::{ApiClient, AuthEvent, LOGIN_ROUTE};
use ai_chat_client::credentials::{CredentialStore, MemoryCredentialStore};
use ai_chat_client::models::{CreateConversationRequest, ListParams};
use ai_chat_client::service::AuthService;
use ai_chat_client::AppError;
use common::{eventually, FakeBackend, PASSWORD, TOKEN};

fn client(backend: &FakeBackend) -> (ApiClient, Arc<MemoryCredentialStore>) {
    let store = Arc::new(MemoryCredentialStore::default());
    let api = ApiClient::new(&backend.api_config(), store.clone()).unwrap();
    (api, store)
}

#[tokio::test]
async fn login_stores_the_token_and_publishes_the_user() {
    let backend = FakeBackend::spawn().await;
    let (api, store) = client(&backend);
    let auth = AuthService::new(api);
    let users = auth.watch_user();

    let user = auth.login("ada@example.com", PASSWORD).await.unwrap();
    assert_eq!(user.id, "u1");
    assert_eq!(store.get().as_deref(), Some(TOKEN));
    assert_eq!(users.borrow().as_ref().map(|u| u.username.as_str()), Some("ada"));
}

#[tokio::test]
async fn bad_credentials_are_rejected_without_a_token() {
    let backend = FakeBackend::spawn().await;
    let (api, store) = client(&backend);
    let auth = AuthService::new(api);

    let err = auth.login("ada@example.com", "wrong").await.unwrap_err();
    match err {
        AppError::Rejected { status, message } => {
            assert_eq!(status, 400);
            assert_eq!(message, "Invalid credentials");
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert!(store.get().is_none());
    assert!(!auth.is_authenticated());
}

#[tokio::test]
async fn unauthorized_response_clears_token_and_signals_redirect() {
    let backend = FakeBackend::spawn().await;
    let (api, store) = client(&backend);
    store.set("stale-token").unwrap();
    let mut auth_events = api.auth_events();

    let err = api.list_conversations(&ListParams::default()).await.unwrap_err();
    assert!(err.is_auth());
    assert!(store.get().is_none());
    assert_eq!(
        auth_events.recv().await.unwrap(),
        AuthEvent::Unauthorized { redirect_to: LOGIN_ROUTE.to_string() }
    );
}

#[tokio::test]
async fn session_ends_when_the_token_is_rejected() {
    let backend = FakeBackend::spawn().await;
    let (api, _store) = client(&backend);
    let auth = AuthService::new(api.clone());
    let _watcher = auth.watch_unauthorized();

    auth.login("ada@example.com", PASSWORD).await.unwrap();
    assert!(auth.is_authenticated());

    api.set_token("revoked").unwrap();
    assert!(api.profile().await.is_err());
    assert!(eventually(|| !auth.is_authenticated()).await);
}

#[tokio::test]
async fn check_auth_restores_or_forgets_the_session() {
    let backend = FakeBackend::spawn().await;
    let (api, store) = client(&backend);
    let auth = AuthService::new(api);

    assert!(auth.check_auth().await.is_none());

    store.set(TOKEN).unwrap();
    assert_eq!(auth.check_auth().await.map(|u| u.id), Some("u1".to_string()));

    store.set("expired").unwrap();
    assert!(auth.check_auth().await.is_none());
    assert!(store.get().is_none());
}

#[tokio::test]
async fn logout_always_clears_the_token() {
    let backend = FakeBackend::spawn().await;
    let (api, store) = client(&backend);
    let auth = AuthService::new(api);
    auth.login("ada@example.com", PASSWORD).await.unwrap();

    auth.logout().await;
    assert!(store.get().is_none());
    assert!(auth.current_user().is_none());
}

#[tokio::test]
async fn conversation_lifecycle_over_http() {
    let backend = FakeBackend::spawn().await;
    let (api, store) = client(&backend);
    store.set(TOKEN).unwrap();

    let created = api
        .create_conversation(&CreateConversationRequest {
            title: Some("Trip".into()),
            model: Some("gpt-4o".into()),
        })
        .await
        .unwrap()
        .into_data()
        .unwrap();
    assert_eq!(created.id, "c1");
    assert_eq!(created.title, "Trip");

    let page = api.list_conversations(&ListParams::default()).await.unwrap().into_data().unwrap();
    assert_eq!(page.conversations.len(), 1);
    assert_eq!(page.total, 1);

    let renamed = api.update_conversation_title("c1", "Paris").await.unwrap().into_data().unwrap();
    assert_eq!(renamed.title, "Paris");

    let fetched = api.get_conversation("c1").await.unwrap().into_data().unwrap();
    assert_eq!(fetched.title, "Paris");

    // Empty body on success.
    assert!(api.delete_conversation("c1").await.unwrap().success);

    let err = api.get_conversation("c1").await.unwrap_err();
    assert!(err.is_not_found());
    assert!(store.get().is_some(), "404 must not clear the token");
}

#[tokio::test]
async fn models_are_unwrapped_from_the_nested_payload() {
    let backend = FakeBackend::spawn().await;
    let (api, store) = client(&backend);
    store.set(TOKEN).unwrap();

    let models = api.list_models().await.unwrap().into_data().unwrap();
    let ids: Vec<_> = models.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, ["claude-3", "gpt-4o"]);
}

#[tokio::test]
async fn unreachable_backend_is_a_network_error() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let config = ai_chat_client::config::ApiConfig {
        base_url: format!("http://{addr}"),
        ..Default::default()
    };
    let api = ApiClient::new(&config, Arc::new(MemoryCredentialStore::default())).unwrap();
    let err = api.list_models().await.unwrap_err();
    assert!(matches!(err, AppError::Network(_)));
    assert!(err.is_transient());
}
