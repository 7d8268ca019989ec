use std::sync::Arc;

use reqwest::multipart::{Form, Part};
use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tracing::{debug, error, warn};

use crate::config::ApiConfig;
use crate::credentials::{token_preview, CredentialStore};
use crate::errors::AppError;
use crate::models::{
    ApiResponse, AuthPayload, ChatMessage, CheckoutSession, Conversation, ConversationPage,
    CreateConversationRequest, HistoryParams, ListParams, LoginCredentials, ModelInfo,
    NotificationRequest, PasswordChange, ProfileUpdate, RegisterData, SentMessage, StoredFile,
    SubscriptionPlan, UploadedFile, User,
};

/// Where the presentation layer should send the user after an authorization failure.
pub const LOGIN_ROUTE: &str = "/login";

/// Session-level signals raised by the API client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    /// A request came back 401: the token has been cleared and the user must log in again.
    Unauthorized { redirect_to: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Csv,
}

impl ExportFormat {
    fn as_str(&self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Csv => "csv",
        }
    }
}

// ── Nested payload shapes ─────────────────────────────────────────────────────
//
// Several endpoints wrap their payload one level deeper than the envelope (`data.conversation`,
// `data.models`). Both the nested and the flat shape are accepted.

#[derive(Deserialize)]
#[serde(untagged)]
enum ConversationData {
    Nested { conversation: Conversation },
    Flat(Conversation),
}

impl From<ConversationData> for Conversation {
    fn from(data: ConversationData) -> Self {
        match data {
            ConversationData::Nested { conversation } => conversation,
            ConversationData::Flat(conversation) => conversation,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ModelsData {
    Nested { models: Vec<ModelInfo> },
    Flat(Vec<ModelInfo>),
}

impl From<ModelsData> for Vec<ModelInfo> {
    fn from(data: ModelsData) -> Self {
        match data {
            ModelsData::Nested { models } => models,
            ModelsData::Flat(models) => models,
        }
    }
}

/// Login responses come either as `{success, data: {user, token}}` or `{success, user, token}`.
#[derive(Deserialize)]
struct LoginBody {
    #[serde(default)]
    success: bool,
    data: Option<AuthPayload>,
    user: Option<User>,
    token: Option<String>,
    error: Option<String>,
    message: Option<String>,
}

impl From<LoginBody> for ApiResponse<AuthPayload> {
    fn from(body: LoginBody) -> Self {
        let payload = match body.data {
            Some(data) if data.user.is_some() || data.token.is_some() => data,
            _ => AuthPayload { user: body.user, token: body.token },
        };
        let has_payload = payload.user.is_some() || payload.token.is_some();
        ApiResponse {
            success: body.success || has_payload,
            data: has_payload.then_some(payload),
            error: body.error,
            message: body.message,
        }
    }
}

/// Request/response wrapper over the backend HTTP surface.
///
/// Every request carries the stored bearer token. A 401 from any endpoint clears the token and
/// publishes [`AuthEvent::Unauthorized`]. Nothing is retried automatically.
#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    credentials: Arc<dyn CredentialStore>,
    auth_events: broadcast::Sender<AuthEvent>,
}

impl ApiClient {
    pub fn new(config: &ApiConfig, credentials: Arc<dyn CredentialStore>) -> Result<Self, AppError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()?;
        let (auth_events, _) = broadcast::channel(16);
        debug!("API client targeting {}", config.base_url);
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            credentials,
            auth_events,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Subscribe to authorization signals (redirect-to-login).
    pub fn auth_events(&self) -> broadcast::Receiver<AuthEvent> {
        self.auth_events.subscribe()
    }

    // ── Token helpers ────────────────────────────────────────────────────────

    pub fn set_token(&self, token: &str) -> Result<(), AppError> {
        self.credentials.set(token)
    }

    pub fn token(&self) -> Option<String> {
        self.credentials.get()
    }

    pub fn clear_token(&self) {
        if let Err(e) = self.credentials.clear() {
            warn!("Failed to clear stored token: {e}");
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.token().is_some()
    }

    // ── Authentication ───────────────────────────────────────────────────────

    pub async fn login(
        &self,
        credentials: &LoginCredentials,
    ) -> Result<ApiResponse<AuthPayload>, AppError> {
        debug!("Sending login request for {}", credentials.email);
        let path = "/api/auth/login";
        let request = self.http.post(self.url(path)).json(credentials);
        let body: LoginBody = self.send_json(request, "POST", path).await?;
        Ok(body.into())
    }

    pub async fn register(&self, data: &RegisterData) -> Result<ApiResponse<AuthPayload>, AppError> {
        self.post("/api/auth/register", data).await
    }

    /// Logs out server-side. The local token is cleared whether or not the call succeeds.
    pub async fn logout(&self) -> Result<ApiResponse<Value>, AppError> {
        let result = self.post_empty("/api/auth/logout").await;
        self.clear_token();
        result
    }

    pub async fn profile(&self) -> Result<ApiResponse<User>, AppError> {
        self.get("/api/auth/profile").await
    }

    pub async fn update_profile(&self, update: &ProfileUpdate) -> Result<ApiResponse<User>, AppError> {
        self.put("/api/auth/profile", update).await
    }

    pub async fn change_password(
        &self,
        change: &PasswordChange,
    ) -> Result<ApiResponse<Value>, AppError> {
        self.put("/api/auth/change-password", change).await
    }

    // ── Chat ─────────────────────────────────────────────────────────────────

    pub async fn list_conversations(
        &self,
        params: &ListParams,
    ) -> Result<ApiResponse<ConversationPage>, AppError> {
        self.get_with_query("/api/chat/conversations", params).await
    }

    pub async fn create_conversation(
        &self,
        request: &CreateConversationRequest,
    ) -> Result<ApiResponse<Conversation>, AppError> {
        let resp: ApiResponse<ConversationData> = self.post("/api/chat/conversations", request).await?;
        Ok(resp.map(Conversation::from))
    }

    pub async fn get_conversation(&self, id: &str) -> Result<ApiResponse<Conversation>, AppError> {
        let path = format!("/api/chat/conversations/{}", segment(id));
        let resp: ApiResponse<ConversationData> = self.get(&path).await?;
        Ok(resp.map(Conversation::from))
    }

    pub async fn send_message(
        &self,
        conversation_id: &str,
        message: &ChatMessage,
    ) -> Result<ApiResponse<SentMessage>, AppError> {
        let path = format!("/api/chat/conversations/{}/messages", segment(conversation_id));
        self.post(&path, message).await
    }

    pub async fn update_conversation_title(
        &self,
        conversation_id: &str,
        title: &str,
    ) -> Result<ApiResponse<Conversation>, AppError> {
        let path = format!("/api/chat/conversations/{}/title", segment(conversation_id));
        let resp: ApiResponse<ConversationData> = self.put(&path, &json!({ "title": title })).await?;
        Ok(resp.map(Conversation::from))
    }

    pub async fn delete_conversation(
        &self,
        conversation_id: &str,
    ) -> Result<ApiResponse<Value>, AppError> {
        self.delete(&format!("/api/chat/conversations/{}", segment(conversation_id))).await
    }

    pub async fn list_models(&self) -> Result<ApiResponse<Vec<ModelInfo>>, AppError> {
        let resp: ApiResponse<ModelsData> = self.get("/api/chat/models").await?;
        Ok(resp.map(Vec::from))
    }

    // ── Subscription ─────────────────────────────────────────────────────────

    pub async fn subscription_plans(&self) -> Result<ApiResponse<Vec<SubscriptionPlan>>, AppError> {
        self.get("/api/subscription/plans").await
    }

    pub async fn create_checkout_session(
        &self,
        plan: &str,
    ) -> Result<ApiResponse<CheckoutSession>, AppError> {
        self.post("/api/subscription/create-checkout-session", &json!({ "plan": plan })).await
    }

    pub async fn subscription_status(&self) -> Result<ApiResponse<Value>, AppError> {
        self.get("/api/subscription/status").await
    }

    pub async fn cancel_subscription(&self) -> Result<ApiResponse<Value>, AppError> {
        self.post_empty("/api/subscription/cancel").await
    }

    pub async fn payment_status(&self, order_id: &str) -> Result<ApiResponse<Value>, AppError> {
        self.get(&format!("/api/subscription/payment-status/{}", segment(order_id))).await
    }

    // ── Real-time ────────────────────────────────────────────────────────────

    pub async fn realtime_status(&self) -> Result<ApiResponse<Value>, AppError> {
        self.get("/api/realtime/status").await
    }

    pub async fn active_users(&self, conversation_id: &str) -> Result<ApiResponse<Value>, AppError> {
        let path = format!("/api/realtime/conversations/{}/active-users", segment(conversation_id));
        self.get(&path).await
    }

    pub async fn typing_users(&self, conversation_id: &str) -> Result<ApiResponse<Value>, AppError> {
        let path = format!("/api/realtime/conversations/{}/typing", segment(conversation_id));
        self.get(&path).await
    }

    pub async fn notify_user(
        &self,
        user_id: &str,
        notification: &NotificationRequest,
    ) -> Result<ApiResponse<Value>, AppError> {
        self.post(&format!("/api/realtime/notify/{}", segment(user_id)), notification).await
    }

    pub async fn broadcast(
        &self,
        notification: &NotificationRequest,
    ) -> Result<ApiResponse<Value>, AppError> {
        self.post("/api/realtime/broadcast", notification).await
    }

    pub async fn realtime_stats(&self) -> Result<ApiResponse<Value>, AppError> {
        self.get("/api/realtime/stats").await
    }

    // ── History ──────────────────────────────────────────────────────────────

    pub async fn chat_history(
        &self,
        params: &HistoryParams,
    ) -> Result<ApiResponse<ConversationPage>, AppError> {
        self.get_with_query("/api/history", params).await
    }

    pub async fn search_conversations(
        &self,
        query: &str,
    ) -> Result<ApiResponse<ConversationPage>, AppError> {
        self.get_with_query("/api/history/search", &[("q", query)]).await
    }

    pub async fn history_stats(&self) -> Result<ApiResponse<Value>, AppError> {
        self.get("/api/history/stats").await
    }

    pub async fn history_tags(&self) -> Result<ApiResponse<Vec<String>>, AppError> {
        self.get("/api/history/tags").await
    }

    pub async fn add_conversation_tags(
        &self,
        conversation_id: &str,
        tags: &[String],
    ) -> Result<ApiResponse<Value>, AppError> {
        let path = format!("/api/history/conversations/{}/tags", segment(conversation_id));
        self.post(&path, &json!({ "tags": tags })).await
    }

    pub async fn remove_conversation_tag(
        &self,
        conversation_id: &str,
        tag: &str,
    ) -> Result<ApiResponse<Value>, AppError> {
        let path = format!(
            "/api/history/conversations/{}/tags/{}",
            segment(conversation_id),
            segment(tag)
        );
        self.delete(&path).await
    }

    pub async fn export_conversations(
        &self,
        format: ExportFormat,
    ) -> Result<ApiResponse<Value>, AppError> {
        self.get_with_query("/api/history/export", &[("format", format.as_str())]).await
    }

    pub async fn history_insights(&self) -> Result<ApiResponse<Value>, AppError> {
        self.get("/api/history/insights").await
    }

    // ── Uploads ──────────────────────────────────────────────────────────────

    pub async fn upload_file(
        &self,
        filename: &str,
        bytes: Vec<u8>,
    ) -> Result<ApiResponse<UploadedFile>, AppError> {
        let form = Form::new().part("file", Part::bytes(bytes).file_name(filename.to_string()));
        let path = "/api/upload/single";
        self.send(self.http.post(self.url(path)).multipart(form), "POST", path).await
    }

    pub async fn upload_files(
        &self,
        files: Vec<(String, Vec<u8>)>,
    ) -> Result<ApiResponse<Vec<UploadedFile>>, AppError> {
        let form = files.into_iter().fold(Form::new(), |form, (filename, bytes)| {
            form.part("files", Part::bytes(bytes).file_name(filename))
        });
        let path = "/api/upload/multiple";
        self.send(self.http.post(self.url(path)).multipart(form), "POST", path).await
    }

    pub async fn user_files(&self) -> Result<ApiResponse<Vec<StoredFile>>, AppError> {
        self.get("/api/upload/files").await
    }

    pub async fn delete_file(&self, filename: &str) -> Result<ApiResponse<Value>, AppError> {
        self.delete(&format!("/api/upload/files/{}", segment(filename))).await
    }

    // ── Admin ────────────────────────────────────────────────────────────────

    pub async fn admin_dashboard(&self) -> Result<ApiResponse<Value>, AppError> {
        self.get("/api/admin/dashboard").await
    }

    pub async fn admin_users(
        &self,
        page: Option<u32>,
        limit: Option<u32>,
        search: Option<&str>,
    ) -> Result<ApiResponse<Value>, AppError> {
        let mut query: Vec<(&str, String)> = Vec::new();
        if let Some(page) = page {
            query.push(("page", page.to_string()));
        }
        if let Some(limit) = limit {
            query.push(("limit", limit.to_string()));
        }
        if let Some(search) = search {
            query.push(("search", search.to_string()));
        }
        self.get_with_query("/api/admin/users", &query).await
    }

    pub async fn admin_user(&self, user_id: &str) -> Result<ApiResponse<User>, AppError> {
        self.get(&format!("/api/admin/users/{}", segment(user_id))).await
    }

    pub async fn admin_update_user(
        &self,
        user_id: &str,
        update: &ProfileUpdate,
    ) -> Result<ApiResponse<User>, AppError> {
        self.put(&format!("/api/admin/users/{}", segment(user_id)), update).await
    }

    pub async fn admin_delete_user(&self, user_id: &str) -> Result<ApiResponse<Value>, AppError> {
        self.delete(&format!("/api/admin/users/{}", segment(user_id))).await
    }

    pub async fn system_health(&self) -> Result<ApiResponse<Value>, AppError> {
        self.get("/api/admin/health").await
    }

    pub async fn admin_logs(
        &self,
        level: Option<&str>,
        limit: Option<u32>,
    ) -> Result<ApiResponse<Value>, AppError> {
        let mut query: Vec<(&str, String)> = Vec::new();
        if let Some(level) = level {
            query.push(("level", level.to_string()));
        }
        if let Some(limit) = limit {
            query.push(("limit", limit.to_string()));
        }
        self.get_with_query("/api/admin/logs", &query).await
    }

    // ── Utility ──────────────────────────────────────────────────────────────

    pub async fn health_check(&self) -> Result<ApiResponse<Value>, AppError> {
        self.get("/health").await
    }

    pub async fn api_docs(&self) -> Result<ApiResponse<Value>, AppError> {
        self.get("/api").await
    }

    // ── Plumbing ─────────────────────────────────────────────────────────────

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<ApiResponse<T>, AppError> {
        self.send(self.http.get(self.url(path)), "GET", path).await
    }

    async fn get_with_query<T: DeserializeOwned, Q: Serialize + ?Sized>(
        &self,
        path: &str,
        query: &Q,
    ) -> Result<ApiResponse<T>, AppError> {
        self.send(self.http.get(self.url(path)).query(query), "GET", path).await
    }

    async fn post<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<ApiResponse<T>, AppError> {
        self.send(self.http.post(self.url(path)).json(body), "POST", path).await
    }

    async fn post_empty<T: DeserializeOwned>(&self, path: &str) -> Result<ApiResponse<T>, AppError> {
        self.send(self.http.post(self.url(path)), "POST", path).await
    }

    async fn put<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<ApiResponse<T>, AppError> {
        self.send(self.http.put(self.url(path)).json(body), "PUT", path).await
    }

    async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<ApiResponse<T>, AppError> {
        self.send(self.http.delete(self.url(path)), "DELETE", path).await
    }

    async fn send<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        method: &str,
        path: &str,
    ) -> Result<ApiResponse<T>, AppError> {
        self.send_json(request, method, path).await
    }

    /// Attaches the bearer token, executes the request and maps the status onto [`AppError`].
    async fn send_json<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        method: &str,
        path: &str,
    ) -> Result<T, AppError> {
        let request = match self.credentials.get() {
            Some(token) => {
                debug!("API request: {method} {path} (token {})", token_preview(&token));
                request.bearer_auth(token)
            }
            None => {
                debug!("API request: {method} {path} (anonymous)");
                request
            }
        };

        let response = request.send().await.map_err(|e| {
            error!("API request {method} {path} failed: {e}");
            AppError::Network(e)
        })?;
        let status = response.status();
        debug!("API response: {} {method} {path}", status.as_u16());

        if status == StatusCode::UNAUTHORIZED {
            self.handle_unauthorized();
            return Err(AppError::Unauthorized);
        }

        let body = response.bytes().await?;
        if !status.is_success() {
            let reason = serde_json::from_slice::<ApiResponse<Value>>(&body)
                .ok()
                .and_then(|envelope| envelope.reason().map(str::to_string))
                .unwrap_or_else(|| status.canonical_reason().unwrap_or("request failed").to_string());
            error!("API error {} on {method} {path}: {reason}", status.as_u16());
            return Err(AppError::rejected(status.as_u16(), reason));
        }

        // 204-style empty bodies count as a bare success.
        let body: &[u8] = if body.iter().all(u8::is_ascii_whitespace) {
            b"{\"success\":true}"
        } else {
            &body[..]
        };
        serde_json::from_slice(body)
            .map_err(|e| AppError::decode(format!("{method} {path} response"), e))
    }

    fn handle_unauthorized(&self) {
        warn!("Received 401; clearing token and signalling redirect to {LOGIN_ROUTE}");
        self.clear_token();
        // No subscribers simply means nobody is listening for redirects.
        let _ = self.auth_events.send(AuthEvent::Unauthorized {
            redirect_to: LOGIN_ROUTE.to_string(),
        });
    }
}

/// Percent-encodes one path segment so opaque ids and filenames can't alter the route.
fn segment(raw: &str) -> String {
    urlencoding::encode(raw).into_owned()
}
