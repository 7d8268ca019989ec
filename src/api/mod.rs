pub mod client;

use async_trait::async_trait;
use serde_json::Value;

pub use client::{ApiClient, AuthEvent, ExportFormat, LOGIN_ROUTE};

use crate::errors::AppError;
use crate::models::{
    ApiResponse, ChatMessage, Conversation, ConversationPage, CreateConversationRequest,
    ListParams, ModelInfo, SentMessage,
};

/// The slice of the backend the chat coordinator depends on.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn list_conversations(&self) -> Result<ApiResponse<ConversationPage>, AppError>;

    async fn create_conversation(
        &self,
        request: CreateConversationRequest,
    ) -> Result<ApiResponse<Conversation>, AppError>;

    async fn get_conversation(&self, id: &str) -> Result<ApiResponse<Conversation>, AppError>;

    async fn update_conversation_title(
        &self,
        id: &str,
        title: &str,
    ) -> Result<ApiResponse<Conversation>, AppError>;

    async fn delete_conversation(&self, id: &str) -> Result<ApiResponse<Value>, AppError>;

    async fn send_message(
        &self,
        conversation_id: &str,
        message: ChatMessage,
    ) -> Result<ApiResponse<SentMessage>, AppError>;

    async fn list_models(&self) -> Result<ApiResponse<Vec<ModelInfo>>, AppError>;
}

#[async_trait]
impl ChatBackend for ApiClient {
    async fn list_conversations(&self) -> Result<ApiResponse<ConversationPage>, AppError> {
        ApiClient::list_conversations(self, &ListParams::default()).await
    }

    async fn create_conversation(
        &self,
        request: CreateConversationRequest,
    ) -> Result<ApiResponse<Conversation>, AppError> {
        ApiClient::create_conversation(self, &request).await
    }

    async fn get_conversation(&self, id: &str) -> Result<ApiResponse<Conversation>, AppError> {
        ApiClient::get_conversation(self, id).await
    }

    async fn update_conversation_title(
        &self,
        id: &str,
        title: &str,
    ) -> Result<ApiResponse<Conversation>, AppError> {
        ApiClient::update_conversation_title(self, id, title).await
    }

    async fn delete_conversation(&self, id: &str) -> Result<ApiResponse<Value>, AppError> {
        ApiClient::delete_conversation(self, id).await
    }

    async fn send_message(
        &self,
        conversation_id: &str,
        message: ChatMessage,
    ) -> Result<ApiResponse<SentMessage>, AppError> {
        ApiClient::send_message(self, conversation_id, &message).await
    }

    async fn list_models(&self) -> Result<ApiResponse<Vec<ModelInfo>>, AppError> {
        ApiClient::list_models(self).await
    }
}
