//! Client-side session coordination for an AI chat backend: credential storage, a typed REST
//! client, a reconnecting event-stream client and the chat coordinator that ties them together.

pub mod agent;
pub mod api;
pub mod config;
pub mod credentials;
pub mod errors;
pub mod models;
pub mod service;
pub mod stream;

pub use api::{ApiClient, ChatBackend};
pub use config::ClientConfig;
pub use errors::AppError;
pub use service::{AuthService, ChatCoordinator, ChatState, Notice};
pub use stream::{EventStreamClient, RealtimeChannel, StreamEvent};
