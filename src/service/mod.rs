pub mod auth_service;
pub mod chat_coordinator;
pub mod state;

pub use auth_service::AuthService;
pub use chat_coordinator::{ChatCoordinator, NEW_CHAT_TITLE};
pub use state::{ChatState, Notice, NoticeLevel};
