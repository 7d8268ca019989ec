pub mod bus;
pub mod client;
pub mod events;

pub use bus::{EventBus, EventSubscription};
pub use client::{ConnectionState, EventStreamClient};
pub use events::{ClientIntent, ConnectErrorReason, ServerEvent, StreamEvent};

use crate::errors::AppError;

/// The real-time surface the chat coordinator depends on. Intents are silently dropped unless
/// the channel is connected.
pub trait RealtimeChannel: Send + Sync {
    fn connect(&self) -> Result<(), AppError>;
    fn subscribe(&self) -> EventSubscription;
    fn is_connected(&self) -> bool;
    fn join_conversation(&self, conversation_id: &str);
    fn leave_conversation(&self, conversation_id: &str);
    fn start_typing(&self, conversation_id: &str);
    fn stop_typing(&self, conversation_id: &str);
    fn debounced_typing(&self, conversation_id: &str);
    fn stream_message(&self, conversation_id: &str, message: &str, model: &str);
    fn destroy(&self);
}

impl RealtimeChannel for EventStreamClient {
    fn connect(&self) -> Result<(), AppError> {
        EventStreamClient::connect(self)
    }

    fn subscribe(&self) -> EventSubscription {
        EventStreamClient::subscribe(self)
    }

    fn is_connected(&self) -> bool {
        EventStreamClient::is_connected(self)
    }

    fn join_conversation(&self, conversation_id: &str) {
        EventStreamClient::join_conversation(self, conversation_id)
    }

    fn leave_conversation(&self, conversation_id: &str) {
        EventStreamClient::leave_conversation(self, conversation_id)
    }

    fn start_typing(&self, conversation_id: &str) {
        EventStreamClient::start_typing(self, conversation_id)
    }

    fn stop_typing(&self, conversation_id: &str) {
        EventStreamClient::stop_typing(self, conversation_id)
    }

    fn debounced_typing(&self, conversation_id: &str) {
        EventStreamClient::debounced_typing(self, conversation_id)
    }

    fn stream_message(&self, conversation_id: &str, message: &str, model: &str) {
        EventStreamClient::stream_message(self, conversation_id, message, model)
    }

    fn destroy(&self) {
        EventStreamClient::destroy(self)
    }
}
