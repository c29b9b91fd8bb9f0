//! The remote chat driver seam.
//!
//! A driver wraps one authenticated browser-automation client. The engine only
//! sees this trait; lifecycle notifications arrive on the channel handed to
//! [`DriverFactory::create`].

use async_trait::async_trait;
use chatmirror_core::{DriverError, RemoteChat, RemoteMessage};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Lifecycle and traffic notifications emitted by a driver.
#[derive(Debug, Clone, PartialEq)]
pub enum DriverEvent {
    /// Raw QR payload to be scanned by the phone.
    Qr(String),
    Authenticated,
    Ready { phone_number: String },
    Disconnected { reason: String },
    AuthFailure { message: String },
    Message(RemoteMessage),
}

#[async_trait]
pub trait ChatDriver: Send + Sync {
    /// Launches the client. Events start flowing once this is called.
    async fn initialize(&self) -> Result<(), DriverError>;

    async fn destroy(&self) -> Result<(), DriverError>;

    /// Whether the underlying automation surface is still open.
    fn is_page_open(&self) -> bool;

    /// Trivial round trip used to confirm the client is responsive.
    async fn health_check(&self) -> Result<(), DriverError>;

    async fn get_chats(&self) -> Result<Vec<RemoteChat>, DriverError>;

    async fn get_chat_by_id(&self, chat_id: &str) -> Result<Option<RemoteChat>, DriverError>;

    /// Latest `limit` messages of the chat, both directions.
    async fn fetch_messages(
        &self,
        chat_id: &str,
        limit: usize,
    ) -> Result<Vec<RemoteMessage>, DriverError>;

    async fn send_message(&self, chat_id: &str, body: &str) -> Result<RemoteMessage, DriverError>;
}

/// Builds driver instances scoped to a session's external client id.
pub trait DriverFactory: Send + Sync {
    fn create(
        &self,
        client_id: &str,
        events: mpsc::UnboundedSender<DriverEvent>,
    ) -> Arc<dyn ChatDriver>;
}
