use crate::events::EventSink;
use crate::ingestion::{conversation_event, record_in_conversation};
use crate::registry::SessionRegistry;
use crate::repository::Repositories;
use chatmirror_core::{
    models::{Message, MessageStatus},
    protocol::SessionEvent,
    remote::map_remote_message,
    ChatAddress, SyncError, SyncResult,
};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Sends messages through a session's driver and mirrors them locally.
#[derive(Clone)]
pub struct OutboundDispatch {
    registry: Arc<SessionRegistry>,
    repos: Repositories,
    events: Arc<dyn EventSink>,
}

impl OutboundDispatch {
    pub fn new(
        registry: Arc<SessionRegistry>,
        repos: Repositories,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            registry,
            repos,
            events,
        }
    }

    /// The stored message and the conversation preview are written as two
    /// separate steps; a failure between them is repaired by the next sync pass.
    pub async fn send_message(&self, session_id: Uuid, to: &str, body: &str) -> SyncResult<Message> {
        let address = ChatAddress::parse(to)?;

        let driver = self
            .registry
            .driver(session_id)
            .ok_or(SyncError::SessionNotConnected(session_id))?;

        let session = self
            .repos
            .sessions
            .find_by_id(session_id)
            .await?
            .ok_or(SyncError::SessionNotFound(session_id))?;

        let sent = driver.send_message(address.as_str(), body).await?;

        let mut message = map_remote_message(session_id, &sent);
        message.from_me = true;
        message.status = MessageStatus::Sent;
        if !session.phone_number.is_empty() {
            message.from = session.phone_number.clone();
        }
        message.to = address.user().to_string();
        if message.body.is_empty() {
            message.body = body.to_string();
        }

        if !self.repos.messages.create(&message).await? {
            warn!(%session_id, message_id = %message.id, "Sent message was already stored");
        }

        let (conversation, created) =
            record_in_conversation(&self.repos, session_id, &message, false).await?;

        info!(
            %session_id,
            message_id = %message.id,
            phone = %conversation.phone_number,
            "Message sent"
        );

        self.events.publish(
            session_id,
            SessionEvent::MessageSent {
                message: message.clone(),
            },
        );
        self.events
            .publish(session_id, conversation_event(conversation, created));

        Ok(message)
    }
}
