//! Repository seams the engine persists through.

use async_trait::async_trait;
use chatmirror_core::{
    models::{Conversation, Message, MessageStatus, Session},
    SyncResult,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::database::ServerDatabase;

#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn create(&self, session: &Session) -> SyncResult<()>;
    async fn find_by_id(&self, id: Uuid) -> SyncResult<Option<Session>>;
    async fn find_by_client_id(&self, client_id: &str) -> SyncResult<Option<Session>>;
    async fn find_by_phone_number(&self, phone_number: &str) -> SyncResult<Option<Session>>;
    async fn find_all(&self) -> SyncResult<Vec<Session>>;
    async fn update(&self, session: &Session) -> SyncResult<()>;
    async fn delete(&self, id: Uuid) -> SyncResult<()>;
}

#[async_trait]
pub trait ConversationRepository: Send + Sync {
    async fn create(&self, conversation: &Conversation) -> SyncResult<()>;
    async fn find_by_id(&self, id: Uuid) -> SyncResult<Option<Conversation>>;
    async fn find_by_phone_number(
        &self,
        session_id: Uuid,
        phone_number: &str,
    ) -> SyncResult<Option<Conversation>>;
    async fn find_by_session(&self, session_id: Uuid) -> SyncResult<Vec<Conversation>>;
    /// The session's conversation with the latest `last_message_time`.
    async fn find_last_synced(&self, session_id: Uuid) -> SyncResult<Option<Conversation>>;
    async fn count_by_session(&self, session_id: Uuid) -> SyncResult<usize>;
    async fn update(&self, conversation: &Conversation) -> SyncResult<()>;
    async fn delete(&self, id: Uuid) -> SyncResult<()>;
    async fn get_unread_count(&self, session_id: Uuid, phone_number: &str) -> SyncResult<u32>;
}

#[async_trait]
pub trait MessageRepository: Send + Sync {
    /// Stores the message unless its (session, id) pair already exists, in
    /// which case only a forward status change is applied. Returns whether a
    /// new row was written.
    async fn create(&self, message: &Message) -> SyncResult<bool>;
    async fn find_by_id(&self, session_id: Uuid, id: &str) -> SyncResult<Option<Message>>;
    /// Newest first.
    async fn find_by_conversation(
        &self,
        session_id: Uuid,
        phone_number: &str,
        limit: usize,
    ) -> SyncResult<Vec<Message>>;
    /// Applies `status` if it moves the message forward. Returns whether it did.
    async fn update_status(
        &self,
        session_id: Uuid,
        id: &str,
        status: MessageStatus,
    ) -> SyncResult<bool>;
    async fn delete(&self, session_id: Uuid, id: &str) -> SyncResult<()>;
}

/// The three stores the engine needs, shared across components.
#[derive(Clone)]
pub struct Repositories {
    pub sessions: Arc<dyn SessionRepository>,
    pub conversations: Arc<dyn ConversationRepository>,
    pub messages: Arc<dyn MessageRepository>,
}

impl Repositories {
    pub fn from_database(db: Arc<ServerDatabase>) -> Self {
        Self {
            sessions: db.clone(),
            conversations: db.clone(),
            messages: db,
        }
    }
}
