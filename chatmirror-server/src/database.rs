use crate::queries::{DbHelpers, Queries};
use crate::repository::{ConversationRepository, MessageRepository, SessionRepository};
use async_trait::async_trait;
use chatmirror_core::{
    models::{Conversation, Message, MessageStatus, Session},
    SyncError, SyncResult,
};
use chrono::Utc;
use sqlx::{sqlite::SqlitePoolOptions, Row, SqlitePool};
use tracing::{debug, warn};
use uuid::Uuid;

pub struct ServerDatabase {
    pub pool: SqlitePool,
}

impl ServerDatabase {
    pub async fn new(database_url: &str) -> SyncResult<Self> {
        let mut options = SqlitePoolOptions::new();

        // Every connection to an in-memory database is a separate database,
        // so keep exactly one alive for the lifetime of the pool.
        if database_url.contains(":memory:") || database_url.contains("mode=memory") {
            options = options
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
        } else {
            options = options.max_connections(5);
        }

        let pool = options.connect(database_url).await?;
        Ok(Self { pool })
    }

    pub async fn run_migrations(&self) -> SyncResult<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl SessionRepository for ServerDatabase {
    async fn create(&self, session: &Session) -> SyncResult<()> {
        sqlx::query(Queries::INSERT_SESSION)
            .bind(session.id.to_string())
            .bind(&session.client_id)
            .bind(&session.phone_number)
            .bind(session.status.to_string())
            .bind(session.is_connected)
            .bind(session.is_authenticated)
            .bind(&session.qr_code)
            .bind(session.last_seen.as_ref().map(DbHelpers::to_millis))
            .bind(DbHelpers::to_millis(&session.created_at))
            .bind(DbHelpers::to_millis(&session.updated_at))
            .execute(&self.pool)
            .await?;

        debug!(session_id = %session.id, client_id = %session.client_id, "Session created");
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> SyncResult<Option<Session>> {
        let row = sqlx::query(Queries::GET_SESSION)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(DbHelpers::parse_session).transpose()
    }

    async fn find_by_client_id(&self, client_id: &str) -> SyncResult<Option<Session>> {
        let row = sqlx::query(Queries::GET_SESSION_BY_CLIENT_ID)
            .bind(client_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(DbHelpers::parse_session).transpose()
    }

    async fn find_by_phone_number(&self, phone_number: &str) -> SyncResult<Option<Session>> {
        let row = sqlx::query(Queries::GET_SESSION_BY_PHONE)
            .bind(phone_number)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(DbHelpers::parse_session).transpose()
    }

    async fn find_all(&self) -> SyncResult<Vec<Session>> {
        let rows = sqlx::query(Queries::LIST_SESSIONS)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(DbHelpers::parse_session).collect()
    }

    async fn update(&self, session: &Session) -> SyncResult<()> {
        let result = sqlx::query(Queries::UPDATE_SESSION)
            .bind(session.id.to_string())
            .bind(&session.phone_number)
            .bind(session.status.to_string())
            .bind(session.is_connected)
            .bind(session.is_authenticated)
            .bind(&session.qr_code)
            .bind(session.last_seen.as_ref().map(DbHelpers::to_millis))
            .bind(DbHelpers::to_millis(&Utc::now()))
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(SyncError::SessionNotFound(session.id));
        }
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> SyncResult<()> {
        sqlx::query(Queries::DELETE_SESSION)
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ConversationRepository for ServerDatabase {
    async fn create(&self, conversation: &Conversation) -> SyncResult<()> {
        sqlx::query(Queries::INSERT_CONVERSATION)
            .bind(conversation.id.to_string())
            .bind(conversation.session_id.to_string())
            .bind(&conversation.phone_number)
            .bind(&conversation.contact_name)
            .bind(&conversation.last_message)
            .bind(conversation.last_message_time.as_ref().map(DbHelpers::to_millis))
            .bind(i64::from(conversation.unread_count))
            .bind(conversation.is_group)
            .bind(conversation.is_contact)
            .bind(DbHelpers::to_millis(&conversation.created_at))
            .bind(DbHelpers::to_millis(&conversation.updated_at))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> SyncResult<Option<Conversation>> {
        let row = sqlx::query(Queries::GET_CONVERSATION)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(DbHelpers::parse_conversation).transpose()
    }

    async fn find_by_phone_number(
        &self,
        session_id: Uuid,
        phone_number: &str,
    ) -> SyncResult<Option<Conversation>> {
        let row = sqlx::query(Queries::GET_CONVERSATION_BY_PHONE)
            .bind(session_id.to_string())
            .bind(phone_number)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(DbHelpers::parse_conversation).transpose()
    }

    async fn find_by_session(&self, session_id: Uuid) -> SyncResult<Vec<Conversation>> {
        let rows = sqlx::query(Queries::LIST_SESSION_CONVERSATIONS)
            .bind(session_id.to_string())
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(DbHelpers::parse_conversation).collect()
    }

    async fn find_last_synced(&self, session_id: Uuid) -> SyncResult<Option<Conversation>> {
        let row = sqlx::query(Queries::GET_LAST_SYNCED_CONVERSATION)
            .bind(session_id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(DbHelpers::parse_conversation).transpose()
    }

    async fn count_by_session(&self, session_id: Uuid) -> SyncResult<usize> {
        let row = sqlx::query(Queries::COUNT_SESSION_CONVERSATIONS)
            .bind(session_id.to_string())
            .fetch_one(&self.pool)
            .await?;

        let count: i64 = row.try_get("count")?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    async fn update(&self, conversation: &Conversation) -> SyncResult<()> {
        let result = sqlx::query(Queries::UPDATE_CONVERSATION)
            .bind(conversation.id.to_string())
            .bind(&conversation.contact_name)
            .bind(&conversation.last_message)
            .bind(conversation.last_message_time.as_ref().map(DbHelpers::to_millis))
            .bind(i64::from(conversation.unread_count))
            .bind(conversation.is_group)
            .bind(conversation.is_contact)
            .bind(DbHelpers::to_millis(&Utc::now()))
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(SyncError::ConversationNotFound(conversation.id.to_string()));
        }
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> SyncResult<()> {
        sqlx::query(Queries::DELETE_CONVERSATION)
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_unread_count(&self, session_id: Uuid, phone_number: &str) -> SyncResult<u32> {
        let row = sqlx::query(Queries::GET_UNREAD_COUNT)
            .bind(session_id.to_string())
            .bind(phone_number)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let count: i64 = row.try_get("unread_count")?;
                Ok(u32::try_from(count).unwrap_or(0))
            }
            None => Ok(0),
        }
    }
}

#[async_trait]
impl MessageRepository for ServerDatabase {
    async fn create(&self, message: &Message) -> SyncResult<bool> {
        let metadata = message
            .metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let result = sqlx::query(Queries::INSERT_MESSAGE_IF_ABSENT)
            .bind(&message.id)
            .bind(message.session_id.to_string())
            .bind(message.from_me)
            .bind(&message.from)
            .bind(&message.to)
            .bind(&message.body)
            .bind(message.message_type.to_string())
            .bind(message.status.to_string())
            .bind(DbHelpers::to_millis(&message.timestamp))
            .bind(metadata)
            .bind(DbHelpers::to_millis(&message.created_at))
            .execute(&self.pool)
            .await?;

        if result.rows_affected() > 0 {
            return Ok(true);
        }

        // Already stored: only the delivery status may still move forward.
        if let Some(existing) =
            MessageRepository::find_by_id(self, message.session_id, &message.id).await?
        {
            if existing.status.can_transition_to(message.status) {
                sqlx::query(Queries::UPDATE_MESSAGE_STATUS)
                    .bind(message.session_id.to_string())
                    .bind(&message.id)
                    .bind(message.status.to_string())
                    .execute(&self.pool)
                    .await?;
                debug!(
                    session_id = %message.session_id,
                    message_id = %message.id,
                    from = %existing.status,
                    to = %message.status,
                    "Advanced stored message status"
                );
            }
        }
        Ok(false)
    }

    async fn find_by_id(&self, session_id: Uuid, id: &str) -> SyncResult<Option<Message>> {
        let row = sqlx::query(Queries::GET_MESSAGE)
            .bind(session_id.to_string())
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(DbHelpers::parse_message).transpose()
    }

    async fn find_by_conversation(
        &self,
        session_id: Uuid,
        phone_number: &str,
        limit: usize,
    ) -> SyncResult<Vec<Message>> {
        let rows = sqlx::query(Queries::LIST_CHAT_MESSAGES)
            .bind(session_id.to_string())
            .bind(phone_number)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(DbHelpers::parse_message).collect()
    }

    async fn update_status(
        &self,
        session_id: Uuid,
        id: &str,
        status: MessageStatus,
    ) -> SyncResult<bool> {
        let current = MessageRepository::find_by_id(self, session_id, id)
            .await?
            .ok_or_else(|| SyncError::MessageNotFound(id.to_string()))?;

        if !current.status.can_transition_to(status) {
            warn!(
                %session_id,
                message_id = %id,
                from = %current.status,
                to = %status,
                "Ignoring backward message status transition"
            );
            return Ok(false);
        }

        sqlx::query(Queries::UPDATE_MESSAGE_STATUS)
            .bind(session_id.to_string())
            .bind(id)
            .bind(status.to_string())
            .execute(&self.pool)
            .await?;
        Ok(true)
    }

    async fn delete(&self, session_id: Uuid, id: &str) -> SyncResult<()> {
        sqlx::query(Queries::DELETE_MESSAGE)
            .bind(session_id.to_string())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
