use chatmirror_core::{
    models::{Conversation, Message, Session},
    SyncError, SyncResult,
};
use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row};
use uuid::Uuid;

/// SQL used by the SQLite repositories.
pub struct Queries;

impl Queries {
    // Session queries
    pub const INSERT_SESSION: &'static str = r#"
        INSERT INTO sessions (
            id, client_id, phone_number, status, is_connected, is_authenticated,
            qr_code, last_seen, created_at, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
    "#;

    pub const GET_SESSION: &'static str = r#"
        SELECT id, client_id, phone_number, status, is_connected, is_authenticated,
               qr_code, last_seen, created_at, updated_at
        FROM sessions
        WHERE id = ?1
    "#;

    pub const GET_SESSION_BY_CLIENT_ID: &'static str = r#"
        SELECT id, client_id, phone_number, status, is_connected, is_authenticated,
               qr_code, last_seen, created_at, updated_at
        FROM sessions
        WHERE client_id = ?1
    "#;

    pub const GET_SESSION_BY_PHONE: &'static str = r#"
        SELECT id, client_id, phone_number, status, is_connected, is_authenticated,
               qr_code, last_seen, created_at, updated_at
        FROM sessions
        WHERE phone_number = ?1 AND phone_number <> ''
    "#;

    pub const LIST_SESSIONS: &'static str = r#"
        SELECT id, client_id, phone_number, status, is_connected, is_authenticated,
               qr_code, last_seen, created_at, updated_at
        FROM sessions
        ORDER BY created_at ASC
    "#;

    pub const UPDATE_SESSION: &'static str = r#"
        UPDATE sessions
        SET phone_number = ?2, status = ?3, is_connected = ?4, is_authenticated = ?5,
            qr_code = ?6, last_seen = ?7, updated_at = ?8
        WHERE id = ?1
    "#;

    pub const DELETE_SESSION: &'static str = "DELETE FROM sessions WHERE id = ?1";

    // Conversation queries
    pub const INSERT_CONVERSATION: &'static str = r#"
        INSERT INTO conversations (
            id, session_id, phone_number, contact_name, last_message, last_message_time,
            unread_count, is_group, is_contact, created_at, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
    "#;

    pub const GET_CONVERSATION: &'static str = r#"
        SELECT id, session_id, phone_number, contact_name, last_message, last_message_time,
               unread_count, is_group, is_contact, created_at, updated_at
        FROM conversations
        WHERE id = ?1
    "#;

    pub const GET_CONVERSATION_BY_PHONE: &'static str = r#"
        SELECT id, session_id, phone_number, contact_name, last_message, last_message_time,
               unread_count, is_group, is_contact, created_at, updated_at
        FROM conversations
        WHERE session_id = ?1 AND phone_number = ?2
    "#;

    pub const LIST_SESSION_CONVERSATIONS: &'static str = r#"
        SELECT id, session_id, phone_number, contact_name, last_message, last_message_time,
               unread_count, is_group, is_contact, created_at, updated_at
        FROM conversations
        WHERE session_id = ?1
        ORDER BY last_message_time IS NULL, last_message_time DESC, created_at ASC
    "#;

    pub const GET_LAST_SYNCED_CONVERSATION: &'static str = r#"
        SELECT id, session_id, phone_number, contact_name, last_message, last_message_time,
               unread_count, is_group, is_contact, created_at, updated_at
        FROM conversations
        WHERE session_id = ?1 AND last_message_time IS NOT NULL
        ORDER BY last_message_time DESC
        LIMIT 1
    "#;

    pub const COUNT_SESSION_CONVERSATIONS: &'static str =
        "SELECT COUNT(*) AS count FROM conversations WHERE session_id = ?1";

    pub const UPDATE_CONVERSATION: &'static str = r#"
        UPDATE conversations
        SET contact_name = ?2, last_message = ?3, last_message_time = ?4, unread_count = ?5,
            is_group = ?6, is_contact = ?7, updated_at = ?8
        WHERE id = ?1
    "#;

    pub const DELETE_CONVERSATION: &'static str = "DELETE FROM conversations WHERE id = ?1";

    pub const GET_UNREAD_COUNT: &'static str = r#"
        SELECT unread_count FROM conversations
        WHERE session_id = ?1 AND phone_number = ?2
    "#;

    // Message queries
    pub const INSERT_MESSAGE_IF_ABSENT: &'static str = r#"
        INSERT INTO messages (
            id, session_id, from_me, from_number, to_number, body, message_type,
            status, timestamp, metadata, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
        ON CONFLICT(session_id, id) DO NOTHING
    "#;

    pub const GET_MESSAGE: &'static str = r#"
        SELECT id, session_id, from_me, from_number, to_number, body, message_type,
               status, timestamp, metadata, created_at
        FROM messages
        WHERE session_id = ?1 AND id = ?2
    "#;

    pub const LIST_CHAT_MESSAGES: &'static str = r#"
        SELECT id, session_id, from_me, from_number, to_number, body, message_type,
               status, timestamp, metadata, created_at
        FROM messages
        WHERE session_id = ?1
          AND ((from_me = 1 AND to_number = ?2) OR (from_me = 0 AND from_number = ?2))
        ORDER BY timestamp DESC
        LIMIT ?3
    "#;

    pub const UPDATE_MESSAGE_STATUS: &'static str =
        "UPDATE messages SET status = ?3 WHERE session_id = ?1 AND id = ?2";

    pub const DELETE_MESSAGE: &'static str =
        "DELETE FROM messages WHERE session_id = ?1 AND id = ?2";
}

/// Row mapping helpers shared by the repositories.
pub struct DbHelpers;

impl DbHelpers {
    pub fn to_millis(time: &DateTime<Utc>) -> i64 {
        time.timestamp_millis()
    }

    pub fn from_millis(millis: i64) -> SyncResult<DateTime<Utc>> {
        DateTime::from_timestamp_millis(millis)
            .ok_or_else(|| SyncError::Validation(format!("timestamp out of range: {millis}")))
    }

    fn optional_time(row: &SqliteRow, column: &str) -> SyncResult<Option<DateTime<Utc>>> {
        row.try_get::<Option<i64>, _>(column)?
            .map(Self::from_millis)
            .transpose()
    }

    fn uuid(row: &SqliteRow, column: &str) -> SyncResult<Uuid> {
        let raw: String = row.try_get(column)?;
        Ok(Uuid::parse_str(&raw)?)
    }

    pub fn parse_session(row: &SqliteRow) -> SyncResult<Session> {
        let status: String = row.try_get("status")?;
        Ok(Session {
            id: Self::uuid(row, "id")?,
            client_id: row.try_get("client_id")?,
            phone_number: row.try_get("phone_number")?,
            status: status
                .parse()
                .map_err(|_| SyncError::Validation(format!("unknown session status: {status}")))?,
            is_connected: row.try_get("is_connected")?,
            is_authenticated: row.try_get("is_authenticated")?,
            qr_code: row.try_get("qr_code")?,
            last_seen: Self::optional_time(row, "last_seen")?,
            created_at: Self::from_millis(row.try_get("created_at")?)?,
            updated_at: Self::from_millis(row.try_get("updated_at")?)?,
        })
    }

    pub fn parse_conversation(row: &SqliteRow) -> SyncResult<Conversation> {
        let unread: i64 = row.try_get("unread_count")?;
        Ok(Conversation {
            id: Self::uuid(row, "id")?,
            session_id: Self::uuid(row, "session_id")?,
            phone_number: row.try_get("phone_number")?,
            contact_name: row.try_get("contact_name")?,
            last_message: row.try_get("last_message")?,
            last_message_time: Self::optional_time(row, "last_message_time")?,
            unread_count: u32::try_from(unread).unwrap_or(0),
            is_group: row.try_get("is_group")?,
            is_contact: row.try_get("is_contact")?,
            created_at: Self::from_millis(row.try_get("created_at")?)?,
            updated_at: Self::from_millis(row.try_get("updated_at")?)?,
        })
    }

    pub fn parse_message(row: &SqliteRow) -> SyncResult<Message> {
        let message_type: String = row.try_get("message_type")?;
        let status: String = row.try_get("status")?;
        let metadata: Option<String> = row.try_get("metadata")?;

        Ok(Message {
            id: row.try_get("id")?,
            session_id: Self::uuid(row, "session_id")?,
            from_me: row.try_get("from_me")?,
            from: row.try_get("from_number")?,
            to: row.try_get("to_number")?,
            body: row.try_get("body")?,
            message_type: message_type
                .parse()
                .map_err(|_| SyncError::Validation(format!("unknown message type: {message_type}")))?,
            status: status
                .parse()
                .map_err(|_| SyncError::Validation(format!("unknown message status: {status}")))?,
            timestamp: Self::from_millis(row.try_get("timestamp")?)?,
            metadata: metadata.map(|raw| serde_json::from_str(&raw)).transpose()?,
            created_at: Self::from_millis(row.try_get("created_at")?)?,
        })
    }
}
