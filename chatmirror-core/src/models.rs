use crate::{SyncError, SyncResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

/// Connection state of a session, driven by driver lifecycle events.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Initializing,
    QrReady,
    Authenticating,
    Connected,
    Disconnected,
    Error,
}

/// One authenticated attachment to a chat account.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Session {
    pub id: Uuid,
    /// Identifier the driver uses to scope its credential cache.
    pub client_id: String,
    /// Empty until the account has authenticated.
    pub phone_number: String,
    pub status: SessionStatus,
    pub is_connected: bool,
    pub is_authenticated: bool,
    pub qr_code: Option<String>,
    pub last_seen: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    /// A freshly provisioned, unauthenticated session.
    pub fn provision(client_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            client_id: client_id.into(),
            phone_number: String::new(),
            status: SessionStatus::Disconnected,
            is_connected: false,
            is_authenticated: false,
            qr_code: None,
            last_seen: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Clears the connection flags and moves the session to `status`.
    pub fn mark_offline(&mut self, status: SessionStatus) {
        self.status = status;
        self.is_connected = false;
        self.is_authenticated = false;
        self.qr_code = None;
    }
}

/// Local summary of one counterpart's chat within a session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Conversation {
    pub id: Uuid,
    pub session_id: Uuid,
    pub phone_number: String,
    pub contact_name: Option<String>,
    pub last_message: Option<String>,
    pub last_message_time: Option<DateTime<Utc>>,
    pub unread_count: u32,
    pub is_group: bool,
    pub is_contact: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    pub fn new(session_id: Uuid, phone_number: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            session_id,
            phone_number: phone_number.into(),
            contact_name: None,
            last_message: None,
            last_message_time: None,
            unread_count: 0,
            is_group: false,
            is_contact: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Records a newer message as the preview. Older messages leave the
    /// preview untouched so `last_message_time` never moves backwards.
    /// Returns whether the preview changed.
    pub fn apply_preview(&mut self, text: &str, time: DateTime<Utc>) -> bool {
        if matches!(self.last_message_time, Some(current) if current > time) {
            return false;
        }
        self.last_message = Some(text.to_string());
        self.last_message_time = Some(time);
        true
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MessageType {
    Text,
    Image,
    Audio,
    Video,
    Document,
    Location,
    Contact,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MessageStatus {
    Pending,
    Sent,
    Delivered,
    Read,
    Failed,
}

impl MessageStatus {
    fn rank(self) -> u8 {
        match self {
            MessageStatus::Pending => 0,
            MessageStatus::Sent => 1,
            MessageStatus::Delivered => 2,
            MessageStatus::Read => 3,
            MessageStatus::Failed => 0,
        }
    }

    /// Status only moves forward. `Failed` is reachable from pending/sent and
    /// is terminal.
    pub fn can_transition_to(self, next: MessageStatus) -> bool {
        match (self, next) {
            (MessageStatus::Failed, _) => false,
            (current, MessageStatus::Failed) => {
                matches!(current, MessageStatus::Pending | MessageStatus::Sent)
            }
            (current, next) => next.rank() > current.rank(),
        }
    }
}

/// One remote message, keyed by its external identifier within a session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub id: String,
    pub session_id: Uuid,
    pub from_me: bool,
    pub from: String,
    pub to: String,
    pub body: String,
    pub message_type: MessageType,
    pub status: MessageStatus,
    pub timestamp: DateTime<Utc>,
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Phone number of the other side of the chat.
    pub fn counterpart(&self) -> &str {
        if self.from_me {
            &self.to
        } else {
            &self.from
        }
    }

    /// Text used as a conversation preview.
    pub fn preview(&self) -> String {
        if self.body.is_empty() && self.message_type != MessageType::Text {
            format!("[{}]", self.message_type)
        } else {
            self.body.clone()
        }
    }
}

/// Which slice of the remote chat list a reconciliation pass covers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SyncKind {
    Incremental,
    Full,
    Progressive { batch_size: usize, offset: usize },
}

impl SyncKind {
    /// Rejects a progressive page of zero chats.
    pub fn validate(&self) -> SyncResult<()> {
        match self {
            SyncKind::Progressive { batch_size: 0, .. } => {
                Err(SyncError::Validation("batch size must be positive".into()))
            }
            _ => Ok(()),
        }
    }
}

/// Counts produced by one reconciliation pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SyncReport {
    pub total_conversations: usize,
    pub processed_conversations: usize,
    pub created: usize,
    pub updated: usize,
    pub failed: usize,
    pub is_complete: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SyncOutcome {
    Completed(SyncReport),
    /// The pass did not run; it will be retried on the next trigger.
    Skipped { reason: String },
}

impl SyncOutcome {
    pub fn report(&self) -> Option<&SyncReport> {
        match self {
            SyncOutcome::Completed(report) => Some(report),
            SyncOutcome::Skipped { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncStats {
    pub is_active: bool,
    pub queue_length: usize,
    pub last_sync_time: Option<DateTime<Utc>>,
}

/// Result handed back to the caller of `connect`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConnectOutcome {
    QrCode { qr_code: String, session: Session },
    Authenticated { session: Session },
}

impl ConnectOutcome {
    pub fn session(&self) -> &Session {
        match self {
            ConnectOutcome::QrCode { session, .. } | ConnectOutcome::Authenticated { session } => {
                session
            }
        }
    }
}
