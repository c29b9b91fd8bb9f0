//! Shapes returned by the remote chat driver and their mapping into the
//! local data model.

use crate::address::phone_of;
use crate::models::{Message, MessageStatus, MessageType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A chat as listed by the driver.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RemoteChat {
    /// Driver address, e.g. `15550100@c.us`.
    pub id: String,
    pub name: Option<String>,
    pub is_group: bool,
    pub archived: bool,
    pub unread_count: u32,
    /// Unix seconds of the latest activity in the chat.
    pub timestamp: Option<i64>,
    /// Whether the counterpart is in the account's contact list.
    pub is_contact: bool,
    pub last_message: Option<RemoteMessage>,
}

impl RemoteChat {
    pub fn phone_number(&self) -> &str {
        phone_of(&self.id)
    }

    pub fn last_activity(&self) -> Option<DateTime<Utc>> {
        self.timestamp.and_then(|secs| DateTime::from_timestamp(secs, 0))
    }
}

/// A message as returned by the driver.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RemoteMessage {
    pub id: String,
    pub from: String,
    pub to: String,
    pub from_me: bool,
    pub body: String,
    /// Provider message type (`chat`, `image`, `ptt`, `vcard`, ...).
    pub kind: String,
    /// Provider timestamp in Unix seconds.
    pub timestamp: Option<i64>,
    /// Secondary date field some driver versions populate instead.
    pub date: Option<DateTime<Utc>>,
    /// Delivery acknowledgement level reported by the provider.
    pub ack: Option<i32>,
    pub has_media: bool,
    pub metadata: Option<serde_json::Value>,
}

impl RemoteMessage {
    /// Address of the chat this message belongs to.
    pub fn chat_address(&self) -> &str {
        if self.from_me {
            &self.to
        } else {
            &self.from
        }
    }
}

pub fn message_type_from_remote(kind: &str) -> MessageType {
    match kind {
        "image" | "sticker" => MessageType::Image,
        "audio" | "ptt" => MessageType::Audio,
        "video" | "gif" => MessageType::Video,
        "document" => MessageType::Document,
        "location" | "live_location" => MessageType::Location,
        "vcard" | "multi_vcard" | "contact" => MessageType::Contact,
        _ => MessageType::Text,
    }
}

/// Maps a provider acknowledgement level onto a message status.
pub fn status_from_ack(ack: Option<i32>) -> MessageStatus {
    match ack {
        Some(a) if a < 0 => MessageStatus::Failed,
        Some(0) => MessageStatus::Pending,
        Some(1) | None => MessageStatus::Sent,
        Some(2) => MessageStatus::Delivered,
        Some(_) => MessageStatus::Read,
    }
}

/// Prefers the provider timestamp, then the secondary date field, then now.
pub fn resolve_timestamp(message: &RemoteMessage) -> DateTime<Utc> {
    message
        .timestamp
        .filter(|secs| *secs > 0)
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .or(message.date)
        .unwrap_or_else(Utc::now)
}

pub fn map_remote_message(session_id: Uuid, remote: &RemoteMessage) -> Message {
    let status = if remote.from_me {
        status_from_ack(remote.ack)
    } else {
        MessageStatus::Delivered
    };

    let metadata = match (&remote.metadata, remote.has_media) {
        (Some(meta), _) => Some(meta.clone()),
        (None, true) => Some(serde_json::json!({ "has_media": true, "kind": remote.kind })),
        (None, false) => None,
    };

    Message {
        id: remote.id.clone(),
        session_id,
        from_me: remote.from_me,
        from: phone_of(&remote.from).to_string(),
        to: phone_of(&remote.to).to_string(),
        body: remote.body.clone(),
        message_type: message_type_from_remote(&remote.kind),
        status,
        timestamp: resolve_timestamp(remote),
        metadata,
        created_at: Utc::now(),
    }
}
