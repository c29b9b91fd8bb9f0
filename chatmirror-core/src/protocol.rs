use crate::models::{Conversation, Message, Session, SessionStatus};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Events pushed to subscribers of a session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "payload", rename_all = "kebab-case")]
pub enum SessionEvent {
    SessionUpdated {
        session: Session,
    },
    SessionStatusChanged {
        session_id: Uuid,
        status: SessionStatus,
        is_connected: bool,
    },
    NewConversation {
        conversation: Conversation,
    },
    ConversationUpdated {
        conversation: Conversation,
    },
    /// Published once per reconciled chat. `current` is the chat's 1-based
    /// position in the remote list, so a chat that failed leaves a gap; the
    /// final report counts it under `failed`.
    SyncProgress {
        current: usize,
        total: usize,
        conversation: Conversation,
    },
    ConversationsSynced {
        conversations: Vec<Conversation>,
    },
    NewMessage {
        message: Message,
    },
    MessageSent {
        message: Message,
    },
    MessagesLoaded {
        chat_id: String,
        count: usize,
    },
}

impl SessionEvent {
    /// Channel name subscribers listen on.
    pub fn name(&self) -> &'static str {
        match self {
            SessionEvent::SessionUpdated { .. } => "session-updated",
            SessionEvent::SessionStatusChanged { .. } => "session-status-changed",
            SessionEvent::NewConversation { .. } => "new-conversation",
            SessionEvent::ConversationUpdated { .. } => "conversation-updated",
            SessionEvent::SyncProgress { .. } => "sync-progress",
            SessionEvent::ConversationsSynced { .. } => "conversations-synced",
            SessionEvent::NewMessage { .. } => "new-message",
            SessionEvent::MessageSent { .. } => "message-sent",
            SessionEvent::MessagesLoaded { .. } => "messages-loaded",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_tag_matches_channel_name() {
        let event = SessionEvent::SessionStatusChanged {
            session_id: Uuid::new_v4(),
            status: SessionStatus::Connected,
            is_connected: true,
        };
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["event"], event.name());
        assert_eq!(json["payload"]["status"], "CONNECTED");

        let loaded = SessionEvent::MessagesLoaded {
            chat_id: "15550100@c.us".into(),
            count: 3,
        };
        assert_eq!(serde_json::to_value(&loaded).unwrap()["event"], "messages-loaded");
    }
}
