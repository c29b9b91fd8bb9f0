//! On-demand history loading, backfill and live inbound messages.

use crate::config::EngineConfig;
use crate::events::EventSink;
use crate::registry::SessionRegistry;
use crate::repository::Repositories;
use chatmirror_core::{
    models::{Conversation, Message, MessageType},
    protocol::SessionEvent,
    remote::map_remote_message,
    ChatAddress, DriverError, RemoteMessage, SyncError, SyncResult,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Optional narrowing applied to a history fetch. Filters run locally on
/// whatever the driver returned.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FetchOptions {
    pub limit: Option<usize>,
    pub from_date: Option<DateTime<Utc>>,
    pub to_date: Option<DateTime<Utc>>,
    pub message_type: Option<MessageType>,
    pub search_text: Option<String>,
}

impl FetchOptions {
    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            ..Self::default()
        }
    }

    fn matches(&self, message: &Message) -> bool {
        if matches!(self.from_date, Some(from) if message.timestamp < from) {
            return false;
        }
        if matches!(self.to_date, Some(to) if message.timestamp > to) {
            return false;
        }
        if matches!(self.message_type, Some(kind) if message.message_type != kind) {
            return false;
        }
        match self.search_text.as_deref().map(str::trim) {
            Some(needle) if !needle.is_empty() => message
                .body
                .to_lowercase()
                .contains(&needle.to_lowercase()),
            _ => true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadMoreResult {
    pub messages: Vec<Message>,
    /// Whether the fetch filled the requested limit. An approximation: a
    /// history that ends exactly at the limit still reports `true`.
    pub has_more: bool,
    /// The limit the fetch actually used, after capping.
    pub limit: usize,
}

#[derive(Clone)]
pub struct MessageIngestion {
    registry: Arc<SessionRegistry>,
    repos: Repositories,
    events: Arc<dyn EventSink>,
    config: Arc<EngineConfig>,
}

impl MessageIngestion {
    pub fn new(
        registry: Arc<SessionRegistry>,
        repos: Repositories,
        events: Arc<dyn EventSink>,
        config: Arc<EngineConfig>,
    ) -> Self {
        Self {
            registry,
            repos,
            events,
            config,
        }
    }

    fn effective_limit(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.config.default_fetch_limit)
            .min(self.config.max_fetch_limit)
            .max(1)
    }

    /// Latest messages of a chat, both directions. Driver unavailability, an
    /// unknown chat, and fetch failures all yield an empty list.
    pub async fn fetch_messages(
        &self,
        session_id: Uuid,
        chat_id: &str,
        options: &FetchOptions,
    ) -> SyncResult<Vec<Message>> {
        let address = ChatAddress::parse(chat_id)?;
        let limit = self.effective_limit(options.limit);

        let Some(driver) = self.registry.driver(session_id) else {
            warn!(%session_id, chat = %address, "No driver for session, returning no messages");
            return Ok(Vec::new());
        };

        match driver.get_chat_by_id(address.as_str()).await {
            Ok(Some(_)) => {}
            Ok(None) => {
                info!(%session_id, chat = %address, "Chat not found");
                return Ok(Vec::new());
            }
            Err(e) => {
                warn!(%session_id, chat = %address, error = %e, "Failed to look up chat");
                return Ok(Vec::new());
            }
        }

        let remote = match driver.fetch_messages(address.as_str(), limit).await {
            Ok(remote) => remote,
            Err(e) => {
                warn!(%session_id, chat = %address, error = %e, "Failed to fetch messages");
                return Ok(Vec::new());
            }
        };

        let mut messages = Vec::with_capacity(remote.len());
        for item in &remote {
            let message = map_remote_message(session_id, item);
            if let Err(e) = self.repos.messages.create(&message).await {
                warn!(%session_id, message_id = %message.id, error = %e, "Failed to store fetched message");
            }
            messages.push(message);
        }

        let fetched = messages.len();
        messages.retain(|m| options.matches(m));
        debug!(
            %session_id,
            chat = %address,
            limit,
            fetched,
            returned = messages.len(),
            "Fetched chat messages"
        );

        Ok(messages)
    }

    pub async fn load_more_messages(
        &self,
        session_id: Uuid,
        chat_id: &str,
        current_limit: usize,
        additional_limit: usize,
    ) -> SyncResult<LoadMoreResult> {
        let limit = self.effective_limit(Some(current_limit.saturating_add(additional_limit)));
        let messages = self
            .fetch_messages(session_id, chat_id, &FetchOptions::with_limit(limit))
            .await?;

        Ok(LoadMoreResult {
            has_more: messages.len() == limit,
            messages,
            limit,
        })
    }

    /// Fetches recent history for a chat with unread messages and stores it.
    /// Abandoned once `backfill_timeout` elapses.
    pub async fn backfill(&self, session_id: Uuid, address: ChatAddress) -> SyncResult<usize> {
        let driver = self
            .registry
            .driver(session_id)
            .ok_or(SyncError::SessionNotConnected(session_id))?;

        let remote = tokio::time::timeout(
            self.config.backfill_timeout,
            driver.fetch_messages(address.as_str(), self.config.backfill_limit),
        )
        .await
        .map_err(|_| DriverError::Timeout)??;

        let mut stored = 0;
        for item in &remote {
            if self
                .repos
                .messages
                .create(&map_remote_message(session_id, item))
                .await?
            {
                stored += 1;
            }
        }

        debug!(%session_id, chat = %address, fetched = remote.len(), stored, "Backfilled messages");
        self.events.publish(
            session_id,
            SessionEvent::MessagesLoaded {
                chat_id: address.to_string(),
                count: remote.len(),
            },
        );

        Ok(stored)
    }

    /// Handles a live message pushed by the driver.
    pub async fn ingest_incoming(&self, session_id: Uuid, remote: RemoteMessage) -> SyncResult<()> {
        let address = ChatAddress::parse(remote.chat_address())?;
        if address.is_group() || address.is_broadcast() {
            debug!(%session_id, chat = %address, "Ignoring group or broadcast message");
            return Ok(());
        }

        let message = map_remote_message(session_id, &remote);
        if !self.repos.messages.create(&message).await? {
            debug!(%session_id, message_id = %message.id, "Duplicate message ignored");
            return Ok(());
        }

        let (conversation, created) =
            record_in_conversation(&self.repos, session_id, &message, !message.from_me).await?;

        info!(
            %session_id,
            message_id = %message.id,
            phone = %conversation.phone_number,
            "Stored incoming message"
        );

        self.events
            .publish(session_id, SessionEvent::NewMessage { message });
        self.events
            .publish(session_id, conversation_event(conversation, created));

        Ok(())
    }
}

/// Creates or updates the conversation owning `message`, moving its preview
/// forward. Returns the conversation and whether it was created.
pub(crate) async fn record_in_conversation(
    repos: &Repositories,
    session_id: Uuid,
    message: &Message,
    bump_unread: bool,
) -> SyncResult<(Conversation, bool)> {
    let phone = message.counterpart();
    let (mut conversation, created) = match repos
        .conversations
        .find_by_phone_number(session_id, phone)
        .await?
    {
        Some(existing) => (existing, false),
        None => (Conversation::new(session_id, phone), true),
    };

    conversation.apply_preview(&message.preview(), message.timestamp);
    if bump_unread {
        conversation.unread_count = conversation.unread_count.saturating_add(1);
    }

    if created {
        repos.conversations.create(&conversation).await?;
    } else {
        repos.conversations.update(&conversation).await?;
    }

    Ok((conversation, created))
}

pub(crate) fn conversation_event(conversation: Conversation, created: bool) -> SessionEvent {
    if created {
        SessionEvent::NewConversation { conversation }
    } else {
        SessionEvent::ConversationUpdated { conversation }
    }
}
