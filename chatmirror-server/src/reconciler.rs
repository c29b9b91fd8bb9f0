//! Diffs the remote chat list against stored conversations.

use crate::config::EngineConfig;
use crate::driver::ChatDriver;
use crate::events::EventSink;
use crate::ingestion::MessageIngestion;
use crate::registry::SessionRegistry;
use crate::repository::Repositories;
use crate::tasks::spawn_detached;
use backon::{ExponentialBuilder, Retryable};
use chatmirror_core::{
    models::{Conversation, SyncKind, SyncOutcome, SyncReport},
    protocol::SessionEvent,
    remote::map_remote_message,
    ChatAddress, DriverError, RemoteChat, SyncError, SyncResult,
};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Clone)]
pub struct BatchReconciler {
    registry: Arc<SessionRegistry>,
    repos: Repositories,
    events: Arc<dyn EventSink>,
    ingestion: MessageIngestion,
    config: Arc<EngineConfig>,
}

impl BatchReconciler {
    pub fn new(
        registry: Arc<SessionRegistry>,
        repos: Repositories,
        events: Arc<dyn EventSink>,
        ingestion: MessageIngestion,
        config: Arc<EngineConfig>,
    ) -> Self {
        Self {
            registry,
            repos,
            events,
            ingestion,
            config,
        }
    }

    /// Runs one reconciliation pass. A chat list that cannot be fetched
    /// skips the pass; it is picked up again by the next trigger.
    pub async fn reconcile(&self, session_id: Uuid, kind: SyncKind) -> SyncResult<SyncOutcome> {
        kind.validate()?;
        let driver = self
            .registry
            .driver(session_id)
            .ok_or(SyncError::SessionNotConnected(session_id))?;

        let chats = match self.fetch_chats(session_id, driver).await {
            Ok(chats) => chats,
            Err(e) => {
                warn!(%session_id, error = %e, "Chat list unavailable, skipping sync pass");
                return Ok(SyncOutcome::Skipped {
                    reason: format!("chat list unavailable: {e}"),
                });
            }
        };

        let (working_set, total, offset, batch_size) = match kind {
            SyncKind::Full => {
                let total = chats.len();
                (chats, total, 0, self.config.background_batch_size)
            }
            SyncKind::Incremental => {
                let working = self.incremental_set(session_id, chats).await?;
                let total = working.len();
                (working, total, 0, self.config.background_batch_size)
            }
            SyncKind::Progressive { batch_size, offset } => {
                let total = chats.len();
                let page: Vec<RemoteChat> =
                    chats.into_iter().skip(offset).take(batch_size).collect();
                (page, total, offset, batch_size)
            }
        };

        let batch_size = batch_size.max(1);

        info!(
            %session_id,
            ?kind,
            total,
            working = working_set.len(),
            "Starting sync pass"
        );

        let mut report = SyncReport {
            total_conversations: total,
            ..SyncReport::default()
        };

        let batch_count = working_set.len().div_ceil(batch_size);
        for (batch_index, batch) in working_set.chunks(batch_size).enumerate() {
            for (i, chat) in batch.iter().enumerate() {
                let position = offset.saturating_add(batch_index * batch_size + i);
                match self.reconcile_chat(session_id, chat).await {
                    Ok((conversation, created)) => {
                        if created {
                            report.created += 1;
                        } else {
                            report.updated += 1;
                        }
                        self.events.publish(
                            session_id,
                            SessionEvent::SyncProgress {
                                current: position.saturating_add(1),
                                total,
                                conversation,
                            },
                        );
                    }
                    Err(e) => {
                        report.failed += 1;
                        warn!(
                            %session_id,
                            phone = %chat.phone_number(),
                            error = %e,
                            "Failed to reconcile chat"
                        );
                    }
                }
            }

            if batch_index + 1 < batch_count && !self.config.batch_pause.is_zero() {
                tokio::time::sleep(self.config.batch_pause).await;
            }
        }

        match kind {
            SyncKind::Progressive { .. } => {
                report.processed_conversations = offset.saturating_add(batch_size).min(total);
                report.is_complete = report.processed_conversations >= total;
            }
            _ => {
                report.processed_conversations = working_set.len();
                report.is_complete = true;
            }
        }

        let conversations = self.repos.conversations.find_by_session(session_id).await?;
        self.events
            .publish(session_id, SessionEvent::ConversationsSynced { conversations });

        info!(
            %session_id,
            created = report.created,
            updated = report.updated,
            failed = report.failed,
            processed = report.processed_conversations,
            complete = report.is_complete,
            "Sync pass finished"
        );

        Ok(SyncOutcome::Completed(report))
    }

    /// One-to-one, unarchived chats, retried with exponential backoff on
    /// transient driver failures.
    async fn fetch_chats(
        &self,
        session_id: Uuid,
        driver: Arc<dyn ChatDriver>,
    ) -> Result<Vec<RemoteChat>, DriverError> {
        let backoff = ExponentialBuilder::default()
            .with_min_delay(self.config.chat_fetch_backoff)
            .with_max_times(self.config.chat_fetch_attempts.saturating_sub(1));

        let fetch = move || {
            let driver = driver.clone();
            async move { driver.get_chats().await }
        };

        let chats = fetch
            .retry(backoff)
            .when(|e: &DriverError| e.is_transient())
            .notify(|e: &DriverError, delay| {
                warn!(%session_id, error = %e, ?delay, "Chat list fetch failed, retrying");
            })
            .await?;

        Ok(chats
            .into_iter()
            .filter(|chat| !chat.is_group && !chat.archived)
            .collect())
    }

    /// Chats with activity strictly newer than the most recently synced
    /// conversation. Without any synced conversation this is every chat.
    async fn incremental_set(
        &self,
        session_id: Uuid,
        chats: Vec<RemoteChat>,
    ) -> SyncResult<Vec<RemoteChat>> {
        let since = match self.repos.conversations.find_last_synced(session_id).await? {
            Some(Conversation {
                last_message_time: Some(time),
                ..
            }) => time,
            _ => {
                debug!(%session_id, "No synced conversations yet, running full sync");
                return Ok(chats);
            }
        };

        Ok(chats
            .into_iter()
            .filter(|chat| matches!(chat.last_activity(), Some(activity) if activity > since))
            .collect())
    }

    async fn reconcile_chat(
        &self,
        session_id: Uuid,
        chat: &RemoteChat,
    ) -> SyncResult<(Conversation, bool)> {
        let address = ChatAddress::parse(&chat.id)?;
        let phone = address.user();

        let (mut conversation, created) = match self
            .repos
            .conversations
            .find_by_phone_number(session_id, phone)
            .await?
        {
            Some(existing) => (existing, false),
            None => (Conversation::new(session_id, phone), true),
        };

        if let Some(name) = chat.name.as_deref().filter(|n| !n.trim().is_empty()) {
            conversation.contact_name = Some(name.to_string());
        }
        conversation.unread_count = chat.unread_count;
        conversation.is_contact = chat.is_contact;
        conversation.is_group = chat.is_group;

        if let Some(last) = &chat.last_message {
            let message = map_remote_message(session_id, last);
            conversation.apply_preview(&message.preview(), message.timestamp);
        }

        if created {
            self.repos.conversations.create(&conversation).await?;
            self.events.publish(
                session_id,
                SessionEvent::NewConversation {
                    conversation: conversation.clone(),
                },
            );
        } else {
            self.repos.conversations.update(&conversation).await?;
        }

        if chat.unread_count > 0 {
            let ingestion = self.ingestion.clone();
            spawn_detached("backfill", session_id, async move {
                ingestion.backfill(session_id, address).await.map(|_| ())
            });
        }

        Ok((conversation, created))
    }
}
