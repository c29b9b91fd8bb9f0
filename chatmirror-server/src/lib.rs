pub mod config;
pub mod database;
pub mod dispatch;
pub mod driver;
pub mod events;
pub mod ingestion;
pub mod logging;
pub mod qr;
pub mod queries;
pub mod reconciler;
pub mod registry;
pub mod repository;
pub mod session_manager;
pub mod sync_coordinator;
pub mod tasks;

use std::sync::Arc;

use chatmirror_core::{
    models::{ConnectOutcome, Message, SyncKind, SyncOutcome, SyncStats},
    protocol::SessionEvent,
    SyncResult,
};
use tokio::sync::broadcast;
use uuid::Uuid;

use config::EngineConfig;
use database::ServerDatabase;
use dispatch::OutboundDispatch;
use driver::DriverFactory;
use events::{EventBus, EventSink};
use ingestion::{FetchOptions, LoadMoreResult, MessageIngestion};
use reconciler::BatchReconciler;
use registry::SessionRegistry;
use repository::Repositories;
use session_manager::SessionManager;
use sync_coordinator::SyncCoordinator;

/// The synchronization engine with all of its components wired together.
#[derive(Clone)]
pub struct ChatMirror {
    pub repos: Repositories,
    pub registry: Arc<SessionRegistry>,
    pub events: Arc<EventBus>,
    pub sessions: SessionManager,
    pub coordinator: SyncCoordinator,
    pub ingestion: MessageIngestion,
    pub dispatch: OutboundDispatch,
    pub config: Arc<EngineConfig>,
}

impl ChatMirror {
    /// Opens the database at `database_url`, applies migrations and builds the engine.
    pub async fn open(
        database_url: &str,
        factory: Arc<dyn DriverFactory>,
        config: EngineConfig,
    ) -> SyncResult<Self> {
        let db = ServerDatabase::new(database_url).await?;
        db.run_migrations().await?;
        Ok(Self::new(
            Repositories::from_database(Arc::new(db)),
            factory,
            config,
        ))
    }

    pub fn new(repos: Repositories, factory: Arc<dyn DriverFactory>, config: EngineConfig) -> Self {
        let config = Arc::new(config);
        let registry = Arc::new(SessionRegistry::new());
        let events = Arc::new(EventBus::new(config.event_capacity));
        let sink: Arc<dyn EventSink> = events.clone();

        let ingestion =
            MessageIngestion::new(registry.clone(), repos.clone(), sink.clone(), config.clone());
        let reconciler = BatchReconciler::new(
            registry.clone(),
            repos.clone(),
            sink.clone(),
            ingestion.clone(),
            config.clone(),
        );
        let coordinator = SyncCoordinator::new(registry.clone(), reconciler);
        let dispatch = OutboundDispatch::new(registry.clone(), repos.clone(), sink.clone());
        let sessions = SessionManager::new(
            registry.clone(),
            repos.clone(),
            sink,
            factory,
            coordinator.clone(),
            ingestion.clone(),
            config.clone(),
        );

        Self {
            repos,
            registry,
            events,
            sessions,
            coordinator,
            ingestion,
            dispatch,
            config,
        }
    }

    pub fn subscribe(&self, session_id: Uuid) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe(session_id)
    }

    pub async fn connect(&self, session_id: Uuid) -> SyncResult<ConnectOutcome> {
        self.sessions.connect(session_id).await
    }

    pub async fn disconnect(&self, session_id: Uuid) -> SyncResult<()> {
        self.sessions.disconnect(session_id).await
    }

    pub async fn request_sync(&self, session_id: Uuid, kind: SyncKind) -> SyncResult<SyncOutcome> {
        self.coordinator.request_sync(session_id, kind).await
    }

    pub async fn fetch_messages(
        &self,
        session_id: Uuid,
        chat_id: &str,
        options: &FetchOptions,
    ) -> SyncResult<Vec<Message>> {
        self.ingestion
            .fetch_messages(session_id, chat_id, options)
            .await
    }

    pub async fn load_more_messages(
        &self,
        session_id: Uuid,
        chat_id: &str,
        current_limit: usize,
        additional_limit: usize,
    ) -> SyncResult<LoadMoreResult> {
        self.ingestion
            .load_more_messages(session_id, chat_id, current_limit, additional_limit)
            .await
    }

    pub async fn send_message(&self, session_id: Uuid, to: &str, body: &str) -> SyncResult<Message> {
        self.dispatch.send_message(session_id, to, body).await
    }

    pub fn get_sync_stats(&self, session_id: Uuid) -> SyncStats {
        self.coordinator.get_sync_stats(session_id)
    }

    pub async fn shutdown(&self) {
        self.sessions.shutdown().await;
    }
}
