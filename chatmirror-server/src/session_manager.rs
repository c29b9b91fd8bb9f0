//! Session connection lifecycle.
//!
//! `connect` builds a driver for the session, initializes it in the
//! background and waits for the first QR code or a ready event. Driver
//! lifecycle events are consumed by one event task per connection, which
//! moves the session through
//! `INITIALIZING -> QR_READY -> CONNECTED -> DISCONNECTED` (or `ERROR`) and
//! persists every transition. Both the authenticated and the ready event
//! count as connected; ready also records the phone number.

use crate::config::EngineConfig;
use crate::driver::{ChatDriver, DriverEvent, DriverFactory};
use crate::events::EventSink;
use crate::ingestion::MessageIngestion;
use crate::qr::render_qr_data_url;
use crate::registry::SessionRegistry;
use crate::repository::Repositories;
use crate::sync_coordinator::SyncCoordinator;
use crate::tasks::spawn_detached;
use chatmirror_core::{
    address::phone_of,
    models::{ConnectOutcome, Session, SessionStatus},
    protocol::SessionEvent,
    SyncError, SyncResult,
};
use chrono::Utc;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

type ConnectReply = oneshot::Sender<SyncResult<ConnectOutcome>>;

/// The caller of `connect` waiting for its first outcome. Resolves once.
#[derive(Clone)]
struct PendingConnect(Arc<Mutex<Option<ConnectReply>>>);

impl PendingConnect {
    fn new() -> (Self, oneshot::Receiver<SyncResult<ConnectOutcome>>) {
        let (tx, rx) = oneshot::channel();
        (Self(Arc::new(Mutex::new(Some(tx)))), rx)
    }

    fn resolve(&self, outcome: SyncResult<ConnectOutcome>) -> bool {
        let reply = self.0.lock().ok().and_then(|mut slot| slot.take());
        match reply {
            Some(tx) => {
                let _ = tx.send(outcome);
                true
            }
            None => false,
        }
    }
}

#[derive(Clone)]
pub struct SessionManager {
    registry: Arc<SessionRegistry>,
    repos: Repositories,
    events: Arc<dyn EventSink>,
    factory: Arc<dyn DriverFactory>,
    coordinator: SyncCoordinator,
    ingestion: MessageIngestion,
    config: Arc<EngineConfig>,
}

impl SessionManager {
    pub fn new(
        registry: Arc<SessionRegistry>,
        repos: Repositories,
        events: Arc<dyn EventSink>,
        factory: Arc<dyn DriverFactory>,
        coordinator: SyncCoordinator,
        ingestion: MessageIngestion,
        config: Arc<EngineConfig>,
    ) -> Self {
        Self {
            registry,
            repos,
            events,
            factory,
            coordinator,
            ingestion,
            config,
        }
    }

    /// Provisions an unauthenticated session with a fresh client identifier.
    pub async fn create_session(&self) -> SyncResult<Session> {
        let session = Session::provision(format!("client-{}", Uuid::new_v4().simple()));
        self.repos.sessions.create(&session).await?;
        info!(session_id = %session.id, client_id = %session.client_id, "Session provisioned");
        Ok(session)
    }

    pub async fn get_session(&self, session_id: Uuid) -> SyncResult<Session> {
        self.repos
            .sessions
            .find_by_id(session_id)
            .await?
            .ok_or(SyncError::SessionNotFound(session_id))
    }

    pub async fn list_sessions(&self) -> SyncResult<Vec<Session>> {
        self.repos.sessions.find_all().await
    }

    /// Disconnects the session and removes it with its conversations and
    /// messages, its sync bookkeeping and its event channel.
    pub async fn delete_session(&self, session_id: Uuid) -> SyncResult<()> {
        self.get_session(session_id).await?;
        self.disconnect(session_id).await?;
        self.repos.sessions.delete(session_id).await?;
        self.registry.forget(session_id);
        self.events.remove(session_id);
        info!(%session_id, "Session deleted");
        Ok(())
    }

    pub fn is_connected(&self, session_id: Uuid) -> bool {
        self.registry.is_registered(session_id)
    }

    pub async fn connect(&self, session_id: Uuid) -> SyncResult<ConnectOutcome> {
        let mut session = self.get_session(session_id).await?;
        if self.registry.is_registered(session_id) {
            return Err(SyncError::AlreadyConnected(session_id));
        }

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let driver = self.factory.create(&session.client_id, events_tx);
        let generation = self.registry.register(session_id, driver.clone())?;

        session.status = SessionStatus::Initializing;
        session.qr_code = None;
        if let Err(e) = self.repos.sessions.update(&session).await {
            self.registry.release(session_id, generation);
            return Err(e);
        }
        self.events
            .publish(session_id, SessionEvent::SessionUpdated { session });

        let (pending, pending_rx) = PendingConnect::new();

        let event_task = {
            let manager = self.clone();
            let pending = pending.clone();
            tokio::spawn(async move {
                manager
                    .run_event_loop(session_id, generation, events_rx, pending)
                    .await
            })
        };
        self.registry
            .attach_event_task(session_id, generation, event_task);

        {
            let manager = self.clone();
            tokio::spawn(async move {
                manager
                    .initialize_with_retry(session_id, generation, driver, pending)
                    .await
            });
        }

        info!(%session_id, generation, "Connecting session");

        match timeout(self.config.connect_timeout, pending_rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(SyncError::Internal(format!(
                "connect attempt for {session_id} was abandoned"
            ))),
            Err(_) => {
                warn!(%session_id, timeout = ?self.config.connect_timeout, "Connect timed out");
                Err(SyncError::ConnectTimeout(session_id))
            }
        }
    }

    async fn initialize_with_retry(
        &self,
        session_id: Uuid,
        generation: u64,
        driver: Arc<dyn ChatDriver>,
        pending: PendingConnect,
    ) {
        let attempts = self.config.init_attempts.max(1);
        let mut attempt = 1;

        let last_error = loop {
            match driver.initialize().await {
                Ok(()) => {
                    debug!(%session_id, attempt, "Driver initialized");
                    return;
                }
                Err(e) if attempt < attempts => {
                    if self.registry.generation(session_id) != Some(generation) {
                        debug!(%session_id, "Session released during initialization");
                        return;
                    }
                    let delay = if e.is_context_destroyed() {
                        self.config.context_destroyed_backoff * attempt
                    } else {
                        self.config.init_backoff * attempt
                    };
                    warn!(%session_id, attempt, error = %e, ?delay, "Driver initialization failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => break e,
            }
        };

        error!(%session_id, attempts, error = %last_error, "Driver initialization failed");

        if let Some(driver) = self.registry.release(session_id, generation) {
            self.teardown(session_id, driver).await;
        }
        if let Err(e) = self.set_offline(session_id, SessionStatus::Error).await {
            warn!(%session_id, error = %e, "Failed to record initialization failure");
        }
        pending.resolve(Err(SyncError::Driver(last_error)));
    }

    async fn run_event_loop(
        &self,
        session_id: Uuid,
        generation: u64,
        mut events: mpsc::UnboundedReceiver<DriverEvent>,
        pending: PendingConnect,
    ) {
        while let Some(event) = events.recv().await {
            if self.registry.generation(session_id) != Some(generation) {
                debug!(%session_id, generation, "Driver handle gone, stopping event loop");
                break;
            }

            let result = match event {
                DriverEvent::Qr(payload) => self.on_qr(session_id, &payload, &pending).await,
                DriverEvent::Authenticated => self.on_authenticated(session_id, &pending).await,
                DriverEvent::Ready { phone_number } => {
                    self.on_ready(session_id, generation, &phone_number, &pending)
                        .await
                }
                DriverEvent::Disconnected { reason } => {
                    info!(%session_id, reason = %reason, "Driver disconnected");
                    self.registry.release(session_id, generation);
                    if let Err(e) = self.go_offline(session_id).await {
                        warn!(%session_id, error = %e, "Failed to record disconnect");
                    }
                    break;
                }
                DriverEvent::AuthFailure { message } => {
                    self.on_auth_failure(session_id, message, &pending).await
                }
                DriverEvent::Message(remote) => {
                    self.ingestion.ingest_incoming(session_id, remote).await
                }
            };

            if let Err(e) = result {
                warn!(%session_id, error = %e, "Failed to handle driver event");
            }
        }
    }

    async fn on_qr(&self, session_id: Uuid, payload: &str, pending: &PendingConnect) -> SyncResult<()> {
        let qr_code = render_qr_data_url(payload)?;

        let mut session = self.get_session(session_id).await?;
        session.status = SessionStatus::QrReady;
        session.qr_code = Some(qr_code.clone());
        self.repos.sessions.update(&session).await?;

        self.events.publish(
            session_id,
            SessionEvent::SessionUpdated {
                session: session.clone(),
            },
        );

        if pending.resolve(Ok(ConnectOutcome::QrCode { qr_code, session })) {
            info!(%session_id, "QR code ready");
        } else {
            debug!(%session_id, "QR code refreshed");
        }
        Ok(())
    }

    /// Credentials accepted: the session is connected and a pending `connect`
    /// resolves. `ready` later fills in the phone number and starts syncing.
    async fn on_authenticated(&self, session_id: Uuid, pending: &PendingConnect) -> SyncResult<()> {
        let session = self.mark_connected(session_id, None).await?;
        info!(%session_id, "Session authenticated");
        pending.resolve(Ok(ConnectOutcome::Authenticated { session }));
        Ok(())
    }

    /// Persists the `CONNECTED` state and publishes the update and the
    /// connection change.
    async fn mark_connected(&self, session_id: Uuid, phone: Option<String>) -> SyncResult<Session> {
        let mut session = self.get_session(session_id).await?;
        if let Some(phone) = phone {
            session.phone_number = phone;
        }
        session.status = SessionStatus::Connected;
        session.is_connected = true;
        session.is_authenticated = true;
        session.qr_code = None;
        session.last_seen = Some(Utc::now());
        self.repos.sessions.update(&session).await?;

        self.events.publish(
            session_id,
            SessionEvent::SessionUpdated {
                session: session.clone(),
            },
        );
        self.publish_status(&session);
        Ok(session)
    }

    async fn on_ready(
        &self,
        session_id: Uuid,
        generation: u64,
        phone_number: &str,
        pending: &PendingConnect,
    ) -> SyncResult<()> {
        let phone = phone_of(phone_number).to_string();
        if !phone.is_empty() {
            self.release_phone_owner(session_id, &phone).await?;
        }

        let session = self.mark_connected(session_id, Some(phone)).await?;
        info!(%session_id, phone = %session.phone_number, "Session connected");
        pending.resolve(Ok(ConnectOutcome::Authenticated { session }));

        let coordinator = self.coordinator.clone();
        spawn_detached("initial-sync", session_id, async move {
            coordinator.sync_conversations(session_id).await.map(|_| ())
        });

        if let Some(period) = self.config.sync_interval {
            let timer = self.spawn_sync_timer(session_id, period);
            self.registry
                .attach_sync_timer(session_id, generation, timer);
        }

        Ok(())
    }

    async fn on_auth_failure(
        &self,
        session_id: Uuid,
        message: String,
        pending: &PendingConnect,
    ) -> SyncResult<()> {
        error!(%session_id, reason = %message, "Authentication failed");
        let result = self.set_offline(session_id, SessionStatus::Error).await;
        pending.resolve(Err(SyncError::AuthenticationFailed(message)));
        result.map(|_| ())
    }

    /// A phone number belongs to one session at a time. Another session still
    /// holding it is disconnected and loses the number.
    async fn release_phone_owner(&self, session_id: Uuid, phone: &str) -> SyncResult<()> {
        let Some(mut other) = self.repos.sessions.find_by_phone_number(phone).await? else {
            return Ok(());
        };
        if other.id == session_id {
            return Ok(());
        }

        warn!(%session_id, other_session = %other.id, phone, "Phone number moved to another session");
        if let Some(driver) = self.registry.unregister(other.id) {
            self.teardown(other.id, driver).await;
        }

        other.phone_number.clear();
        other.mark_offline(SessionStatus::Disconnected);
        self.repos.sessions.update(&other).await?;

        self.events.publish(
            other.id,
            SessionEvent::SessionUpdated {
                session: other.clone(),
            },
        );
        self.publish_status(&other);
        Ok(())
    }

    fn spawn_sync_timer(&self, session_id: Uuid, period: Duration) -> JoinHandle<()> {
        let coordinator = self.coordinator.clone();
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                debug!(%session_id, "Periodic sync");
                if let Err(e) = coordinator.sync_conversations(session_id).await {
                    warn!(%session_id, error = %e, "Periodic sync failed");
                }
            }
        })
    }

    /// Idempotent. Releases the driver, clears the connection flags, and
    /// removes the driver's credential cache.
    pub async fn disconnect(&self, session_id: Uuid) -> SyncResult<()> {
        if let Some(driver) = self.registry.unregister(session_id) {
            self.teardown(session_id, driver).await;
        }

        let Some(session) = self.go_offline(session_id).await? else {
            debug!(%session_id, "Disconnect for unknown session");
            return Ok(());
        };

        let auth_path = self.config.auth_path(&session.client_id);
        match tokio::fs::remove_dir_all(&auth_path).await {
            Ok(()) => debug!(%session_id, path = %auth_path.display(), "Removed credential cache"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                %session_id,
                path = %auth_path.display(),
                error = %e,
                "Failed to remove credential cache"
            ),
        }

        info!(%session_id, "Session disconnected");
        Ok(())
    }

    /// Releases every driver handle.
    pub async fn shutdown(&self) {
        for (session_id, driver) in self.registry.shutdown() {
            self.teardown(session_id, driver).await;
            if let Err(e) = self.go_offline(session_id).await {
                warn!(%session_id, error = %e, "Failed to record shutdown");
            }
        }
    }

    async fn teardown(&self, session_id: Uuid, driver: Arc<dyn ChatDriver>) {
        match timeout(self.config.teardown_timeout, driver.destroy()).await {
            Ok(Ok(())) => debug!(%session_id, "Driver destroyed"),
            Ok(Err(e)) => warn!(%session_id, error = %e, "Driver teardown failed"),
            Err(_) => warn!(
                %session_id,
                timeout = ?self.config.teardown_timeout,
                "Driver teardown timed out, handle released anyway"
            ),
        }
    }

    /// Marks the session `DISCONNECTED` and publishes the update and the
    /// connection change.
    async fn go_offline(&self, session_id: Uuid) -> SyncResult<Option<Session>> {
        let session = self
            .set_offline(session_id, SessionStatus::Disconnected)
            .await?;
        if let Some(session) = &session {
            self.publish_status(session);
        }
        Ok(session)
    }

    async fn set_offline(
        &self,
        session_id: Uuid,
        status: SessionStatus,
    ) -> SyncResult<Option<Session>> {
        let Some(mut session) = self.repos.sessions.find_by_id(session_id).await? else {
            return Ok(None);
        };

        session.mark_offline(status);
        self.repos.sessions.update(&session).await?;
        self.events.publish(
            session_id,
            SessionEvent::SessionUpdated {
                session: session.clone(),
            },
        );
        Ok(Some(session))
    }

    fn publish_status(&self, session: &Session) {
        self.events.publish(
            session.id,
            SessionEvent::SessionStatusChanged {
                session_id: session.id,
                status: session.status,
                is_connected: session.is_connected,
            },
        );
    }
}

