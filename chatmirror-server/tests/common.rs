use anyhow::Context;
use async_trait::async_trait;
use chatmirror_core::{protocol::SessionEvent, DriverError, RemoteChat, RemoteMessage};
use chatmirror_server::{
    config::EngineConfig,
    database::ServerDatabase,
    driver::{ChatDriver, DriverEvent, DriverFactory},
    repository::Repositories,
    ChatMirror,
};
use chrono::Utc;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Notify, Semaphore};
use uuid::Uuid;

/// Scriptable in-memory driver.
#[derive(Default)]
#[allow(dead_code)]
pub struct FakeDriver {
    pub chats: Mutex<Vec<RemoteChat>>,
    pub history: Mutex<HashMap<String, Vec<RemoteMessage>>>,
    pub phone_number: Mutex<String>,
    /// Events emitted, in order, by a successful `initialize`.
    pub init_events: Mutex<Vec<DriverEvent>>,
    /// Number of upcoming `initialize` calls that fail.
    pub init_failures: AtomicUsize,
    /// Number of upcoming `get_chats` calls that fail.
    pub chat_fetch_failures: AtomicUsize,
    pub page_closed: AtomicBool,
    pub health_check_fails: AtomicBool,
    pub send_fails: AtomicBool,
    /// When set, `get_chats` waits for a permit before returning.
    pub gate: Mutex<Option<Arc<Semaphore>>>,
    /// Signalled every time `get_chats` is entered.
    pub entered: Notify,
    pub in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    pub init_calls: AtomicUsize,
    pub destroy_calls: AtomicUsize,
    pub get_chats_calls: AtomicUsize,
    pub fetch_calls: AtomicUsize,
    pub sent: Mutex<Vec<(String, String)>>,
    events: Mutex<Option<mpsc::UnboundedSender<DriverEvent>>>,
}

#[allow(dead_code)]
impl FakeDriver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_chats(chats: Vec<RemoteChat>) -> Arc<Self> {
        let driver = Self::new();
        driver.set_chats(chats);
        driver
    }

    pub fn set_chats(&self, chats: Vec<RemoteChat>) {
        *self.chats.lock().unwrap() = chats;
    }

    pub fn set_history(&self, chat_id: &str, messages: Vec<RemoteMessage>) {
        self.history
            .lock()
            .unwrap()
            .insert(chat_id.to_string(), messages);
    }

    pub fn script_init(&self, events: Vec<DriverEvent>) {
        *self.init_events.lock().unwrap() = events;
    }

    /// Holds every `get_chats` call until `open_gate` is called.
    pub fn close_gate(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub fn open_gate(&self) {
        if let Some(gate) = self.gate.lock().unwrap().take() {
            gate.add_permits(Semaphore::MAX_PERMITS);
        }
    }

    fn attach(&self, events: mpsc::UnboundedSender<DriverEvent>) {
        *self.events.lock().unwrap() = Some(events);
    }

    /// Pushes a lifecycle event as if the remote client produced it.
    pub fn emit(&self, event: DriverEvent) {
        if let Some(tx) = self.events.lock().unwrap().as_ref() {
            let _ = tx.send(event);
        }
    }

    fn enter(&self) -> InFlight<'_> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        InFlight(&self.in_flight)
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ChatDriver for FakeDriver {
    async fn initialize(&self) -> Result<(), DriverError> {
        self.init_calls.fetch_add(1, Ordering::SeqCst);
        if Self::take_failure(&self.init_failures) {
            return Err(DriverError::ContextDestroyed);
        }

        let events = self.init_events.lock().unwrap().clone();
        for event in events {
            self.emit(event);
        }
        Ok(())
    }

    async fn destroy(&self) -> Result<(), DriverError> {
        self.destroy_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn is_page_open(&self) -> bool {
        !self.page_closed.load(Ordering::SeqCst)
    }

    async fn health_check(&self) -> Result<(), DriverError> {
        if self.health_check_fails.load(Ordering::SeqCst) {
            Err(DriverError::Timeout)
        } else {
            Ok(())
        }
    }

    async fn get_chats(&self) -> Result<Vec<RemoteChat>, DriverError> {
        let _in_flight = self.enter();
        self.get_chats_calls.fetch_add(1, Ordering::SeqCst);
        self.entered.notify_one();

        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            let _permit = gate.acquire().await;
        }

        if Self::take_failure(&self.chat_fetch_failures) {
            return Err(DriverError::ContextDestroyed);
        }
        Ok(self.chats.lock().unwrap().clone())
    }

    async fn get_chat_by_id(&self, chat_id: &str) -> Result<Option<RemoteChat>, DriverError> {
        Ok(self
            .chats
            .lock()
            .unwrap()
            .iter()
            .find(|chat| chat.id == chat_id)
            .cloned())
    }

    async fn fetch_messages(
        &self,
        chat_id: &str,
        limit: usize,
    ) -> Result<Vec<RemoteMessage>, DriverError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .history
            .lock()
            .unwrap()
            .get(chat_id)
            .map(|messages| messages.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn send_message(&self, chat_id: &str, body: &str) -> Result<RemoteMessage, DriverError> {
        if self.send_fails.load(Ordering::SeqCst) {
            return Err(DriverError::PageClosed);
        }

        let mut sent = self.sent.lock().unwrap();
        sent.push((chat_id.to_string(), body.to_string()));
        let own = format!("{}@c.us", self.phone_number.lock().unwrap());

        Ok(RemoteMessage {
            id: format!("OUT-{}", sent.len()),
            from: own,
            to: chat_id.to_string(),
            from_me: true,
            body: body.to_string(),
            kind: "chat".into(),
            timestamp: Some(Utc::now().timestamp()),
            date: None,
            ack: Some(1),
            has_media: false,
            metadata: None,
        })
    }
}

/// Hands out one `FakeDriver` per client id, reusing it across reconnects.
#[derive(Default)]
pub struct FakeFactory {
    drivers: DashMap<String, Arc<FakeDriver>>,
}

#[allow(dead_code)]
impl FakeFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn driver_for(&self, client_id: &str) -> Arc<FakeDriver> {
        self.drivers
            .entry(client_id.to_string())
            .or_insert_with(FakeDriver::new)
            .clone()
    }
}

impl DriverFactory for FakeFactory {
    fn create(
        &self,
        client_id: &str,
        events: mpsc::UnboundedSender<DriverEvent>,
    ) -> Arc<dyn ChatDriver> {
        let driver = self.driver_for(client_id);
        driver.attach(events);
        driver
    }
}

/// Engine settings with short timeouts and no pauses or timers.
#[allow(dead_code)]
pub fn test_config() -> EngineConfig {
    EngineConfig {
        connect_timeout: Duration::from_millis(500),
        init_backoff: Duration::from_millis(10),
        context_destroyed_backoff: Duration::from_millis(20),
        teardown_timeout: Duration::from_millis(200),
        chat_fetch_backoff: Duration::from_millis(5),
        batch_pause: Duration::ZERO,
        backfill_timeout: Duration::from_millis(500),
        sync_interval: None,
        auth_dir: std::env::temp_dir().join(format!("chatmirror-test-{}", Uuid::new_v4())),
        ..EngineConfig::default()
    }
}

/// Creates a new in-memory test sqlite database and runs migrations.
#[allow(dead_code)]
pub async fn setup_test_db() -> Arc<ServerDatabase> {
    open_test_db().await.expect("test database setup failed")
}

async fn open_test_db() -> anyhow::Result<Arc<ServerDatabase>> {
    let db = ServerDatabase::new("sqlite::memory:")
        .await
        .context("Failed to open in-memory database")?;
    db.run_migrations()
        .await
        .context("Failed to run migrations")?;
    Ok(Arc::new(db))
}

#[allow(dead_code)]
pub async fn setup_engine() -> (ChatMirror, Arc<FakeFactory>) {
    setup_engine_with(test_config()).await
}

#[allow(dead_code)]
pub async fn setup_engine_with(config: EngineConfig) -> (ChatMirror, Arc<FakeFactory>) {
    let db = setup_test_db().await;
    let factory = FakeFactory::new();
    let engine = ChatMirror::new(Repositories::from_database(db), factory.clone(), config);
    (engine, factory)
}

/// A provisioned session with `driver` registered as its live handle.
#[allow(dead_code)]
pub async fn connected_session(engine: &ChatMirror, driver: Arc<FakeDriver>) -> Uuid {
    let session = engine.sessions.create_session().await.unwrap();
    engine.registry.register(session.id, driver).unwrap();
    session.id
}

#[allow(dead_code)]
pub fn remote_message(
    id: &str,
    counterpart: &str,
    from_me: bool,
    body: &str,
    timestamp: i64,
) -> RemoteMessage {
    let counterpart = format!("{counterpart}@c.us");
    let own = "15559999@c.us".to_string();
    let (from, to) = if from_me {
        (own, counterpart)
    } else {
        (counterpart, own)
    };

    RemoteMessage {
        id: id.to_string(),
        from,
        to,
        from_me,
        body: body.to_string(),
        kind: "chat".into(),
        timestamp: Some(timestamp),
        date: None,
        ack: if from_me { Some(1) } else { None },
        has_media: false,
        metadata: None,
    }
}

/// A one-to-one chat whose last activity is `timestamp` (Unix seconds).
#[allow(dead_code)]
pub fn remote_chat(phone: &str, timestamp: i64, unread_count: u32) -> RemoteChat {
    RemoteChat {
        id: format!("{phone}@c.us"),
        name: Some(format!("Contact {phone}")),
        is_group: false,
        archived: false,
        unread_count,
        timestamp: Some(timestamp),
        is_contact: true,
        last_message: Some(remote_message(
            &format!("LAST-{phone}-{timestamp}"),
            phone,
            false,
            &format!("hello from {phone}"),
            timestamp,
        )),
    }
}

/// `count` chats with distinct phones and increasing activity times.
#[allow(dead_code)]
pub fn remote_chats(count: usize) -> Vec<RemoteChat> {
    (0..count)
        .map(|i| remote_chat(&format!("1555000{i:04}"), 1_700_000_000 + i as i64, 0))
        .collect()
}

/// Receives events until one matches `pred`.
#[allow(dead_code)]
pub async fn wait_for_event<F>(rx: &mut broadcast::Receiver<SessionEvent>, mut pred: F) -> SessionEvent
where
    F: FnMut(&SessionEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match rx.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(e) => panic!("event stream closed: {e}"),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

/// Polls `condition` until it holds.
#[allow(dead_code)]
pub async fn eventually<F>(mut condition: F)
where
    F: FnMut() -> bool,
{
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met in time");
}
