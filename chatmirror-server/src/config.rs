use std::path::PathBuf;
use std::time::Duration;

/// Tunables for the synchronization engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How long `connect` waits for a QR code or a ready event.
    pub connect_timeout: Duration,
    pub init_attempts: u32,
    /// Backoff after a failed driver initialization, multiplied by the attempt number.
    pub init_backoff: Duration,
    /// Backoff used instead of `init_backoff` when the execution context was destroyed.
    pub context_destroyed_backoff: Duration,
    /// Upper bound on driver teardown before the handle is dropped anyway.
    pub teardown_timeout: Duration,
    pub chat_fetch_attempts: usize,
    pub chat_fetch_backoff: Duration,
    pub background_batch_size: usize,
    pub batch_pause: Duration,
    pub default_fetch_limit: usize,
    pub max_fetch_limit: usize,
    pub backfill_limit: usize,
    pub backfill_timeout: Duration,
    /// Period of the background incremental sync. `None` disables it.
    pub sync_interval: Option<Duration>,
    /// Root of the driver credential caches, one `session-<client id>` directory each.
    pub auth_dir: PathBuf,
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(15),
            init_attempts: 3,
            init_backoff: Duration::from_secs(2),
            context_destroyed_backoff: Duration::from_secs(5),
            teardown_timeout: Duration::from_secs(5),
            chat_fetch_attempts: 3,
            chat_fetch_backoff: Duration::from_secs(1),
            background_batch_size: 5,
            batch_pause: Duration::from_millis(50),
            default_fetch_limit: 50,
            max_fetch_limit: 100,
            backfill_limit: 20,
            backfill_timeout: Duration::from_secs(10),
            sync_interval: Some(Duration::from_secs(5 * 60)),
            auth_dir: PathBuf::from(".chatmirror_auth"),
            event_capacity: 1024,
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by `CHATMIRROR_*` environment variables.
    /// Durations are in milliseconds; unparsable values are ignored.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            connect_timeout: env_millis("CHATMIRROR_CONNECT_TIMEOUT_MS")
                .unwrap_or(defaults.connect_timeout),
            init_attempts: env_parse("CHATMIRROR_INIT_ATTEMPTS").unwrap_or(defaults.init_attempts),
            init_backoff: env_millis("CHATMIRROR_INIT_BACKOFF_MS").unwrap_or(defaults.init_backoff),
            context_destroyed_backoff: env_millis("CHATMIRROR_CONTEXT_DESTROYED_BACKOFF_MS")
                .unwrap_or(defaults.context_destroyed_backoff),
            teardown_timeout: env_millis("CHATMIRROR_TEARDOWN_TIMEOUT_MS")
                .unwrap_or(defaults.teardown_timeout),
            chat_fetch_attempts: env_parse("CHATMIRROR_CHAT_FETCH_ATTEMPTS")
                .unwrap_or(defaults.chat_fetch_attempts),
            chat_fetch_backoff: env_millis("CHATMIRROR_CHAT_FETCH_BACKOFF_MS")
                .unwrap_or(defaults.chat_fetch_backoff),
            background_batch_size: env_parse("CHATMIRROR_BATCH_SIZE")
                .filter(|size| *size > 0)
                .unwrap_or(defaults.background_batch_size),
            batch_pause: env_millis("CHATMIRROR_BATCH_PAUSE_MS").unwrap_or(defaults.batch_pause),
            default_fetch_limit: env_parse("CHATMIRROR_DEFAULT_FETCH_LIMIT")
                .unwrap_or(defaults.default_fetch_limit),
            max_fetch_limit: env_parse("CHATMIRROR_MAX_FETCH_LIMIT")
                .unwrap_or(defaults.max_fetch_limit),
            backfill_limit: env_parse("CHATMIRROR_BACKFILL_LIMIT")
                .unwrap_or(defaults.backfill_limit),
            backfill_timeout: env_millis("CHATMIRROR_BACKFILL_TIMEOUT_MS")
                .unwrap_or(defaults.backfill_timeout),
            sync_interval: match env_parse::<u64>("CHATMIRROR_SYNC_INTERVAL_MS") {
                Some(0) => None,
                Some(ms) => Some(Duration::from_millis(ms)),
                None => defaults.sync_interval,
            },
            auth_dir: std::env::var("CHATMIRROR_AUTH_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.auth_dir),
            event_capacity: env_parse("CHATMIRROR_EVENT_CAPACITY")
                .filter(|capacity| *capacity > 0)
                .unwrap_or(defaults.event_capacity),
        }
    }

    pub fn database_url() -> String {
        std::env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite:chatmirror.db".to_string())
    }

    /// Directory holding the driver's credential cache for `client_id`.
    pub fn auth_path(&self, client_id: &str) -> PathBuf {
        self.auth_dir.join(format!("session-{client_id}"))
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok()?.trim().parse().ok()
}

fn env_millis(key: &str) -> Option<Duration> {
    env_parse::<u64>(key).map(Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.connect_timeout, Duration::from_secs(15));
        assert!(config.init_attempts >= 3);
        assert_eq!(config.background_batch_size, 5);
        assert_eq!(config.max_fetch_limit, 100);
        assert_eq!(
            config.auth_path("client-1"),
            PathBuf::from(".chatmirror_auth/session-client-1")
        );
    }
}
