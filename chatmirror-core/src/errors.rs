use thiserror::Error;
use uuid::Uuid;

/// Failures reported by a remote chat driver.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DriverError {
    #[error("Execution context was destroyed")]
    ContextDestroyed,

    #[error("Automation page is closed")]
    PageClosed,

    #[error("Driver call timed out")]
    Timeout,

    #[error("Chat not found: {0}")]
    ChatNotFound(String),

    #[error("Driver protocol error: {0}")]
    Protocol(String),
}

impl DriverError {
    /// Transient failures are retried with backoff and otherwise deferred to
    /// the next sync trigger.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DriverError::ContextDestroyed | DriverError::PageClosed | DriverError::Timeout
        )
    }

    pub fn is_context_destroyed(&self) -> bool {
        matches!(self, DriverError::ContextDestroyed)
    }
}

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Session not found: {0}")]
    SessionNotFound(Uuid),

    #[error("Conversation not found: {0}")]
    ConversationNotFound(String),

    #[error("Message not found: {0}")]
    MessageNotFound(String),

    #[error("Session {0} is not connected")]
    SessionNotConnected(Uuid),

    #[error("Session {0} is already connected")]
    AlreadyConnected(Uuid),

    #[error("Timed out waiting for session {0} to produce a QR code or become ready")]
    ConnectTimeout(Uuid),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Driver error: {0}")]
    Driver(#[from] DriverError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SyncError {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            SyncError::SessionNotFound(_)
                | SyncError::ConversationNotFound(_)
                | SyncError::MessageNotFound(_)
        )
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, SyncError::Driver(e) if e.is_transient())
    }
}

impl From<uuid::Error> for SyncError {
    fn from(err: uuid::Error) -> Self {
        SyncError::Validation(err.to_string())
    }
}
