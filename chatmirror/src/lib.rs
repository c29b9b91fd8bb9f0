//! ChatMirror - session synchronization for locally authenticated chat accounts
//!
//! This crate provides a unified API over the engine and its data model.
//!
//! # Example
//!
//! ```ignore
//! use chatmirror::{ChatMirror, EngineConfig, SyncKind};
//!
//! let engine = ChatMirror::open("sqlite:chatmirror.db", factory, EngineConfig::from_env()).await?;
//! let session = engine.sessions.create_session().await?;
//! let outcome = engine.connect(session.id).await?;
//! engine.request_sync(session.id, SyncKind::Full).await?;
//! ```

// Re-export engine types
pub use chatmirror_server::config::EngineConfig;
pub use chatmirror_server::driver::{ChatDriver, DriverEvent, DriverFactory};
pub use chatmirror_server::ingestion::{FetchOptions, LoadMoreResult};
pub use chatmirror_server::logging::init_tracing;
pub use chatmirror_server::ChatMirror;

// Re-export core types that external applications may need
pub use chatmirror_core::errors::{DriverError, SyncError};
pub use chatmirror_core::models::{
    ConnectOutcome, Conversation, Message, MessageStatus, MessageType, Session, SessionStatus,
    SyncKind, SyncOutcome, SyncReport, SyncStats,
};
pub use chatmirror_core::protocol::SessionEvent;
pub use chatmirror_core::{ChatAddress, RemoteChat, RemoteMessage, SyncResult};
