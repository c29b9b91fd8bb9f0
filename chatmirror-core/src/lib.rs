pub mod address;
pub mod errors;
pub mod models;
pub mod protocol;
pub mod remote;

pub use address::ChatAddress;
pub use errors::{DriverError, SyncError};
pub use models::*;
pub use protocol::SessionEvent;
pub use remote::{RemoteChat, RemoteMessage};

pub type SyncResult<T> = Result<T, SyncError>;
