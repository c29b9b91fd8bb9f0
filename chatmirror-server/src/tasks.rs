use chatmirror_core::SyncResult;
use std::future::Future;
use tokio::task::JoinHandle;
use tracing::warn;
use uuid::Uuid;

/// Spawns background work whose failure is logged and dropped rather than
/// propagated to the spawner.
pub fn spawn_detached<F>(task: &'static str, session_id: Uuid, fut: F) -> JoinHandle<()>
where
    F: Future<Output = SyncResult<()>> + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(e) = fut.await {
            warn!(%session_id, task, error = %e, "Background task failed");
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatmirror_core::SyncError;

    #[tokio::test]
    async fn test_failure_does_not_reach_spawner() {
        let handle = spawn_detached("test", Uuid::new_v4(), async {
            Err(SyncError::Internal("boom".into()))
        });
        assert!(handle.await.is_ok());
    }
}
