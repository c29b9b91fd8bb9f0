//! Single-flight reconciliation per session.
//!
//! At most one pass runs per session. Requests that arrive while a pass is
//! active are queued and run in arrival order once it finishes; nothing is
//! rejected. The pass itself runs on a spawned task, so a caller that stops
//! awaiting its result cannot leave the session stuck in the active state.

use crate::reconciler::BatchReconciler;
use crate::registry::{PendingSync, SessionRegistry};
use chatmirror_core::{
    models::{SyncKind, SyncOutcome, SyncStats},
    SyncError, SyncResult,
};
use futures_util::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Clone)]
pub struct SyncCoordinator {
    registry: Arc<SessionRegistry>,
    reconciler: BatchReconciler,
}

impl SyncCoordinator {
    pub fn new(registry: Arc<SessionRegistry>, reconciler: BatchReconciler) -> Self {
        Self {
            registry,
            reconciler,
        }
    }

    /// Runs a pass of `kind` now, or after the passes already active or queued
    /// for the session. Resolves when this request's pass has run.
    pub async fn request_sync(&self, session_id: Uuid, kind: SyncKind) -> SyncResult<SyncOutcome> {
        kind.validate()?;
        let (reply, rx) = oneshot::channel();

        if let Some(first) = self.registry.begin_sync(session_id, PendingSync { kind, reply }) {
            let coordinator = self.clone();
            tokio::spawn(async move { coordinator.drive(session_id, first).await });
        }

        rx.await
            .map_err(|_| SyncError::Internal(format!("sync task for {session_id} dropped")))?
    }

    /// Runs `current`, then every request queued behind it, until the queue is empty.
    async fn drive(&self, session_id: Uuid, mut current: PendingSync) {
        loop {
            let outcome = match AssertUnwindSafe(self.run_pass(session_id, current.kind))
                .catch_unwind()
                .await
            {
                Ok(outcome) => outcome,
                Err(_) => {
                    error!(%session_id, kind = ?current.kind, "Sync pass panicked");
                    Err(SyncError::Internal("sync pass panicked".into()))
                }
            };

            if let Err(e) = &outcome {
                warn!(%session_id, kind = ?current.kind, error = %e, "Sync pass failed");
            }
            // The requester may have gone away; the pass still counts.
            let _ = current.reply.send(outcome);

            match self.registry.finish_sync(session_id) {
                Some(next) => {
                    debug!(%session_id, kind = ?next.kind, "Draining queued sync request");
                    current = next;
                }
                None => break,
            }
        }
    }

    async fn run_pass(&self, session_id: Uuid, kind: SyncKind) -> SyncResult<SyncOutcome> {
        if let Err(reason) = self.check_ready(session_id).await {
            info!(%session_id, reason = %reason, "Driver not ready, deferring sync");
            return Ok(SyncOutcome::Skipped { reason });
        }

        self.reconciler.reconcile(session_id, kind).await
    }

    async fn check_ready(&self, session_id: Uuid) -> Result<(), String> {
        let driver = self
            .registry
            .driver(session_id)
            .ok_or_else(|| "no driver handle".to_string())?;

        if !driver.is_page_open() {
            return Err("driver page is closed".to_string());
        }

        driver
            .health_check()
            .await
            .map_err(|e| format!("driver health check failed: {e}"))
    }

    pub async fn sync_conversations(&self, session_id: Uuid) -> SyncResult<SyncOutcome> {
        self.request_sync(session_id, SyncKind::Incremental).await
    }

    pub async fn full_sync(&self, session_id: Uuid) -> SyncResult<SyncOutcome> {
        self.request_sync(session_id, SyncKind::Full).await
    }

    /// First page of a caller-driven walk over the chat list.
    pub async fn progressive_sync(
        &self,
        session_id: Uuid,
        batch_size: usize,
    ) -> SyncResult<SyncOutcome> {
        self.continue_progressive_sync(session_id, 0, batch_size)
            .await
    }

    pub async fn continue_progressive_sync(
        &self,
        session_id: Uuid,
        offset: usize,
        batch_size: usize,
    ) -> SyncResult<SyncOutcome> {
        self.request_sync(session_id, SyncKind::Progressive { batch_size, offset })
            .await
    }

    pub fn get_sync_stats(&self, session_id: Uuid) -> SyncStats {
        self.registry.sync_stats(session_id)
    }
}
