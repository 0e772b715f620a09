use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::export::ports::{ExportLease, LeaseError};
use crate::export::{FinalizationError, FinalizeAction};

/// Owns an acquired lease and finalizes it exactly once.
///
/// `complete`, `abort` and `release` consume the guard. A guard dropped without any of
/// them (panic, dropped future) schedules an abort on the current runtime.
pub struct LeaseGuard {
    lease: Arc<dyn ExportLease>,
    timeout: Duration,
    armed: bool,
}

impl LeaseGuard {
    pub fn new(lease: Arc<dyn ExportLease>, timeout: Duration) -> Self {
        Self {
            lease,
            timeout,
            armed: true,
        }
    }

    pub fn lease(&self) -> &Arc<dyn ExportLease> {
        &self.lease
    }

    /// Send a last progress report, then complete the lease.
    pub async fn complete(mut self, final_percent: u8) -> Result<(), FinalizationError> {
        self.armed = false;

        match tokio::time::timeout(self.timeout, self.lease.report_progress(final_percent)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("final progress report for lease {} failed: {}", self.lease.id(), e),
            Err(_) => warn!("final progress report for lease {} timed out", self.lease.id()),
        }

        let res = bounded(self.timeout, self.lease.complete()).await;
        match &res {
            Ok(()) => info!("lease {} completed", self.lease.id()),
            Err(e) => warn!("lease {} complete failed: {}", self.lease.id(), e),
        }
        res.map_err(|source| FinalizationError {
            action: FinalizeAction::Complete,
            source,
        })
    }

    pub async fn abort(mut self, reason: &str) -> Result<(), FinalizationError> {
        self.armed = false;

        let res = bounded(self.timeout, self.lease.abort(reason)).await;
        match &res {
            Ok(()) => info!("lease {} aborted: {}", self.lease.id(), reason),
            Err(e) => warn!("lease {} abort failed: {}", self.lease.id(), e),
        }
        res.map_err(|source| FinalizationError {
            action: FinalizeAction::Abort,
            source,
        })
    }

    /// Give up ownership without a terminal call: the server already ended the lease.
    pub fn release(mut self) {
        self.armed = false;
    }
}

async fn bounded<F>(limit: Duration, call: F) -> Result<(), LeaseError>
where
    F: std::future::Future<Output = Result<(), LeaseError>>,
{
    tokio::time::timeout(limit, call)
        .await
        .unwrap_or(Err(LeaseError::TimedOut(limit)))
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let lease = self.lease.clone();
        let limit = self.timeout;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!("lease {} dropped while active, aborting", lease.id());
                handle.spawn(async move {
                    if let Err(e) = bounded(limit, lease.abort("export interrupted")).await {
                        warn!("lease {} abort failed: {}", lease.id(), e);
                    }
                });
            }
            Err(_) => warn!(
                "lease {} dropped outside a runtime; server-side expiry will reclaim it",
                lease.id()
            ),
        }
    }
}
