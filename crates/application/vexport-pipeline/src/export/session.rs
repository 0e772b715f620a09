use std::sync::Arc;

use camino::Utf8Path;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use vexport_core::{LeaseInfo, LeaseState};

use crate::export::engine::TransferEngine;
use crate::export::guard::LeaseGuard;
use crate::export::items::{build_items, ItemSet};
use crate::export::keepalive::LeaseKeepAlive;
use crate::export::ports::{Connection, LeaseError, TransferError, VmHandle};
use crate::export::{ExportError, ExportOptions, ExportPlan, ExportSummary};
use crate::tracker::{spawn_aggregator, LogProgressSink, ProgressSink, ProgressTracker};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Drives one export: lease acquisition, transfers with keep-alive, finalization.
pub struct ExportSession {
    connection: Arc<dyn Connection>,
    options: ExportOptions,
    sink: Arc<dyn ProgressSink>,
}

impl ExportSession {
    pub fn new(connection: Arc<dyn Connection>, options: ExportOptions) -> Self {
        Self {
            connection,
            options,
            sink: Arc::new(LogProgressSink),
        }
    }

    pub fn with_progress_sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Export every downloadable device of `vm` into `destination_root`.
    ///
    /// Once the lease is ready it is finalized exactly once: completed when every item
    /// landed, aborted otherwise, including on cancellation.
    pub async fn export(
        &self,
        vm: &dyn VmHandle,
        destination_root: &Utf8Path,
        cancel: &CancellationToken,
    ) -> Result<ExportSummary, ExportError> {
        let (guard, info) = self.acquire_ready(vm, cancel).await?;

        let ItemSet { items, skipped } = match build_items(&info.device_urls, &*self.connection)
        {
            Ok(set) => set,
            Err(e) => {
                let _ = guard.abort(&e.to_string()).await;
                return Err(e);
            }
        };
        info!(
            "exporting {} to {}: {} items, {} devices skipped",
            vm.name(),
            destination_root,
            items.len(),
            skipped
        );

        let tracker = ProgressTracker::new(&items);
        let (percent_tx, percent_rx) = watch::channel(tracker.aggregate());
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let aggregator = spawn_aggregator(tracker, event_rx, self.sink.clone(), percent_tx);

        // Declared after the guard so a dropped export stops heartbeats before the abort.
        let keepalive = LeaseKeepAlive::spawn(
            guard.lease().clone(),
            percent_rx.clone(),
            self.options.keepalive_interval,
            cancel,
        );

        let engine = TransferEngine::new(self.connection.clone(), &self.options);
        let outcome = engine
            .run(&items, destination_root, Some(event_tx), cancel)
            .await;

        match aggregator.await {
            Ok(snapshot) => info!(
                "{} of {} files, {} bytes, {} B/s",
                snapshot.completed_files,
                snapshot.total_files,
                snapshot.transferred_bytes,
                snapshot.speed_bps
            ),
            Err(e) => warn!("progress aggregation ended abnormally: {}", e),
        }

        // Barrier: no keep-alive may race the terminal lease call.
        let ticks = keepalive.stop().await;
        info!("keep-alive delivered {} reports", ticks);

        match outcome {
            Ok(totals) => {
                let final_percent = *percent_rx.borrow();
                let finalization_warning = guard.complete(final_percent).await.err();
                Ok(ExportSummary {
                    items_transferred: totals.items,
                    bytes_transferred: totals.bytes,
                    skipped_devices: skipped,
                    files: totals.files,
                    finalization_warning,
                })
            }
            Err(failure) => {
                let err = match failure.error {
                    TransferError::Cancelled => ExportError::Cancelled,
                    source => ExportError::Transport {
                        index: failure.index,
                        url: failure.url,
                        source,
                    },
                };
                let _ = guard.abort(&err.to_string()).await;
                Err(err)
            }
        }
    }

    /// Acquire a lease and list what an export would transfer, then abort the lease.
    pub async fn inspect(
        &self,
        vm: &dyn VmHandle,
        cancel: &CancellationToken,
    ) -> Result<ExportPlan, ExportError> {
        let (guard, info) = self.acquire_ready(vm, cancel).await?;
        let lease_id = guard.lease().id().to_string();

        let set = build_items(&info.device_urls, &*self.connection);
        let reason = match &set {
            Ok(_) => "inspection only".to_string(),
            Err(e) => e.to_string(),
        };
        let _ = guard.abort(&reason).await;

        let set = set?;
        Ok(ExportPlan {
            lease_id,
            items: set.items,
            skipped_devices: set.skipped,
        })
    }

    async fn acquire_ready(
        &self,
        vm: &dyn VmHandle,
        cancel: &CancellationToken,
    ) -> Result<(LeaseGuard, LeaseInfo), ExportError> {
        let lease = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ExportError::Cancelled),
            res = vm.request_export_lease() => res.map_err(|source| ExportError::LeaseAcquire {
                vm: vm.name().to_string(),
                source,
            })?,
        };
        info!("acquired export lease {} for {}", lease.id(), vm.name());
        let guard = LeaseGuard::new(lease.clone(), self.options.finalize_timeout);

        let waited = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(LeaseError::Cancelled),
            res = lease.wait() => res,
        };

        let info = match waited {
            Ok(info) => info,
            Err(LeaseError::Cancelled) => {
                let _ = guard.abort("export cancelled").await;
                return Err(ExportError::Cancelled);
            }
            Err(e) => {
                let err = ExportError::LeaseNotReady(format!("waiting for lease failed: {e}"));
                let _ = guard.abort(&err.to_string()).await;
                return Err(err);
            }
        };

        match info.state {
            LeaseState::Ready => Ok((guard, info)),
            state if state.is_terminal() => {
                // The server already finalized it.
                guard.release();
                let cause = match state {
                    LeaseState::Error => info
                        .error
                        .unwrap_or_else(|| "lease entered error state".to_string()),
                    _ => format!("lease already ended ({state:?})"),
                };
                Err(ExportError::LeaseNotReady(cause))
            }
            _ => {
                let err = ExportError::LeaseNotReady("lease still initializing".to_string());
                let _ = guard.abort(&err.to_string()).await;
                Err(err)
            }
        }
    }
}
