use std::sync::Arc;
use std::time::{Duration, Instant};

use camino::Utf8Path;
use futures::stream::{self, StreamExt};
use tokio::sync::mpsc::Sender;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use vexport_core::path_utils::ExportPath;
use vexport_infra::Throttle;

use crate::export::ports::{Connection, TransferError, TransferRequest};
use crate::export::{ExportOptions, FileTransferItem, TransferredFile};
use crate::io_utils::PartFile;
use crate::tracker::TransferEvent;

#[derive(Debug, Default)]
pub struct TransferTotals {
    pub items: usize,
    pub bytes: u64,
    pub files: Vec<TransferredFile>,
}

/// The first item that failed, and why.
#[derive(Debug)]
pub struct ItemFailure {
    pub index: usize,
    pub url: String,
    pub error: TransferError,
}

/// Streams lease items to a local directory. No retries: the first failure ends the run.
pub struct TransferEngine {
    connection: Arc<dyn Connection>,
    concurrency: usize,
    throttle: Option<Arc<Throttle>>,
}

impl TransferEngine {
    pub fn new(connection: Arc<dyn Connection>, opts: &ExportOptions) -> Self {
        Self {
            connection,
            concurrency: vexport_config::clamp_transfers(opts.max_concurrent_transfers),
            throttle: opts
                .rate_limit_bytes
                .and_then(Throttle::per_second)
                .map(Arc::new),
        }
    }

    /// Transfer every item under `root`.
    ///
    /// With a concurrency of one, items run strictly in order. Dropping the run, or
    /// returning on the first failure, cancels whatever is still in flight.
    pub async fn run(
        &self,
        items: &[FileTransferItem],
        root: &Utf8Path,
        events: Option<Sender<TransferEvent>>,
        cancel: &CancellationToken,
    ) -> Result<TransferTotals, ItemFailure> {
        let mut transfers = stream::iter(items.iter().cloned())
            .map(|item| {
                let events = events.clone();
                async move { self.transfer_one(item, root, events, cancel).await }
            })
            .buffer_unordered(self.concurrency);

        let mut totals = TransferTotals::default();
        while let Some(res) = transfers.next().await {
            let file = res?;
            totals.items += 1;
            totals.bytes += file.bytes;
            totals.files.push(file);
        }
        totals.files.sort_by_key(|f| f.index);

        info!(
            "transferred {} items ({} bytes) to {}",
            totals.items, totals.bytes, root
        );
        Ok(totals)
    }

    async fn transfer_one(
        &self,
        item: FileTransferItem,
        root: &Utf8Path,
        events: Option<Sender<TransferEvent>>,
        cancel: &CancellationToken,
    ) -> Result<TransferredFile, ItemFailure> {
        emit(&events, TransferEvent::Started { index: item.index }).await;
        info!(
            "downloading {} ({} {})",
            item.file_name,
            item.method.verb(),
            item.url
        );

        let res = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(TransferError::Cancelled),
            res = self.stream_to_disk(&item, root, &events) => res,
        };

        match res {
            Ok(bytes) => {
                emit(
                    &events,
                    TransferEvent::Completed {
                        index: item.index,
                        bytes,
                    },
                )
                .await;
                Ok(TransferredFile {
                    index: item.index,
                    target_id: item.target_id,
                    path: root.join(&item.file_name),
                    bytes,
                })
            }
            Err(error) => {
                warn!("transfer of {} failed: {}", item.url, error);
                emit(&events, TransferEvent::Failed { index: item.index }).await;
                Err(ItemFailure {
                    index: item.index,
                    url: item.url.to_string(),
                    error,
                })
            }
        }
    }

    async fn stream_to_disk(
        &self,
        item: &FileTransferItem,
        root: &Utf8Path,
        events: &Option<Sender<TransferEvent>>,
    ) -> Result<u64, TransferError> {
        if !ExportPath::verify_safe(&item.file_name) {
            return Err(TransferError::InvalidTarget(item.file_name.clone()));
        }
        let target = root.join(&item.file_name);
        if !target.starts_with(root) {
            return Err(TransferError::InvalidTarget(target.to_string()));
        }
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent.as_std_path()).await?;
        }

        let request = TransferRequest {
            method: item.method,
            url: item.url.clone(),
        };
        let mut chunks = self.connection.open(&request).await?;
        let mut part = PartFile::create(&target).await?;

        let emit_bytes = vexport_config::PROGRESS_EMIT_BYTES;
        let emit_interval = Duration::from_millis(vexport_config::PROGRESS_EMIT_INTERVAL_MS);
        let mut written = 0u64;
        let mut accumulated = 0u64;
        let mut last_emit = Instant::now();

        while let Some(chunk) = chunks.next().await {
            let chunk = chunk?;
            if let Some(throttle) = &self.throttle {
                throttle.admit(chunk.len()).await;
            }
            part.write_all(&chunk).await?;

            let len = chunk.len() as u64;
            written += len;
            accumulated += len;
            if accumulated >= emit_bytes || last_emit.elapsed() >= emit_interval {
                emit(
                    events,
                    TransferEvent::Progress {
                        index: item.index,
                        bytes_delta: accumulated,
                    },
                )
                .await;
                accumulated = 0;
                last_emit = Instant::now();
            }
        }

        if accumulated > 0 {
            emit(
                events,
                TransferEvent::Progress {
                    index: item.index,
                    bytes_delta: accumulated,
                },
            )
            .await;
        }

        part.commit().await?;
        debug!("wrote {} bytes to {}", written, target);
        Ok(written)
    }
}

async fn emit(events: &Option<Sender<TransferEvent>>, event: TransferEvent) {
    if let Some(tx) = events {
        let _ = tx.send(event).await;
    }
}
