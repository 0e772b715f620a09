use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::info;
use vexport_core::{percent_of, ProgressSample};

use crate::export::FileTransferItem;

#[derive(Debug, Clone)]
pub enum TransferEvent {
    Started { index: usize },
    Progress { index: usize, bytes_delta: u64 },
    Completed { index: usize, bytes: u64 },
    Failed { index: usize },
}

/// Receives per-item progress. Rendering is up to the implementation.
pub trait ProgressSink: Send + Sync {
    fn on_progress(&self, sample: &ProgressSample);
}

pub struct NoopProgressSink;

impl ProgressSink for NoopProgressSink {
    fn on_progress(&self, _sample: &ProgressSample) {}
}

/// Logs item completion at info and intermediate samples at debug.
pub struct LogProgressSink;

impl ProgressSink for LogProgressSink {
    fn on_progress(&self, sample: &ProgressSample) {
        if sample.percent_done == 100 {
            info!("{} done", sample.item_name);
        } else {
            tracing::debug!("{}: {}%", sample.item_name, sample.percent_done);
        }
    }
}

#[derive(Debug, Clone)]
pub struct ActiveTransfer {
    pub index: usize,
    pub file_name: String,
    pub bytes_transferred: u64,
    pub size_hint: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct TransferSnapshot {
    pub total_files: u64,
    pub completed_files: u64,
    pub failed_count: u64,
    pub hinted_bytes: u64,
    pub transferred_bytes: u64,
    pub speed_bps: u64,
    pub aggregate_percent: u8,
    pub in_flight: Vec<ActiveTransfer>,
}

#[derive(Debug)]
struct ItemProgress {
    name: String,
    size_hint: Option<u64>,
    bytes: u64,
    reported: Option<u8>,
    done: bool,
}

impl ItemProgress {
    /// Capped at 99 while streaming: 100 is reserved for completion.
    fn streaming_percent(&self) -> Option<u8> {
        self.size_hint
            .and_then(|hint| percent_of(self.bytes, hint))
            .map(|p| p.min(99))
    }
}

/// Single writer of per-item and aggregate progress for one export.
pub struct ProgressTracker {
    items: Vec<ItemProgress>,
    in_flight: HashSet<usize>,
    completed_files: u64,
    failed_count: u64,
    transferred_bytes: u64,
    aggregate: u8,
    started: Instant,
}

impl ProgressTracker {
    pub fn new(items: &[FileTransferItem]) -> Self {
        let items = items
            .iter()
            .map(|item| ItemProgress {
                name: item.file_name.clone(),
                size_hint: item.size_hint,
                bytes: 0,
                reported: None,
                done: false,
            })
            .collect();

        let mut tracker = Self {
            items,
            in_flight: HashSet::new(),
            completed_files: 0,
            failed_count: 0,
            transferred_bytes: 0,
            aggregate: 0,
            started: Instant::now(),
        };
        tracker.aggregate = tracker.compute_aggregate();
        tracker
    }

    /// Apply one event and return the per-item samples it produced.
    pub fn update(&mut self, event: TransferEvent) -> Vec<ProgressSample> {
        let mut samples = Vec::new();
        match event {
            TransferEvent::Started { index } => {
                if index < self.items.len() {
                    self.in_flight.insert(index);
                }
            }
            TransferEvent::Progress { index, bytes_delta } => {
                self.transferred_bytes += bytes_delta;
                if let Some(item) = self.items.get_mut(index) {
                    if item.done {
                        return samples;
                    }
                    item.bytes += bytes_delta;
                    if let Some(pct) = item.streaming_percent() {
                        if item.reported.map_or(true, |prev| pct > prev) {
                            item.reported = Some(pct);
                            samples.push(ProgressSample {
                                item_index: index,
                                item_name: item.name.clone(),
                                percent_done: pct,
                            });
                        }
                    }
                }
            }
            TransferEvent::Completed { index, bytes } => {
                self.in_flight.remove(&index);
                if let Some(item) = self.items.get_mut(index) {
                    if !item.done {
                        item.done = true;
                        item.bytes = bytes;
                        item.reported = Some(100);
                        self.completed_files += 1;
                        samples.push(ProgressSample {
                            item_index: index,
                            item_name: item.name.clone(),
                            percent_done: 100,
                        });
                    }
                }
            }
            TransferEvent::Failed { index } => {
                self.in_flight.remove(&index);
                self.failed_count += 1;
            }
        }

        self.aggregate = self.aggregate.max(self.compute_aggregate());
        samples
    }

    /// Overall percentage; never decreases across updates.
    pub fn aggregate(&self) -> u8 {
        self.aggregate
    }

    fn compute_aggregate(&self) -> u8 {
        if self.items.iter().all(|i| i.done) {
            return 100;
        }

        // Byte-weighted when every item carries a hint, item-weighted otherwise.
        let weighted = self.items.iter().all(|i| i.size_hint.is_some());
        let (mut num, mut den) = (0u128, 0u128);
        for item in &self.items {
            match (weighted, item.size_hint) {
                (true, Some(hint)) => {
                    let done = if item.done { hint } else { item.bytes.min(hint) };
                    num += done as u128 * 100;
                    den += hint as u128;
                }
                _ => {
                    let pct = if item.done {
                        100
                    } else {
                        item.streaming_percent().unwrap_or(0)
                    };
                    num += pct as u128;
                    den += 1;
                }
            }
        }

        if den == 0 {
            return 0;
        }
        ((num / den) as u8).min(99)
    }

    pub fn snapshot(&self) -> TransferSnapshot {
        let elapsed = self.started.elapsed().as_secs_f64();
        let speed_bps = if elapsed > 0.0 {
            (self.transferred_bytes as f64 / elapsed) as u64
        } else {
            0
        };

        let mut in_flight: Vec<ActiveTransfer> = self
            .in_flight
            .iter()
            .filter_map(|idx| {
                self.items.get(*idx).map(|item| ActiveTransfer {
                    index: *idx,
                    file_name: item.name.clone(),
                    bytes_transferred: item.bytes,
                    size_hint: item.size_hint,
                })
            })
            .collect();
        in_flight.sort_by_key(|a| a.index);

        TransferSnapshot {
            total_files: self.items.len() as u64,
            completed_files: self.completed_files,
            failed_count: self.failed_count,
            hinted_bytes: self.items.iter().filter_map(|i| i.size_hint).sum(),
            transferred_bytes: self.transferred_bytes,
            speed_bps,
            aggregate_percent: self.aggregate,
            in_flight,
        }
    }
}

/// Drive a tracker from the event channel until every sender is gone.
///
/// Samples fan out to `sink`; the aggregate is published on `percent_tx`.
pub fn spawn_aggregator(
    mut tracker: ProgressTracker,
    mut rx: mpsc::Receiver<TransferEvent>,
    sink: Arc<dyn ProgressSink>,
    percent_tx: watch::Sender<u8>,
) -> JoinHandle<TransferSnapshot> {
    tokio::spawn(async move {
        percent_tx.send_replace(tracker.aggregate());
        while let Some(event) = rx.recv().await {
            for sample in tracker.update(event) {
                sink.on_progress(&sample);
            }
            let aggregate = tracker.aggregate();
            percent_tx.send_if_modified(|current| {
                if *current != aggregate {
                    *current = aggregate;
                    true
                } else {
                    false
                }
            });
        }
        tracker.snapshot()
    })
}
