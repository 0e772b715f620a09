use std::fmt;
use std::time::Duration;

use camino::Utf8PathBuf;

pub mod engine;
pub mod guard;
pub mod items;
pub mod keepalive;
pub mod ports;
pub mod remote;
pub mod session;

pub use engine::{ItemFailure, TransferEngine, TransferTotals};
pub use guard::LeaseGuard;
pub use items::{build_items, FileTransferItem, ItemSet};
pub use keepalive::{KeepAliveHandle, LeaseKeepAlive};
pub use ports::{
    ByteStream, Connection, ExportLease, LeaseError, TransferError, TransferRequest, VmHandle,
};
pub use remote::{HttpConnection, HttpExportLease, HttpLeaseGateway};
pub use session::ExportSession;

#[derive(Debug, Clone)]
pub struct ExportOptions {
    pub keepalive_interval: Duration,
    /// Bound for each finalization call. Not subject to cancellation.
    pub finalize_timeout: Duration,
    pub max_concurrent_transfers: usize,
    pub rate_limit_bytes: Option<u64>,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            keepalive_interval: Duration::from_millis(
                vexport_config::DEFAULT_KEEPALIVE_INTERVAL_MS,
            ),
            finalize_timeout: Duration::from_secs(vexport_config::DEFAULT_FINALIZE_TIMEOUT_SECS),
            max_concurrent_transfers: vexport_config::DEFAULT_CONCURRENT_TRANSFERS,
            rate_limit_bytes: None,
        }
    }
}

/// High-level error type for export operations.
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("export lease request for {vm} rejected: {source}")]
    LeaseAcquire {
        vm: String,
        #[source]
        source: LeaseError,
    },
    #[error("export lease did not become ready: {0}")]
    LeaseNotReady(String),
    #[error("cannot resolve url {url} of device {target_id}: {reason}")]
    UrlResolution {
        target_id: String,
        url: String,
        reason: String,
    },
    #[error("transfer of item {index} ({url}) failed: {source}")]
    Transport {
        index: usize,
        url: String,
        #[source]
        source: TransferError,
    },
    #[error("export cancelled")]
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizeAction {
    Complete,
    Abort,
}

impl fmt::Display for FinalizeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FinalizeAction::Complete => f.write_str("complete"),
            FinalizeAction::Abort => f.write_str("abort"),
        }
    }
}

/// The terminal lease call itself failed.
#[derive(Debug, Clone, thiserror::Error)]
#[error("lease {action} failed: {source}")]
pub struct FinalizationError {
    pub action: FinalizeAction,
    #[source]
    pub source: LeaseError,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferredFile {
    pub index: usize,
    pub target_id: String,
    pub path: Utf8PathBuf,
    pub bytes: u64,
}

#[derive(Debug, Default)]
pub struct ExportSummary {
    pub items_transferred: usize,
    pub bytes_transferred: u64,
    pub skipped_devices: usize,
    pub files: Vec<TransferredFile>,
    /// Set when `complete` failed after every file landed on disk.
    pub finalization_warning: Option<FinalizationError>,
}

/// What an export would transfer, gathered without moving any bytes.
#[derive(Debug, Clone)]
pub struct ExportPlan {
    pub lease_id: String,
    pub items: Vec<FileTransferItem>,
    pub skipped_devices: usize,
}
