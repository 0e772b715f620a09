//! Narrow interfaces to the collaborators an export depends on: the management
//! connection, the VM and its export lease.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::stream::BoxStream;
use reqwest::Url;
use vexport_core::{LeaseInfo, TransferMethod};
use vexport_infra::NetError;

pub type ByteStream = BoxStream<'static, Result<Bytes, TransferError>>;

/// Failure while moving one item's bytes.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("server returned status {0}")]
    Status(u16),
    #[error("transport error: {0}")]
    Http(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid destination: {0}")]
    InvalidTarget(String),
    #[error("transfer cancelled")]
    Cancelled,
}

impl From<NetError> for TransferError {
    fn from(value: NetError) -> Self {
        match value {
            NetError::Status { status, .. } => TransferError::Status(status),
            other => TransferError::Http(other.to_string()),
        }
    }
}

/// Failure of a call against the lease or the VM.
#[derive(Debug, Clone, thiserror::Error)]
pub enum LeaseError {
    #[error("request rejected: {0}")]
    Rejected(String),
    #[error("transport error: {0}")]
    Http(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("timed out after {0:?}")]
    TimedOut(Duration),
    #[error("cancelled")]
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub method: TransferMethod,
    pub url: Url,
}

/// Session with the management endpoint.
#[async_trait::async_trait]
pub trait Connection: Send + Sync {
    /// Resolve a lease-granted device URL into an absolute one.
    fn resolve_url(&self, raw: &str) -> Result<Url, String>;

    /// Issue the transfer and return the body stream. Non-success responses are errors.
    async fn open(&self, request: &TransferRequest) -> Result<ByteStream, TransferError>;
}

/// A server-granted, time-limited export operation.
///
/// `complete` and `abort` are terminal. Implementations may assume that at most one call
/// is in flight at a time.
#[async_trait::async_trait]
pub trait ExportLease: Send + Sync {
    fn id(&self) -> &str;

    /// Block until the lease leaves `Initializing`.
    async fn wait(&self) -> Result<LeaseInfo, LeaseError>;

    async fn report_progress(&self, percent: u8) -> Result<(), LeaseError>;

    async fn complete(&self) -> Result<(), LeaseError>;

    async fn abort(&self, reason: &str) -> Result<(), LeaseError>;
}

#[async_trait::async_trait]
pub trait VmHandle: Send + Sync {
    fn name(&self) -> &str;

    async fn request_export_lease(&self) -> Result<Arc<dyn ExportLease>, LeaseError>;
}
