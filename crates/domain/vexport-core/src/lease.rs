use serde::{Deserialize, Serialize};

/// Server-side state of an export lease.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LeaseState {
    Initializing,
    Ready,
    Error,
    #[serde(rename = "done")]
    Success,
    Aborted,
}

impl LeaseState {
    /// Terminal states accept no further progress reports or finalization calls.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            LeaseState::Error | LeaseState::Success | LeaseState::Aborted
        )
    }
}

/// One exportable unit granted by a ready lease.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceEntry {
    #[serde(default)]
    pub key: String,
    /// Empty when the URL is not individually downloadable.
    #[serde(default)]
    pub target_id: String,
    pub url: String,
    #[serde(default)]
    pub disk: bool,
    /// Advisory only. Never used to decide completion.
    #[serde(default)]
    pub file_size: Option<u64>,
}

impl DeviceEntry {
    pub fn is_downloadable(&self) -> bool {
        !self.target_id.is_empty()
    }

    /// Size hint with absent and zero collapsed.
    pub fn size_hint(&self) -> Option<u64> {
        self.file_size.filter(|s| *s > 0)
    }
}

/// Snapshot of a lease as returned by a wait.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaseInfo {
    pub state: LeaseState,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub device_urls: Vec<DeviceEntry>,
}

impl LeaseInfo {
    pub fn ready(device_urls: Vec<DeviceEntry>) -> Self {
        Self {
            state: LeaseState::Ready,
            error: None,
            device_urls,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            state: LeaseState::Error,
            error: Some(message.into()),
            device_urls: Vec::new(),
        }
    }
}
