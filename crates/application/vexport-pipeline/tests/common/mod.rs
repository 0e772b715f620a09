#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use camino::Utf8PathBuf;
use futures::stream::{self, StreamExt};
use reqwest::Url;
use vexport_core::{DeviceEntry, LeaseInfo, ProgressSample};
use vexport_pipeline::export::{
    ByteStream, Connection, ExportLease, LeaseError, TransferError, TransferRequest, VmHandle,
};
use vexport_pipeline::ProgressSink;

/// Records every call so tests can assert the finalization contract.
#[derive(Default)]
pub struct FakeLease {
    pub info: Mutex<Option<LeaseInfo>>,
    pub wait_error: Mutex<Option<LeaseError>>,
    pub wait_delay: Option<Duration>,
    pub fail_reports: AtomicBool,
    pub fail_complete: AtomicBool,
    pub reports: Mutex<Vec<u8>>,
    pub completes: AtomicUsize,
    pub aborts: Mutex<Vec<String>>,
    pub finalized: AtomicBool,
    pub reports_after_finalize: AtomicUsize,
}

impl FakeLease {
    pub fn ready(devices: Vec<DeviceEntry>) -> Arc<Self> {
        Arc::new(Self {
            info: Mutex::new(Some(LeaseInfo::ready(devices))),
            ..Self::default()
        })
    }

    pub fn with_info(info: LeaseInfo) -> Arc<Self> {
        Arc::new(Self {
            info: Mutex::new(Some(info)),
            ..Self::default()
        })
    }

    pub fn complete_count(&self) -> usize {
        self.completes.load(Ordering::SeqCst)
    }

    pub fn abort_count(&self) -> usize {
        self.aborts.lock().unwrap().len()
    }

    pub fn reports(&self) -> Vec<u8> {
        self.reports.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl ExportLease for FakeLease {
    fn id(&self) -> &str {
        "lease-1"
    }

    async fn wait(&self) -> Result<LeaseInfo, LeaseError> {
        if let Some(delay) = self.wait_delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = self.wait_error.lock().unwrap().clone() {
            return Err(err);
        }
        let info = self.info.lock().unwrap().clone();
        info.ok_or_else(|| LeaseError::Protocol("no lease info".into()))
    }

    async fn report_progress(&self, percent: u8) -> Result<(), LeaseError> {
        if self.finalized.load(Ordering::SeqCst) {
            self.reports_after_finalize.fetch_add(1, Ordering::SeqCst);
        }
        if self.fail_reports.load(Ordering::SeqCst) {
            return Err(LeaseError::Http("connection reset".into()));
        }
        self.reports.lock().unwrap().push(percent);
        Ok(())
    }

    async fn complete(&self) -> Result<(), LeaseError> {
        self.completes.fetch_add(1, Ordering::SeqCst);
        self.finalized.store(true, Ordering::SeqCst);
        if self.fail_complete.load(Ordering::SeqCst) {
            return Err(LeaseError::Rejected("lease expired".into()));
        }
        Ok(())
    }

    async fn abort(&self, reason: &str) -> Result<(), LeaseError> {
        self.aborts.lock().unwrap().push(reason.to_string());
        self.finalized.store(true, Ordering::SeqCst);
        Ok(())
    }
}

pub struct FakeVm {
    pub lease: Option<Arc<FakeLease>>,
}

impl FakeVm {
    pub fn granting(lease: &Arc<FakeLease>) -> Self {
        Self {
            lease: Some(lease.clone()),
        }
    }

    pub fn refusing() -> Self {
        Self { lease: None }
    }
}

#[async_trait::async_trait]
impl VmHandle for FakeVm {
    fn name(&self) -> &str {
        "vm-42"
    }

    async fn request_export_lease(&self) -> Result<Arc<dyn ExportLease>, LeaseError> {
        match &self.lease {
            Some(lease) => Ok(lease.clone() as Arc<dyn ExportLease>),
            None => Err(LeaseError::Rejected("vm has snapshots pending consolidation".into())),
        }
    }
}

#[derive(Clone)]
pub struct FakeBody {
    pub data: Vec<u8>,
    pub fail_after: Option<usize>,
    pub chunk: usize,
    pub delay: Duration,
}

impl FakeBody {
    pub fn ok(len: usize) -> Self {
        Self {
            data: vec![0xAB; len],
            fail_after: None,
            chunk: 100,
            delay: Duration::ZERO,
        }
    }

    pub fn failing_at(len: usize, at: usize) -> Self {
        Self {
            fail_after: Some(at),
            ..Self::ok(len)
        }
    }

    pub fn slow(len: usize, chunk: usize, delay: Duration) -> Self {
        Self {
            chunk,
            delay,
            ..Self::ok(len)
        }
    }
}

/// Serves bodies keyed by URL path; `*` hosts and relative URLs resolve against
/// `https://esx.lab/`.
pub struct FakeConnection {
    base: Url,
    bodies: HashMap<String, FakeBody>,
    pub opens: AtomicUsize,
}

impl FakeConnection {
    pub fn new(bodies: Vec<(&str, FakeBody)>) -> Arc<Self> {
        Arc::new(Self {
            base: Url::parse("https://esx.lab/").unwrap(),
            bodies: bodies
                .into_iter()
                .map(|(path, body)| (path.to_string(), body))
                .collect(),
            opens: AtomicUsize::new(0),
        })
    }

    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Connection for FakeConnection {
    fn resolve_url(&self, raw: &str) -> Result<Url, String> {
        let raw = raw.replace("://*", "://esx.lab");
        let url = if raw.contains("://") {
            Url::parse(&raw).map_err(|e| e.to_string())?
        } else {
            self.base.join(&raw).map_err(|e| e.to_string())?
        };
        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(format!("unsupported scheme {other}")),
        }
    }

    async fn open(&self, request: &TransferRequest) -> Result<ByteStream, TransferError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let body = self
            .bodies
            .get(request.url.path())
            .cloned()
            .ok_or(TransferError::Status(404))?;

        let limit = body.fail_after.unwrap_or(body.data.len());
        let mut chunks: Vec<Result<Bytes, TransferError>> = body.data[..limit]
            .chunks(body.chunk)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        if body.fail_after.is_some() {
            chunks.push(Err(TransferError::Http("connection reset by peer".into())));
        }

        let delay = body.delay;
        Ok(stream::iter(chunks)
            .then(move |chunk| async move {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                chunk
            })
            .boxed())
    }
}

#[derive(Default)]
pub struct RecordingSink {
    pub samples: Mutex<Vec<ProgressSample>>,
}

impl ProgressSink for RecordingSink {
    fn on_progress(&self, sample: &ProgressSample) {
        self.samples.lock().unwrap().push(sample.clone());
    }
}

pub fn device(target_id: &str, url: &str, size: u64) -> DeviceEntry {
    DeviceEntry {
        key: format!("dev-{target_id}"),
        target_id: target_id.to_string(),
        url: url.to_string(),
        disk: false,
        file_size: Some(size),
    }
}

pub fn disk(target_id: &str, url: &str, size: u64) -> DeviceEntry {
    DeviceEntry {
        disk: true,
        ..device(target_id, url, size)
    }
}

pub fn temp_root() -> (tempfile::TempDir, Utf8PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(dir.path().join("export")).unwrap();
    (dir, root)
}
