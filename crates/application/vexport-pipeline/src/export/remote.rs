//! Port implementations over HTTP: device streams through `HttpSession`, lease calls
//! through a small JSON gateway.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{StreamExt, TryStreamExt};
use reqwest::{Response, Url};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use vexport_core::{LeaseInfo, LeaseState};
use vexport_infra::HttpSession;

use crate::export::ports::{
    ByteStream, Connection, ExportLease, LeaseError, TransferError, TransferRequest, VmHandle,
};

pub struct HttpConnection {
    session: HttpSession,
}

impl HttpConnection {
    pub fn new(session: HttpSession) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &HttpSession {
        &self.session
    }
}

#[async_trait::async_trait]
impl Connection for HttpConnection {
    fn resolve_url(&self, raw: &str) -> Result<Url, String> {
        self.session.resolve_url(raw).map_err(|e| e.to_string())
    }

    async fn open(&self, request: &TransferRequest) -> Result<ByteStream, TransferError> {
        let opened = self
            .session
            .open_stream(request.method, request.url.clone())
            .await?;
        if let Some(len) = opened.content_length {
            debug!("{} announces {} bytes", request.url, len);
        }
        Ok(opened.chunks.map_err(TransferError::from).boxed())
    }
}

#[derive(Deserialize)]
struct LeaseCreated {
    lease: String,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

#[derive(Serialize)]
struct ProgressBody {
    percent: u8,
}

#[derive(Serialize)]
struct AbortBody<'a> {
    reason: &'a str,
}

/// A VM reachable through the lease gateway of a management endpoint.
pub struct HttpLeaseGateway {
    session: HttpSession,
    vm_id: String,
    poll_interval: Duration,
}

impl HttpLeaseGateway {
    pub fn new(session: HttpSession, vm_id: impl Into<String>) -> Self {
        Self {
            session,
            vm_id: vm_id.into(),
            poll_interval: Duration::from_millis(vexport_config::DEFAULT_LEASE_POLL_INTERVAL_MS),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

#[async_trait::async_trait]
impl VmHandle for HttpLeaseGateway {
    fn name(&self) -> &str {
        &self.vm_id
    }

    async fn request_export_lease(&self) -> Result<Arc<dyn ExportLease>, LeaseError> {
        let url = endpoint(
            self.session.base(),
            &["api", "vms", self.vm_id.as_str(), "export-lease"],
        )?;
        let resp = post(&self.session, url, None::<&()>).await?;
        let created: LeaseCreated = resp
            .json()
            .await
            .map_err(|e| LeaseError::Protocol(format!("lease response: {e}")))?;

        info!("lease {} granted for {}", created.lease, self.vm_id);
        Ok(Arc::new(HttpExportLease {
            session: self.session.clone(),
            id: created.lease,
            poll_interval: self.poll_interval,
        }))
    }
}

pub struct HttpExportLease {
    session: HttpSession,
    id: String,
    poll_interval: Duration,
}

impl HttpExportLease {
    fn url(&self, action: Option<&str>) -> Result<Url, LeaseError> {
        let base = self.session.base();
        match action {
            Some(action) => endpoint(base, &["api", "leases", self.id.as_str(), action]),
            None => endpoint(base, &["api", "leases", self.id.as_str()]),
        }
    }

    async fn fetch_info(&self) -> Result<LeaseInfo, LeaseError> {
        let resp = self
            .session
            .client()
            .get(self.url(None)?)
            .send()
            .await
            .map_err(|e| LeaseError::Http(e.to_string()))?;
        let resp = check(resp).await?;
        resp.json()
            .await
            .map_err(|e| LeaseError::Protocol(format!("lease info: {e}")))
    }
}

#[async_trait::async_trait]
impl ExportLease for HttpExportLease {
    fn id(&self) -> &str {
        &self.id
    }

    async fn wait(&self) -> Result<LeaseInfo, LeaseError> {
        loop {
            let info = self.fetch_info().await?;
            if info.state != LeaseState::Initializing {
                return Ok(info);
            }
            debug!("lease {} still initializing", self.id);
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn report_progress(&self, percent: u8) -> Result<(), LeaseError> {
        let body = ProgressBody {
            percent: percent.min(100),
        };
        post(&self.session, self.url(Some("progress"))?, Some(&body)).await?;
        Ok(())
    }

    async fn complete(&self) -> Result<(), LeaseError> {
        post(&self.session, self.url(Some("complete"))?, None::<&()>).await?;
        Ok(())
    }

    async fn abort(&self, reason: &str) -> Result<(), LeaseError> {
        let body = AbortBody { reason };
        post(&self.session, self.url(Some("abort"))?, Some(&body)).await?;
        Ok(())
    }
}

fn endpoint(base: &Url, segments: &[&str]) -> Result<Url, LeaseError> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| LeaseError::Protocol(format!("{base} cannot be a base url")))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

async fn post<T: Serialize + ?Sized>(
    session: &HttpSession,
    url: Url,
    body: Option<&T>,
) -> Result<Response, LeaseError> {
    let mut req = session.client().post(url);
    if let Some(body) = body {
        req = req.json(body);
    }
    let resp = req
        .send()
        .await
        .map_err(|e| LeaseError::Http(e.to_string()))?;
    check(resp).await
}

async fn check(resp: Response) -> Result<Response, LeaseError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let text = resp.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&text)
        .map(|b| b.message)
        .unwrap_or(text);
    Err(LeaseError::Rejected(format!("{status}: {message}")))
}
