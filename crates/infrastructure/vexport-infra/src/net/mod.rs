use bytes::Bytes;
use futures::stream::{BoxStream, StreamExt, TryStreamExt};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Method, Url};
use std::time::Duration;
use tracing::debug;
use vexport_core::TransferMethod;

mod throttle;

pub use throttle::Throttle;

#[derive(Debug, thiserror::Error)]
pub enum NetError {
    #[error("invalid url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("unexpected status {status} from {url}")]
    Status { status: u16, url: String },
    #[error("invalid header value for {0}")]
    Header(&'static str),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

pub type ChunkStream = BoxStream<'static, Result<Bytes, NetError>>;

/// A successful response whose body has not been read yet.
pub struct OpenedStream {
    pub content_length: Option<u64>,
    pub chunks: ChunkStream,
}

#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub bearer_token: Option<String>,
    /// Hypervisor endpoints commonly run with self-signed certificates.
    pub accept_invalid_certs: bool,
    pub connect_timeout: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            bearer_token: None,
            accept_invalid_certs: false,
            connect_timeout: Duration::from_secs(30),
        }
    }
}

pub fn http_client(opts: &ClientOptions) -> Result<Client, NetError> {
    let mut headers = HeaderMap::new();
    if let Some(token) = &opts.bearer_token {
        let mut value = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|_| NetError::Header("authorization"))?;
        value.set_sensitive(true);
        headers.insert(AUTHORIZATION, value);
    }

    // No overall request timeout: disk streams legitimately run for hours.
    let client = Client::builder()
        .user_agent(concat!("vexport/", env!("CARGO_PKG_VERSION")))
        .default_headers(headers)
        .connect_timeout(opts.connect_timeout)
        .danger_accept_invalid_certs(opts.accept_invalid_certs)
        .build()?;
    Ok(client)
}

/// An HTTP client bound to a management endpoint base address.
#[derive(Debug, Clone)]
pub struct HttpSession {
    client: Client,
    base: Url,
}

impl HttpSession {
    pub fn new(client: Client, base_url: &str) -> Result<Self, NetError> {
        let mut base = Url::parse(base_url).map_err(|e| NetError::InvalidUrl {
            url: base_url.to_string(),
            reason: e.to_string(),
        })?;
        if base.cannot_be_a_base() || !matches!(base.scheme(), "http" | "https") {
            return Err(NetError::InvalidUrl {
                url: base_url.to_string(),
                reason: "endpoint must be an http(s) url".into(),
            });
        }

        // Treat the input as a directory base so `join("api/..")` keeps its path.
        if !base.path().ends_with('/') {
            base.set_path(&format!("{}/", base.path()));
        }

        Ok(Self { client, base })
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Resolve a device URL handed out by a lease.
    ///
    /// Absolute URLs may use `*` as host, meaning "the host you are talking to". Relative
    /// URLs are joined onto the session base.
    pub fn resolve_url(&self, raw: &str) -> Result<Url, NetError> {
        let invalid = |reason: String| NetError::InvalidUrl {
            url: raw.to_string(),
            reason,
        };

        let candidate = self
            .substitute_wildcard_host(raw)
            .unwrap_or_else(|| raw.to_string());

        let url = if candidate.contains("://") {
            Url::parse(&candidate).map_err(|e| invalid(e.to_string()))?
        } else {
            self.base.join(raw).map_err(|e| invalid(e.to_string()))?
        };

        if !matches!(url.scheme(), "http" | "https") {
            return Err(invalid(format!("unsupported scheme {}", url.scheme())));
        }
        if url.host_str().is_none() {
            return Err(invalid("missing host".into()));
        }
        Ok(url)
    }

    fn substitute_wildcard_host(&self, raw: &str) -> Option<String> {
        let idx = raw.find("://*")?;
        let (scheme, rest) = (&raw[..idx], &raw[idx + 4..]);
        let host = self.base.host_str()?;
        let authority = match (rest.starts_with(':'), self.base.port()) {
            (false, Some(port)) => format!("{host}:{port}"),
            _ => host.to_string(),
        };
        Some(format!("{scheme}://{authority}{rest}"))
    }

    /// Issue the request for one device file and hand back the body stream.
    /// Non-2xx responses are errors; the body is not consumed.
    pub async fn open_stream(
        &self,
        method: TransferMethod,
        url: Url,
    ) -> Result<OpenedStream, NetError> {
        let verb = Method::from_bytes(method.verb().as_bytes())
            .map_err(|_| NetError::Header("method"))?;

        let mut req = self.client.request(verb, url.clone());
        for (name, value) in method.headers() {
            req = req.header(*name, *value);
        }
        if let Some(content_type) = method.content_type() {
            req = req.header(CONTENT_TYPE, content_type);
        }

        debug!("{} {}", method.verb(), url);
        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(NetError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let content_length = resp.content_length();
        let chunks = resp.bytes_stream().map_err(NetError::from).boxed();
        Ok(OpenedStream {
            content_length,
            chunks,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(base: &str) -> HttpSession {
        HttpSession::new(Client::new(), base).unwrap()
    }

    #[test]
    fn base_gets_trailing_slash() {
        let s = session("https://vcenter.example.com/sdk");
        assert_eq!(s.base().as_str(), "https://vcenter.example.com/sdk/");
    }

    #[test]
    fn rejects_non_http_base() {
        assert!(HttpSession::new(Client::new(), "ftp://host/").is_err());
        assert!(HttpSession::new(Client::new(), "not a url").is_err());
    }

    #[test]
    fn wildcard_host_takes_session_host_and_port() {
        let s = session("https://esx01.lab:9443/");
        let url = s.resolve_url("https://*/nfc/52a4/disk-0.vmdk").unwrap();
        assert_eq!(url.as_str(), "https://esx01.lab:9443/nfc/52a4/disk-0.vmdk");
    }

    #[test]
    fn wildcard_host_keeps_explicit_port() {
        let s = session("https://esx01.lab:9443/");
        let url = s.resolve_url("https://*:902/nfc/disk.vmdk").unwrap();
        assert_eq!(url.as_str(), "https://esx01.lab:902/nfc/disk.vmdk");
    }

    #[test]
    fn relative_urls_join_the_base() {
        let s = session("http://127.0.0.1:8080/sdk");
        let url = s.resolve_url("nfc/1/disk.vmdk").unwrap();
        assert_eq!(url.as_str(), "http://127.0.0.1:8080/sdk/nfc/1/disk.vmdk");

        let rooted = s.resolve_url("/nfc/1/disk.vmdk").unwrap();
        assert_eq!(rooted.as_str(), "http://127.0.0.1:8080/nfc/1/disk.vmdk");
    }

    #[test]
    fn absolute_urls_pass_through() {
        let s = session("https://vcenter.example.com/");
        let url = s.resolve_url("https://esx02.lab/nfc/x.iso").unwrap();
        assert_eq!(url.host_str(), Some("esx02.lab"));
    }

    #[test]
    fn unsupported_schemes_are_rejected() {
        let s = session("https://vcenter.example.com/");
        assert!(matches!(
            s.resolve_url("file:///etc/passwd"),
            Err(NetError::InvalidUrl { .. })
        ));
        assert!(s.resolve_url("https://[::1/broken").is_err());
    }
}
