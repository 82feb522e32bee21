//! Minimal HTTP/1 client shared by the platform, metrics and webhook clients.
//!
//! Each request opens its own connection, performs a hyper handshake and
//! drives the connection in the background. The controller issues a
//! handful of spaced-out calls per second at most, so there is no pooling.
//! `https` endpoints are wrapped in rustls using the webpki root set.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::header::{CONTENT_TYPE, HOST, USER_AGENT};
use http::{Method, Request, StatusCode, Uri};
use http_body_util::{BodyExt, Full};
use hyper::client::conn::http1::SendRequest;
use hyper_util::rt::TokioIo;
use rustls::pki_types::ServerName;
use serde::de::DeserializeOwned;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::debug;

use crate::error::TransportError;

const AGENT: &str = concat!("fleet-controller/", env!("CARGO_PKG_VERSION"));

/// A buffered HTTP response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub body: Bytes,
}

impl HttpResponse {
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }

    /// Body as text, for error messages.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).trim().to_string()
    }
}

/// HTTP client bound to a single base URL.
#[derive(Clone)]
pub struct HttpTransport {
    base_url: String,
    host: String,
    port: u16,
    authority: String,
    prefix: String,
    tls: Option<TlsConnector>,
    timeout: Duration,
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl HttpTransport {
    /// Create a transport for `base_url` (scheme `http` or `https`).
    ///
    /// Any path component of the base URL is prefixed to every request.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, TransportError> {
        let invalid = |reason: &str| TransportError::InvalidUrl {
            url: base_url.to_string(),
            reason: reason.to_string(),
        };

        let uri: Uri = base_url.parse().map_err(|_| invalid("unparseable"))?;
        let tls = match uri.scheme_str() {
            Some("http") => None,
            Some("https") => Some(tls_connector()),
            Some(_) => return Err(invalid("scheme must be http or https")),
            None => return Err(invalid("missing scheme")),
        };
        let host = uri
            .host()
            .ok_or_else(|| invalid("missing host"))?
            .to_string();
        let port = uri
            .port_u16()
            .unwrap_or(if tls.is_some() { 443 } else { 80 });
        let authority = uri
            .authority()
            .map(|a| a.as_str().to_string())
            .unwrap_or_else(|| host.clone());
        let prefix = uri.path().trim_end_matches('/').to_string();

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            host,
            port,
            authority,
            prefix,
            tls,
            timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn get(&self, path: &str) -> Result<HttpResponse, TransportError> {
        self.send(Method::GET, path, None).await
    }

    /// Send a request. `path` must start with `/` and may carry a query;
    /// an empty `path` targets the base URL itself.
    ///
    /// A body, when present, is sent as `application/json`.
    pub async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<Vec<u8>>,
    ) -> Result<HttpResponse, TransportError> {
        let mut target = format!("{}{}", self.prefix, path);
        if target.is_empty() {
            target.push('/');
        }

        match tokio::time::timeout(self.timeout, self.exchange(method, &target, body)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout {
                target: format!("{}{}", self.base_url, path),
                after: self.timeout,
            }),
        }
    }

    async fn exchange(
        &self,
        method: Method,
        target: &str,
        body: Option<Vec<u8>>,
    ) -> Result<HttpResponse, TransportError> {
        let address = format!("{}:{}", self.host, self.port);
        let stream = TcpStream::connect((self.host.as_str(), self.port))
            .await
            .map_err(|source| TransportError::Connect {
                address: address.clone(),
                source,
            })?;

        let mut sender = match &self.tls {
            Some(connector) => {
                let server_name = ServerName::try_from(self.host.clone()).map_err(|_| {
                    TransportError::InvalidUrl {
                        url: self.base_url.clone(),
                        reason: "host is not a valid TLS server name".to_string(),
                    }
                })?;
                let stream = connector
                    .connect(server_name, stream)
                    .await
                    .map_err(|source| TransportError::Connect { address, source })?;
                handshake(TokioIo::new(stream)).await?
            }
            None => handshake(TokioIo::new(stream)).await?,
        };

        let mut builder = Request::builder()
            .method(method.clone())
            .uri(target)
            .header(HOST, &self.authority)
            .header(USER_AGENT, AGENT);
        let body = match body {
            Some(bytes) => {
                builder = builder.header(CONTENT_TYPE, "application/json");
                Full::new(Bytes::from(bytes))
            }
            None => Full::new(Bytes::new()),
        };
        let request = builder.body(body)?;

        let response = sender.send_request(request).await?;
        let status = response.status();
        let body = response.into_body().collect().await?.to_bytes();

        debug!(%method, %target, %status, "http exchange complete");
        Ok(HttpResponse { status, body })
    }
}

async fn handshake<I>(io: I) -> Result<SendRequest<Full<Bytes>>, TransportError>
where
    I: hyper::rt::Read + hyper::rt::Write + Unpin + Send + 'static,
{
    let (sender, conn) = hyper::client::conn::http1::handshake(io).await?;

    // Drive the connection in the background.
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            debug!(error = %e, "connection closed with error");
        }
    });

    Ok(sender)
}

fn tls_connector() -> TlsConnector {
    let mut roots = rustls::RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let config = rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    TlsConnector::from(Arc::new(config))
}

/// Build a percent-encoded query string (without the leading `?`).
pub fn encode_query(pairs: &[(&str, &str)]) -> String {
    pairs
        .iter()
        .map(|(k, v)| format!("{}={}", encode_component(k), encode_component(v)))
        .collect::<Vec<_>>()
        .join("&")
}

/// Percent-encode a single query value or path segment.
pub fn encode_component(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}
