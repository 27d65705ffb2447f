//! Connections to a single destination.
//!
//! A [`Connection`] is created by the registry without performing any I/O;
//! the transport (DNS lookup, TCP connect, optional TLS handshake, HTTP/1.1
//! handshake) is established on first use. The TLS configuration a
//! connection was built with is fixed for its lifetime and exposed for
//! inspection.

use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::header::{HOST, USER_AGENT};
use http::HeaderValue;
use http_body_util::{BodyExt as _, Full};
use hyper::client::conn::http1;
use tracing::{debug, trace};

use crate::bridge::TokioIo;
use crate::client::registry::DestinationKey;
use crate::client::request::Request;
use crate::client::response::Response;
use crate::tls::{CertificateOverride, TlsPolicy};
use crate::Error;

pub(crate) mod dns;
mod stream;
pub(crate) mod tcp;
mod tls;

pub use self::tcp::TcpConfig;

use self::stream::Stream;

/// A reusable connection to one destination.
///
/// Exactly one `Connection` exists per live destination key; the registry
/// hands out clones of the same `Arc`. Requests on the same connection are
/// serialized.
#[derive(Debug)]
pub struct Connection {
    id: u64,
    key: DestinationKey,
    policy: TlsPolicy,
    identity: Option<CertificateOverride>,
    timeout: Option<Duration>,
    tcp: TcpConfig,
    state: tokio::sync::Mutex<Option<Http1Handle>>,
}

#[derive(Debug)]
struct Http1Handle {
    sender: http1::SendRequest<Full<Bytes>>,
}

impl Connection {
    pub(crate) fn new(
        id: u64,
        key: DestinationKey,
        policy: TlsPolicy,
        identity: Option<CertificateOverride>,
        timeout: Option<Duration>,
        tcp: TcpConfig,
    ) -> Self {
        Self {
            id,
            key,
            policy,
            identity,
            timeout,
            tcp,
            state: tokio::sync::Mutex::new(None),
        }
    }

    /// Identity of this connection object, for observing reuse.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The destination this connection serves.
    pub fn key(&self) -> &DestinationKey {
        &self.key
    }

    /// The per-connection timeout, covering connect and subsequent I/O.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// The CA bundle path this connection was built with.
    pub fn ca_certs(&self) -> Option<&Path> {
        self.policy.ca_certs.as_deref()
    }

    /// The minimum TLS version this connection was built with.
    pub fn tls_minimum_version(&self) -> Option<crate::tls::TlsVersion> {
        self.policy.minimum_version
    }

    /// The maximum TLS version this connection was built with.
    pub fn tls_maximum_version(&self) -> Option<crate::tls::TlsVersion> {
        self.policy.maximum_version
    }

    /// The client key file registered for this destination, if any.
    pub fn key_file(&self) -> Option<&str> {
        self.identity.as_ref().map(|identity| identity.key_file.as_str())
    }

    /// The client certificate file registered for this destination, if any.
    pub fn cert_file(&self) -> Option<&str> {
        self.identity
            .as_ref()
            .map(|identity| identity.cert_file.as_str())
    }

    /// The client key password registered for this destination, if any.
    pub fn key_password(&self) -> Option<&str> {
        self.identity
            .as_ref()
            .map(|identity| identity.key_password.as_str())
    }

    /// Send one request over this connection, establishing the transport
    /// first if needed.
    pub(crate) async fn send(
        &self,
        request: &Request,
        user_agent: &HeaderValue,
    ) -> Result<Response, Error> {
        let mut state = self.state.lock().await;

        let stale = matches!(&*state, Some(handle) if handle.sender.is_closed());
        if stale {
            debug!(key = %self.key, "connection closed by peer, re-establishing");
            *state = None;
        }

        if state.is_none() {
            *state = Some(self.establish().await?);
        }
        let handle = state
            .as_mut()
            .expect("connection state populated above");

        let http_request = self.build_http_request(request, user_agent)?;
        let url = request.url().clone();

        with_timeout(self.timeout, "request", async {
            handle
                .sender
                .ready()
                .await
                .map_err(Error::transport)?;
            let response = handle
                .sender
                .send_request(http_request)
                .await
                .map_err(Error::transport)?;

            let (parts, body) = response.into_parts();
            let body = body
                .collect()
                .await
                .map_err(Error::transport)?
                .to_bytes();

            Ok(Response::new(url, parts.status, parts.headers, body))
        })
        .await
    }

    async fn establish(&self) -> Result<Http1Handle, Error> {
        // TLS configuration is resolved before any network activity so
        // invalid policies fail without opening a socket.
        let tls_config = if self.key.is_tls() {
            Some(Arc::new(crate::tls::build_client_config(
                &self.policy,
                self.identity.as_ref(),
            )?))
        } else {
            None
        };

        let addrs = dns::resolve(self.key.host(), self.key.port()).await?;

        let stream = with_timeout(self.timeout, "connect", tcp::connect(&addrs, &self.tcp)).await?;

        let stream: Stream = match tls_config {
            Some(config) => {
                let handshake = tls::handshake(stream, self.key.host(), config);
                with_timeout(self.timeout, "tls handshake", handshake)
                    .await?
                    .into()
            }
            None => stream.into(),
        };

        let (sender, driver) = http1::handshake(TokioIo::new(stream))
            .await
            .map_err(Error::transport)?;

        let key = self.key.clone();
        tokio::spawn(async move {
            if let Err(error) = driver.await {
                debug!(%key, %error, "connection driver terminated");
            }
        });

        trace!(key = %self.key, id = self.id, "connection established");

        Ok(Http1Handle { sender })
    }

    fn build_http_request(
        &self,
        request: &Request,
        user_agent: &HeaderValue,
    ) -> Result<http::Request<Full<Bytes>>, Error> {
        let mut target = request.url().path().to_owned();
        if let Some(query) = request.url().query() {
            target.push('?');
            target.push_str(query);
        }

        let body = request.body().cloned().unwrap_or_default();
        let mut http_request = http::Request::builder()
            .method(request.method().clone())
            .uri(target)
            .body(Full::new(body))
            .map_err(|error| Error::Request(error.to_string()))?;

        *http_request.headers_mut() = request.headers().clone();

        if !http_request.headers().contains_key(HOST) {
            let host = if self.key.is_default_port() {
                self.key.host().to_owned()
            } else {
                self.key.authority()
            };
            let host = HeaderValue::from_str(&host)
                .map_err(|error| Error::Request(error.to_string()))?;
            http_request.headers_mut().insert(HOST, host);
        }

        if !http_request.headers().contains_key(USER_AGENT) {
            http_request
                .headers_mut()
                .insert(USER_AGENT, user_agent.clone());
        }

        Ok(http_request)
    }
}

async fn with_timeout<T>(
    timeout: Option<Duration>,
    operation: &str,
    future: impl Future<Output = Result<T, Error>>,
) -> Result<T, Error> {
    match timeout {
        Some(duration) => match tokio::time::timeout(duration, future).await {
            Ok(result) => result,
            Err(_) => Err(Error::timeout(operation, duration)),
        },
        None => future.await,
    }
}
