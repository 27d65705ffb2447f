//! HTTP(S) client built around per-destination connection reuse.
//!
//! The [`Client`] is the high-level entry point: it owns (or shares) a
//! [`ConnectionRegistry`][registry::ConnectionRegistry], executes requests
//! over registry-owned connections, and follows redirects according to its
//! [`RedirectPolicy`][redirect::RedirectPolicy], producing responses whose
//! `previous` links record the chain.
//!
//! Three layers are exposed for callers that need more control:
//!
//! 1. The [`Client`] API: issue a request, get the final response with the
//!    redirect chain attached.
//! 2. The [registry][self::registry] API: inspect, invalidate, or share the
//!    per-destination connections and register client certificates.
//! 3. The [connection][self::conn] API: the per-destination transport
//!    configuration snapshot.

use std::fmt;
use std::sync::Arc;

use url::Url;

mod builder;
pub mod conn;
mod execute;
pub mod redirect;
pub mod registry;
pub mod request;
pub mod response;

pub use self::builder::Builder;
pub use self::conn::TcpConfig;
pub use self::redirect::RedirectPolicy;
pub use self::registry::{ConnectionRegistry, DestinationKey, RegistryConfig};
pub use self::request::Request;
pub use self::response::Response;

use self::execute::Executor;
use crate::tls::TlsPolicy;
use crate::Error;

pub(crate) struct ClientRef {
    pub(crate) executor: Executor,
    pub(crate) redirect: RedirectPolicy,
}

/// A high-level HTTP(S) client.
///
/// Cheap to clone; clones share the same registry and configuration.
///
/// # Example
/// ```no_run
/// # use hoplink::Client;
/// # async fn run() -> Result<(), hoplink::Error> {
/// let client = Client::builder().build();
/// let response = client.get("http://example.com".parse().unwrap()).await?;
/// println!("{}", response.status());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Client {
    pub(crate) inner: Arc<ClientRef>,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client").finish()
    }
}

impl Default for Client {
    fn default() -> Self {
        Builder::default().build()
    }
}

impl Client {
    /// Create a new, empty builder for clients.
    pub fn builder() -> Builder {
        Builder::new()
    }

    /// Create a client with default settings.
    pub fn new() -> Self {
        Builder::default().build()
    }

    /// Issue a request and follow redirects per the client's policy.
    ///
    /// The returned response is the final one; walking
    /// [`previous`][Response::previous] yields the redirect chain in
    /// reverse-chronological order.
    pub async fn request(&self, request: Request) -> Result<Response, Error> {
        redirect::follow(&self.inner.executor, request, &self.inner.redirect).await
    }

    /// Issue a request with an explicit redirect policy for this call.
    pub async fn request_with_policy(
        &self,
        request: Request,
        policy: RedirectPolicy,
    ) -> Result<Response, Error> {
        redirect::follow(&self.inner.executor, request, &policy).await
    }

    /// Make a GET request to the given URL.
    pub async fn get(&self, url: Url) -> Result<Response, Error> {
        self.request(Request::get(url)).await
    }

    /// Store client certificate material for future connections to `host`
    /// (exact host or `host:port`, matched case-insensitively).
    ///
    /// Connections that already exist are unaffected; invalidate them
    /// through the [registry][Self::registry] if the override must take
    /// effect immediately.
    pub fn register_certificate(
        &self,
        host: &str,
        key_file: &str,
        cert_file: &str,
        key_password: &str,
    ) {
        self.inner
            .executor
            .registry()
            .register_certificate(host, key_file, cert_file, key_password);
    }

    /// Replace the default TLS policy applied to connections created after
    /// this call. Already-built connections keep their configuration.
    pub fn configure_tls(&self, policy: TlsPolicy) {
        self.inner.executor.set_policy(policy);
    }

    /// The registry holding this client's connections.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        self.inner.executor.registry()
    }
}

#[cfg(test)]
mod tests {

    use static_assertions::assert_impl_all;

    use crate::Client;

    assert_impl_all!(Client: Send, Sync, Clone);
}
