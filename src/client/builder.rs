use std::sync::Arc;
use std::time::Duration;

use http::HeaderValue;

use super::conn::TcpConfig;
use super::execute::Executor;
use super::redirect::RedirectPolicy;
use super::registry::{ConnectionRegistry, RegistryConfig};
use super::{Client, ClientRef};
use crate::tls::TlsPolicy;

/// A builder for a client.
#[derive(Debug)]
pub struct Builder {
    tls: TlsPolicy,
    redirect: RedirectPolicy,
    timeout: Option<Duration>,
    tcp: TcpConfig,
    user_agent: Option<String>,
    registry: Option<Arc<ConnectionRegistry>>,
}

impl Default for Builder {
    fn default() -> Self {
        Self {
            tls: TlsPolicy::default(),
            redirect: RedirectPolicy::default(),
            timeout: Some(Duration::from_secs(30)),
            tcp: TcpConfig::default(),
            user_agent: None,
            registry: None,
        }
    }
}

impl Builder {
    /// Create a builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use the provided TLS policy for connections created by this client.
    pub fn with_tls_policy(mut self, policy: TlsPolicy) -> Self {
        self.tls = policy;
        self
    }

    /// Set the redirect policy.
    pub fn with_redirect_policy(mut self, policy: RedirectPolicy) -> Self {
        self.redirect = policy;
        self
    }

    /// Disable redirect following; 3xx responses are returned directly.
    pub fn without_redirects(mut self) -> Self {
        self.redirect = RedirectPolicy::none();
        self
    }

    /// Set the per-connection timeout, covering connect and subsequent I/O.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Disable the per-connection timeout.
    pub fn without_timeout(mut self) -> Self {
        self.timeout = None;
        self
    }

    /// Use the provided TCP configuration.
    pub fn with_tcp(mut self, tcp: TcpConfig) -> Self {
        self.tcp = tcp;
        self
    }

    /// Set the User-Agent header sent when the caller provides none.
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Share an existing registry instead of creating one.
    ///
    /// The registry's own timeout and TCP configuration govern connections
    /// it creates; the builder's are ignored.
    pub fn with_registry(mut self, registry: Arc<ConnectionRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Build the client.
    pub fn build(self) -> Client {
        let user_agent = if let Some(ua) = self.user_agent {
            HeaderValue::from_str(&ua).expect("user-agent should be a valid http header")
        } else {
            HeaderValue::from_static(concat!(
                env!("CARGO_PKG_NAME"),
                "/",
                env!("CARGO_PKG_VERSION")
            ))
        };

        let registry = self.registry.unwrap_or_else(|| {
            Arc::new(ConnectionRegistry::new(RegistryConfig {
                timeout: self.timeout,
                tcp: self.tcp,
            }))
        });

        Client {
            inner: Arc::new(ClientRef {
                executor: Executor::new(registry, self.tls, user_agent),
                redirect: self.redirect,
            }),
        }
    }
}
