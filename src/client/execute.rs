//! Single-request execution over registry-owned connections.

use std::sync::Arc;

use http::HeaderValue;
use parking_lot::Mutex;
use tracing::debug;

use crate::client::registry::{ConnectionRegistry, DestinationKey};
use crate::client::request::Request;
use crate::client::response::Response;
use crate::tls::TlsPolicy;
use crate::Error;

/// Issues one request at a time over a connection obtained from the
/// registry. Does not follow redirects; that is layered on top.
#[derive(Debug)]
pub(crate) struct Executor {
    registry: Arc<ConnectionRegistry>,
    policy: Mutex<TlsPolicy>,
    user_agent: HeaderValue,
}

impl Executor {
    pub(crate) fn new(
        registry: Arc<ConnectionRegistry>,
        policy: TlsPolicy,
        user_agent: HeaderValue,
    ) -> Self {
        Self {
            registry,
            policy: Mutex::new(policy),
            user_agent,
        }
    }

    pub(crate) fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Replace the default TLS policy for connections created after this
    /// call. Existing connections keep the policy they were built with.
    pub(crate) fn set_policy(&self, policy: TlsPolicy) {
        *self.policy.lock() = policy;
    }

    /// Issue a single request. The response carries no `previous` link.
    ///
    /// On failure the connection is invalidated so the next attempt rebuilds
    /// it instead of reusing a poisoned transport.
    pub(crate) async fn issue(&self, request: &Request) -> Result<Response, Error> {
        let key = DestinationKey::try_from(request.url())?;
        let policy = self.policy.lock().clone();
        let connection = self.registry.get_or_create(&key, &policy);

        match connection.send(request, &self.user_agent).await {
            Ok(response) => Ok(response),
            Err(error) => {
                debug!(%key, %error, "request failed, invalidating connection");
                self.registry.invalidate(&key);
                Err(error)
            }
        }
    }
}
