//! Connection registry for clients.
//!
//! The registry owns the mapping from destination key (scheme, host, port)
//! to the single reusable [`Connection`] for that destination. Connections
//! are created lazily and perform no I/O at construction; certificate
//! overrides registered ahead of time are applied when a matching connection
//! is first created, and never retroactively. The registry is an explicit
//! object with an injectable lifetime: share it via `Arc` to share
//! connections across clients, or give each test its own for isolation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::trace;

use crate::client::conn::{Connection, TcpConfig};
use crate::tls::{CertificateOverride, TlsPolicy};

mod key;

pub use self::key::DestinationKey;

/// Configuration fixed into each connection the registry creates.
#[derive(Debug, Clone, Default)]
pub struct RegistryConfig {
    /// Timeout applied to connect and subsequent I/O, per connection.
    pub timeout: Option<Duration>,

    /// TCP socket options.
    pub tcp: TcpConfig,
}

/// Owns one connection per live destination key.
#[derive(Debug)]
pub struct ConnectionRegistry {
    connections: Mutex<HashMap<DestinationKey, Arc<Connection>>>,
    overrides: Mutex<HashMap<String, CertificateOverride>>,
    next_id: AtomicU64,
    config: RegistryConfig,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new(RegistryConfig::default())
    }
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            connections: Mutex::new(HashMap::new()),
            overrides: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            config,
        }
    }

    /// Return the connection for `key`, creating it on first use.
    ///
    /// The policy and any matching certificate override are snapshotted at
    /// creation; later calls return the existing connection regardless of
    /// the policy argument. Racing callers for the same new key all receive
    /// the same connection.
    pub fn get_or_create(&self, key: &DestinationKey, policy: &TlsPolicy) -> Arc<Connection> {
        let mut connections = self.connections.lock();

        if let Some(existing) = connections.get(key) {
            return existing.clone();
        }

        let identity = self.override_for(key);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let connection = Arc::new(Connection::new(
            id,
            key.clone(),
            policy.clone(),
            identity,
            self.config.timeout,
            self.config.tcp.clone(),
        ));
        connections.insert(key.clone(), connection.clone());
        trace!(%key, id, "connection created");
        connection
    }

    /// The live connection for `key`, if one exists.
    pub fn get(&self, key: &DestinationKey) -> Option<Arc<Connection>> {
        self.connections.lock().get(key).cloned()
    }

    /// Remove the connection for `key`, forcing recreation on next use.
    ///
    /// Required when a registered override must take effect for a
    /// destination that already has a connection.
    pub fn invalidate(&self, key: &DestinationKey) -> Option<Arc<Connection>> {
        let removed = self.connections.lock().remove(key);
        if removed.is_some() {
            trace!(%key, "connection invalidated");
        }
        removed
    }

    /// Store client certificate material for future connections to hosts
    /// matching `host_pattern` (exact host, or `host:port`, matched
    /// case-insensitively). Existing connections are not affected; the named
    /// files are not touched until a matching connection is built.
    pub fn register_certificate(
        &self,
        host_pattern: &str,
        key_file: &str,
        cert_file: &str,
        key_password: &str,
    ) {
        trace!(host = %host_pattern, "certificate registered");
        self.overrides.lock().insert(
            host_pattern.to_ascii_lowercase(),
            CertificateOverride {
                key_file: key_file.to_owned(),
                cert_file: cert_file.to_owned(),
                key_password: key_password.to_owned(),
            },
        );
    }

    /// Number of live connections.
    pub fn len(&self) -> usize {
        self.connections.lock().len()
    }

    /// Whether the registry holds no connections.
    pub fn is_empty(&self) -> bool {
        self.connections.lock().is_empty()
    }

    fn override_for(&self, key: &DestinationKey) -> Option<CertificateOverride> {
        let overrides = self.overrides.lock();
        overrides
            .get(&key.authority())
            .or_else(|| overrides.get(key.host()))
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use http::uri::Scheme;
    use static_assertions::assert_impl_all;

    assert_impl_all!(ConnectionRegistry: Send, Sync);

    fn https_key(host: &str) -> DestinationKey {
        DestinationKey::new(Scheme::HTTPS, host, 443)
    }

    #[test]
    fn same_key_reuses_the_connection() {
        let registry = ConnectionRegistry::default();
        let key = https_key("example.com");

        let first = registry.get_or_create(&key, &TlsPolicy::default());
        let second = registry.get_or_create(&key, &TlsPolicy::default());
        assert_eq!(first.id(), second.id());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn policy_is_fixed_at_creation() {
        let registry = ConnectionRegistry::default();
        let key = https_key("example.com");

        let first = registry.get_or_create(&key, &TlsPolicy::default());

        let stricter = TlsPolicy {
            minimum_version: Some(crate::tls::TlsVersion::Tls13),
            ..Default::default()
        };
        let second = registry.get_or_create(&key, &stricter);
        assert_eq!(first.id(), second.id());
        assert_eq!(second.tls_minimum_version(), None);
    }

    #[test]
    fn override_applies_to_new_connections() {
        let registry = ConnectionRegistry::default();
        registry.register_certificate("example.com", "akeyfile", "acertfile", "apassword");

        let connection =
            registry.get_or_create(&https_key("example.com"), &TlsPolicy::default());
        assert_eq!(connection.key_file(), Some("akeyfile"));
        assert_eq!(connection.cert_file(), Some("acertfile"));
        assert_eq!(connection.key_password(), Some("apassword"));

        let other = registry.get_or_create(&https_key("other.example.com"), &TlsPolicy::default());
        assert_eq!(other.key_file(), None);
        assert_eq!(other.cert_file(), None);
    }

    #[test]
    fn override_registered_after_creation_does_not_apply() {
        let registry = ConnectionRegistry::default();
        let key = https_key("example.com");

        let before = registry.get_or_create(&key, &TlsPolicy::default());
        registry.register_certificate("example.com", "akeyfile", "acertfile", "");

        let after = registry.get_or_create(&key, &TlsPolicy::default());
        assert_eq!(after.id(), before.id());
        assert_eq!(after.key_file(), None);
    }

    #[test]
    fn invalidate_forces_recreation_with_current_overrides() {
        let registry = ConnectionRegistry::default();
        let key = https_key("example.com");

        let first = registry.get_or_create(&key, &TlsPolicy::default());
        registry.register_certificate("example.com", "akeyfile", "acertfile", "");
        registry.invalidate(&key);

        let second = registry.get_or_create(&key, &TlsPolicy::default());
        assert_ne!(second.id(), first.id());
        assert_eq!(second.key_file(), Some("akeyfile"));
    }

    #[test]
    fn override_matching_is_case_insensitive() {
        let registry = ConnectionRegistry::default();
        registry.register_certificate("Example.COM", "akeyfile", "acertfile", "");

        let connection =
            registry.get_or_create(&https_key("example.com"), &TlsPolicy::default());
        assert_eq!(connection.key_file(), Some("akeyfile"));
    }

    #[test]
    fn port_qualified_override_matches_only_that_port() {
        let registry = ConnectionRegistry::default();
        registry.register_certificate("example.com:8443", "akeyfile", "acertfile", "");

        let matching = registry.get_or_create(
            &DestinationKey::new(Scheme::HTTPS, "example.com", 8443),
            &TlsPolicy::default(),
        );
        assert_eq!(matching.key_file(), Some("akeyfile"));

        let other =
            registry.get_or_create(&https_key("example.com"), &TlsPolicy::default());
        assert_eq!(other.key_file(), None);
    }

    #[test]
    fn racing_callers_share_one_connection() {
        let registry = Arc::new(ConnectionRegistry::default());
        let key = https_key("example.com");

        let ids: Vec<u64> = std::thread::scope(|scope| {
            (0..8)
                .map(|_| {
                    let registry = registry.clone();
                    let key = key.clone();
                    scope.spawn(move || registry.get_or_create(&key, &TlsPolicy::default()).id())
                })
                .collect::<Vec<_>>()
                .into_iter()
                .map(|handle| handle.join().unwrap())
                .collect()
        });

        assert!(ids.windows(2).all(|pair| pair[0] == pair[1]));
        assert_eq!(registry.len(), 1);
    }
}
