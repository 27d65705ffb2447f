//! TLS policy resolution.
//!
//! A [`TlsPolicy`] describes what the caller wants from transport security
//! for a destination: an optional CA bundle to trust instead of the platform
//! store, and optional protocol-version bounds. A [`CertificateOverride`]
//! carries pre-registered client identity material for a host. Both are
//! resolved into a concrete [`rustls::ClientConfig`] only when a connection
//! is actually built, so registering an override that names nonexistent
//! files is not an error until the destination is dialed.

use std::fmt;
use std::fs;
use std::io;
use std::path::PathBuf;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::{ClientConfig, RootCertStore, SupportedProtocolVersion};
use tracing::warn;

use crate::error::ConfigError;

/// A TLS protocol version a policy may name as a bound.
///
/// rustls only speaks TLS 1.2 and 1.3; the older versions exist so a policy
/// carried over from another environment can be represented, queried with
/// [`TlsVersion::enforceable`], and degraded explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TlsVersion {
    /// TLS 1.0
    Tls10,
    /// TLS 1.1
    Tls11,
    /// TLS 1.2
    Tls12,
    /// TLS 1.3
    Tls13,
}

impl TlsVersion {
    /// Can this version be enforced as a bound by the underlying TLS stack?
    ///
    /// Bounds naming unenforceable versions degrade to no-ops with a logged
    /// warning rather than failing connection construction.
    pub fn enforceable(self) -> bool {
        matches!(self, TlsVersion::Tls12 | TlsVersion::Tls13)
    }

    fn as_supported(self) -> Option<&'static SupportedProtocolVersion> {
        match self {
            TlsVersion::Tls12 => Some(&rustls::version::TLS12),
            TlsVersion::Tls13 => Some(&rustls::version::TLS13),
            _ => None,
        }
    }
}

impl fmt::Display for TlsVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TlsVersion::Tls10 => f.write_str("TLS 1.0"),
            TlsVersion::Tls11 => f.write_str("TLS 1.1"),
            TlsVersion::Tls12 => f.write_str("TLS 1.2"),
            TlsVersion::Tls13 => f.write_str("TLS 1.3"),
        }
    }
}

/// The caller-requested TLS policy for connections.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsPolicy {
    /// Path to a PEM bundle of CA certificates to trust instead of the
    /// platform store.
    pub ca_certs: Option<PathBuf>,

    /// Lowest protocol version to negotiate.
    pub minimum_version: Option<TlsVersion>,

    /// Highest protocol version to negotiate.
    pub maximum_version: Option<TlsVersion>,
}

/// Client certificate material registered ahead of time for a host.
///
/// Stored as plain strings; the files are read when a matching connection is
/// first built, not at registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateOverride {
    /// Path to the PEM private key file.
    pub key_file: String,
    /// Path to the PEM certificate (chain) file.
    pub cert_file: String,
    /// Password for the private key. Stored for inspection; encrypted keys
    /// cannot currently be decrypted and fail at build time.
    pub key_password: String,
}

/// The value to present for TLS server-name indication when dialing `host`.
///
/// Always the request's own host, bracket-stripped and lowercased, never a
/// proxy or override host, and computable before DNS resolution happens.
pub fn resolve_host_for_sni(host: &str) -> String {
    host.trim_start_matches('[')
        .trim_end_matches(']')
        .to_ascii_lowercase()
}

/// Resolve the policy's version bounds against what rustls can negotiate.
///
/// The ordering check applies to the bounds as requested; unenforceable
/// bounds are then dropped with a warning.
pub(crate) fn protocol_versions(
    policy: &TlsPolicy,
) -> Result<Vec<&'static SupportedProtocolVersion>, ConfigError> {
    if let (Some(minimum), Some(maximum)) = (policy.minimum_version, policy.maximum_version) {
        if minimum > maximum {
            return Err(ConfigError::VersionBounds { minimum, maximum });
        }
    }

    let minimum = bound(policy.minimum_version, "minimum");
    let maximum = bound(policy.maximum_version, "maximum");

    Ok([TlsVersion::Tls12, TlsVersion::Tls13]
        .into_iter()
        .filter(|version| minimum.is_none_or_ge(*version) && maximum.is_none_or_le(*version))
        .filter_map(TlsVersion::as_supported)
        .collect())
}

fn bound(requested: Option<TlsVersion>, which: &str) -> Bound {
    match requested {
        Some(version) if version.enforceable() => Bound(Some(version)),
        Some(version) => {
            warn!(%version, "tls {which} version bound cannot be enforced, ignoring");
            Bound(None)
        }
        None => Bound(None),
    }
}

struct Bound(Option<TlsVersion>);

impl Bound {
    fn is_none_or_ge(&self, version: TlsVersion) -> bool {
        self.0.map_or(true, |bound| version >= bound)
    }

    fn is_none_or_le(&self, version: TlsVersion) -> bool {
        self.0.map_or(true, |bound| version <= bound)
    }
}

/// Build a concrete client configuration for one destination.
pub(crate) fn build_client_config(
    policy: &TlsPolicy,
    identity: Option<&CertificateOverride>,
) -> Result<ClientConfig, ConfigError> {
    let versions = protocol_versions(policy)?;
    let identity = identity.map(load_identity).transpose()?;
    let roots = root_store(policy)?;

    let builder =
        ClientConfig::builder_with_protocol_versions(&versions).with_root_certificates(roots);

    let mut config = match identity {
        Some((chain, key)) => builder
            .with_client_auth_cert(chain, key)
            .map_err(ConfigError::Rejected)?,
        None => builder.with_no_client_auth(),
    };

    config.alpn_protocols.push(b"http/1.1".to_vec());
    Ok(config)
}

fn root_store(policy: &TlsPolicy) -> Result<RootCertStore, ConfigError> {
    let mut roots = RootCertStore::empty();

    match &policy.ca_certs {
        Some(path) => {
            let data = fs::read(path).map_err(|source| ConfigError::CaBundle {
                path: path.clone(),
                source,
            })?;
            let certs = rustls_pemfile::certs(&mut data.as_slice())
                .collect::<Result<Vec<_>, _>>()
                .map_err(|source| ConfigError::CaBundle {
                    path: path.clone(),
                    source,
                })?;
            let (added, _) = roots.add_parsable_certificates(certs);
            if added == 0 {
                return Err(ConfigError::EmptyCaBundle { path: path.clone() });
            }
        }
        None => {
            let native = rustls_native_certs::load_native_certs();
            for error in &native.errors {
                warn!(%error, "skipping unloadable platform certificate");
            }
            roots.add_parsable_certificates(native.certs);
            if roots.is_empty() {
                return Err(ConfigError::NoRootCertificates);
            }
        }
    }

    Ok(roots)
}

fn load_identity(
    identity: &CertificateOverride,
) -> Result<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>), ConfigError> {
    let cert_data = fs::read(&identity.cert_file).map_err(|source| ConfigError::ClientCert {
        path: identity.cert_file.clone(),
        source,
    })?;
    let chain = rustls_pemfile::certs(&mut cert_data.as_slice())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| ConfigError::ClientCert {
            path: identity.cert_file.clone(),
            source,
        })?;
    if chain.is_empty() {
        return Err(ConfigError::ClientCert {
            path: identity.cert_file.clone(),
            source: io::Error::new(io::ErrorKind::InvalidData, "no certificates in file"),
        });
    }

    let key_data = fs::read(&identity.key_file).map_err(|source| ConfigError::ClientKey {
        path: identity.key_file.clone(),
        source,
    })?;
    let key = rustls_pemfile::private_key(&mut key_data.as_slice())
        .map_err(|source| ConfigError::ClientKey {
            path: identity.key_file.clone(),
            source,
        })?
        .ok_or_else(|| {
            let reason = if identity.key_password.is_empty() {
                "no private key in file"
            } else {
                "no usable private key in file (encrypted keys are not supported)"
            };
            ConfigError::ClientKey {
                path: identity.key_file.clone(),
                source: io::Error::new(io::ErrorKind::InvalidData, reason),
            }
        })?;

    Ok((chain, key))
}
