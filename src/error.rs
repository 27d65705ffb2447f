//! Error taxonomy for the client core.
//!
//! Every failure surfaced to callers is one of the variants of [`Error`], so
//! callers can branch on the kind of failure (name resolution vs. certificate
//! trouble vs. a refused socket) without digging through wrapped source
//! chains. Classification of low-level failures happens here, immediately
//! next to the call that produced them, before any generic wrapping would
//! discard the distinction.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::tls::TlsVersion;

/// A boxed error type which can be used for dynamic dispatch.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Client error type.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The TLS policy or certificate material was invalid. Raised at
    /// connection-build time, before any network activity.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The destination host did not resolve.
    ///
    /// This is reported distinctly even though resolution failures arrive as
    /// ordinary I/O errors from the resolver.
    #[error("name resolution failed for {host}")]
    NameResolution {
        /// The host that failed to resolve.
        host: String,
        /// The resolver failure.
        #[source]
        source: io::Error,
    },

    /// The TLS handshake failed: untrusted CA, hostname mismatch, rejected
    /// client certificate, or a protocol-version mismatch with the configured
    /// bounds.
    #[error("tls handshake with {host} failed")]
    Tls {
        /// The host the handshake was attempted with.
        host: String,
        /// The handshake failure.
        #[source]
        source: BoxError,
    },

    /// Socket-level failure: refused, reset, or timed out.
    #[error("transport: {0}")]
    Transport(#[source] BoxError),

    /// The redirect budget was exhausted while following was enabled.
    #[error("stopped following after {limit} redirects")]
    TooManyRedirects {
        /// The configured maximum number of redirects.
        limit: usize,
    },

    /// A redirect `Location` could not be resolved against the prior URL.
    #[error("invalid redirect location {location:?}")]
    Redirect {
        /// The offending `Location` value.
        location: String,
        /// The parse failure, when the value was readable but unresolvable.
        #[source]
        source: Option<url::ParseError>,
    },

    /// The caller's request was malformed: unsupported scheme, missing host,
    /// or an invalid header.
    #[error("invalid request: {0}")]
    Request(String),
}

impl Error {
    pub(crate) fn transport<E>(source: E) -> Self
    where
        E: Into<BoxError>,
    {
        Error::Transport(source.into())
    }

    pub(crate) fn tls<E>(host: &str, source: E) -> Self
    where
        E: Into<BoxError>,
    {
        Error::Tls {
            host: host.to_owned(),
            source: source.into(),
        }
    }

    pub(crate) fn timeout(operation: &str, after: std::time::Duration) -> Self {
        Error::Transport(Box::new(io::Error::new(
            io::ErrorKind::TimedOut,
            format!("{operation} timed out after {}ms", after.as_millis()),
        )))
    }
}

/// An invalid TLS policy, detected when a connection is built.
///
/// Overrides are stored as plain strings when registered; the files they name
/// are only opened here, for a destination that is actually being dialed.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// The CA bundle path could not be read.
    #[error("ca bundle {path}: {source}")]
    CaBundle {
        /// Path to the unreadable bundle.
        path: PathBuf,
        /// The read or parse failure.
        #[source]
        source: io::Error,
    },

    /// The CA bundle was readable but contained no usable certificates.
    #[error("ca bundle {path} contains no certificates")]
    EmptyCaBundle {
        /// Path to the empty bundle.
        path: PathBuf,
    },

    /// No trust anchors at all: the platform store produced nothing and no
    /// CA bundle was configured.
    #[error("no root certificates available from the platform store")]
    NoRootCertificates,

    /// `minimum_version > maximum_version`.
    #[error("tls minimum version {minimum} exceeds maximum version {maximum}")]
    VersionBounds {
        /// The requested minimum.
        minimum: TlsVersion,
        /// The requested maximum.
        maximum: TlsVersion,
    },

    /// A registered client certificate file could not be read or parsed.
    #[error("client certificate {path}: {source}")]
    ClientCert {
        /// The `cert_file` of the registered override.
        path: String,
        /// The read or parse failure.
        #[source]
        source: io::Error,
    },

    /// A registered client key file could not be read or parsed.
    #[error("client key {path}: {source}")]
    ClientKey {
        /// The `key_file` of the registered override.
        path: String,
        /// The read or parse failure.
        #[source]
        source: io::Error,
    },

    /// rustls rejected the assembled configuration, e.g. a key that does not
    /// match its certificate.
    #[error("tls configuration rejected: {0}")]
    Rejected(#[source] rustls::Error),
}

/// Classify an I/O error raised while handshaking.
///
/// tokio-rustls surfaces handshake failures as `io::Error` with the
/// underlying `rustls::Error` attached as the inner source; inspecting the
/// error before wrapping it is what keeps certificate problems from being
/// reported as generic transport failures. Timeouts stay transport errors.
pub(crate) fn classify_handshake(host: &str, error: io::Error) -> Error {
    if error.kind() == io::ErrorKind::TimedOut {
        return Error::transport(error);
    }

    match error.into_inner() {
        Some(inner) => Error::tls(host, inner),
        None => Error::tls(
            host,
            io::Error::new(io::ErrorKind::InvalidData, "handshake interrupted"),
        ),
    }
}
