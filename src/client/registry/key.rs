use std::fmt;

use http::uri::Scheme;
use url::Url;

use crate::Error;

/// Identity of a destination for connection reuse: scheme, case-normalized
/// host, and port (defaulted from the scheme when the URL omits it).
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub struct DestinationKey {
    scheme: Scheme,
    host: String,
    port: u16,
}

impl DestinationKey {
    /// Build a key from parts. The host is ASCII-lowercased.
    pub fn new(scheme: Scheme, host: &str, port: u16) -> Self {
        Self {
            scheme,
            host: host.to_ascii_lowercase(),
            port,
        }
    }

    /// The destination scheme.
    pub fn scheme(&self) -> &Scheme {
        &self.scheme
    }

    /// The normalized destination host.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// The destination port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// `host:port` for override matching and logging.
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Whether connections to this destination handshake TLS.
    pub fn is_tls(&self) -> bool {
        self.scheme == Scheme::HTTPS
    }

    /// Whether the port is the default for the scheme.
    pub(crate) fn is_default_port(&self) -> bool {
        (self.scheme == Scheme::HTTP && self.port == 80)
            || (self.scheme == Scheme::HTTPS && self.port == 443)
    }
}

impl fmt::Display for DestinationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.scheme, self.host, self.port)
    }
}

impl TryFrom<&Url> for DestinationKey {
    type Error = Error;

    fn try_from(url: &Url) -> Result<Self, Self::Error> {
        let scheme = match url.scheme() {
            "http" => Scheme::HTTP,
            "https" => Scheme::HTTPS,
            other => return Err(Error::Request(format!("unsupported scheme: {other}"))),
        };

        let host = url
            .host_str()
            .ok_or_else(|| Error::Request(format!("missing host in url: {url}")))?;

        let port = url
            .port_or_known_default()
            .ok_or_else(|| Error::Request(format!("missing port in url: {url}")))?;

        Ok(Self::new(scheme, host, port))
    }
}
