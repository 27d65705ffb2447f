//! Hoplink
//!
//! The connection core of an HTTP(S) client: per-destination connection
//! reuse, pre-registered client certificates, TLS policy resolution with
//! protocol-version bounds, and automatic redirect following that tolerates
//! relative `Location` headers and records the chain of responses.

pub mod bridge;
pub mod client;
pub mod error;
pub mod tls;

pub use client::{Client, RedirectPolicy, Request, Response};
pub use error::{BoxError, ConfigError, Error};
pub use tls::{CertificateOverride, TlsPolicy, TlsVersion};
