//! TLS handshakes over established TCP streams.

use std::sync::Arc;

use rustls::pki_types::ServerName;
use rustls::ClientConfig;
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use tracing::trace;

use crate::error::classify_handshake;
use crate::tls::resolve_host_for_sni;
use crate::Error;

/// Perform the client-side handshake, presenting the request's host for
/// server-name indication.
pub(crate) async fn handshake(
    stream: TcpStream,
    host: &str,
    config: Arc<ClientConfig>,
) -> Result<TlsStream<TcpStream>, Error> {
    let sni = resolve_host_for_sni(host);
    let server_name =
        ServerName::try_from(sni.clone()).map_err(|error| Error::tls(host, error))?;

    trace!(host = %sni, "tls handshake starting");

    let connector = TlsConnector::from(config);
    let stream = connector
        .connect(server_name, stream)
        .await
        .map_err(|error| classify_handshake(host, error))?;

    let (_, session) = stream.get_ref();
    trace!(version = ?session.protocol_version(), "tls handshake complete");

    Ok(stream)
}
