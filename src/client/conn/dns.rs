//! DNS resolution via the operating system's `getaddrinfo`.

use std::io;
use std::net::{SocketAddr, ToSocketAddrs};

use tracing::trace;

use crate::Error;

/// Resolve `host:port` on the blocking pool.
///
/// Resolution failures are classified as [`Error::NameResolution`] right
/// here, at the resolver, so the distinction survives the generic transport
/// wrapping applied further up.
pub(crate) async fn resolve(host: &str, port: u16) -> Result<Vec<SocketAddr>, Error> {
    let host = host
        .trim_start_matches('[')
        .trim_end_matches(']')
        .to_owned();

    trace!(host = %host, port, "dns resolution starting");

    let target = host.clone();
    let resolved = tokio::task::spawn_blocking(move || {
        (target.as_str(), port)
            .to_socket_addrs()
            .map(|addrs| addrs.collect::<Vec<_>>())
    })
    .await;

    match resolved {
        Ok(Ok(addrs)) if !addrs.is_empty() => {
            trace!(host = %host, count = addrs.len(), "dns resolution complete");
            Ok(addrs)
        }
        Ok(Ok(_)) => Err(Error::NameResolution {
            host,
            source: io::Error::new(io::ErrorKind::NotFound, "resolved to no addresses"),
        }),
        Ok(Err(source)) => Err(Error::NameResolution { host, source }),
        Err(join) => Err(Error::transport(join)),
    }
}
