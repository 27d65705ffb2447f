//! TCP connection establishment.
//!
//! Sockets are built with `socket2` so keepalive, local binding and buffer
//! sizes can be set before the connect, then handed to Tokio for the
//! non-blocking connect itself. Resolved addresses are tried in order; the
//! first successful connect wins and the last failure is reported when none
//! succeed.

use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};

use tokio::net::{TcpSocket, TcpStream};
use tracing::{trace, warn};

use crate::Error;

/// Configuration for TCP connections.
#[derive(Debug, Clone)]
pub struct TcpConfig {
    /// The timeout for keep-alive probes on established connections.
    pub keep_alive_timeout: Option<std::time::Duration>,

    /// The local IPv4 address to bind to.
    pub local_address_ipv4: Option<Ipv4Addr>,

    /// The local IPv6 address to bind to.
    pub local_address_ipv6: Option<Ipv6Addr>,

    /// Whether to disable Nagle's algorithm.
    pub nodelay: bool,

    /// Whether to reuse the local address.
    pub reuse_address: bool,

    /// The size of the send buffer.
    pub send_buffer_size: Option<usize>,

    /// The size of the receive buffer.
    pub recv_buffer_size: Option<usize>,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            keep_alive_timeout: Some(std::time::Duration::from_secs(90)),
            local_address_ipv4: None,
            local_address_ipv6: None,
            nodelay: true,
            reuse_address: true,
            send_buffer_size: None,
            recv_buffer_size: None,
        }
    }
}

/// Connect to the first reachable address.
pub(crate) async fn connect(addrs: &[SocketAddr], config: &TcpConfig) -> Result<TcpStream, Error> {
    let mut last_error = None;

    for addr in addrs {
        match connect_to(addr, config).await {
            Ok(stream) => {
                trace!(remote.addr = %addr, "tcp connected");
                if config.nodelay {
                    if let Err(error) = stream.set_nodelay(true) {
                        warn!(%error, "tcp set_nodelay error");
                    }
                }
                return Ok(stream);
            }
            Err(error) => {
                trace!(remote.addr = %addr, %error, "tcp connect attempt failed");
                last_error = Some(error);
            }
        }
    }

    Err(Error::transport(last_error.unwrap_or_else(|| {
        io::Error::new(io::ErrorKind::AddrNotAvailable, "no addresses to connect to")
    })))
}

async fn connect_to(addr: &SocketAddr, config: &TcpConfig) -> io::Result<TcpStream> {
    let socket = open_socket(addr, config)?;
    socket.connect(*addr).await
}

fn open_socket(addr: &SocketAddr, config: &TcpConfig) -> io::Result<TcpSocket> {
    use socket2::{Domain, Protocol, Socket, TcpKeepalive, Type};

    let domain = Domain::for_address(*addr);
    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;

    // When constructing a Tokio `TcpSocket` from a raw fd, the caller is
    // responsible for ensuring O_NONBLOCK is set.
    socket.set_nonblocking(true)?;

    if let Some(duration) = config.keep_alive_timeout {
        let keepalive = TcpKeepalive::new().with_time(duration);
        if let Err(error) = socket.set_tcp_keepalive(&keepalive) {
            warn!(%error, "tcp set_keepalive error");
        }
    }

    bind_local_address(
        &socket,
        addr,
        &config.local_address_ipv4,
        &config.local_address_ipv6,
    )?;

    #[allow(unsafe_code)]
    // Safety: `into_raw_fd` gives up ownership of the fd without closing it,
    // so transferring it to the Tokio socket is sound.
    let socket = unsafe {
        use std::os::unix::io::{FromRawFd, IntoRawFd};
        TcpSocket::from_raw_fd(socket.into_raw_fd())
    };

    if config.reuse_address {
        if let Err(error) = socket.set_reuseaddr(true) {
            warn!(%error, "tcp set_reuse_address error");
        }
    }

    if let Some(size) = config.send_buffer_size {
        if let Err(error) = socket.set_send_buffer_size(size.try_into().unwrap_or(u32::MAX)) {
            warn!(%error, "tcp set_send_buffer_size error");
        }
    }

    if let Some(size) = config.recv_buffer_size {
        if let Err(error) = socket.set_recv_buffer_size(size.try_into().unwrap_or(u32::MAX)) {
            warn!(%error, "tcp set_recv_buffer_size error");
        }
    }

    Ok(socket)
}

fn bind_local_address(
    socket: &socket2::Socket,
    dst_addr: &SocketAddr,
    local_addr_ipv4: &Option<Ipv4Addr>,
    local_addr_ipv6: &Option<Ipv6Addr>,
) -> io::Result<()> {
    match (*dst_addr, local_addr_ipv4, local_addr_ipv6) {
        (SocketAddr::V4(_), Some(addr), _) => {
            socket.bind(&SocketAddr::new((*addr).into(), 0).into())?;
        }
        (SocketAddr::V6(_), _, Some(addr)) => {
            socket.bind(&SocketAddr::new((*addr).into(), 0).into())?;
        }
        _ => {}
    }

    Ok(())
}
