use std::io::ErrorKind;
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::stream::LinkStream;

/// TCP transport.
///
/// Binds a listening socket for the hosting side and connects streams for the
/// client side. Accepted and connected streams have Nagle disabled: session
/// traffic is many small latency-sensitive messages.
pub struct TcpLink {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl TcpLink {
    /// Bind and listen on `addr`.
    ///
    /// The listener is non-blocking so that [`TcpLink::try_accept`] can be
    /// polled from a host tick loop; [`TcpLink::accept`] still blocks.
    pub fn bind(addr: impl ToSocketAddrs + std::fmt::Debug) -> Result<Self> {
        let display = format!("{addr:?}");
        let listener = TcpListener::bind(&addr).map_err(|source| TransportError::Bind {
            addr: display.clone(),
            source,
        })?;
        listener
            .set_nonblocking(true)
            .map_err(|source| TransportError::Bind {
                addr: display,
                source,
            })?;
        let local_addr = listener.local_addr()?;

        info!(%local_addr, "listening for session connections");

        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// Accept an incoming connection (blocking).
    pub fn accept(&self) -> Result<LinkStream> {
        loop {
            match self.try_accept()? {
                Some(stream) => return Ok(stream),
                None => std::thread::sleep(Duration::from_millis(5)),
            }
        }
    }

    /// Accept an incoming connection if one is pending.
    pub fn try_accept(&self) -> Result<Option<LinkStream>> {
        match self.listener.accept() {
            Ok((stream, peer)) => {
                stream.set_nonblocking(false).map_err(TransportError::Accept)?;
                stream.set_nodelay(true).map_err(TransportError::Accept)?;
                debug!(%peer, "accepted connection");
                Ok(Some(stream.into()))
            }
            Err(err) if err.kind() == ErrorKind::WouldBlock => Ok(None),
            Err(err) if err.kind() == ErrorKind::Interrupted => Ok(None),
            Err(err) => Err(TransportError::Accept(err)),
        }
    }

    /// Connect to a listening session host (blocking).
    pub fn connect(addr: &str) -> Result<LinkStream> {
        let stream = TcpStream::connect(addr).map_err(|source| TransportError::Connect {
            addr: addr.to_string(),
            source,
        })?;
        stream.set_nodelay(true)?;
        debug!(addr, "connected to session host");
        Ok(stream.into())
    }

    /// Connect with a bound on the time spent per resolved address.
    pub fn connect_timeout(addr: &str, timeout: Duration) -> Result<LinkStream> {
        let resolved = addr
            .to_socket_addrs()
            .map_err(|source| TransportError::Connect {
                addr: addr.to_string(),
                source,
            })?;

        let mut last_err = None;
        for socket_addr in resolved {
            match TcpStream::connect_timeout(&socket_addr, timeout) {
                Ok(stream) => {
                    stream.set_nodelay(true)?;
                    debug!(%socket_addr, "connected to session host");
                    return Ok(stream.into());
                }
                Err(err) => last_err = Some(err),
            }
        }

        match last_err {
            Some(source) => Err(TransportError::Connect {
                addr: addr.to_string(),
                source,
            }),
            None => Err(TransportError::Unresolved(addr.to_string())),
        }
    }

    /// The address this listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Transport name for diagnostics.
    pub fn transport_name(&self) -> &'static str {
        "tcp"
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};

    use super::*;

    #[test]
    fn bind_accept_connect() {
        let listener = TcpLink::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().to_string();

        let client = std::thread::spawn(move || {
            let mut client = TcpLink::connect(&addr).unwrap();
            client.write_all(b"hello").unwrap();
        });

        let mut server = listener.accept().unwrap();
        let mut buf = [0u8; 5];
        server.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"hello");
        assert_eq!(server.transport_name(), "tcp");

        client.join().unwrap();
    }

    #[test]
    fn try_accept_without_pending_connection() {
        let listener = TcpLink::bind("127.0.0.1:0").unwrap();
        assert!(listener.try_accept().unwrap().is_none());
    }

    #[test]
    fn connect_timeout_to_listener() {
        let listener = TcpLink::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().to_string();

        let stream = TcpLink::connect_timeout(&addr, Duration::from_secs(1)).unwrap();
        assert!(stream.peer_addr().is_some());
        assert!(listener.accept().is_ok());
    }

    #[test]
    fn connect_refused_reports_address() {
        let addr = {
            let listener = TcpLink::bind("127.0.0.1:0").unwrap();
            listener.local_addr().to_string()
        };

        let err = TcpLink::connect(&addr).unwrap_err();
        match err {
            TransportError::Connect { addr: reported, .. } => assert_eq!(reported, addr),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn bind_conflict_is_bind_error() {
        let listener = TcpLink::bind("127.0.0.1:0").unwrap();
        let result = TcpLink::bind(listener.local_addr());
        assert!(matches!(result, Err(TransportError::Bind { .. })));
    }
}
