use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream};
use std::time::Duration;

use crate::error::Result;

/// A connected session stream. Implements `Read` and `Write`.
///
/// Cloning with [`LinkStream::try_clone`] yields a second handle on the same
/// socket, which is how the receive path and the send path get independent
/// handles that can be locked separately.
pub struct LinkStream {
    inner: LinkStreamInner,
}

enum LinkStreamInner {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(std::os::unix::net::UnixStream),
}

impl Read for LinkStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            LinkStreamInner::Tcp(stream) => stream.read(buf),
            #[cfg(unix)]
            LinkStreamInner::Unix(stream) => stream.read(buf),
        }
    }
}

impl Write for LinkStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            LinkStreamInner::Tcp(stream) => stream.write(buf),
            #[cfg(unix)]
            LinkStreamInner::Unix(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match &mut self.inner {
            LinkStreamInner::Tcp(stream) => stream.flush(),
            #[cfg(unix)]
            LinkStreamInner::Unix(stream) => stream.flush(),
        }
    }
}

impl From<TcpStream> for LinkStream {
    fn from(stream: TcpStream) -> Self {
        Self {
            inner: LinkStreamInner::Tcp(stream),
        }
    }
}

#[cfg(unix)]
impl From<std::os::unix::net::UnixStream> for LinkStream {
    fn from(stream: std::os::unix::net::UnixStream) -> Self {
        Self {
            inner: LinkStreamInner::Unix(stream),
        }
    }
}

impl LinkStream {
    /// Create a connected pair of in-process streams.
    #[cfg(unix)]
    pub fn pair() -> Result<(Self, Self)> {
        let (left, right) = std::os::unix::net::UnixStream::pair()?;
        Ok((left.into(), right.into()))
    }

    /// Set read timeout on the underlying stream.
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        match &self.inner {
            LinkStreamInner::Tcp(stream) => stream.set_read_timeout(timeout).map_err(Into::into),
            #[cfg(unix)]
            LinkStreamInner::Unix(stream) => stream.set_read_timeout(timeout).map_err(Into::into),
        }
    }

    /// Set write timeout on the underlying stream.
    pub fn set_write_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        match &self.inner {
            LinkStreamInner::Tcp(stream) => stream.set_write_timeout(timeout).map_err(Into::into),
            #[cfg(unix)]
            LinkStreamInner::Unix(stream) => stream.set_write_timeout(timeout).map_err(Into::into),
        }
    }

    /// Disable Nagle's algorithm on TCP streams. No-op for other transports.
    pub fn set_nodelay(&self, nodelay: bool) -> Result<()> {
        match &self.inner {
            LinkStreamInner::Tcp(stream) => stream.set_nodelay(nodelay).map_err(Into::into),
            #[cfg(unix)]
            LinkStreamInner::Unix(_) => Ok(()),
        }
    }

    /// Try to clone this stream (creates a new file descriptor).
    pub fn try_clone(&self) -> Result<Self> {
        match &self.inner {
            LinkStreamInner::Tcp(stream) => Ok(stream.try_clone()?.into()),
            #[cfg(unix)]
            LinkStreamInner::Unix(stream) => Ok(stream.try_clone()?.into()),
        }
    }

    /// Shut down both directions of the stream.
    ///
    /// Every clone observes the shutdown: pending reads return EOF.
    pub fn shutdown(&self) -> Result<()> {
        let result = match &self.inner {
            LinkStreamInner::Tcp(stream) => stream.shutdown(Shutdown::Both),
            #[cfg(unix)]
            LinkStreamInner::Unix(stream) => stream.shutdown(Shutdown::Both),
        };
        match result {
            Ok(()) => Ok(()),
            // Already torn down by the peer.
            Err(err) if err.kind() == std::io::ErrorKind::NotConnected => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Wait up to `timeout` for the stream to become readable.
    ///
    /// Returns `Ok(true)` when a read will not block: data is available, the
    /// peer hung up, or the socket is in an error state (the read reports
    /// which). Returns `Ok(false)` when the wait elapsed with nothing to read.
    #[cfg(unix)]
    pub fn wait_readable(&self, timeout: Duration) -> Result<bool> {
        use std::os::fd::AsRawFd;

        let fd = match &self.inner {
            LinkStreamInner::Tcp(stream) => stream.as_raw_fd(),
            LinkStreamInner::Unix(stream) => stream.as_raw_fd(),
        };

        let mut pollfd = libc::pollfd {
            fd,
            events: libc::POLLIN,
            revents: 0,
        };
        let millis = timeout.as_millis().min(libc::c_int::MAX as u128) as libc::c_int;

        // SAFETY: `pollfd` is a valid, writable pollfd for exactly one entry and
        // `fd` is an open socket descriptor owned by this stream.
        let rc = unsafe { libc::poll(&mut pollfd, 1, millis) };
        if rc < 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() == std::io::ErrorKind::Interrupted {
                return Ok(false);
            }
            return Err(err.into());
        }

        Ok(rc > 0)
    }

    /// Wait up to `timeout` for the stream to become readable.
    ///
    /// Without `poll`, the wait is delegated to the read timeout: this always
    /// reports readable and the following read returns `WouldBlock`/`TimedOut`
    /// once the timeout elapses.
    #[cfg(not(unix))]
    pub fn wait_readable(&self, timeout: Duration) -> Result<bool> {
        let timeout = timeout.max(Duration::from_millis(1));
        self.set_read_timeout(Some(timeout))?;
        Ok(true)
    }

    /// Transport name for diagnostics.
    pub fn transport_name(&self) -> &'static str {
        match &self.inner {
            LinkStreamInner::Tcp(_) => "tcp",
            #[cfg(unix)]
            LinkStreamInner::Unix(_) => "unix",
        }
    }

    /// Remote address for TCP streams.
    pub fn peer_addr(&self) -> Option<std::net::SocketAddr> {
        match &self.inner {
            LinkStreamInner::Tcp(stream) => stream.peer_addr().ok(),
            #[cfg(unix)]
            LinkStreamInner::Unix(_) => None,
        }
    }
}

impl std::fmt::Debug for LinkStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkStream")
            .field("type", &self.transport_name())
            .field("peer", &self.peer_addr())
            .finish()
    }
}
