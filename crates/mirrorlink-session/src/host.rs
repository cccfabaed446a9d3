use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;

use mirrorlink_transport::TcpLink;
use tracing::{info, warn};

use crate::config::SessionConfig;
use crate::error::Result;
use crate::registry::ChannelRegistry;
use crate::role::{RoleKind, SessionRole, SessionState};

/// Hosting side of a session over TCP.
///
/// Serves one client at a time. When a session ends, for any reason, the
/// next `tick` resumes accepting.
pub struct SessionHost {
    listener: TcpLink,
    role: SessionRole,
}

impl SessionHost {
    pub fn bind(addr: impl ToSocketAddrs + std::fmt::Debug, config: SessionConfig) -> Result<Self> {
        Self::with_registry(addr, config, ChannelRegistry::global())
    }

    pub fn with_registry(
        addr: impl ToSocketAddrs + std::fmt::Debug,
        config: SessionConfig,
        registry: Arc<ChannelRegistry>,
    ) -> Result<Self> {
        let role = SessionRole::with_registry(RoleKind::Host, config, registry)?;
        let listener = TcpLink::bind(addr)?;
        Ok(Self { listener, role })
    }

    /// Accept a waiting client if idle, then tick the session.
    ///
    /// A client that fails during attach is dropped and the host keeps
    /// listening; only listener errors are returned.
    pub fn tick(&mut self) -> Result<SessionState> {
        if !self.role.is_attached() {
            if let Some(stream) = self.listener.try_accept()? {
                let peer = stream.peer_addr();
                info!(?peer, "client connected");
                if let Err(err) = self.role.attach(stream) {
                    warn!(?peer, error = %err, "dropping client that failed during attach");
                }
            }
        }
        Ok(self.role.tick())
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.listener.local_addr()
    }

    pub fn role(&self) -> &SessionRole {
        &self.role
    }

    pub fn role_mut(&mut self) -> &mut SessionRole {
        &mut self.role
    }

    pub fn state(&self) -> SessionState {
        self.role.state()
    }

    /// End the current session, if any. The listener stays bound.
    pub fn close(&mut self, reason: &str) {
        self.role.close(reason);
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::*;
    use crate::client::SessionClient;
    use crate::config::ImageCodecKind;

    fn test_config() -> SessionConfig {
        SessionConfig {
            image_codec: ImageCodecKind::Raw,
            receive_wait_ms: 2,
            reconnect_interval_ms: 20,
            ..SessionConfig::default()
        }
    }

    fn run_until(
        host: &mut SessionHost,
        client: &mut SessionClient,
        mut done: impl FnMut(&SessionHost, &SessionClient) -> bool,
    ) -> bool {
        let deadline = Instant::now() + Duration::from_secs(3);
        while Instant::now() < deadline {
            host.tick().expect("host tick");
            client.tick().expect("client tick");
            if done(host, client) {
                return true;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        false
    }

    #[test]
    fn host_accepts_client_over_tcp() {
        let mut host = SessionHost::bind("127.0.0.1:0", test_config()).expect("bind");
        assert_eq!(host.tick().expect("idle tick"), SessionState::Disconnected);

        let addr = host.local_addr().to_string();
        let mut client = SessionClient::new(addr, test_config()).expect("client");

        assert!(run_until(&mut host, &mut client, |h, c| {
            h.state() == SessionState::Connected && c.state() == SessionState::Connected
        }));
        assert_eq!(host.role().channels().len(), 3);
        assert_eq!(
            host.role().connection().map(|c| c.transport_name()),
            Some("tcp")
        );
    }

    #[test]
    fn host_resumes_accepting_after_client_leaves() {
        let mut host = SessionHost::bind("127.0.0.1:0", test_config()).expect("bind");
        let addr = host.local_addr().to_string();

        let mut first = SessionClient::new(addr.clone(), test_config()).expect("client");
        assert!(run_until(&mut host, &mut first, |h, c| {
            h.state() == SessionState::Connected && c.state() == SessionState::Connected
        }));
        drop(first);

        let mut second = SessionClient::new(addr, test_config()).expect("client");
        assert!(run_until(&mut host, &mut second, |h, c| {
            h.state() == SessionState::Connected && c.state() == SessionState::Connected
        }));
    }

    #[cfg(unix)]
    fn connect_and_reset(addr: SocketAddr) {
        use std::os::fd::AsRawFd;

        let stream = std::net::TcpStream::connect(addr).expect("connect");
        let linger = libc::linger {
            l_onoff: 1,
            l_linger: 0,
        };
        // SAFETY: the descriptor is open for the lifetime of `stream` and
        // `linger` is a valid value of the size passed.
        let rc = unsafe {
            libc::setsockopt(
                stream.as_raw_fd(),
                libc::SOL_SOCKET,
                libc::SO_LINGER,
                (&linger as *const libc::linger).cast(),
                std::mem::size_of::<libc::linger>() as libc::socklen_t,
            )
        };
        assert_eq!(rc, 0, "SO_LINGER");
        drop(stream);
    }

    #[cfg(unix)]
    #[test]
    fn reset_before_accept_does_not_stop_host() {
        let mut host = SessionHost::bind("127.0.0.1:0", test_config()).expect("bind");
        connect_and_reset(host.local_addr());
        std::thread::sleep(Duration::from_millis(20));

        for _ in 0..5 {
            assert_eq!(host.tick().expect("host tick"), SessionState::Disconnected);
            assert!(!host.role().is_attached());
        }

        let addr = host.local_addr().to_string();
        let mut client = SessionClient::new(addr, test_config()).expect("client");
        assert!(run_until(&mut host, &mut client, |h, c| {
            h.state() == SessionState::Connected && c.state() == SessionState::Connected
        }));
    }
}
