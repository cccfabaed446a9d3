use std::time::Instant;

use mirrorlink_transport::TcpLink;
use tracing::{debug, info};

use crate::config::SessionConfig;
use crate::error::Result;
use crate::registry::ChannelRegistry;
use crate::role::{RoleKind, SessionRole, SessionState};

/// Connecting side of a session over TCP.
///
/// Connects on the first `tick` and again every reconnect interval while
/// disconnected. A fatal session error stops reconnection until
/// [`SessionClient::reset`].
pub struct SessionClient {
    addr: String,
    role: SessionRole,
    last_attempt: Option<Instant>,
}

impl SessionClient {
    pub fn new(addr: impl Into<String>, config: SessionConfig) -> Result<Self> {
        Self::with_registry(addr, config, ChannelRegistry::global())
    }

    pub fn with_registry(
        addr: impl Into<String>,
        config: SessionConfig,
        registry: std::sync::Arc<ChannelRegistry>,
    ) -> Result<Self> {
        Ok(Self {
            addr: addr.into(),
            role: SessionRole::with_registry(RoleKind::Client, config, registry)?,
            last_attempt: None,
        })
    }

    /// Connect now, returning the connect error if any.
    pub fn connect(&mut self) -> Result<()> {
        self.last_attempt = Some(Instant::now());
        let stream = TcpLink::connect_timeout(&self.addr, self.role.config().connect_timeout())?;
        info!(addr = %self.addr, "connected to host");
        self.role.attach(stream)
    }

    /// Reconnect if due, then tick the session.
    pub fn tick(&mut self) -> Result<SessionState> {
        if self.reconnect_due() {
            if let Err(err) = self.connect() {
                debug!(addr = %self.addr, error = %err, "connect attempt failed");
            }
        }
        Ok(self.role.tick())
    }

    /// Clear a fatal error so the next `tick` connects again.
    pub fn reset(&mut self) {
        if self.role.has_error() {
            self.role.close("reset");
        }
        self.last_attempt = None;
        self.role.clear_error();
    }

    pub fn addr(&self) -> &str {
        &self.addr
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

    pub fn close(&mut self, reason: &str) {
        self.role.close(reason);
    }

    fn reconnect_due(&self) -> bool {
        if self.role.is_attached() || self.role.has_error() {
            return false;
        }
        self.last_attempt
            .is_none_or(|at| at.elapsed() >= self.role.config().reconnect_interval())
    }
}
