use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use mirrorlink_connection::Connection;
use mirrorlink_transport::LinkStream;
use tracing::{debug, error, info, warn};

use crate::channel::{Channel, ChannelRoutes};
use crate::config::SessionConfig;
use crate::control::{ChannelInfo, ControlMessage, CONTROL_ADDRESSES};
use crate::error::{Result, SessionError};
use crate::handshake::HandshakeState;
use crate::registry::ChannelRegistry;

/// Which side of a session this role plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleKind {
    /// Chooses the channels and sends the selection.
    Host,
    /// Mirrors the host's channels with inverted modes.
    Client,
}

impl fmt::Display for RoleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoleKind::Host => f.write_str("host"),
            RoleKind::Client => f.write_str("client"),
        }
    }
}

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// No connection attached.
    #[default]
    Disconnected,
    /// Hello sent, waiting for the peer's hello or the channel selection.
    Handshaking,
    /// Channels are live.
    Connected,
    /// The session failed and will not retry on its own.
    Error,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Handshaking => "handshaking",
            SessionState::Connected => "connected",
            SessionState::Error => "error",
        };
        f.write_str(name)
    }
}

type ControlQueue = Arc<Mutex<VecDeque<ControlMessage>>>;

struct Attached {
    connection: Arc<Connection>,
    control_routes: ChannelRoutes,
    handshake: HandshakeState,
    last_ping: Instant,
}

/// One end of a session.
///
/// Owns the connection once a stream is attached, runs the hello exchange
/// and channel selection, and ticks the channels it created. All work
/// happens inside [`SessionRole::tick`] on the caller's thread; only the
/// connection's receive thread runs elsewhere.
pub struct SessionRole {
    kind: RoleKind,
    config: SessionConfig,
    registry: Arc<ChannelRegistry>,
    state: SessionState,
    error_message: Option<String>,
    remote_version: Option<String>,
    channels: Vec<Box<dyn Channel>>,
    control: ControlQueue,
    attached: Option<Attached>,
    last_tick: Instant,
}

impl SessionRole {
    /// A role using the global channel registry.
    pub fn new(kind: RoleKind, config: SessionConfig) -> Result<Self> {
        Self::with_registry(kind, config, ChannelRegistry::global())
    }

    pub fn with_registry(
        kind: RoleKind,
        config: SessionConfig,
        registry: Arc<ChannelRegistry>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            kind,
            config,
            registry,
            state: SessionState::Disconnected,
            error_message: None,
            remote_version: None,
            channels: Vec::new(),
            control: Arc::default(),
            attached: None,
            last_tick: Instant::now(),
        })
    }

    /// Take ownership of a connected stream and send our hello.
    ///
    /// A previously attached connection is closed first. If the stream fails
    /// before the hello is out, the role is left `Disconnected` with
    /// "connection lost" as its error message.
    pub fn attach(&mut self, stream: LinkStream) -> Result<()> {
        if self.attached.is_some() {
            self.close("replaced by a new connection");
        }

        let connection = match Connection::new(stream, self.config.connection_config()) {
            Ok(connection) => Arc::new(connection),
            Err(err) => {
                self.drop_connection("connection lost");
                return Err(err.into());
            }
        };
        lock(&self.control).clear();

        let mut control_routes = ChannelRoutes::new(&connection);
        for address in CONTROL_ADDRESSES {
            let queue = Arc::downgrade(&self.control);
            control_routes.add(address, move |message| {
                let Some(queue) = queue.upgrade() else {
                    return;
                };
                match ControlMessage::from_message(message) {
                    Ok(control) => lock(&queue).push_back(control),
                    Err(err) => warn!(address = message.address(), error = %err, "discarding control message"),
                }
            });
        }

        self.attached = Some(Attached {
            connection: Arc::clone(&connection),
            control_routes,
            handshake: HandshakeState::default(),
            last_ping: Instant::now(),
        });
        self.state = SessionState::Handshaking;
        self.error_message = None;
        self.remote_version = None;

        info!(
            role = %self.kind,
            transport = connection.transport_name(),
            peer = ?connection.peer_addr(),
            "session attached"
        );

        if self.config.threaded_receive {
            if let Err(err) = connection.start_receive_thread() {
                self.drop_connection("connection lost");
                return Err(err.into());
            }
        }
        if let Err(err) = self.send_control(&ControlMessage::hello(self.config.version.clone())) {
            self.drop_connection("connection lost");
            return Err(err);
        }
        Ok(())
    }

    /// Advance the session: receive, run control messages, tick channels,
    /// keep the link alive.
    pub fn tick(&mut self) -> SessionState {
        let now = Instant::now();
        let delta = now.duration_since(self.last_tick);
        self.last_tick = now;

        let Some(connection) = self.connection().cloned() else {
            return self.state;
        };

        if connection.is_threaded() {
            connection.dispatch_messages();
        } else {
            connection.receive_and_dispatch_messages(self.config.receive_wait());
        }

        let pending: Vec<ControlMessage> = lock(&self.control).drain(..).collect();
        for message in pending {
            if self.attached.is_none() {
                break;
            }
            self.handle_control(message);
        }
        if self.attached.is_none() {
            return self.state;
        }

        if self.state == SessionState::Connected {
            for channel in &mut self.channels {
                channel.tick(delta);
            }
        }

        self.keep_alive(&connection);
        self.state
    }

    /// Send a goodbye and tear the session down.
    ///
    /// Channels are dropped before the connection closes. An `Error` state
    /// is kept; otherwise the role returns to `Disconnected`.
    pub fn close(&mut self, reason: &str) {
        if self.attached.is_none() {
            return;
        }
        if let Err(err) = self.send_control(&ControlMessage::goodbye(reason)) {
            debug!(error = %err, "goodbye not delivered");
        }
        info!(role = %self.kind, reason, "closing session");
        self.teardown();
        if self.state != SessionState::Error {
            self.state = SessionState::Disconnected;
        }
    }

    pub fn kind(&self) -> RoleKind {
        self.kind
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ChannelRegistry> {
        &self.registry
    }

    pub fn is_attached(&self) -> bool {
        self.attached.is_some()
    }

    /// True only after a fatal failure such as a version mismatch.
    pub fn has_error(&self) -> bool {
        self.state == SessionState::Error
    }

    /// Why the last session ended, if it did not end cleanly.
    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    /// Forget a fatal error so a new stream may be attached by an owner
    /// that retries.
    pub fn clear_error(&mut self) {
        if self.state == SessionState::Error {
            self.state = SessionState::Disconnected;
        }
        self.error_message = None;
    }

    pub fn remote_version(&self) -> Option<&str> {
        self.remote_version.as_deref()
    }

    pub fn connection(&self) -> Option<&Arc<Connection>> {
        self.attached.as_ref().map(|attached| &attached.connection)
    }

    pub fn channels(&self) -> &[Box<dyn Channel>] {
        &self.channels
    }

    /// The first channel of concrete type `T`.
    pub fn channel<T: Channel>(&self) -> Option<&T> {
        self.channels
            .iter()
            .find_map(|channel| channel.as_any().downcast_ref::<T>())
    }

    pub fn channel_mut<T: Channel>(&mut self) -> Option<&mut T> {
        self.channels
            .iter_mut()
            .find_map(|channel| channel.as_any_mut().downcast_mut::<T>())
    }

    fn handle_control(&mut self, message: ControlMessage) {
        match message {
            ControlMessage::Hello { version } => self.on_hello(&version),
            ControlMessage::ChannelSelection(selection) => self.on_selection(&selection),
            ControlMessage::Goodbye { reason } => {
                info!(role = %self.kind, reason, "peer said goodbye");
                self.teardown();
                self.state = SessionState::Disconnected;
                self.error_message = None;
            }
            ControlMessage::Ping => {}
        }
    }

    fn on_hello(&mut self, remote: &str) {
        let Some(attached) = self.attached.as_mut() else {
            return;
        };
        if attached.handshake.is_complete() {
            warn!(remote, "duplicate hello ignored");
            return;
        }

        if let Err(err) = attached.handshake.receive_hello(&self.config.version, remote) {
            let message = err.to_string();
            error!(role = %self.kind, error = %message, "handshake failed");
            attached.connection.set_error_state(message.clone());
            if let Err(send_err) = self.send_control(&ControlMessage::goodbye(message.clone())) {
                debug!(error = %send_err, "goodbye not delivered");
            }
            self.teardown();
            self.state = SessionState::Error;
            self.error_message = Some(message);
            return;
        }

        info!(role = %self.kind, remote_version = remote, "handshake complete");
        self.remote_version = Some(remote.to_string());

        if self.kind == RoleKind::Host {
            let selection = self.config.channels.clone();
            if let Err(err) = self.send_control(&ControlMessage::ChannelSelection(selection.clone())) {
                warn!(error = %err, "channel selection not delivered");
                return;
            }
            self.create_channels(&selection, false);
            self.state = SessionState::Connected;
        }
    }

    fn on_selection(&mut self, selection: &[ChannelInfo]) {
        let handshake_done = self
            .attached
            .as_ref()
            .is_some_and(|attached| attached.handshake.is_complete());
        if self.kind == RoleKind::Host || !handshake_done || !self.channels.is_empty() {
            warn!(role = %self.kind, state = %self.state, "unexpected channel selection ignored");
            return;
        }
        self.create_channels(selection, true);
        self.state = SessionState::Connected;
    }

    fn create_channels(&mut self, selection: &[ChannelInfo], invert: bool) {
        let Some(connection) = self.connection().cloned() else {
            return;
        };
        for info in selection {
            let mode = if invert { info.mode.invert() } else { info.mode };
            let Some(factory) = self.registry.find_factory(&info.type_name) else {
                warn!(channel = %info.type_name, "unknown channel type skipped");
                continue;
            };
            match factory.create(mode, &connection, &self.config) {
                Ok(channel) => {
                    debug!(channel = %info.type_name, %mode, "channel created");
                    self.channels.push(channel);
                }
                Err(err) => warn!(channel = %info.type_name, error = %err, "channel creation failed"),
            }
        }
        info!(role = %self.kind, channels = self.channels.len(), "session connected");
    }

    fn keep_alive(&mut self, connection: &Arc<Connection>) {
        if !connection.is_connected() {
            warn!(role = %self.kind, "connection lost");
            self.drop_connection("connection lost");
            return;
        }

        if let Some(timeout) = self.config.connection_timeout() {
            if connection.time_since_last_receive() > timeout {
                warn!(role = %self.kind, ?timeout, "connection timed out");
                connection.set_error_state("connection timed out");
                self.drop_connection("connection timed out");
                return;
            }
        }

        let Some(interval) = self.config.ping_interval() else {
            return;
        };
        let due = self
            .attached
            .as_ref()
            .is_some_and(|attached| attached.last_ping.elapsed() >= interval);
        if !due {
            return;
        }
        if let Some(attached) = self.attached.as_mut() {
            attached.last_ping = Instant::now();
        }
        if let Err(err) = self.send_control(&ControlMessage::Ping) {
            debug!(error = %err, "ping failed");
        }
    }

    fn drop_connection(&mut self, reason: &str) {
        self.teardown();
        self.state = SessionState::Disconnected;
        self.error_message = Some(reason.to_string());
    }

    fn send_control(&self, message: &ControlMessage) -> Result<()> {
        let Some(connection) = self.connection() else {
            return Err(SessionError::NotConnected);
        };
        let message = message.to_message(connection.byte_order())?;
        connection.send_message(&message)?;
        Ok(())
    }

    fn teardown(&mut self) {
        self.channels.clear();
        if let Some(mut attached) = self.attached.take() {
            attached.control_routes.clear();
            attached.connection.close();
            debug!(role = %self.kind, "connection released");
        }
        lock(&self.control).clear();
    }
}

impl Drop for SessionRole {
    fn drop(&mut self) {
        self.close("session dropped");
    }
}

impl fmt::Debug for SessionRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionRole")
            .field("kind", &self.kind)
            .field("state", &self.state)
            .field("channels", &self.channels.len())
            .field("error_message", &self.error_message)
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}
