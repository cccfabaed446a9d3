use crate::control::ChannelMode;

/// Errors that can occur in session operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Connection-level error.
    #[error("connection error: {0}")]
    Connection(#[from] mirrorlink_connection::ConnectionError),

    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] mirrorlink_transport::TransportError),

    /// Message construction or parsing error.
    #[error("message error: {0}")]
    Osc(#[from] mirrorlink_osc::OscError),

    /// The peers run different protocol versions.
    #[error("version mismatch: local '{local}', remote '{remote}'")]
    VersionMismatch { local: String, remote: String },

    /// A control message could not be interpreted.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The operation needs a channel of the other mode.
    #[error("{channel} is in {mode} mode")]
    WrongMode {
        channel: &'static str,
        mode: ChannelMode,
    },

    /// No factory is registered for a channel type.
    #[error("unknown channel type '{0}'")]
    UnknownChannel(String),

    /// Image encoding or decoding failed.
    #[error("image codec error: {0}")]
    Codec(String),

    /// The session has no live connection.
    #[error("session is not connected")]
    NotConnected,

    /// Invalid configuration value.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Failed to read a configuration file.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// A worker thread could not be started.
    #[error("failed to spawn {name} thread: {source}")]
    WorkerSpawn {
        name: &'static str,
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, SessionError>;
