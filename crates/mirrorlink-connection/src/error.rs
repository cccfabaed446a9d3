/// Errors that can occur on a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] mirrorlink_transport::TransportError),

    /// Framing error on the stream.
    #[error("frame error: {0}")]
    Frame(#[from] mirrorlink_osc::FrameError),

    /// Message construction or parsing error.
    #[error("message error: {0}")]
    Osc(#[from] mirrorlink_osc::OscError),

    /// The peer is gone or the connection was closed locally.
    #[error("disconnected: {0}")]
    Disconnected(String),

    /// The receive thread could not be started.
    #[error("failed to spawn receive thread: {0}")]
    WorkerSpawn(std::io::Error),
}

pub type Result<T> = std::result::Result<T, ConnectionError>;
