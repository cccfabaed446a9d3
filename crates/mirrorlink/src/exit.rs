use std::fmt;
use std::io;

use mirrorlink_connection::ConnectionError;
use mirrorlink_osc::FrameError;
use mirrorlink_session::SessionError;
use mirrorlink_transport::TransportError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::ConnectionRefused | io::ErrorKind::AddrInUse => TRANSPORT_ERROR,
        io::ErrorKind::NotFound | io::ErrorKind::InvalidInput => USAGE,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    match err {
        TransportError::Bind { source, .. }
        | TransportError::Connect { source, .. }
        | TransportError::Accept(source)
        | TransportError::Io(source) => io_error(context, source),
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

pub fn frame_error(context: &str, err: FrameError) -> CliError {
    match err {
        FrameError::Io(source) => io_error(context, source),
        FrameError::PayloadTooLarge { .. } | FrameError::Packet(_) => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        FrameError::ConnectionClosed => CliError::new(FAILURE, format!("{context}: {err}")),
    }
}

pub fn connection_error(context: &str, err: ConnectionError) -> CliError {
    match err {
        ConnectionError::Transport(err) => transport_error(context, err),
        ConnectionError::Frame(err) => frame_error(context, err),
        ConnectionError::Osc(_) => CliError::new(DATA_INVALID, format!("{context}: {err}")),
        ConnectionError::Disconnected(_) => CliError::new(FAILURE, format!("{context}: {err}")),
        ConnectionError::WorkerSpawn(_) => CliError::new(INTERNAL, format!("{context}: {err}")),
    }
}

pub fn session_error(context: &str, err: SessionError) -> CliError {
    match err {
        SessionError::Connection(err) => connection_error(context, err),
        SessionError::Transport(err) => transport_error(context, err),
        SessionError::Io(err) => io_error(context, err),
        SessionError::Config(_) | SessionError::Json(_) => {
            CliError::new(USAGE, format!("{context}: {err}"))
        }
        SessionError::VersionMismatch { .. }
        | SessionError::Protocol(_)
        | SessionError::Osc(_)
        | SessionError::Codec(_) => CliError::new(DATA_INVALID, format!("{context}: {err}")),
        SessionError::NotConnected => CliError::new(FAILURE, format!("{context}: {err}")),
        other => CliError::new(INTERNAL, format!("{context}: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refused_connect_is_transport_error() {
        let err = TransportError::Connect {
            addr: "127.0.0.1:1".into(),
            source: io::Error::from(io::ErrorKind::ConnectionRefused),
        };
        let cli = session_error("connect failed", err.into());
        assert_eq!(cli.code, TRANSPORT_ERROR);
        assert!(cli.message.starts_with("connect failed: "));
    }

    #[test]
    fn version_mismatch_is_data_invalid() {
        let err = SessionError::VersionMismatch {
            local: "1.1.0".into(),
            remote: "1.0.5".into(),
        };
        assert_eq!(session_error("handshake", err).code, DATA_INVALID);
    }

    #[test]
    fn bad_config_is_usage() {
        let err = SessionError::Config("image_quality must be 1-100, got 0".into());
        assert_eq!(session_error("config", err).code, USAGE);
    }
}
