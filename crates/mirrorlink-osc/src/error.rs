/// Errors raised while building, parsing or reading a message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OscError {
    /// The argument at the read cursor has a different type.
    #[error("type mismatch reading argument {index}: expected '{expected}', found '{found}'")]
    TypeMismatch {
        index: usize,
        expected: char,
        found: char,
    },

    /// Every argument has already been read.
    #[error("no argument left to read ({count} total)")]
    EndOfArguments { count: usize },

    /// The message was built for writing and cannot be read.
    #[error("message is in write mode")]
    NotReadable,

    /// The message was parsed from bytes and cannot be extended.
    #[error("message is in read mode")]
    NotWritable,

    /// The address does not start with '/'.
    #[error("invalid address '{0}'")]
    InvalidAddress(String),

    /// A string argument contains an interior NUL byte.
    #[error("string argument contains NUL byte")]
    InteriorNul,

    /// An argument is too large for a 32-bit size field.
    #[error("argument too large ({0} bytes)")]
    ArgumentTooLarge(usize),

    /// The wire bytes do not describe a valid packet.
    #[error("malformed packet: {0}")]
    Malformed(String),
}

/// Errors that can occur while framing packets on a stream.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The payload exceeds the configured maximum size.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// A complete frame was received but its payload did not parse.
    #[error("undecodable packet: {0}")]
    Packet(#[from] OscError),

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection was closed mid-write.
    #[error("connection closed")]
    ConnectionClosed,
}

pub type Result<T> = std::result::Result<T, OscError>;
