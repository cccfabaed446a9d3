//! Stream transport for mirrorlink sessions.
//!
//! Everything above this layer talks to a [`LinkStream`]: a connected,
//! bidirectional byte stream that can be cloned into independent read and
//! write handles and polled for readability with a bounded wait.
//!
//! [`TcpLink`] establishes streams over TCP. On Unix, [`LinkStream::pair`]
//! gives a connected in-process pair, handy for local sessions and tests.

pub mod error;
pub mod stream;
pub mod tcp;

pub use error::{Result, TransportError};
pub use stream::LinkStream;
pub use tcp::TcpLink;
