//! Message connection over a [`mirrorlink_transport::LinkStream`].
//!
//! A [`Connection`] owns both directions of a stream. Incoming frames are
//! decoded into packets by a background receive thread (or by polling),
//! queued with per-address limits, and later dispatched on the caller's
//! thread to handlers registered by exact address.
//!
//! ```text
//!  socket ──► receive thread ──► PacketQueue ──► dispatch_messages() ──► handlers
//!                                  ▲ limits                       (caller's tick)
//! ```

pub mod connection;
pub mod dispatch;
pub mod error;
pub mod limits;
pub mod queue;

pub use connection::{Connection, ConnectionConfig, ConnectionStats, DEFAULT_RECEIVE_WAIT};
pub use dispatch::{DispatchMap, MessageHandler, RouteHandle};
pub use error::{ConnectionError, Result};
pub use limits::MessageLimits;
pub use queue::PacketQueue;
