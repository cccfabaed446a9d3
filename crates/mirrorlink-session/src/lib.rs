//! Sessions over a mirrorlink connection.
//!
//! A host and a client exchange hellos, the host selects channels, and each
//! side creates the selected channels from a registry of factories. The
//! built-in channels stream images, forward input and carry device poses.

pub mod channel;
pub mod channels;
pub mod client;
pub mod config;
pub mod control;
pub mod error;
pub mod handshake;
pub mod host;
pub mod registry;
pub mod role;

pub use channel::{Channel, ChannelRoutes};
pub use channels::{
    ImageChannel, ImageCodec, InputChannel, InputEvent, Pose, XRTrackingChannel,
    IMAGE_CHANNEL_TYPE, INPUT_CHANNEL_TYPE, XR_TRACKING_CHANNEL_TYPE,
};
pub use client::SessionClient;
pub use config::{default_channels, ImageCodecKind, SessionConfig};
pub use control::{
    ChannelInfo, ChannelMode, ControlMessage, CHANNEL_SELECTION_ADDRESS, GOODBYE_ADDRESS,
    HELLO_ADDRESS, PING_ADDRESS, PROTOCOL_VERSION,
};
pub use error::{Result, SessionError};
pub use handshake::{validate_version, HandshakeState};
pub use host::SessionHost;
pub use registry::{ChannelFactory, ChannelRegistry};
pub use role::{RoleKind, SessionRole, SessionState};
