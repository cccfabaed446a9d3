//! Remote session streaming over length-prefixed OSC.
//!
//! # Crate Structure
//!
//! - [`transport`]: TCP and Unix stream transport
//! - [`osc`]: OSC messages, bundles and length-prefixed framing
//! - [`connection`]: threaded or polled receive, dispatch and queue limits
//! - [`session`]: host and client roles with image, input and tracking
//!   channels (behind the `session` feature)

/// Re-export transport types.
pub mod transport {
    pub use mirrorlink_transport::*;
}

/// Re-export message and framing types.
pub mod osc {
    pub use mirrorlink_osc::*;
}

/// Re-export connection types.
pub mod connection {
    pub use mirrorlink_connection::*;
}

/// Re-export session types (requires `session` feature).
#[cfg(feature = "session")]
pub mod session {
    pub use mirrorlink_session::*;
}

#[cfg(all(test, feature = "session"))]
mod tests {
    use super::session::{ImageCodecKind, SessionConfig};

    #[test]
    fn jpeg_feature_controls_session_codec() {
        let expected = if cfg!(feature = "jpeg") {
            ImageCodecKind::Jpeg
        } else {
            ImageCodecKind::Raw
        };
        assert_eq!(SessionConfig::default().image_codec, expected);
    }
}
