use std::path::Path;
use std::time::Duration;

use mirrorlink_connection::ConnectionConfig;
use mirrorlink_osc::{ByteOrder, DEFAULT_MAX_PAYLOAD};
use serde::{Deserialize, Serialize};

use crate::channels::{IMAGE_CHANNEL_TYPE, INPUT_CHANNEL_TYPE, XR_TRACKING_CHANNEL_TYPE};
use crate::control::{ChannelInfo, ChannelMode, PROTOCOL_VERSION};
use crate::error::{Result, SessionError};

const MIN_PAYLOAD_SIZE: usize = 1024;
const MAX_CONFIG_FILE_SIZE: u64 = 256 * 1024;

/// Image codec used by image channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageCodecKind {
    Jpeg,
    Raw,
}

impl Default for ImageCodecKind {
    fn default() -> Self {
        if cfg!(feature = "jpeg") {
            ImageCodecKind::Jpeg
        } else {
            ImageCodecKind::Raw
        }
    }
}

/// Session configuration.
///
/// Every field has a default, so a JSON file only needs the values it
/// changes. Durations are in milliseconds; an interval of 0 disables the
/// behaviour it controls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionConfig {
    /// Protocol version announced in the hello; must match the peer exactly.
    pub version: String,
    /// Exchange argument values in little-endian order, for older peers.
    pub legacy_byte_order: bool,
    /// Receive on a background thread instead of during `tick`.
    pub threaded_receive: bool,
    /// Bounded wait for one receive pass.
    pub receive_wait_ms: u64,
    /// Interval between keepalive pings.
    pub ping_interval_ms: u64,
    /// Fail the session when nothing arrives for this long.
    pub connection_timeout_ms: u64,
    /// Delay between client reconnect attempts.
    pub reconnect_interval_ms: u64,
    /// Bound on a single connect attempt.
    pub connect_timeout_ms: u64,
    /// Maximum frame payload in bytes.
    pub max_payload_size: usize,
    pub image_codec: ImageCodecKind,
    /// Encoder quality, 1 to 100.
    pub image_quality: u8,
    /// Start with image sending disabled.
    pub skip_images: bool,
    /// Channels the host offers, with the host's mode for each.
    pub channels: Vec<ChannelInfo>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            version: PROTOCOL_VERSION.to_string(),
            legacy_byte_order: false,
            threaded_receive: true,
            receive_wait_ms: 10,
            ping_interval_ms: 1000,
            connection_timeout_ms: 5000,
            reconnect_interval_ms: 1000,
            connect_timeout_ms: 2000,
            max_payload_size: DEFAULT_MAX_PAYLOAD,
            image_codec: ImageCodecKind::default(),
            image_quality: 85,
            skip_images: false,
            channels: default_channels(),
        }
    }
}

/// Built-in channels with the host's default modes.
pub fn default_channels() -> Vec<ChannelInfo> {
    vec![
        ChannelInfo::new(IMAGE_CHANNEL_TYPE, ChannelMode::Write),
        ChannelInfo::new(INPUT_CHANNEL_TYPE, ChannelMode::Read),
        ChannelInfo::new(XR_TRACKING_CHANNEL_TYPE, ChannelMode::Read),
    ]
}

impl SessionConfig {
    /// Parse and validate a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: SessionConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let metadata = std::fs::metadata(path)?;
        if metadata.len() > MAX_CONFIG_FILE_SIZE {
            return Err(SessionError::Config(format!(
                "{} is too large ({} bytes, max {MAX_CONFIG_FILE_SIZE})",
                path.display(),
                metadata.len()
            )));
        }
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<()> {
        if self.version.is_empty() {
            return Err(SessionError::Config("version must not be empty".into()));
        }
        if !(1..=100).contains(&self.image_quality) {
            return Err(SessionError::Config(format!(
                "image_quality must be 1-100, got {}",
                self.image_quality
            )));
        }
        if self.receive_wait_ms == 0 {
            return Err(SessionError::Config(
                "receive_wait_ms must be positive".into(),
            ));
        }
        if self.max_payload_size < MIN_PAYLOAD_SIZE {
            return Err(SessionError::Config(format!(
                "max_payload_size must be at least {MIN_PAYLOAD_SIZE}"
            )));
        }
        if self.image_codec == ImageCodecKind::Jpeg && !cfg!(feature = "jpeg") {
            return Err(SessionError::Config(
                "jpeg codec is not compiled in (enable the `jpeg` feature)".into(),
            ));
        }
        if let Some(channel) = self.channels.iter().find(|c| c.type_name.is_empty()) {
            return Err(SessionError::Config(format!(
                "channel with empty type name (mode {})",
                channel.mode
            )));
        }
        Ok(())
    }

    pub fn byte_order(&self) -> ByteOrder {
        if self.legacy_byte_order {
            ByteOrder::Legacy
        } else {
            ByteOrder::Network
        }
    }

    pub fn receive_wait(&self) -> Duration {
        Duration::from_millis(self.receive_wait_ms)
    }

    pub fn ping_interval(&self) -> Option<Duration> {
        non_zero_millis(self.ping_interval_ms)
    }

    pub fn connection_timeout(&self) -> Option<Duration> {
        non_zero_millis(self.connection_timeout_ms)
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms.max(1))
    }

    /// Settings for the underlying connection.
    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            byte_order: self.byte_order(),
            max_payload_size: self.max_payload_size,
            receive_wait: self.receive_wait(),
            ..ConnectionConfig::default()
        }
    }
}

fn non_zero_millis(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}
