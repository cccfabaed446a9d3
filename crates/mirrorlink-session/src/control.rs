use std::fmt;
use std::str::FromStr;

use mirrorlink_osc::{ByteOrder, OscMessage};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Result, SessionError};

/// Protocol version announced in the hello message.
pub const PROTOCOL_VERSION: &str = "1.1.0";

/// Hello: `s version`. Sent by both sides on attach.
pub const HELLO_ADDRESS: &str = "/RS.Hello";
/// Channel selection: `(s type, s mode)*`. Sent by the host.
pub const CHANNEL_SELECTION_ADDRESS: &str = "/RS.ChannelSelection";
/// Goodbye: `s reason`.
pub const GOODBYE_ADDRESS: &str = "/RS.Goodbye";
/// Keepalive, no arguments.
pub const PING_ADDRESS: &str = "/RS.Ping";

/// Every control address, for route registration.
pub const CONTROL_ADDRESSES: [&str; 4] = [
    HELLO_ADDRESS,
    CHANNEL_SELECTION_ADDRESS,
    GOODBYE_ADDRESS,
    PING_ADDRESS,
];

/// Direction of a channel from the point of view of its owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelMode {
    Read,
    Write,
}

impl ChannelMode {
    /// The mode the peer uses for the same channel.
    pub fn invert(self) -> Self {
        match self {
            ChannelMode::Read => ChannelMode::Write,
            ChannelMode::Write => ChannelMode::Read,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ChannelMode::Read => "read",
            ChannelMode::Write => "write",
        }
    }
}

impl fmt::Display for ChannelMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChannelMode {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self> {
        if s.eq_ignore_ascii_case("read") {
            Ok(ChannelMode::Read)
        } else if s.eq_ignore_ascii_case("write") {
            Ok(ChannelMode::Write)
        } else {
            Err(SessionError::Protocol(format!("unknown channel mode '{s}'")))
        }
    }
}

/// A channel type and the mode its owner runs it in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelInfo {
    #[serde(rename = "type")]
    pub type_name: String,
    pub mode: ChannelMode,
}

impl ChannelInfo {
    pub fn new(type_name: impl Into<String>, mode: ChannelMode) -> Self {
        Self {
            type_name: type_name.into(),
            mode,
        }
    }
}

/// Session control messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    Hello { version: String },
    ChannelSelection(Vec<ChannelInfo>),
    Goodbye { reason: String },
    Ping,
}

impl ControlMessage {
    pub fn hello(version: impl Into<String>) -> Self {
        ControlMessage::Hello {
            version: version.into(),
        }
    }

    pub fn goodbye(reason: impl Into<String>) -> Self {
        ControlMessage::Goodbye {
            reason: reason.into(),
        }
    }

    pub fn address(&self) -> &'static str {
        match self {
            ControlMessage::Hello { .. } => HELLO_ADDRESS,
            ControlMessage::ChannelSelection(_) => CHANNEL_SELECTION_ADDRESS,
            ControlMessage::Goodbye { .. } => GOODBYE_ADDRESS,
            ControlMessage::Ping => PING_ADDRESS,
        }
    }

    /// Build the wire message.
    pub fn to_message(&self, byte_order: ByteOrder) -> Result<OscMessage> {
        let mut msg = OscMessage::with_byte_order(self.address(), byte_order);
        match self {
            ControlMessage::Hello { version } => msg.write_string(version)?,
            ControlMessage::ChannelSelection(channels) => {
                for channel in channels {
                    msg.write_string(&channel.type_name)?;
                    msg.write_string(channel.mode.as_str())?;
                }
            }
            ControlMessage::Goodbye { reason } => msg.write_string(reason)?,
            ControlMessage::Ping => {}
        }
        Ok(msg)
    }

    /// Interpret a received message. The read cursor is consumed.
    pub fn from_message(msg: &mut OscMessage) -> Result<Self> {
        match msg.address() {
            HELLO_ADDRESS => Ok(ControlMessage::Hello {
                version: msg.read_string()?,
            }),
            CHANNEL_SELECTION_ADDRESS => {
                if msg.argument_count() % 2 != 0 {
                    return Err(SessionError::Protocol(format!(
                        "channel selection has {} arguments, expected pairs",
                        msg.argument_count()
                    )));
                }
                let mut channels = Vec::with_capacity(msg.argument_count() / 2);
                while msg.remaining_arguments() > 0 {
                    let type_name = msg.read_string()?;
                    let mode = msg.read_string()?;
                    match mode.parse() {
                        Ok(mode) => channels.push(ChannelInfo { type_name, mode }),
                        Err(err) => warn!(
                            channel = %type_name,
                            error = %err,
                            "skipping channel with unknown mode"
                        ),
                    }
                }
                Ok(ControlMessage::ChannelSelection(channels))
            }
            GOODBYE_ADDRESS => Ok(ControlMessage::Goodbye {
                reason: if msg.remaining_arguments() > 0 {
                    msg.read_string()?
                } else {
                    String::new()
                },
            }),
            PING_ADDRESS => Ok(ControlMessage::Ping),
            other => Err(SessionError::Protocol(format!(
                "'{other}' is not a control address"
            ))),
        }
    }
}
