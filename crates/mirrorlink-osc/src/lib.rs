//! OSC-style messages and length-prefixed packet framing.
//!
//! A message is an address path, a tag string naming each argument's type,
//! and the arguments themselves, every field aligned to four bytes:
//!
//! ```text
//! "/Screen\0"  ",iibi\0\0"  <width> <height> <size><bytes..pad> <index>
//! ```
//!
//! On a stream, every packet (a message or a bundle of packets) travels as a
//! frame: a 4-byte little-endian payload length followed by the payload.
//! [`FrameDecoder`] reassembles frames from arbitrarily fragmented reads.

pub mod bundle;
pub mod error;
pub mod framing;
pub mod message;
pub mod packet;
pub mod reader;
pub mod writer;

pub use bundle::{OscBundle, BUNDLE_TAG, IMMEDIATE_TIME_TAG};
pub use error::{FrameError, OscError, Result};
pub use framing::{encode_frame, FrameConfig, FrameDecoder, DEFAULT_MAX_PAYLOAD, LENGTH_PREFIX_SIZE};
pub use message::{
    rounded_argument_size, ByteOrder, OscArgument, OscMessage, OscValue, PacketMode, TAG_BLOB,
    TAG_FLOAT, TAG_INT, TAG_STRING,
};
pub use packet::OscPacket;
pub use reader::{PacketReader, ReadOutcome};
pub use writer::PacketWriter;
