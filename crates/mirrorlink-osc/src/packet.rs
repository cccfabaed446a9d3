use bytes::{Bytes, BytesMut};

use crate::bundle::{OscBundle, BUNDLE_TAG};
use crate::error::Result;
use crate::message::{ByteOrder, OscMessage};

/// The payload of one frame: a message or a bundle.
#[derive(Debug, Clone, PartialEq)]
pub enum OscPacket {
    Message(OscMessage),
    Bundle(OscBundle),
}

impl From<OscMessage> for OscPacket {
    fn from(message: OscMessage) -> Self {
        OscPacket::Message(message)
    }
}

impl From<OscBundle> for OscPacket {
    fn from(bundle: OscBundle) -> Self {
        OscPacket::Bundle(bundle)
    }
}

impl OscPacket {
    /// Parse a frame payload.
    pub fn from_bytes(bytes: &[u8], byte_order: ByteOrder) -> Result<Self> {
        Self::parse(bytes, byte_order, 0)
    }

    pub(crate) fn parse(bytes: &[u8], byte_order: ByteOrder, depth: usize) -> Result<Self> {
        if bytes.starts_with(BUNDLE_TAG) {
            OscBundle::parse(bytes, byte_order, depth).map(OscPacket::Bundle)
        } else {
            OscMessage::from_bytes(bytes, byte_order).map(OscPacket::Message)
        }
    }

    /// The message address, or `None` for bundles.
    pub fn address(&self) -> Option<&str> {
        match self {
            OscPacket::Message(message) => Some(message.address()),
            OscPacket::Bundle(_) => None,
        }
    }

    pub fn encoded_len(&self) -> usize {
        match self {
            OscPacket::Message(message) => message.encoded_len(),
            OscPacket::Bundle(bundle) => bundle.encoded_len(),
        }
    }

    pub fn write_to(&self, dst: &mut BytesMut) {
        match self {
            OscPacket::Message(message) => message.write_to(dst),
            OscPacket::Bundle(bundle) => bundle.write_to(dst),
        }
    }

    pub fn to_bytes(&self) -> Bytes {
        match self {
            OscPacket::Message(message) => message.to_bytes(),
            OscPacket::Bundle(bundle) => bundle.to_bytes(),
        }
    }

    /// Flatten into messages, depth first, in wire order.
    pub fn into_messages(self) -> Vec<OscMessage> {
        let mut out = Vec::new();
        self.collect_messages(&mut out);
        out
    }

    fn collect_messages(self, out: &mut Vec<OscMessage>) {
        match self {
            OscPacket::Message(message) => out.push(message),
            OscPacket::Bundle(bundle) => {
                for element in bundle.into_elements() {
                    element.collect_messages(out);
                }
            }
        }
    }
}
