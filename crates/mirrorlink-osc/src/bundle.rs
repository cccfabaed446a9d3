use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{OscError, Result};
use crate::message::ByteOrder;
use crate::packet::OscPacket;

/// Leading bytes of every serialized bundle.
pub const BUNDLE_TAG: &[u8; 8] = b"#bundle\0";

/// Time tag meaning "process on arrival".
pub const IMMEDIATE_TIME_TAG: u64 = 1;

/// Deepest bundle nesting accepted when parsing.
pub(crate) const MAX_BUNDLE_DEPTH: usize = 8;

/// A group of packets sharing one frame.
///
/// ```text
/// "#bundle\0"  <time tag u64>  (<size i32> <packet bytes>)*
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct OscBundle {
    time_tag: u64,
    elements: Vec<OscPacket>,
    byte_order: ByteOrder,
}

impl Default for OscBundle {
    fn default() -> Self {
        Self::new()
    }
}

impl OscBundle {
    /// Create an empty, immediate bundle using network byte order.
    pub fn new() -> Self {
        Self::with_byte_order(ByteOrder::Network)
    }

    pub fn with_byte_order(byte_order: ByteOrder) -> Self {
        Self {
            time_tag: IMMEDIATE_TIME_TAG,
            elements: Vec::new(),
            byte_order,
        }
    }

    /// Replace the time tag.
    pub fn with_time_tag(mut self, time_tag: u64) -> Self {
        self.time_tag = time_tag;
        self
    }

    pub fn push(&mut self, packet: impl Into<OscPacket>) {
        self.elements.push(packet.into());
    }

    pub fn time_tag(&self) -> u64 {
        self.time_tag
    }

    pub fn byte_order(&self) -> ByteOrder {
        self.byte_order
    }

    pub fn elements(&self) -> &[OscPacket] {
        &self.elements
    }

    pub fn into_elements(self) -> Vec<OscPacket> {
        self.elements
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Size of the serialized bundle in bytes.
    pub fn encoded_len(&self) -> usize {
        BUNDLE_TAG.len()
            + 8
            + self
                .elements
                .iter()
                .map(|element| 4 + element.encoded_len())
                .sum::<usize>()
    }

    /// Serialize into `dst`.
    pub fn write_to(&self, dst: &mut BytesMut) {
        dst.reserve(self.encoded_len());
        dst.put_slice(BUNDLE_TAG);
        self.byte_order.put_u64(dst, self.time_tag);
        for element in &self.elements {
            self.byte_order.put_u32(dst, element.encoded_len() as u32);
            element.write_to(dst);
        }
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut dst = BytesMut::with_capacity(self.encoded_len());
        self.write_to(&mut dst);
        dst.freeze()
    }

    /// Parse a serialized bundle.
    pub fn from_bytes(bytes: &[u8], byte_order: ByteOrder) -> Result<Self> {
        Self::parse(bytes, byte_order, 0)
    }

    pub(crate) fn parse(bytes: &[u8], byte_order: ByteOrder, depth: usize) -> Result<Self> {
        if depth >= MAX_BUNDLE_DEPTH {
            return Err(OscError::Malformed(format!(
                "bundle nesting deeper than {MAX_BUNDLE_DEPTH}"
            )));
        }
        if !bytes.starts_with(BUNDLE_TAG) {
            return Err(OscError::Malformed("missing #bundle tag".to_string()));
        }

        let time_tag = bytes
            .get(8..16)
            .and_then(|raw| raw.try_into().ok())
            .map(|raw| byte_order.u64_from(raw))
            .ok_or_else(|| OscError::Malformed("bundle time tag is truncated".to_string()))?;

        let mut elements = Vec::new();
        let mut offset = 16usize;
        while offset < bytes.len() {
            let size = bytes
                .get(offset..offset + 4)
                .and_then(|raw| raw.try_into().ok())
                .map(|raw| byte_order.u32_from(raw) as usize)
                .ok_or_else(|| {
                    OscError::Malformed(format!("bundle element size at byte {offset} is truncated"))
                })?;
            let start = offset + 4;
            let element = start
                .checked_add(size)
                .and_then(|end| bytes.get(start..end))
                .ok_or_else(|| {
                    OscError::Malformed(format!(
                        "bundle element of {size} bytes at byte {offset} is truncated"
                    ))
                })?;
            elements.push(OscPacket::parse(element, byte_order, depth + 1)?);
            offset = start + size;
        }

        Ok(Self {
            time_tag,
            elements,
            byte_order,
        })
    }
}
