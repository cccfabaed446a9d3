use bytes::{BufMut, BytesMut};

use crate::error::FrameError;
use crate::message::ByteOrder;
use crate::packet::OscPacket;

/// Size of the length field that precedes every payload.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Default maximum payload size: 16 MiB.
pub const DEFAULT_MAX_PAYLOAD: usize = 16 * 1024 * 1024;

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;

/// Configuration for framing on a stream.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum payload size in bytes. Default: 16 MiB.
    pub max_payload_size: usize,
    /// Byte order of argument values inside payloads.
    pub byte_order: ByteOrder,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD,
            byte_order: ByteOrder::Network,
        }
    }
}

/// Encode a payload into the wire format.
///
/// ```text
/// ┌──────────────┬──────────────────────┐
/// │ Length (4B)  │ Payload              │
/// │ LE u32       │ (Length bytes)       │
/// └──────────────┴──────────────────────┘
/// ```
pub fn encode_frame(payload: &[u8], dst: &mut BytesMut) -> Result<(), FrameError> {
    let len = length_prefix(payload.len())?;
    dst.reserve(LENGTH_PREFIX_SIZE + payload.len());
    dst.put_slice(&len);
    dst.put_slice(payload);
    Ok(())
}

pub(crate) fn length_prefix(len: usize) -> Result<[u8; LENGTH_PREFIX_SIZE], FrameError> {
    let len = u32::try_from(len).map_err(|_| FrameError::PayloadTooLarge {
        size: len,
        max: u32::MAX as usize,
    })?;
    Ok(len.to_le_bytes())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecodeState {
    AwaitingLength,
    AwaitingPayload,
}

/// Incremental frame reassembly.
///
/// Alternates between awaiting a 4-byte length and awaiting that many payload
/// bytes. Callers read directly into [`FrameDecoder::spare_mut`] and report
/// how many bytes arrived with [`FrameDecoder::advance`]; at most one frame
/// completes per call. The buffer grows to the largest payload seen and is
/// never shrunk.
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    state: DecodeState,
    expected: usize,
    received: usize,
    max_payload_size: usize,
    byte_order: ByteOrder,
}

impl FrameDecoder {
    pub fn new(config: &FrameConfig) -> Self {
        Self {
            buffer: vec![0; INITIAL_BUFFER_CAPACITY],
            state: DecodeState::AwaitingLength,
            expected: LENGTH_PREFIX_SIZE,
            received: 0,
            max_payload_size: config.max_payload_size,
            byte_order: config.byte_order,
        }
    }

    /// Bytes still needed to finish the current length or payload.
    pub fn remaining(&self) -> usize {
        self.expected - self.received
    }

    /// Size of the quantity currently being assembled.
    pub fn expected_len(&self) -> usize {
        self.expected
    }

    pub fn is_awaiting_length(&self) -> bool {
        self.state == DecodeState::AwaitingLength
    }

    /// Current size of the receive buffer.
    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    pub fn set_max_payload_size(&mut self, max_payload_size: usize) {
        self.max_payload_size = max_payload_size;
    }

    /// The unfilled part of the current length or payload.
    pub fn spare_mut(&mut self) -> &mut [u8] {
        &mut self.buffer[self.received..self.expected]
    }

    /// Record `count` bytes written into [`FrameDecoder::spare_mut`].
    ///
    /// Returns the packet when this completes a payload. A payload that fails
    /// to parse, or a length above the configured maximum, is an error; the
    /// decoder is reset to await the next length either way.
    pub fn advance(&mut self, count: usize) -> Result<Option<OscPacket>, FrameError> {
        self.received = (self.received + count).min(self.expected);
        if self.received < self.expected {
            return Ok(None);
        }

        match self.state {
            DecodeState::AwaitingLength => {
                let mut raw = [0u8; LENGTH_PREFIX_SIZE];
                raw.copy_from_slice(&self.buffer[..LENGTH_PREFIX_SIZE]);
                let len = u32::from_le_bytes(raw) as usize;

                if len > self.max_payload_size {
                    self.reset();
                    return Err(FrameError::PayloadTooLarge {
                        size: len,
                        max: self.max_payload_size,
                    });
                }
                if len == 0 {
                    self.reset();
                    return Ok(None);
                }
                if self.buffer.len() < len {
                    self.buffer.resize(len, 0);
                }

                self.state = DecodeState::AwaitingPayload;
                self.expected = len;
                self.received = 0;
                Ok(None)
            }
            DecodeState::AwaitingPayload => {
                let parsed = OscPacket::from_bytes(&self.buffer[..self.expected], self.byte_order);
                self.reset();
                parsed.map(Some).map_err(FrameError::from)
            }
        }
    }

    /// Push `bytes` through the decoder, returning every completed packet.
    ///
    /// Stops at the first error; bytes after it are discarded.
    pub fn feed(&mut self, mut bytes: &[u8]) -> Result<Vec<OscPacket>, FrameError> {
        let mut packets = Vec::new();
        while !bytes.is_empty() {
            let spare = self.spare_mut();
            let count = spare.len().min(bytes.len());
            spare[..count].copy_from_slice(&bytes[..count]);
            bytes = &bytes[count..];
            if let Some(packet) = self.advance(count)? {
                packets.push(packet);
            }
        }
        Ok(packets)
    }

    fn reset(&mut self) {
        self.state = DecodeState::AwaitingLength;
        self.expected = LENGTH_PREFIX_SIZE;
        self.received = 0;
    }
}
