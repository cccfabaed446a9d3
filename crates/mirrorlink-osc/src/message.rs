use bytes::{BufMut, Bytes, BytesMut};
use tracing::warn;

use crate::error::{OscError, Result};

/// Type tag for a 32-bit signed integer argument.
pub const TAG_INT: char = 'i';
/// Type tag for a 32-bit float argument.
pub const TAG_FLOAT: char = 'f';
/// Type tag for a NUL-terminated string argument.
pub const TAG_STRING: char = 's';
/// Type tag for a size-prefixed binary blob argument.
pub const TAG_BLOB: char = 'b';

/// Size of `size` bytes once padded to the 4-byte argument alignment.
pub fn rounded_argument_size(size: usize) -> usize {
    size.div_ceil(4) * 4
}

/// Byte order used for numeric argument values.
///
/// `Network` is the canonical big-endian order. `Legacy` writes values in
/// little-endian order without swapping, for peers built before values were
/// normalized. Both ends of a connection must agree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ByteOrder {
    #[default]
    Network,
    Legacy,
}

impl ByteOrder {
    pub(crate) fn put_u32(self, dst: &mut BytesMut, value: u32) {
        match self {
            ByteOrder::Network => dst.put_u32(value),
            ByteOrder::Legacy => dst.put_u32_le(value),
        }
    }

    pub(crate) fn put_u64(self, dst: &mut BytesMut, value: u64) {
        match self {
            ByteOrder::Network => dst.put_u64(value),
            ByteOrder::Legacy => dst.put_u64_le(value),
        }
    }

    pub(crate) fn u32_from(self, raw: [u8; 4]) -> u32 {
        match self {
            ByteOrder::Network => u32::from_be_bytes(raw),
            ByteOrder::Legacy => u32::from_le_bytes(raw),
        }
    }

    pub(crate) fn u64_from(self, raw: [u8; 8]) -> u64 {
        match self {
            ByteOrder::Network => u64::from_be_bytes(raw),
            ByteOrder::Legacy => u64::from_le_bytes(raw),
        }
    }
}

/// Whether a message is being built or was parsed from the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketMode {
    Write,
    Read,
}

/// A decoded argument value.
#[derive(Debug, Clone, PartialEq)]
pub enum OscArgument {
    Int(i32),
    Float(f32),
    String(String),
    Blob(Bytes),
}

impl OscArgument {
    /// The type tag this argument is encoded with.
    pub fn tag(&self) -> char {
        match self {
            OscArgument::Int(_) => TAG_INT,
            OscArgument::Float(_) => TAG_FLOAT,
            OscArgument::String(_) => TAG_STRING,
            OscArgument::Blob(_) => TAG_BLOB,
        }
    }
}

/// A single addressed message.
///
/// Messages created with [`OscMessage::new`] are writable; messages parsed
/// with [`OscMessage::from_bytes`] are readable. Reads walk the arguments in
/// the order they were written. A read with the wrong type, or past the last
/// argument, returns an error and leaves the cursor where it was.
#[derive(Debug, Clone)]
pub struct OscMessage {
    address: String,
    tags: String,
    data: BytesMut,
    byte_order: ByteOrder,
    mode: PacketMode,
    tag_cursor: usize,
    data_cursor: usize,
}

impl PartialEq for OscMessage {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address
            && self.tags == other.tags
            && self.byte_order == other.byte_order
            && self.data == other.data
    }
}

impl OscMessage {
    /// Create an empty message for writing, using network byte order.
    pub fn new(address: impl Into<String>) -> Self {
        Self::with_byte_order(address, ByteOrder::Network)
    }

    /// Create an empty message for writing with an explicit byte order.
    pub fn with_byte_order(address: impl Into<String>, byte_order: ByteOrder) -> Self {
        Self {
            address: address.into(),
            tags: String::new(),
            data: BytesMut::new(),
            byte_order,
            mode: PacketMode::Write,
            tag_cursor: 0,
            data_cursor: 0,
        }
    }

    /// The destination path.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// One tag character per argument, without the leading ','.
    pub fn tags(&self) -> &str {
        &self.tags
    }

    pub fn argument_count(&self) -> usize {
        self.tags.len()
    }

    /// Arguments not yet consumed by reads.
    pub fn remaining_arguments(&self) -> usize {
        self.tags.len() - self.tag_cursor
    }

    pub fn byte_order(&self) -> ByteOrder {
        self.byte_order
    }

    pub fn mode(&self) -> PacketMode {
        self.mode
    }

    /// Rewind the read cursor to the first argument.
    pub fn reset_read(&mut self) {
        self.tag_cursor = 0;
        self.data_cursor = 0;
    }

    fn ensure_writable(&self) -> Result<()> {
        match self.mode {
            PacketMode::Write => Ok(()),
            PacketMode::Read => Err(OscError::NotWritable),
        }
    }

    /// Append an int32 argument.
    pub fn write_int(&mut self, value: i32) -> Result<()> {
        self.ensure_writable()?;
        self.tags.push(TAG_INT);
        self.byte_order.put_u32(&mut self.data, value as u32);
        Ok(())
    }

    /// Append a float32 argument.
    pub fn write_float(&mut self, value: f32) -> Result<()> {
        self.ensure_writable()?;
        self.tags.push(TAG_FLOAT);
        self.byte_order.put_u32(&mut self.data, value.to_bits());
        Ok(())
    }

    /// Append a string argument (NUL-terminated, padded).
    pub fn write_string(&mut self, value: &str) -> Result<()> {
        self.ensure_writable()?;
        if value.as_bytes().contains(&0) {
            return Err(OscError::InteriorNul);
        }
        self.tags.push(TAG_STRING);
        put_padded_str(&mut self.data, value);
        Ok(())
    }

    /// Append a blob argument (int32 size, bytes, padding).
    pub fn write_blob(&mut self, value: &[u8]) -> Result<()> {
        self.ensure_writable()?;
        if value.len() > i32::MAX as usize {
            return Err(OscError::ArgumentTooLarge(value.len()));
        }
        self.tags.push(TAG_BLOB);
        self.byte_order.put_u32(&mut self.data, value.len() as u32);
        self.data.put_slice(value);
        put_padding(&mut self.data, rounded_argument_size(value.len()) - value.len());
        Ok(())
    }

    /// Append any [`OscValue`].
    pub fn write<T: OscValue>(&mut self, value: &T) -> Result<()> {
        value.write_to(self)
    }

    /// Read the next argument as an int32.
    pub fn read_int(&mut self) -> Result<i32> {
        self.begin_read(TAG_INT)?;
        let (value, next) = self.decode_int(self.data_cursor)?;
        self.advance(next);
        Ok(value)
    }

    /// Read the next argument as a float32.
    pub fn read_float(&mut self) -> Result<f32> {
        self.begin_read(TAG_FLOAT)?;
        let (value, next) = self.decode_float(self.data_cursor)?;
        self.advance(next);
        Ok(value)
    }

    /// Read the next argument as a string.
    pub fn read_string(&mut self) -> Result<String> {
        self.begin_read(TAG_STRING)?;
        let (value, next) = self.decode_string(self.data_cursor)?;
        self.advance(next);
        Ok(value)
    }

    /// Read the next argument as a blob.
    pub fn read_blob(&mut self) -> Result<Bytes> {
        self.begin_read(TAG_BLOB)?;
        let (value, next) = self.decode_blob(self.data_cursor)?;
        self.advance(next);
        Ok(value)
    }

    /// Read the next argument as any [`OscValue`].
    pub fn read<T: OscValue>(&mut self) -> Result<T> {
        T::read_from(self)
    }

    /// Read the next argument, falling back to the type's default on error.
    ///
    /// The error is logged; the message stays usable.
    pub fn read_or_default<T: OscValue + Default>(&mut self) -> T {
        match T::read_from(self) {
            Ok(value) => value,
            Err(err) => {
                warn!(address = %self.address, error = %err, "argument read failed");
                T::default()
            }
        }
    }

    /// Decode every argument without touching the read cursor.
    pub fn arguments(&self) -> Result<Vec<OscArgument>> {
        let mut out = Vec::with_capacity(self.tags.len());
        let mut offset = 0usize;
        for tag in self.tags.chars() {
            let (argument, next) = self.decode_at(tag, offset)?;
            out.push(argument);
            offset = next;
        }
        Ok(out)
    }

    /// Size of the serialized message in bytes.
    pub fn encoded_len(&self) -> usize {
        rounded_argument_size(self.address.len() + 1)
            + rounded_argument_size(self.tags.len() + 2)
            + self.data.len()
    }

    /// Serialize into `dst`.
    pub fn write_to(&self, dst: &mut BytesMut) {
        dst.reserve(self.encoded_len());
        put_padded_str(dst, &self.address);
        let tag_len = self.tags.len() + 1;
        dst.put_u8(b',');
        dst.put_slice(self.tags.as_bytes());
        dst.put_u8(0);
        put_padding(dst, rounded_argument_size(tag_len + 1) - (tag_len + 1));
        dst.put_slice(&self.data);
    }

    /// Serialize into a new buffer.
    pub fn to_bytes(&self) -> Bytes {
        let mut dst = BytesMut::with_capacity(self.encoded_len());
        self.write_to(&mut dst);
        dst.freeze()
    }

    /// Parse a serialized message into a readable message.
    ///
    /// The whole argument block is validated against the tag string, so
    /// subsequent reads cannot run past the buffer.
    pub fn from_bytes(bytes: &[u8], byte_order: ByteOrder) -> Result<Self> {
        let (address, mut offset) = read_padded_str(bytes, 0)?;
        if !address.starts_with('/') {
            return Err(OscError::InvalidAddress(address));
        }

        let tags = match bytes.get(offset) {
            Some(b',') => {
                let (tag_string, next) = read_padded_str(bytes, offset)?;
                offset = next;
                tag_string[1..].to_string()
            }
            None => String::new(),
            Some(_) => {
                return Err(OscError::Malformed(format!(
                    "message '{address}' has no type tag string"
                )))
            }
        };

        if let Some(bad) = tags
            .chars()
            .find(|tag| !matches!(*tag, TAG_INT | TAG_FLOAT | TAG_STRING | TAG_BLOB))
        {
            return Err(OscError::Malformed(format!(
                "unsupported type tag '{bad}' in message '{address}'"
            )));
        }

        let message = Self {
            address,
            tags,
            data: BytesMut::from(&bytes[offset..]),
            byte_order,
            mode: PacketMode::Read,
            tag_cursor: 0,
            data_cursor: 0,
        };

        let mut cursor = 0usize;
        for tag in message.tags.chars() {
            let (_, next) = message.decode_at(tag, cursor)?;
            cursor = next;
        }
        if cursor != message.data.len() {
            return Err(OscError::Malformed(format!(
                "message '{}' has {} trailing argument bytes",
                message.address,
                message.data.len() - cursor
            )));
        }

        Ok(message)
    }

    fn begin_read(&self, expected: char) -> Result<()> {
        if self.mode != PacketMode::Read {
            return Err(OscError::NotReadable);
        }
        let found = self
            .tags
            .as_bytes()
            .get(self.tag_cursor)
            .copied()
            .ok_or(OscError::EndOfArguments {
                count: self.tags.len(),
            })? as char;
        if found != expected {
            return Err(OscError::TypeMismatch {
                index: self.tag_cursor,
                expected,
                found,
            });
        }
        Ok(())
    }

    fn advance(&mut self, next_offset: usize) {
        self.data_cursor = next_offset;
        self.tag_cursor += 1;
    }

    fn word_at(&self, offset: usize) -> Result<[u8; 4]> {
        self.data
            .get(offset..offset + 4)
            .and_then(|slice| slice.try_into().ok())
            .ok_or_else(|| OscError::Malformed(format!("argument at byte {offset} is truncated")))
    }

    fn decode_int(&self, offset: usize) -> Result<(i32, usize)> {
        let raw = self.word_at(offset)?;
        Ok((self.byte_order.u32_from(raw) as i32, offset + 4))
    }

    fn decode_float(&self, offset: usize) -> Result<(f32, usize)> {
        let raw = self.word_at(offset)?;
        Ok((f32::from_bits(self.byte_order.u32_from(raw)), offset + 4))
    }

    fn decode_string(&self, offset: usize) -> Result<(String, usize)> {
        read_padded_str(&self.data, offset)
    }

    fn decode_blob(&self, offset: usize) -> Result<(Bytes, usize)> {
        let size = self.byte_order.u32_from(self.word_at(offset)?) as usize;
        let start = offset + 4;
        let end = start
            .checked_add(rounded_argument_size(size))
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| {
                OscError::Malformed(format!("blob of {size} bytes at byte {offset} is truncated"))
            })?;
        Ok((Bytes::copy_from_slice(&self.data[start..start + size]), end))
    }

    fn decode_at(&self, tag: char, offset: usize) -> Result<(OscArgument, usize)> {
        match tag {
            TAG_INT => self
                .decode_int(offset)
                .map(|(v, next)| (OscArgument::Int(v), next)),
            TAG_FLOAT => self
                .decode_float(offset)
                .map(|(v, next)| (OscArgument::Float(v), next)),
            TAG_STRING => self
                .decode_string(offset)
                .map(|(v, next)| (OscArgument::String(v), next)),
            TAG_BLOB => self
                .decode_blob(offset)
                .map(|(v, next)| (OscArgument::Blob(v), next)),
            other => Err(OscError::Malformed(format!("unsupported type tag '{other}'"))),
        }
    }
}

/// A value that can be written to and read from a message argument.
pub trait OscValue: Sized {
    fn write_to(&self, message: &mut OscMessage) -> Result<()>;
    fn read_from(message: &mut OscMessage) -> Result<Self>;
}

impl OscValue for i32 {
    fn write_to(&self, message: &mut OscMessage) -> Result<()> {
        message.write_int(*self)
    }

    fn read_from(message: &mut OscMessage) -> Result<Self> {
        message.read_int()
    }
}

/// Carried as the int32 bit pattern.
impl OscValue for u32 {
    fn write_to(&self, message: &mut OscMessage) -> Result<()> {
        message.write_int(*self as i32)
    }

    fn read_from(message: &mut OscMessage) -> Result<Self> {
        message.read_int().map(|v| v as u32)
    }
}

/// Carried as an int32, non-zero meaning true.
impl OscValue for bool {
    fn write_to(&self, message: &mut OscMessage) -> Result<()> {
        message.write_int(i32::from(*self))
    }

    fn read_from(message: &mut OscMessage) -> Result<Self> {
        message.read_int().map(|v| v != 0)
    }
}

impl OscValue for f32 {
    fn write_to(&self, message: &mut OscMessage) -> Result<()> {
        message.write_float(*self)
    }

    fn read_from(message: &mut OscMessage) -> Result<Self> {
        message.read_float()
    }
}

impl OscValue for String {
    fn write_to(&self, message: &mut OscMessage) -> Result<()> {
        message.write_string(self)
    }

    fn read_from(message: &mut OscMessage) -> Result<Self> {
        message.read_string()
    }
}

impl OscValue for Bytes {
    fn write_to(&self, message: &mut OscMessage) -> Result<()> {
        message.write_blob(self)
    }

    fn read_from(message: &mut OscMessage) -> Result<Self> {
        message.read_blob()
    }
}

impl OscValue for Vec<u8> {
    fn write_to(&self, message: &mut OscMessage) -> Result<()> {
        message.write_blob(self)
    }

    fn read_from(message: &mut OscMessage) -> Result<Self> {
        message.read_blob().map(|blob| blob.to_vec())
    }
}

fn put_padding(dst: &mut BytesMut, count: usize) {
    dst.put_bytes(0, count);
}

fn put_padded_str(dst: &mut BytesMut, value: &str) {
    let len = value.len() + 1;
    dst.put_slice(value.as_bytes());
    dst.put_u8(0);
    put_padding(dst, rounded_argument_size(len) - len);
}

/// Read a NUL-terminated, 4-byte padded string starting at `offset`.
pub(crate) fn read_padded_str(bytes: &[u8], offset: usize) -> Result<(String, usize)> {
    let rest = bytes
        .get(offset..)
        .ok_or_else(|| OscError::Malformed(format!("string at byte {offset} is out of range")))?;
    let nul = rest
        .iter()
        .position(|b| *b == 0)
        .ok_or_else(|| OscError::Malformed(format!("string at byte {offset} is unterminated")))?;
    let next = offset + rounded_argument_size(nul + 1);
    if next > bytes.len() {
        return Err(OscError::Malformed(format!(
            "string at byte {offset} is missing padding"
        )));
    }
    let text = std::str::from_utf8(&rest[..nul])
        .map_err(|_| OscError::Malformed(format!("string at byte {offset} is not UTF-8")))?;
    Ok((text.to_string(), next))
}
