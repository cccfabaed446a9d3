use std::io::{ErrorKind, Read};

use crate::error::FrameError;
use crate::framing::{FrameConfig, FrameDecoder};
use crate::packet::OscPacket;

/// Result of a single read attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum ReadOutcome {
    /// A frame completed and its payload parsed.
    Packet(OscPacket),
    /// Bytes were consumed (or none were available) without completing a frame.
    Pending,
    /// The peer closed the stream.
    Closed,
}

/// Reads framed packets from any `Read` stream.
///
/// Bytes are read straight into the decoder's buffer, never more than the
/// current length or payload still needs, so a read can never swallow the
/// start of the next frame.
pub struct PacketReader<T> {
    inner: T,
    decoder: FrameDecoder,
    config: FrameConfig,
}

impl<T: Read> PacketReader<T> {
    /// Create a new packet reader with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new packet reader with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            decoder: FrameDecoder::new(&config),
            config,
        }
    }

    /// Perform one read and advance the decoder.
    ///
    /// `WouldBlock`, `TimedOut` and `Interrupted` are reported as
    /// [`ReadOutcome::Pending`] so this can be driven from a polling loop.
    pub fn read_once(&mut self) -> Result<ReadOutcome, FrameError> {
        match self.read_chunk() {
            Err(FrameError::Io(err))
                if matches!(
                    err.kind(),
                    ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted
                ) =>
            {
                Ok(ReadOutcome::Pending)
            }
            other => other,
        }
    }

    /// Read the next complete packet (blocking).
    ///
    /// Returns `Err(FrameError::ConnectionClosed)` when EOF is reached.
    pub fn read_packet(&mut self) -> Result<OscPacket, FrameError> {
        loop {
            match self.read_chunk() {
                Ok(ReadOutcome::Packet(packet)) => return Ok(packet),
                Ok(ReadOutcome::Pending) => continue,
                Ok(ReadOutcome::Closed) => return Err(FrameError::ConnectionClosed),
                Err(FrameError::Io(err)) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            }
        }
    }

    fn read_chunk(&mut self) -> Result<ReadOutcome, FrameError> {
        let spare = self.decoder.spare_mut();
        let read = self.inner.read(spare)?;
        if read == 0 {
            return Ok(ReadOutcome::Closed);
        }

        Ok(match self.decoder.advance(read)? {
            Some(packet) => ReadOutcome::Packet(packet),
            None => ReadOutcome::Pending,
        })
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the reader and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    pub fn decoder(&self) -> &FrameDecoder {
        &self.decoder
    }

    /// Update maximum payload size for subsequent frames.
    pub fn set_max_payload_size(&mut self, max_payload_size: usize) {
        self.config.max_payload_size = max_payload_size;
        self.decoder.set_max_payload_size(max_payload_size);
    }

    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}
