use std::io::{ErrorKind, Write};

use bytes::BytesMut;

use crate::error::FrameError;
use crate::framing::{length_prefix, FrameConfig};
use crate::message::OscMessage;
use crate::packet::OscPacket;

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;

/// Writes framed packets to any `Write` stream.
///
/// The length prefix and the payload go out as two writes; callers sharing a
/// stream between threads must serialize whole `send_*` calls.
pub struct PacketWriter<T> {
    inner: T,
    buf: BytesMut,
    config: FrameConfig,
}

impl<T: Write> PacketWriter<T> {
    /// Create a new packet writer with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new packet writer with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
        }
    }

    /// Serialize and send a packet (blocking).
    pub fn send_packet(&mut self, packet: &OscPacket) -> Result<(), FrameError> {
        self.buf.clear();
        packet.write_to(&mut self.buf);
        self.send_buffered()
    }

    /// Serialize and send a single message (blocking).
    pub fn send_message(&mut self, message: &OscMessage) -> Result<(), FrameError> {
        self.buf.clear();
        message.write_to(&mut self.buf);
        self.send_buffered()
    }

    /// Send an already-encoded payload.
    pub fn send_payload(&mut self, payload: &[u8]) -> Result<(), FrameError> {
        self.check_size(payload.len())?;
        let prefix = length_prefix(payload.len())?;
        write_fully(&mut self.inner, &prefix)?;
        write_fully(&mut self.inner, payload)?;
        self.flush()
    }

    fn send_buffered(&mut self) -> Result<(), FrameError> {
        self.check_size(self.buf.len())?;
        let prefix = length_prefix(self.buf.len())?;
        write_fully(&mut self.inner, &prefix)?;
        write_fully(&mut self.inner, &self.buf)?;
        self.flush()
    }

    fn check_size(&self, size: usize) -> Result<(), FrameError> {
        if size > self.config.max_payload_size {
            return Err(FrameError::PayloadTooLarge {
                size,
                max: self.config.max_payload_size,
            });
        }
        Ok(())
    }

    /// Flush the underlying stream.
    pub fn flush(&mut self) -> Result<(), FrameError> {
        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the writer and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Update maximum payload size for subsequent sends.
    pub fn set_max_payload_size(&mut self, max_payload_size: usize) {
        self.config.max_payload_size = max_payload_size;
    }

    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

fn write_fully<W: Write>(inner: &mut W, bytes: &[u8]) -> Result<(), FrameError> {
    let mut offset = 0usize;
    while offset < bytes.len() {
        match inner.write(&bytes[offset..]) {
            Ok(0) => return Err(FrameError::ConnectionClosed),
            Ok(n) => offset += n,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) if err.kind() == ErrorKind::WouldBlock => continue,
            Err(err) => return Err(FrameError::Io(err)),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::bundle::OscBundle;
    use crate::framing::{FrameDecoder, LENGTH_PREFIX_SIZE};

    fn decode_all(bytes: &[u8]) -> Vec<OscPacket> {
        FrameDecoder::new(&FrameConfig::default())
            .feed(bytes)
            .unwrap()
    }

    #[test]
    fn write_single_message() {
        let mut msg = OscMessage::new("/hello");
        msg.write_int(5).unwrap();
        let mut writer = PacketWriter::new(Cursor::new(Vec::<u8>::new()));

        writer.send_message(&msg).unwrap();

        let wire = writer.into_inner().into_inner();
        assert_eq!(
            &wire[..LENGTH_PREFIX_SIZE],
            &(msg.encoded_len() as u32).to_le_bytes()
        );
        assert_eq!(decode_all(&wire), vec![OscPacket::from(msg)]);
    }

    #[test]
    fn write_message_then_bundle() {
        let mut bundle = OscBundle::new();
        bundle.push(OscMessage::new("/inner"));
        let first = OscPacket::from(OscMessage::new("/outer"));
        let second = OscPacket::from(bundle);

        let mut writer = PacketWriter::new(Cursor::new(Vec::<u8>::new()));
        writer.send_packet(&first).unwrap();
        writer.send_packet(&second).unwrap();

        let wire = writer.into_inner().into_inner();
        assert_eq!(decode_all(&wire), vec![first, second]);
    }

    #[test]
    fn prefix_and_payload_are_separate_writes() {
        let mut writer = PacketWriter::new(RecordingWriter::default());
        writer.send_payload(b"/a\0\0").unwrap();

        let writes = writer.into_inner().writes;
        assert_eq!(writes, vec![4u32.to_le_bytes().to_vec(), b"/a\0\0".to_vec()]);
    }

    #[test]
    fn payload_too_large_rejected() {
        let cfg = FrameConfig {
            max_payload_size: 4,
            ..FrameConfig::default()
        };
        let mut writer = PacketWriter::with_config(Cursor::new(Vec::<u8>::new()), cfg);

        let err = writer.send_message(&OscMessage::new("/oversized")).unwrap_err();
        assert!(matches!(err, FrameError::PayloadTooLarge { max: 4, .. }));
        assert!(writer.get_ref().get_ref().is_empty());
    }

    #[test]
    fn flush_propagates() {
        let sink = FlushTrackingWriter::default();
        let flag = Arc::clone(&sink.flushed);
        let mut writer = PacketWriter::new(sink);

        writer.send_message(&OscMessage::new("/x")).unwrap();

        assert!(flag.load(Ordering::SeqCst));
    }

    #[test]
    fn handles_interrupted_and_would_block() {
        for kind in [ErrorKind::Interrupted, ErrorKind::WouldBlock] {
            let mut writer = PacketWriter::new(FailsOnceWriter {
                kind,
                write_failed: false,
                flush_failed: false,
                data: Vec::new(),
            });
            writer.send_message(&OscMessage::new("/retry")).unwrap();

            let data = writer.into_inner().data;
            assert_eq!(decode_all(&data).len(), 1);
        }
    }

    #[test]
    fn connection_closed_when_write_returns_zero() {
        let mut writer = PacketWriter::new(ZeroWriter);
        let err = writer.send_message(&OscMessage::new("/x")).unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));
    }

    #[test]
    fn accessors_and_into_inner() {
        let mut writer = PacketWriter::new(Cursor::new(Vec::<u8>::new()));
        writer.set_max_payload_size(128);
        assert_eq!(writer.config().max_payload_size, 128);

        let _ = writer.get_ref();
        let _ = writer.get_mut();
        let _inner = writer.into_inner();
    }

    #[derive(Default)]
    struct RecordingWriter {
        writes: Vec<Vec<u8>>,
    }

    impl Write for RecordingWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.writes.push(buf.to_vec());
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct FlushTrackingWriter {
        flushed: Arc<AtomicBool>,
        data: Vec<u8>,
    }

    impl Write for FlushTrackingWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.data.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            self.flushed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FailsOnceWriter {
        kind: ErrorKind,
        write_failed: bool,
        flush_failed: bool,
        data: Vec<u8>,
    }

    impl Write for FailsOnceWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            if !self.write_failed {
                self.write_failed = true;
                return Err(std::io::Error::from(self.kind));
            }
            self.data.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            if !self.flush_failed {
                self.flush_failed = true;
                return Err(std::io::Error::from(self.kind));
            }
            Ok(())
        }
    }

    struct ZeroWriter;

    impl Write for ZeroWriter {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Ok(0)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }
}
