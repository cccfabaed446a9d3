use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, Weak};
use std::thread::JoinHandle;
use std::time::Duration;

use bytes::Bytes;
use mirrorlink_connection::Connection;
use mirrorlink_osc::OscMessage;
use tracing::{debug, error, trace, warn};

use crate::channel::{Channel, ChannelRoutes};
use crate::channels::image_codec::{codec_for, DecodedImage, ImageCodec};
use crate::channels::latest::NewestQueue;
use crate::config::SessionConfig;
use crate::control::ChannelMode;
use crate::error::{Result, SessionError};

pub const IMAGE_CHANNEL_TYPE: &str = "ImageChannel";

/// `i width, i height, b encoded data, i frame index`.
pub const SCREEN_ADDRESS: &str = "/Screen";

/// Longest the decode thread sleeps without a signal.
pub const DECODE_WAKE_INTERVAL: Duration = Duration::from_millis(50);

const FRAME_QUEUE_CAPACITY: usize = 2;
const DECODE_THREAD_NAME: &str = "mirrorlink-decode";

/// Runtime image settings shared with the application.
#[derive(Debug, Default)]
pub struct ImageSettings {
    quality_override: AtomicU8,
    skip_images: AtomicBool,
}

impl ImageSettings {
    /// Override the configured encoder quality. `None` restores it.
    pub fn set_quality_override(&self, quality: Option<u8>) {
        let value = quality.map(|q| q.clamp(1, 100)).unwrap_or(0);
        self.quality_override.store(value, Ordering::Relaxed);
    }

    pub fn quality_override(&self) -> Option<u8> {
        match self.quality_override.load(Ordering::Relaxed) {
            0 => None,
            quality => Some(quality),
        }
    }

    /// Pause or resume sending frames.
    pub fn set_skip_images(&self, skip: bool) {
        self.skip_images.store(skip, Ordering::Relaxed);
    }

    pub fn skip_images(&self) -> bool {
        self.skip_images.load(Ordering::Relaxed)
    }
}

/// A frame ready for display.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DisplayFrame {
    pub width: u32,
    pub height: u32,
    /// RGBA8, `width * height * 4` bytes.
    pub pixels: Vec<u8>,
    pub index: i32,
}

/// Two display buffers and an atomic index naming the visible one.
///
/// Writing requires `&mut self`, so there is a single writer; readers only
/// ever see the visible buffer while the other is being filled.
#[derive(Debug, Default)]
pub struct DoubleBuffer {
    buffers: [DisplayFrame; 2],
    visible: AtomicUsize,
    presented: u64,
}

impl DoubleBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write a frame into the hidden buffer and make it visible.
    ///
    /// The hidden buffer is reallocated when the dimensions change.
    pub fn present(&mut self, width: u32, height: u32, pixels: &[u8], index: i32) {
        let back = 1 - self.visible.load(Ordering::Acquire);
        let buffer = &mut self.buffers[back];

        if buffer.width != width || buffer.height != height || buffer.pixels.len() != pixels.len()
        {
            trace!(width, height, "recreating display buffer");
            *buffer = DisplayFrame {
                width,
                height,
                pixels: vec![0; pixels.len()],
                index,
            };
        }
        buffer.pixels.copy_from_slice(pixels);
        buffer.index = index;

        self.visible.store(back, Ordering::Release);
        self.presented += 1;
    }

    pub fn visible(&self) -> &DisplayFrame {
        &self.buffers[self.visible.load(Ordering::Acquire)]
    }

    /// Which of the two buffers is visible.
    pub fn visible_slot(&self) -> usize {
        self.visible.load(Ordering::Acquire)
    }

    /// Frames presented so far.
    pub fn presented(&self) -> u64 {
        self.presented
    }
}

/// Image channel counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImageStats {
    pub frames_sent: u64,
    pub frames_received: u64,
    pub frames_decoded: u64,
    pub frames_displayed: u64,
    pub frames_dropped: u64,
    pub decode_failures: u64,
}

#[derive(Debug)]
struct EncodedFrame {
    width: u32,
    height: u32,
    data: Bytes,
}

struct DecodeShared {
    encoded: Mutex<NewestQueue<EncodedFrame>>,
    decoded: Mutex<NewestQueue<DecodedImage>>,
    signal: Mutex<bool>,
    wake: Condvar,
    exit: AtomicBool,
    codec: Arc<dyn ImageCodec>,
    frames_received: AtomicU64,
    frames_decoded: AtomicU64,
    decode_failures: AtomicU64,
}

impl DecodeShared {
    fn notify(&self) {
        *lock(&self.signal) = true;
        self.wake.notify_one();
    }

    fn receive(&self, message: &mut OscMessage) {
        let frame = match read_screen_message(message) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(error = %err, "discarding malformed screen message");
                return;
            }
        };

        let (index, frame) = frame;
        self.frames_received.fetch_add(1, Ordering::Relaxed);
        if !lock(&self.encoded).push(index, frame) {
            debug!(index, "discarding stale frame");
            return;
        }
        self.notify();
    }

    fn run(&self) {
        while !self.exit.load(Ordering::SeqCst) {
            {
                let signaled = lock(&self.signal);
                let (mut signaled, _) = self
                    .wake
                    .wait_timeout_while(signaled, DECODE_WAKE_INTERVAL, |signaled| {
                        !*signaled && !self.exit.load(Ordering::SeqCst)
                    })
                    .unwrap_or_else(std::sync::PoisonError::into_inner);
                *signaled = false;
            }
            if self.exit.load(Ordering::SeqCst) {
                break;
            }

            let Some((index, frame)) = lock(&self.encoded).take_newest() else {
                continue;
            };
            self.decode(index, frame);
        }
        trace!("decode loop exiting");
    }

    fn decode(&self, index: i32, frame: EncodedFrame) {
        match self.codec.decode(&frame.data) {
            Ok(image) if image.width == frame.width && image.height == frame.height => {
                self.frames_decoded.fetch_add(1, Ordering::Relaxed);
                lock(&self.decoded).push(index, image);
            }
            Ok(image) => {
                self.decode_failures.fetch_add(1, Ordering::Relaxed);
                warn!(
                    index,
                    announced = %format_args!("{}x{}", frame.width, frame.height),
                    decoded = %format_args!("{}x{}", image.width, image.height),
                    "frame dimensions disagree with header"
                );
            }
            Err(err) => {
                self.decode_failures.fetch_add(1, Ordering::Relaxed);
                warn!(index, error = %err, "frame decode failed");
            }
        }
    }
}

fn read_screen_message(message: &mut OscMessage) -> Result<(i32, EncodedFrame)> {
    let width = message.read_int()?;
    let height = message.read_int()?;
    let data = message.read_blob()?;
    let index = message.read_int()?;

    let width = u32::try_from(width)
        .map_err(|_| SessionError::Protocol(format!("negative frame width {width}")))?;
    let height = u32::try_from(height)
        .map_err(|_| SessionError::Protocol(format!("negative frame height {height}")))?;

    Ok((
        index,
        EncodedFrame {
            width,
            height,
            data,
        },
    ))
}

/// Owns the decode thread. Dropping it stops and joins the thread.
struct DecodeWorker {
    shared: Arc<DecodeShared>,
    handle: Option<JoinHandle<()>>,
}

impl DecodeWorker {
    fn spawn(codec: Arc<dyn ImageCodec>) -> Result<Self> {
        let shared = Arc::new(DecodeShared {
            encoded: Mutex::new(NewestQueue::new(FRAME_QUEUE_CAPACITY)),
            decoded: Mutex::new(NewestQueue::new(FRAME_QUEUE_CAPACITY)),
            signal: Mutex::new(false),
            wake: Condvar::new(),
            exit: AtomicBool::new(false),
            codec,
            frames_received: AtomicU64::new(0),
            frames_decoded: AtomicU64::new(0),
            decode_failures: AtomicU64::new(0),
        });

        let worker_shared = Arc::clone(&shared);
        let handle = std::thread::Builder::new()
            .name(DECODE_THREAD_NAME.to_string())
            .spawn(move || worker_shared.run())
            .map_err(|source| SessionError::WorkerSpawn {
                name: DECODE_THREAD_NAME,
                source,
            })?;

        Ok(Self {
            shared,
            handle: Some(handle),
        })
    }

    fn stop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        self.shared.exit.store(true, Ordering::SeqCst);
        self.shared.notify();
        if handle.join().is_err() {
            error!("decode thread panicked");
        }
    }
}

impl Drop for DecodeWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Streams screen frames from the writing side to the reading side.
///
/// The writer encodes and sends frames from its own thread. The reader
/// queues encoded frames from dispatch, decodes them on a dedicated thread
/// and shows the newest decoded frame when ticked. Every stage keeps at most
/// two frames and prefers the newest, so a slow stage drops frames instead
/// of building latency.
pub struct ImageChannel {
    mode: ChannelMode,
    connection: Arc<Connection>,
    routes: ChannelRoutes,
    decoder: Option<DecodeWorker>,
    codec: Option<Arc<dyn ImageCodec>>,
    settings: Arc<ImageSettings>,
    quality: u8,
    next_index: i32,
    display: DoubleBuffer,
    frames_sent: u64,
}

impl ImageChannel {
    /// Channel factory entry point.
    pub fn create(
        mode: ChannelMode,
        connection: &Arc<Connection>,
        config: &SessionConfig,
    ) -> Result<Box<dyn Channel>> {
        Ok(Box::new(Self::new(mode, connection, config)?))
    }

    /// Build with the codec named in `config`.
    pub fn new(mode: ChannelMode, connection: &Arc<Connection>, config: &SessionConfig) -> Result<Self> {
        let codec = codec_for(config.image_codec)?;
        let channel = Self::with_codec(mode, connection, Some(codec), config.image_quality)?;
        channel.settings.set_skip_images(config.skip_images);
        Ok(channel)
    }

    /// Build with an explicit codec. Without a codec a writer sends nothing
    /// and a reader cannot be created.
    pub fn with_codec(
        mode: ChannelMode,
        connection: &Arc<Connection>,
        codec: Option<Arc<dyn ImageCodec>>,
        quality: u8,
    ) -> Result<Self> {
        let mut routes = ChannelRoutes::new(connection);
        let mut decoder = None;

        if mode == ChannelMode::Read {
            let codec = codec.clone().ok_or_else(|| {
                SessionError::Config("a reading image channel needs a codec".to_string())
            })?;
            let worker = DecodeWorker::spawn(codec)?;

            connection.set_message_options(SCREEN_ADDRESS, FRAME_QUEUE_CAPACITY);
            let weak: Weak<DecodeShared> = Arc::downgrade(&worker.shared);
            routes.add(SCREEN_ADDRESS, move |message| {
                if let Some(shared) = weak.upgrade() {
                    shared.receive(message);
                }
            });
            decoder = Some(worker);
        }

        debug!(%mode, codec = codec.as_ref().map(|c| c.name()), "image channel created");

        Ok(Self {
            mode,
            connection: Arc::clone(connection),
            routes,
            decoder,
            codec,
            settings: Arc::new(ImageSettings::default()),
            quality: quality.clamp(1, 100),
            next_index: 0,
            display: DoubleBuffer::new(),
            frames_sent: 0,
        })
    }

    /// Encode and send one RGBA8 frame.
    ///
    /// Returns `Ok(false)` without sending when there is no codec or images
    /// are being skipped.
    pub fn send_frame(&mut self, width: u32, height: u32, rgba: &[u8]) -> Result<bool> {
        if self.mode != ChannelMode::Write {
            return Err(SessionError::WrongMode {
                channel: IMAGE_CHANNEL_TYPE,
                mode: self.mode,
            });
        }
        let Some(codec) = &self.codec else {
            return Ok(false);
        };
        if self.settings.skip_images() {
            return Ok(false);
        }

        let quality = self.settings.quality_override().unwrap_or(self.quality);
        let data = codec.encode(width, height, rgba, quality)?;

        let mut message = self.connection.new_message(SCREEN_ADDRESS);
        message.write_int(dimension(width)?)?;
        message.write_int(dimension(height)?)?;
        message.write_blob(&data)?;
        message.write_int(self.next_index)?;
        self.connection.send_message(&message)?;

        trace!(index = self.next_index, bytes = data.len(), "frame sent");
        self.next_index = self.next_index.wrapping_add(1);
        self.frames_sent += 1;
        Ok(true)
    }

    /// Show the newest decoded frame, if one is waiting.
    pub fn update_display(&mut self) -> bool {
        let Some(decoder) = &self.decoder else {
            return false;
        };
        let Some((index, image)) = lock(&decoder.shared.decoded).take_newest() else {
            return false;
        };

        self.display
            .present(image.width, image.height, &image.rgba, index);
        true
    }

    /// The frame currently visible, once one has been displayed.
    pub fn visible_frame(&self) -> Option<&DisplayFrame> {
        (self.display.presented() > 0).then(|| self.display.visible())
    }

    pub fn display(&self) -> &DoubleBuffer {
        &self.display
    }

    pub fn settings(&self) -> &Arc<ImageSettings> {
        &self.settings
    }

    /// Encoded frames waiting for the decode thread.
    pub fn pending_encoded(&self) -> usize {
        self.decoder
            .as_ref()
            .map_or(0, |d| lock(&d.shared.encoded).len())
    }

    /// Decoded frames waiting for display.
    pub fn pending_decoded(&self) -> usize {
        self.decoder
            .as_ref()
            .map_or(0, |d| lock(&d.shared.decoded).len())
    }

    pub fn stats(&self) -> ImageStats {
        let mut stats = ImageStats {
            frames_sent: self.frames_sent,
            frames_displayed: self.display.presented(),
            ..ImageStats::default()
        };
        if let Some(decoder) = &self.decoder {
            let shared = &decoder.shared;
            stats.frames_received = shared.frames_received.load(Ordering::Relaxed);
            stats.frames_decoded = shared.frames_decoded.load(Ordering::Relaxed);
            stats.decode_failures = shared.decode_failures.load(Ordering::Relaxed);
            stats.frames_dropped = lock(&shared.encoded).dropped() + lock(&shared.decoded).dropped();
        }
        stats
    }
}

impl Channel for ImageChannel {
    fn type_name(&self) -> &'static str {
        IMAGE_CHANNEL_TYPE
    }

    fn mode(&self) -> ChannelMode {
        self.mode
    }

    fn tick(&mut self, _delta: Duration) {
        if self.mode == ChannelMode::Read {
            self.update_display();
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl Drop for ImageChannel {
    fn drop(&mut self) {
        self.routes.clear();
        if let Some(mut decoder) = self.decoder.take() {
            decoder.stop();
        }
    }
}

fn dimension(value: u32) -> Result<i32> {
    i32::try_from(value).map_err(|_| SessionError::Codec(format!("dimension {value} too large")))
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

#[cfg(all(test, unix))]
mod tests {
    use std::time::Instant;

    use mirrorlink_connection::ConnectionConfig;
    use mirrorlink_transport::LinkStream;

    use super::*;
    use crate::channels::image_codec::RawCodec;

    /// Raw codec whose decoder blocks until the gate opens and records the
    /// fill byte of every frame it decodes.
    #[derive(Default)]
    struct GatedCodec {
        open: Mutex<bool>,
        opened: Condvar,
        entered: AtomicUsize,
        decoded_marks: Mutex<Vec<u8>>,
    }

    impl GatedCodec {
        fn open(&self) {
            *self.open.lock().unwrap() = true;
            self.opened.notify_all();
        }
    }

    impl ImageCodec for GatedCodec {
        fn name(&self) -> &'static str {
            "gated"
        }

        fn encode(&self, width: u32, height: u32, rgba: &[u8], quality: u8) -> Result<Vec<u8>> {
            RawCodec.encode(width, height, rgba, quality)
        }

        fn decode(&self, data: &[u8]) -> Result<DecodedImage> {
            self.entered.fetch_add(1, Ordering::SeqCst);
            let open = self.open.lock().unwrap();
            drop(self.opened.wait_while(open, |open| !*open).unwrap());
            let image = RawCodec.decode(data)?;
            self.decoded_marks.lock().unwrap().push(image.rgba[0]);
            Ok(image)
        }
    }

    fn connected_pair() -> (Arc<Connection>, Arc<Connection>) {
        let (left, right) = LinkStream::pair().unwrap();
        (
            Arc::new(Connection::new(left, ConnectionConfig::default()).unwrap()),
            Arc::new(Connection::new(right, ConnectionConfig::default()).unwrap()),
        )
    }

    fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        condition()
    }

    fn filled(width: u32, height: u32, mark: u8) -> Vec<u8> {
        vec![mark; (width * height * 4) as usize]
    }

    #[test]
    fn double_buffer_flips_and_recreates() {
        let mut display = DoubleBuffer::new();
        let first_slot = display.visible_slot();

        display.present(2, 2, &filled(2, 2, 1), 1);
        assert_ne!(display.visible_slot(), first_slot);
        assert_eq!(display.visible().index, 1);

        display.present(4, 2, &filled(4, 2, 2), 2);
        assert_eq!(display.visible_slot(), first_slot);
        assert_eq!(display.visible().width, 4);
        assert_eq!(display.visible().pixels, filled(4, 2, 2));
        assert_eq!(display.presented(), 2);
    }

    #[test]
    fn frames_keep_flowing_across_index_wrap() {
        let (tx, rx) = connected_pair();
        let mut writer =
            ImageChannel::with_codec(ChannelMode::Write, &tx, Some(Arc::new(RawCodec)), 80)
                .unwrap();
        let mut reader =
            ImageChannel::with_codec(ChannelMode::Read, &rx, Some(Arc::new(RawCodec)), 80)
                .unwrap();
        writer.next_index = i32::MAX;

        for (mark, index) in [(1u8, i32::MAX), (2, i32::MIN), (3, i32::MIN + 1)] {
            assert!(writer.send_frame(2, 2, &filled(2, 2, mark)).unwrap());
            assert!(
                wait_until(Duration::from_secs(2), || {
                    rx.receive_and_dispatch_messages(Duration::from_millis(5));
                    reader.tick(Duration::ZERO);
                    reader.visible_frame().is_some_and(|f| f.index == index)
                }),
                "frame {index} never displayed"
            );
            assert_eq!(reader.visible_frame().unwrap().pixels, filled(2, 2, mark));
        }
    }

    #[test]
    fn settings_override_and_skip() {
        let settings = ImageSettings::default();
        assert_eq!(settings.quality_override(), None);
        settings.set_quality_override(Some(150));
        assert_eq!(settings.quality_override(), Some(100));
        settings.set_quality_override(None);
        assert_eq!(settings.quality_override(), None);

        settings.set_skip_images(true);
        assert!(settings.skip_images());
    }

    #[test]
    fn frames_flow_from_writer_to_display() {
        let (tx, rx) = connected_pair();
        let mut writer =
            ImageChannel::with_codec(ChannelMode::Write, &tx, Some(Arc::new(RawCodec)), 80)
                .unwrap();
        let mut reader =
            ImageChannel::with_codec(ChannelMode::Read, &rx, Some(Arc::new(RawCodec)), 80)
                .unwrap();
        assert!(reader.visible_frame().is_none());

        assert!(writer.send_frame(4, 4, &filled(4, 4, 9)).unwrap());

        assert!(wait_until(Duration::from_secs(2), || {
            rx.receive_and_dispatch_messages(Duration::from_millis(5));
            reader.tick(Duration::ZERO);
            reader.visible_frame().is_some()
        }));

        let frame = reader.visible_frame().unwrap();
        assert_eq!((frame.width, frame.height, frame.index), (4, 4, 0));
        assert_eq!(frame.pixels, filled(4, 4, 9));
        assert_eq!(writer.stats().frames_sent, 1);
        assert_eq!(reader.stats().frames_displayed, 1);
    }

    #[test]
    fn stalled_decoder_shows_newest_frame() {
        let (tx, rx) = connected_pair();
        let gated = Arc::new(GatedCodec::default());
        let mut writer =
            ImageChannel::with_codec(ChannelMode::Write, &tx, Some(Arc::new(RawCodec)), 80)
                .unwrap();
        let mut reader =
            ImageChannel::with_codec(ChannelMode::Read, &rx, Some(gated.clone()), 80).unwrap();

        assert!(writer.send_frame(64, 64, &filled(64, 64, 1)).unwrap());
        assert!(wait_until(Duration::from_secs(2), || {
            rx.receive_and_dispatch_messages(Duration::from_millis(5));
            gated.entered.load(Ordering::SeqCst) == 1
        }));

        // The decode thread is stuck on frame 1 while 2 and 3 arrive.
        for mark in 2..=3u8 {
            assert!(writer.send_frame(64, 64, &filled(64, 64, mark)).unwrap());
        }
        assert!(wait_until(Duration::from_secs(2), || {
            rx.receive_and_dispatch_messages(Duration::from_millis(5));
            reader.stats().frames_received == 3
        }));
        assert!(reader.pending_encoded() <= 2);

        gated.open();
        assert!(wait_until(Duration::from_secs(2), || {
            reader.update_display();
            reader.visible_frame().is_some_and(|f| f.index == 2)
        }));

        let frame = reader.visible_frame().unwrap();
        assert_eq!(frame.pixels[0], 3);
        assert!(reader.pending_decoded() <= 2);
        assert!(!gated.decoded_marks.lock().unwrap().contains(&2));
    }

    #[test]
    fn screen_limit_is_set_for_readers() {
        let (_tx, rx) = connected_pair();
        let reader =
            ImageChannel::with_codec(ChannelMode::Read, &rx, Some(Arc::new(RawCodec)), 80)
                .unwrap();
        assert_eq!(rx.route_count(), 1);
        drop(reader);
        assert_eq!(rx.route_count(), 0);
    }

    #[test]
    fn writer_without_codec_or_while_skipping_sends_nothing() {
        let (tx, _rx) = connected_pair();
        let mut bare = ImageChannel::with_codec(ChannelMode::Write, &tx, None, 80).unwrap();
        assert!(!bare.send_frame(1, 1, &[0; 4]).unwrap());

        let mut writer =
            ImageChannel::with_codec(ChannelMode::Write, &tx, Some(Arc::new(RawCodec)), 80)
                .unwrap();
        writer.settings().set_skip_images(true);
        assert!(!writer.send_frame(1, 1, &[0; 4]).unwrap());
        assert_eq!(tx.stats().packets_sent, 0);
    }

    #[test]
    fn reader_rejects_send_and_requires_codec() {
        let (_tx, rx) = connected_pair();
        assert!(ImageChannel::with_codec(ChannelMode::Read, &rx, None, 80).is_err());

        let mut reader =
            ImageChannel::with_codec(ChannelMode::Read, &rx, Some(Arc::new(RawCodec)), 80)
                .unwrap();
        assert!(matches!(
            reader.send_frame(1, 1, &[0; 4]),
            Err(SessionError::WrongMode { .. })
        ));
    }

    #[test]
    fn malformed_screen_message_is_ignored() {
        let (tx, rx) = connected_pair();
        let reader =
            ImageChannel::with_codec(ChannelMode::Read, &rx, Some(Arc::new(RawCodec)), 80)
                .unwrap();

        let mut bogus = tx.new_message(SCREEN_ADDRESS);
        bogus.write_string("not a frame").unwrap();
        tx.send_message(&bogus).unwrap();

        assert!(wait_until(Duration::from_secs(2), || {
            rx.receive_and_dispatch_messages(Duration::from_millis(5));
            rx.stats().packets_received == 1
        }));
        assert_eq!(reader.stats().frames_received, 0);
    }
}
