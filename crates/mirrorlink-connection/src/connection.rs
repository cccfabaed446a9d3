use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use mirrorlink_osc::{
    ByteOrder, FrameConfig, FrameError, OscMessage, OscPacket, PacketReader, PacketWriter,
    ReadOutcome, DEFAULT_MAX_PAYLOAD,
};
use mirrorlink_transport::LinkStream;
use tracing::{debug, error, info, trace, warn};

use crate::dispatch::{invoke_handlers, DispatchMap, RouteHandle};
use crate::error::{ConnectionError, Result};
use crate::limits::MessageLimits;
use crate::queue::PacketQueue;

/// Default bounded wait for one receive pass.
pub const DEFAULT_RECEIVE_WAIT: Duration = Duration::from_millis(10);

const RECEIVE_THREAD_NAME: &str = "mirrorlink-recv";

/// Configuration for a [`Connection`].
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Byte order for argument values in both directions.
    pub byte_order: ByteOrder,
    /// Maximum frame payload accepted or sent.
    pub max_payload_size: usize,
    /// Bounded wait used by each pass of the receive thread.
    pub receive_wait: Duration,
    /// Timeout applied to blocking writes.
    pub write_timeout: Option<Duration>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            byte_order: ByteOrder::Network,
            max_payload_size: DEFAULT_MAX_PAYLOAD,
            receive_wait: DEFAULT_RECEIVE_WAIT,
            write_timeout: Some(Duration::from_secs(5)),
        }
    }
}

impl ConnectionConfig {
    fn frame_config(&self) -> FrameConfig {
        FrameConfig {
            max_payload_size: self.max_payload_size,
            byte_order: self.byte_order,
        }
    }
}

/// Traffic counters for a connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionStats {
    pub packets_received: u64,
    pub packets_sent: u64,
    pub packets_evicted: u64,
    pub packets_malformed: u64,
}

struct Shared {
    stream: LinkStream,
    config: ConnectionConfig,
    reader: Mutex<PacketReader<LinkStream>>,
    writer: Mutex<PacketWriter<LinkStream>>,
    packets: Mutex<PacketQueue>,
    limits: Mutex<MessageLimits>,
    routes: Mutex<DispatchMap>,
    dispatching: Mutex<()>,
    last_receive: Mutex<Instant>,
    error_message: Mutex<Option<String>>,
    connected: AtomicBool,
    has_error: AtomicBool,
    exit: AtomicBool,
    packets_received: AtomicU64,
    packets_sent: AtomicU64,
    packets_malformed: AtomicU64,
}

/// A message connection over an established stream.
///
/// Receiving happens either on a background thread started with
/// [`Connection::start_receive_thread`] or by calling
/// [`Connection::receive_and_dispatch_messages`] from a tick loop. Handlers
/// always run inside [`Connection::dispatch_messages`], on the caller's
/// thread. Sending is safe from any thread.
///
/// The connection never reconnects: once the peer hangs up or the stream
/// fails, [`Connection::is_connected`] stays `false`.
pub struct Connection {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Connection {
    /// Wrap a connected stream.
    pub fn new(stream: LinkStream, config: ConnectionConfig) -> Result<Self> {
        stream.set_write_timeout(config.write_timeout)?;

        let frame_config = config.frame_config();
        let reader = PacketReader::with_config(stream.try_clone()?, frame_config.clone());
        let writer = PacketWriter::with_config(stream.try_clone()?, frame_config);

        debug!(transport = stream.transport_name(), "connection opened");

        Ok(Self {
            shared: Arc::new(Shared {
                stream,
                config,
                reader: Mutex::new(reader),
                writer: Mutex::new(writer),
                packets: Mutex::new(PacketQueue::new()),
                limits: Mutex::new(MessageLimits::new()),
                routes: Mutex::new(DispatchMap::new()),
                dispatching: Mutex::new(()),
                last_receive: Mutex::new(Instant::now()),
                error_message: Mutex::new(None),
                connected: AtomicBool::new(true),
                has_error: AtomicBool::new(false),
                exit: AtomicBool::new(false),
                packets_received: AtomicU64::new(0),
                packets_sent: AtomicU64::new(0),
                packets_malformed: AtomicU64::new(0),
            }),
            worker: Mutex::new(None),
        })
    }

    /// Start receiving on a dedicated thread. Idempotent.
    pub fn start_receive_thread(&self) -> Result<()> {
        let mut worker = lock(&self.worker);
        if worker.is_some() {
            return Ok(());
        }

        self.shared.exit.store(false, Ordering::SeqCst);
        let shared = Arc::clone(&self.shared);
        let handle = std::thread::Builder::new()
            .name(RECEIVE_THREAD_NAME.to_string())
            .spawn(move || shared.receive_loop())
            .map_err(ConnectionError::WorkerSpawn)?;

        *worker = Some(handle);
        debug!("receive thread started");
        Ok(())
    }

    /// Signal the receive thread to exit and join it.
    ///
    /// The thread notices within one receive wait.
    pub fn stop_receive_thread(&self) {
        let handle = lock(&self.worker).take();
        let Some(handle) = handle else {
            return;
        };

        self.shared.exit.store(true, Ordering::SeqCst);
        if handle.thread().id() == std::thread::current().id() {
            return;
        }
        if handle.join().is_err() {
            error!("receive thread panicked");
        }
        self.shared.exit.store(false, Ordering::SeqCst);
        debug!("receive thread stopped");
    }

    pub fn is_threaded(&self) -> bool {
        lock(&self.worker).is_some()
    }

    /// One bounded receive pass: wait up to `max_wait` for data and queue
    /// the next packet that decodes. Returns the number of packets queued,
    /// zero or one.
    ///
    /// Returns as soon as a packet has been decoded, even if more bytes are
    /// waiting.
    pub fn receive_packets(&self, max_wait: Duration) -> usize {
        self.shared.receive_packets(max_wait)
    }

    /// Dispatch every queued packet, in arrival order.
    ///
    /// Bundles dispatch each contained message. Returns the number of
    /// messages that reached at least one handler. Handlers may add or remove
    /// routes and send messages, but must not dispatch recursively.
    pub fn dispatch_messages(&self) -> usize {
        let shared = &self.shared;
        let _ordered = lock(&shared.dispatching);
        let packets = lock(&shared.packets).drain();

        let mut handled = 0;
        for packet in packets {
            for mut message in packet.into_messages() {
                let handlers = lock(&shared.routes).handlers_for(message.address());
                if invoke_handlers(&handlers, &mut message) {
                    handled += 1;
                } else {
                    trace!(address = message.address(), "no handler for message");
                }
            }
        }
        handled
    }

    /// Receive then dispatch, for use without a receive thread.
    pub fn receive_and_dispatch_messages(&self, max_wait: Duration) -> usize {
        self.receive_packets(max_wait);
        self.dispatch_messages()
    }

    /// Send a packet. Only the send path is locked.
    pub fn send_packet(&self, packet: &OscPacket) -> Result<()> {
        self.send_with(|writer| writer.send_packet(packet))
    }

    pub fn send_message(&self, message: &OscMessage) -> Result<()> {
        self.send_with(|writer| writer.send_message(message))
    }

    fn send_with<F>(&self, send: F) -> Result<()>
    where
        F: FnOnce(&mut PacketWriter<LinkStream>) -> std::result::Result<(), FrameError>,
    {
        if !self.is_connected() {
            return Err(ConnectionError::Disconnected(
                "send on closed connection".to_string(),
            ));
        }

        let result = send(&mut lock(&self.shared.writer));
        match result {
            Ok(()) => {
                self.shared.packets_sent.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(err @ FrameError::PayloadTooLarge { .. }) | Err(err @ FrameError::Packet(_)) => {
                Err(err.into())
            }
            Err(err) => {
                warn!(error = %err, "send failed, marking connection closed");
                self.shared.connected.store(false, Ordering::SeqCst);
                Err(err.into())
            }
        }
    }

    /// An empty message using this connection's byte order.
    pub fn new_message(&self, address: impl Into<String>) -> OscMessage {
        OscMessage::with_byte_order(address, self.shared.config.byte_order)
    }

    pub fn byte_order(&self) -> ByteOrder {
        self.shared.config.byte_order
    }

    /// Register a handler for messages addressed exactly to `path`.
    pub fn add_route<F>(&self, path: impl Into<String>, handler: F) -> RouteHandle
    where
        F: Fn(&mut OscMessage) + Send + Sync + 'static,
    {
        lock(&self.shared.routes).add_route(path, handler)
    }

    /// Remove a handler. Unknown handles are ignored.
    pub fn remove_route(&self, path: &str, handle: RouteHandle) -> bool {
        lock(&self.shared.routes).remove_route(path, handle)
    }

    pub fn route_count(&self) -> usize {
        lock(&self.shared.routes).route_count()
    }

    /// Limit queued messages for an address or `prefix*`. 0 removes the limit.
    pub fn set_message_options(&self, path_or_prefix: &str, max_queued: usize) {
        lock(&self.shared.limits).set(path_or_prefix, max_queued);
    }

    /// Whether the transport is still usable.
    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    /// Record a fatal session error. The first message wins.
    pub fn set_error_state(&self, message: impl Into<String>) {
        let message = message.into();
        let mut current = lock(&self.shared.error_message);
        if current.is_none() {
            error!(%message, "connection entered error state");
            *current = Some(message);
        }
        self.shared.has_error.store(true, Ordering::SeqCst);
    }

    pub fn has_error_state(&self) -> bool {
        self.shared.has_error.load(Ordering::SeqCst)
    }

    pub fn error_message(&self) -> Option<String> {
        lock(&self.shared.error_message).clone()
    }

    /// Connected and not in an error state.
    pub fn is_valid(&self) -> bool {
        self.is_connected() && !self.has_error_state()
    }

    pub fn time_since_last_receive(&self) -> Duration {
        lock(&self.shared.last_receive).elapsed()
    }

    pub fn queued_packet_count(&self) -> usize {
        lock(&self.shared.packets).len()
    }

    pub fn stats(&self) -> ConnectionStats {
        ConnectionStats {
            packets_received: self.shared.packets_received.load(Ordering::Relaxed),
            packets_sent: self.shared.packets_sent.load(Ordering::Relaxed),
            packets_evicted: lock(&self.shared.packets).total_evicted(),
            packets_malformed: self.shared.packets_malformed.load(Ordering::Relaxed),
        }
    }

    pub fn transport_name(&self) -> &'static str {
        self.shared.stream.transport_name()
    }

    pub fn peer_addr(&self) -> Option<std::net::SocketAddr> {
        self.shared.stream.peer_addr()
    }

    /// Stop receiving and shut the stream down in both directions.
    pub fn close(&self) {
        self.stop_receive_thread();
        if self.shared.connected.swap(false, Ordering::SeqCst) {
            info!("connection closed");
        }
        if let Err(err) = self.shared.stream.shutdown() {
            debug!(error = %err, "stream shutdown failed");
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.stop_receive_thread();
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("stream", &self.shared.stream)
            .field("connected", &self.is_connected())
            .field("has_error", &self.has_error_state())
            .field("threaded", &self.is_threaded())
            .finish()
    }
}

impl Shared {
    fn receive_loop(&self) {
        while !self.exit.load(Ordering::SeqCst) && self.connected.load(Ordering::SeqCst) {
            self.receive_packets(self.config.receive_wait);
        }
        trace!("receive loop exiting");
    }

    fn receive_packets(&self, max_wait: Duration) -> usize {
        if !self.connected.load(Ordering::SeqCst) {
            return 0;
        }

        let deadline = Instant::now() + max_wait;
        let mut reader = lock(&self.reader);
        let mut queued = 0;

        // At most one packet per pass. The decoder never reads past the end of
        // a frame, so the rest of a backlog stays readable for the next pass.
        while queued == 0 && !self.exit.load(Ordering::SeqCst) {
            let wait = deadline.saturating_duration_since(Instant::now());
            match self.stream.wait_readable(wait) {
                Ok(true) => {}
                Ok(false) => break,
                Err(err) => {
                    self.lose_connection(&format!("wait failed: {err}"));
                    break;
                }
            }

            match reader.read_once() {
                Ok(ReadOutcome::Packet(packet)) => {
                    *lock(&self.last_receive) = Instant::now();
                    self.packets_received.fetch_add(1, Ordering::Relaxed);
                    self.enqueue(packet);
                    queued += 1;
                }
                Ok(ReadOutcome::Pending) => {}
                Ok(ReadOutcome::Closed) => {
                    self.lose_connection("peer closed the stream");
                    break;
                }
                Err(FrameError::Packet(err)) => {
                    self.packets_malformed.fetch_add(1, Ordering::Relaxed);
                    warn!(error = %err, "discarding malformed packet");
                }
                Err(err) => {
                    self.lose_connection(&err.to_string());
                    break;
                }
            }

            if Instant::now() >= deadline {
                break;
            }
        }

        queued
    }

    fn enqueue(&self, packet: OscPacket) {
        let limit = packet
            .address()
            .and_then(|address| lock(&self.limits).limit_for(address));

        let evicted = lock(&self.packets).push(packet, limit);
        if evicted > 0 {
            debug!(evicted, limit, "queue limit evicted older packets");
        }
    }

    fn lose_connection(&self, reason: &str) {
        if self.connected.swap(false, Ordering::SeqCst) {
            info!(reason, "connection lost");
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

#[cfg(all(test, unix))]
mod tests {
    use std::io::Write;
    use std::sync::atomic::AtomicUsize;

    use mirrorlink_osc::{encode_frame, OscBundle};

    use super::*;

    fn pair() -> (Connection, Connection) {
        let (left, right) = LinkStream::pair().unwrap();
        (
            Connection::new(left, ConnectionConfig::default()).unwrap(),
            Connection::new(right, ConnectionConfig::default()).unwrap(),
        )
    }

    fn int_message(conn: &Connection, address: &str, value: i32) -> OscMessage {
        let mut msg = conn.new_message(address);
        msg.write_int(value).unwrap();
        msg
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

    fn collect_ints(conn: &Connection, address: &str) -> Arc<Mutex<Vec<i32>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        conn.add_route(address, move |msg| {
            sink.lock().unwrap().push(msg.read_or_default::<i32>());
        });
        seen
    }

    #[test]
    fn polling_receive_and_dispatch() {
        let (sender, receiver) = pair();
        let seen = collect_ints(&receiver, "/value");

        for n in 0..3 {
            sender.send_message(&int_message(&sender, "/value", n)).unwrap();
        }

        assert!(wait_until(Duration::from_secs(2), || {
            receiver.receive_and_dispatch_messages(Duration::from_millis(5));
            seen.lock().unwrap().len() == 3
        }));
        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2]);
        assert_eq!(sender.stats().packets_sent, 3);
        assert_eq!(receiver.stats().packets_received, 3);
    }

    #[test]
    fn receive_pass_stops_after_first_packet() {
        let (sender, receiver) = pair();
        let sender = Arc::new(sender);
        let stop = Arc::new(AtomicBool::new(false));

        let flood = {
            let sender = Arc::clone(&sender);
            let stop = Arc::clone(&stop);
            std::thread::spawn(move || {
                let mut n = 0;
                while !stop.load(Ordering::SeqCst) {
                    if sender.send_message(&int_message(&sender, "/flood", n)).is_err() {
                        break;
                    }
                    n += 1;
                }
            })
        };

        for pass in 1..=20 {
            assert_eq!(receiver.receive_packets(Duration::from_millis(500)), 1);
            assert_eq!(receiver.queued_packet_count(), pass);
        }

        stop.store(true, Ordering::SeqCst);
        receiver.close();
        flood.join().unwrap();
    }

    #[test]
    fn polling_works_after_receive_thread_stops() {
        let (sender, receiver) = pair();
        receiver.start_receive_thread().unwrap();
        receiver.stop_receive_thread();

        sender.send_message(&OscMessage::new("/after")).unwrap();
        assert!(wait_until(Duration::from_secs(2), || {
            receiver.receive_packets(Duration::from_millis(5)) > 0
        }));
    }

    #[test]
    fn threaded_receive_queues_until_dispatch() {
        let (sender, receiver) = pair();
        receiver.start_receive_thread().unwrap();
        assert!(receiver.is_threaded());
        let seen = collect_ints(&receiver, "/value");

        sender.send_message(&int_message(&sender, "/value", 7)).unwrap();
        assert!(wait_until(Duration::from_secs(2), || {
            receiver.queued_packet_count() == 1
        }));
        assert!(seen.lock().unwrap().is_empty());

        assert_eq!(receiver.dispatch_messages(), 1);
        assert_eq!(*seen.lock().unwrap(), vec![7]);

        receiver.stop_receive_thread();
        assert!(!receiver.is_threaded());
    }

    #[test]
    fn queue_limit_keeps_newest() {
        let (sender, receiver) = pair();
        receiver.set_message_options("/Screen", 2);
        let seen = collect_ints(&receiver, "/Screen");

        for n in 1..=5 {
            sender.send_message(&int_message(&sender, "/Screen", n)).unwrap();
        }
        assert!(wait_until(Duration::from_secs(2), || {
            receiver.receive_packets(Duration::from_millis(5));
            receiver.stats().packets_received == 5
        }));

        assert_eq!(receiver.queued_packet_count(), 2);
        receiver.dispatch_messages();
        assert_eq!(*seen.lock().unwrap(), vec![4, 5]);
        assert_eq!(receiver.stats().packets_evicted, 3);
    }

    #[test]
    fn bundles_dispatch_each_message() {
        let (sender, receiver) = pair();
        let seen = collect_ints(&receiver, "/n");

        let mut bundle = OscBundle::new();
        bundle.push(int_message(&sender, "/n", 1));
        bundle.push(int_message(&sender, "/n", 2));
        sender.send_packet(&bundle.into()).unwrap();

        assert!(wait_until(Duration::from_secs(2), || {
            receiver.receive_and_dispatch_messages(Duration::from_millis(5));
            seen.lock().unwrap().len() == 2
        }));
        assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn malformed_frame_is_skipped() {
        let (left, right) = LinkStream::pair().unwrap();
        let receiver = Connection::new(right, ConnectionConfig::default()).unwrap();
        let seen = collect_ints(&receiver, "/ok");

        let mut wire = bytes::BytesMut::new();
        encode_frame(b"junk", &mut wire).unwrap();
        let mut good = OscMessage::new("/ok");
        good.write_int(9).unwrap();
        encode_frame(&good.to_bytes(), &mut wire).unwrap();
        let mut raw = left;
        raw.write_all(&wire).unwrap();

        assert!(wait_until(Duration::from_secs(2), || {
            receiver.receive_and_dispatch_messages(Duration::from_millis(5));
            !seen.lock().unwrap().is_empty()
        }));
        assert_eq!(*seen.lock().unwrap(), vec![9]);
        assert!(receiver.is_connected());
        assert_eq!(receiver.stats().packets_malformed, 1);
    }

    #[test]
    fn peer_close_flips_connected() {
        let (sender, receiver) = pair();
        receiver.start_receive_thread().unwrap();

        sender.close();
        assert!(!sender.is_connected());
        assert!(wait_until(Duration::from_secs(2), || !receiver.is_connected()));
        assert!(!receiver.is_valid());

        let err = sender.send_message(&OscMessage::new("/late")).unwrap_err();
        assert!(matches!(err, ConnectionError::Disconnected(_)));
    }

    #[test]
    fn error_state_is_sticky_and_first_wins() {
        let (conn, _peer) = pair();
        assert!(conn.is_valid());
        assert!(conn.error_message().is_none());

        conn.set_error_state("version mismatch");
        conn.set_error_state("something else");

        assert!(conn.has_error_state());
        assert!(conn.is_connected());
        assert!(!conn.is_valid());
        assert_eq!(conn.error_message().as_deref(), Some("version mismatch"));
    }

    #[test]
    fn handlers_can_modify_routes_and_send_during_dispatch() {
        let (a, b) = pair();
        let b = Arc::new(b);
        let hits = Arc::new(AtomicUsize::new(0));

        {
            let weak = Arc::downgrade(&b);
            let hits = Arc::clone(&hits);
            b.add_route("/trigger", move |_| {
                hits.fetch_add(1, Ordering::SeqCst);
                if let Some(conn) = weak.upgrade() {
                    conn.add_route("/later", |_| {});
                    conn.send_message(&OscMessage::new("/echo")).unwrap();
                }
            });
        }
        let echoed = collect_ints(&a, "/echo");

        a.send_message(&OscMessage::new("/trigger")).unwrap();
        assert!(wait_until(Duration::from_secs(2), || {
            b.receive_and_dispatch_messages(Duration::from_millis(5));
            hits.load(Ordering::SeqCst) == 1
        }));
        assert_eq!(b.route_count(), 2);

        assert!(wait_until(Duration::from_secs(2), || {
            a.receive_and_dispatch_messages(Duration::from_millis(5));
            !echoed.lock().unwrap().is_empty()
        }));
    }

    #[test]
    fn removed_route_is_not_invoked() {
        let (sender, receiver) = pair();
        let hits = Arc::new(AtomicUsize::new(0));
        let handle = {
            let hits = Arc::clone(&hits);
            receiver.add_route("/gone", move |_| {
                hits.fetch_add(1, Ordering::SeqCst);
            })
        };
        assert!(receiver.remove_route("/gone", handle));
        assert!(!receiver.remove_route("/gone", handle));

        sender.send_message(&OscMessage::new("/gone")).unwrap();
        assert!(wait_until(Duration::from_secs(2), || {
            receiver.receive_packets(Duration::from_millis(5)) > 0
        }));
        assert_eq!(receiver.dispatch_messages(), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn legacy_byte_order_roundtrip() {
        let config = ConnectionConfig {
            byte_order: ByteOrder::Legacy,
            ..ConnectionConfig::default()
        };
        let (left, right) = LinkStream::pair().unwrap();
        let sender = Connection::new(left, config.clone()).unwrap();
        let receiver = Connection::new(right, config).unwrap();
        let seen = collect_ints(&receiver, "/le");

        sender.send_message(&int_message(&sender, "/le", 0x0102_0304)).unwrap();
        assert!(wait_until(Duration::from_secs(2), || {
            receiver.receive_and_dispatch_messages(Duration::from_millis(5));
            !seen.lock().unwrap().is_empty()
        }));
        assert_eq!(*seen.lock().unwrap(), vec![0x0102_0304]);
        assert_eq!(receiver.byte_order(), ByteOrder::Legacy);
    }

    #[test]
    fn drop_joins_receive_thread() {
        let (_sender, receiver) = pair();
        receiver.start_receive_thread().unwrap();
        receiver.start_receive_thread().unwrap();
        drop(receiver);
    }

    #[test]
    fn last_receive_tracks_traffic() {
        let (sender, receiver) = pair();
        std::thread::sleep(Duration::from_millis(30));
        assert!(receiver.time_since_last_receive() >= Duration::from_millis(30));

        sender.send_message(&OscMessage::new("/tick")).unwrap();
        assert!(wait_until(Duration::from_secs(2), || {
            receiver.receive_packets(Duration::from_millis(5)) > 0
        }));
        assert!(receiver.time_since_last_receive() < Duration::from_millis(30));
    }
}
