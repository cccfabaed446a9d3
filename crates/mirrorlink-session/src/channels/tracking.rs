use std::any::Any;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use mirrorlink_connection::Connection;
use mirrorlink_osc::{OscError, OscMessage};
use tracing::{debug, warn};

use crate::channel::{Channel, ChannelRoutes};
use crate::config::SessionConfig;
use crate::control::ChannelMode;
use crate::error::{Result, SessionError};

pub const XR_TRACKING_CHANNEL_TYPE: &str = "XRTrackingChannel";

/// Seven floats: position x y z, rotation quaternion x y z w.
pub const XR_TRACKING_ADDRESS: &str = "/XRTracking";

/// A tracked device pose.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    pub position: [f32; 3],
    pub rotation: [f32; 4],
}

impl Default for Pose {
    fn default() -> Self {
        Self {
            position: [0.0; 3],
            rotation: [0.0, 0.0, 0.0, 1.0],
        }
    }
}

impl Pose {
    fn write_arguments(&self, message: &mut OscMessage) -> std::result::Result<(), OscError> {
        for value in self.position.iter().chain(self.rotation.iter()) {
            message.write_float(*value)?;
        }
        Ok(())
    }

    fn read_arguments(message: &mut OscMessage) -> std::result::Result<Self, OscError> {
        let mut pose = Pose::default();
        for value in pose.position.iter_mut().chain(pose.rotation.iter_mut()) {
            *value = message.read_float()?;
        }
        Ok(pose)
    }
}

#[derive(Default)]
struct TrackingState {
    latest: Mutex<Option<Pose>>,
    received: AtomicU64,
}

/// Streams device poses. Only the newest pose is kept.
pub struct XRTrackingChannel {
    mode: ChannelMode,
    connection: Arc<Connection>,
    routes: ChannelRoutes,
    state: Arc<TrackingState>,
}

impl XRTrackingChannel {
    /// Channel factory entry point.
    pub fn create(
        mode: ChannelMode,
        connection: &Arc<Connection>,
        _config: &SessionConfig,
    ) -> Result<Box<dyn Channel>> {
        Ok(Box::new(Self::new(mode, connection)))
    }

    pub fn new(mode: ChannelMode, connection: &Arc<Connection>) -> Self {
        let state = Arc::new(TrackingState::default());
        let mut routes = ChannelRoutes::new(connection);

        if mode == ChannelMode::Read {
            connection.set_message_options(XR_TRACKING_ADDRESS, 1);
            let weak = Arc::downgrade(&state);
            routes.add(XR_TRACKING_ADDRESS, move |message| {
                let Some(state) = weak.upgrade() else {
                    return;
                };
                match Pose::read_arguments(message) {
                    Ok(pose) => {
                        *lock(&state.latest) = Some(pose);
                        state.received.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(err) => warn!(error = %err, "discarding tracking message"),
                }
            });
        }

        debug!(%mode, "tracking channel created");
        Self {
            mode,
            connection: Arc::clone(connection),
            routes,
            state,
        }
    }

    pub fn send_pose(&self, pose: &Pose) -> Result<()> {
        if self.mode != ChannelMode::Write {
            return Err(SessionError::WrongMode {
                channel: XR_TRACKING_CHANNEL_TYPE,
                mode: self.mode,
            });
        }
        let mut message = self.connection.new_message(XR_TRACKING_ADDRESS);
        pose.write_arguments(&mut message)?;
        self.connection.send_message(&message)?;
        Ok(())
    }

    pub fn latest_pose(&self) -> Option<Pose> {
        *lock(&self.state.latest)
    }

    pub fn poses_received(&self) -> u64 {
        self.state.received.load(Ordering::Relaxed)
    }
}

impl Channel for XRTrackingChannel {
    fn type_name(&self) -> &'static str {
        XR_TRACKING_CHANNEL_TYPE
    }

    fn mode(&self) -> ChannelMode {
        self.mode
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl Drop for XRTrackingChannel {
    fn drop(&mut self) {
        self.routes.clear();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

#[cfg(all(test, unix))]
mod tests {
    use std::time::{Duration, Instant};

    use mirrorlink_connection::ConnectionConfig;
    use mirrorlink_transport::LinkStream;

    use super::*;

    #[test]
    fn reader_keeps_only_newest_pose() {
        let (left, right) = LinkStream::pair().unwrap();
        let tx = Arc::new(Connection::new(left, ConnectionConfig::default()).unwrap());
        let rx = Arc::new(Connection::new(right, ConnectionConfig::default()).unwrap());
        let writer = XRTrackingChannel::new(ChannelMode::Write, &tx);
        let reader = XRTrackingChannel::new(ChannelMode::Read, &rx);
        assert!(reader.latest_pose().is_none());

        for step in 1..=3 {
            let pose = Pose {
                position: [step as f32, 0.0, 0.0],
                ..Pose::default()
            };
            writer.send_pose(&pose).unwrap();
        }

        let deadline = Instant::now() + Duration::from_secs(2);
        while rx.stats().packets_received < 3 && Instant::now() < deadline {
            rx.receive_packets(Duration::from_millis(5));
        }
        assert_eq!(rx.queued_packet_count(), 1);
        rx.dispatch_messages();

        assert_eq!(reader.poses_received(), 1);
        assert_eq!(reader.latest_pose().unwrap().position, [3.0, 0.0, 0.0]);
        assert!(reader.send_pose(&Pose::default()).is_err());
    }
}
