use std::any::Any;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use mirrorlink_connection::Connection;
use mirrorlink_osc::{OscError, OscMessage};
use tracing::{debug, warn};

use crate::channel::{Channel, ChannelRoutes};
use crate::config::SessionConfig;
use crate::control::ChannelMode;
use crate::error::{Result, SessionError};

pub const INPUT_CHANNEL_TYPE: &str = "InputChannel";

/// Input events travel on `/MessageHandler/<EventName>`.
pub const MESSAGE_HANDLER_PREFIX: &str = "/MessageHandler/";

/// Events buffered by a reading channel before the oldest is dropped.
pub const INPUT_QUEUE_CAPACITY: usize = 256;

/// Input forwarded from the viewing side to the application.
#[derive(Debug, Clone, PartialEq)]
pub enum InputEvent {
    KeyDown { key: i32, repeat: bool },
    KeyUp { key: i32 },
    KeyChar { character: char },
    /// Coordinates are normalized to the streamed image, 0.0 to 1.0.
    TouchStarted { x: f32, y: f32, finger: i32, force: f32 },
    TouchMoved { x: f32, y: f32, finger: i32, force: f32 },
    TouchEnded { x: f32, y: f32, finger: i32 },
    Motion {
        attitude: [f32; 3],
        rotation_rate: [f32; 3],
        gravity: [f32; 3],
        acceleration: [f32; 3],
    },
}

impl InputEvent {
    pub const EVENT_NAMES: [&'static str; 7] = [
        "KeyDown",
        "KeyUp",
        "KeyChar",
        "TouchStarted",
        "TouchMoved",
        "TouchEnded",
        "Motion",
    ];

    pub fn event_name(&self) -> &'static str {
        match self {
            InputEvent::KeyDown { .. } => "KeyDown",
            InputEvent::KeyUp { .. } => "KeyUp",
            InputEvent::KeyChar { .. } => "KeyChar",
            InputEvent::TouchStarted { .. } => "TouchStarted",
            InputEvent::TouchMoved { .. } => "TouchMoved",
            InputEvent::TouchEnded { .. } => "TouchEnded",
            InputEvent::Motion { .. } => "Motion",
        }
    }

    pub fn address(&self) -> String {
        format!("{MESSAGE_HANDLER_PREFIX}{}", self.event_name())
    }

    /// Append this event's arguments to `message`.
    pub fn write_arguments(&self, message: &mut OscMessage) -> std::result::Result<(), OscError> {
        match self {
            InputEvent::KeyDown { key, repeat } => {
                message.write_int(*key)?;
                message.write(repeat)
            }
            InputEvent::KeyUp { key } => message.write_int(*key),
            InputEvent::KeyChar { character } => message.write(&u32::from(*character)),
            InputEvent::TouchStarted {
                x,
                y,
                finger,
                force,
            }
            | InputEvent::TouchMoved {
                x,
                y,
                finger,
                force,
            } => {
                message.write_float(*x)?;
                message.write_float(*y)?;
                message.write_int(*finger)?;
                message.write_float(*force)
            }
            InputEvent::TouchEnded { x, y, finger } => {
                message.write_float(*x)?;
                message.write_float(*y)?;
                message.write_int(*finger)
            }
            InputEvent::Motion {
                attitude,
                rotation_rate,
                gravity,
                acceleration,
            } => {
                for value in [attitude, rotation_rate, gravity, acceleration]
                    .into_iter()
                    .flatten()
                {
                    message.write_float(*value)?;
                }
                Ok(())
            }
        }
    }

    /// Parse the arguments of a message received for `event_name`.
    pub fn read_arguments(
        event_name: &str,
        message: &mut OscMessage,
    ) -> std::result::Result<Self, OscError> {
        let event = match event_name {
            "KeyDown" => InputEvent::KeyDown {
                key: message.read_int()?,
                repeat: message.read()?,
            },
            "KeyUp" => InputEvent::KeyUp {
                key: message.read_int()?,
            },
            "KeyChar" => {
                let code: u32 = message.read()?;
                InputEvent::KeyChar {
                    character: char::from_u32(code).ok_or_else(|| {
                        OscError::Malformed(format!("invalid character code {code}"))
                    })?,
                }
            }
            "TouchStarted" => InputEvent::TouchStarted {
                x: message.read_float()?,
                y: message.read_float()?,
                finger: message.read_int()?,
                force: message.read_float()?,
            },
            "TouchMoved" => InputEvent::TouchMoved {
                x: message.read_float()?,
                y: message.read_float()?,
                finger: message.read_int()?,
                force: message.read_float()?,
            },
            "TouchEnded" => InputEvent::TouchEnded {
                x: message.read_float()?,
                y: message.read_float()?,
                finger: message.read_int()?,
            },
            "Motion" => {
                let mut values = [0f32; 12];
                for value in &mut values {
                    *value = message.read_float()?;
                }
                InputEvent::Motion {
                    attitude: [values[0], values[1], values[2]],
                    rotation_rate: [values[3], values[4], values[5]],
                    gravity: [values[6], values[7], values[8]],
                    acceleration: [values[9], values[10], values[11]],
                }
            }
            other => {
                return Err(OscError::Malformed(format!(
                    "unknown input event '{other}'"
                )))
            }
        };
        Ok(event)
    }
}

type InputSink = Box<dyn FnMut(InputEvent) + Send>;

#[derive(Default)]
struct InputState {
    events: Mutex<VecDeque<InputEvent>>,
    received: AtomicU64,
    dropped: AtomicU64,
}

impl InputState {
    fn push(&self, event: InputEvent) {
        self.received.fetch_add(1, Ordering::Relaxed);
        let mut events = lock(&self.events);
        if events.len() >= INPUT_QUEUE_CAPACITY {
            events.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        events.push_back(event);
    }
}

/// Forwards input events.
///
/// The writing side sends events as they happen. The reading side buffers
/// them until drained, or hands them to an installed sink on each tick.
pub struct InputChannel {
    mode: ChannelMode,
    connection: Arc<Connection>,
    routes: ChannelRoutes,
    state: Arc<InputState>,
    sink: Option<InputSink>,
}

impl InputChannel {
    /// Channel factory entry point.
    pub fn create(
        mode: ChannelMode,
        connection: &Arc<Connection>,
        _config: &SessionConfig,
    ) -> Result<Box<dyn Channel>> {
        Ok(Box::new(Self::new(mode, connection)))
    }

    pub fn new(mode: ChannelMode, connection: &Arc<Connection>) -> Self {
        let state = Arc::new(InputState::default());
        let mut routes = ChannelRoutes::new(connection);

        if mode == ChannelMode::Read {
            for name in InputEvent::EVENT_NAMES {
                let weak = Arc::downgrade(&state);
                routes.add(format!("{MESSAGE_HANDLER_PREFIX}{name}"), move |message| {
                    let Some(state) = weak.upgrade() else {
                        return;
                    };
                    match InputEvent::read_arguments(name, message) {
                        Ok(event) => state.push(event),
                        Err(err) => warn!(event = name, error = %err, "discarding input event"),
                    }
                });
            }
        }

        debug!(%mode, "input channel created");
        Self {
            mode,
            connection: Arc::clone(connection),
            routes,
            state,
            sink: None,
        }
    }

    pub fn send_event(&self, event: &InputEvent) -> Result<()> {
        if self.mode != ChannelMode::Write {
            return Err(SessionError::WrongMode {
                channel: INPUT_CHANNEL_TYPE,
                mode: self.mode,
            });
        }
        let mut message = self.connection.new_message(event.address());
        event.write_arguments(&mut message)?;
        self.connection.send_message(&message)?;
        Ok(())
    }

    /// Take every buffered event, oldest first.
    pub fn drain_events(&self) -> Vec<InputEvent> {
        lock(&self.state.events).drain(..).collect()
    }

    /// Deliver events to `sink` on every tick instead of buffering them.
    pub fn set_sink<F>(&mut self, sink: F)
    where
        F: FnMut(InputEvent) + Send + 'static,
    {
        self.sink = Some(Box::new(sink));
    }

    pub fn clear_sink(&mut self) {
        self.sink = None;
    }

    pub fn pending_events(&self) -> usize {
        lock(&self.state.events).len()
    }

    pub fn received_events(&self) -> u64 {
        self.state.received.load(Ordering::Relaxed)
    }

    pub fn dropped_events(&self) -> u64 {
        self.state.dropped.load(Ordering::Relaxed)
    }
}

impl Channel for InputChannel {
    fn type_name(&self) -> &'static str {
        INPUT_CHANNEL_TYPE
    }

    fn mode(&self) -> ChannelMode {
        self.mode
    }

    fn tick(&mut self, _delta: Duration) {
        if self.sink.is_none() {
            return;
        }
        let events = self.drain_events();
        if let Some(sink) = self.sink.as_mut() {
            events.into_iter().for_each(sink);
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl Drop for InputChannel {
    fn drop(&mut self) {
        self.routes.clear();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}
