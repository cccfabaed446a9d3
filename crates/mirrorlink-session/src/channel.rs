use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use mirrorlink_connection::{Connection, RouteHandle};
use mirrorlink_osc::OscMessage;

use crate::control::ChannelMode;

/// A typed lane multiplexed over a session's connection.
///
/// A channel lives from channel selection until the session ends. Channels
/// receive through routes registered with a [`ChannelRoutes`] guard and get a
/// `tick` on the session owner's thread.
pub trait Channel: Send + Any {
    /// Registry type name, e.g. `"ImageChannel"`.
    fn type_name(&self) -> &'static str;

    fn mode(&self) -> ChannelMode;

    /// Per-frame work on the owner's thread.
    fn tick(&mut self, _delta: Duration) {}

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Routes a channel registered on a connection.
///
/// Dropping the guard removes every route, so a channel that owns one stops
/// receiving before the rest of its state is released.
pub struct ChannelRoutes {
    connection: Arc<Connection>,
    routes: Vec<(String, RouteHandle)>,
}

impl ChannelRoutes {
    pub fn new(connection: &Arc<Connection>) -> Self {
        Self {
            connection: Arc::clone(connection),
            routes: Vec::new(),
        }
    }

    /// Register `handler` for messages addressed exactly to `path`.
    pub fn add<F>(&mut self, path: impl Into<String>, handler: F) -> RouteHandle
    where
        F: Fn(&mut OscMessage) + Send + Sync + 'static,
    {
        let path = path.into();
        let handle = self.connection.add_route(path.clone(), handler);
        self.routes.push((path, handle));
        handle
    }

    /// Remove every route registered through this guard.
    pub fn clear(&mut self) {
        for (path, handle) in self.routes.drain(..) {
            self.connection.remove_route(&path, handle);
        }
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }
}

impl Drop for ChannelRoutes {
    fn drop(&mut self) {
        self.clear();
    }
}

impl std::fmt::Debug for ChannelRoutes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelRoutes")
            .field("routes", &self.routes)
            .finish()
    }
}
