use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use mirrorlink_osc::OscMessage;
use tracing::trace;

/// A callback bound to one address.
///
/// Handlers run on the thread that dispatches, with the message's read
/// cursor rewound. They are shared so the map can hand out clones and invoke
/// them without holding its lock.
pub type MessageHandler = Arc<dyn Fn(&mut OscMessage) + Send + Sync>;

/// Identifies one registration returned by [`DispatchMap::add_route`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RouteHandle(u64);

impl RouteHandle {
    pub fn id(self) -> u64 {
        self.0
    }
}

/// Address to handler routing table.
///
/// Several handlers may share an address; they run in registration order.
#[derive(Default)]
pub struct DispatchMap {
    routes: HashMap<String, Vec<(RouteHandle, MessageHandler)>>,
    next_handle: u64,
}

impl DispatchMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `handler` to the exact address `path`.
    pub fn add_route<F>(&mut self, path: impl Into<String>, handler: F) -> RouteHandle
    where
        F: Fn(&mut OscMessage) + Send + Sync + 'static,
    {
        self.add_shared_route(path, Arc::new(handler))
    }

    /// Bind an already shared handler.
    pub fn add_shared_route(
        &mut self,
        path: impl Into<String>,
        handler: MessageHandler,
    ) -> RouteHandle {
        self.next_handle += 1;
        let handle = RouteHandle(self.next_handle);
        let path = path.into();
        trace!(%path, handle = handle.0, "route added");
        self.routes.entry(path).or_default().push((handle, handler));
        handle
    }

    /// Remove one registration. Removing an unknown handle is a no-op.
    ///
    /// Returns `true` if a handler was removed.
    pub fn remove_route(&mut self, path: &str, handle: RouteHandle) -> bool {
        let Some(handlers) = self.routes.get_mut(path) else {
            return false;
        };
        let before = handlers.len();
        handlers.retain(|(existing, _)| *existing != handle);
        let removed = handlers.len() != before;
        if handlers.is_empty() {
            self.routes.remove(path);
        }
        if removed {
            trace!(path, handle = handle.0, "route removed");
        }
        removed
    }

    /// Clones of every handler bound to `address`, in registration order.
    pub fn handlers_for(&self, address: &str) -> Vec<MessageHandler> {
        self.routes
            .get(address)
            .map(|handlers| handlers.iter().map(|(_, h)| Arc::clone(h)).collect())
            .unwrap_or_default()
    }

    /// Invoke every handler bound to the message address.
    ///
    /// Returns `false` when no handler is registered for it.
    pub fn dispatch(&self, message: &mut OscMessage) -> bool {
        let handlers = self.handlers_for(message.address());
        invoke_handlers(&handlers, message)
    }

    pub fn contains(&self, address: &str) -> bool {
        self.routes.contains_key(address)
    }

    /// Total number of registrations.
    pub fn route_count(&self) -> usize {
        self.routes.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl fmt::Debug for DispatchMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut paths: Vec<_> = self.routes.keys().collect();
        paths.sort();
        f.debug_struct("DispatchMap")
            .field("paths", &paths)
            .field("route_count", &self.route_count())
            .finish()
    }
}

pub(crate) fn invoke_handlers(handlers: &[MessageHandler], message: &mut OscMessage) -> bool {
    for handler in handlers {
        message.reset_read();
        handler(message);
    }
    !handlers.is_empty()
}
