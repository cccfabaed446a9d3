use std::sync::{Arc, OnceLock, RwLock, RwLockReadGuard, RwLockWriteGuard};

use mirrorlink_connection::Connection;
use tracing::{debug, warn};

use crate::channel::Channel;
use crate::channels::{ImageChannel, InputChannel, XRTrackingChannel};
use crate::channels::{IMAGE_CHANNEL_TYPE, INPUT_CHANNEL_TYPE, XR_TRACKING_CHANNEL_TYPE};
use crate::config::SessionConfig;
use crate::control::{ChannelInfo, ChannelMode};
use crate::error::Result;

/// Builds a channel for a session.
pub trait ChannelFactory: Send + Sync {
    fn create(
        &self,
        mode: ChannelMode,
        connection: &Arc<Connection>,
        config: &SessionConfig,
    ) -> Result<Box<dyn Channel>>;
}

impl<F> ChannelFactory for F
where
    F: Fn(ChannelMode, &Arc<Connection>, &SessionConfig) -> Result<Box<dyn Channel>> + Send + Sync,
{
    fn create(
        &self,
        mode: ChannelMode,
        connection: &Arc<Connection>,
        config: &SessionConfig,
    ) -> Result<Box<dyn Channel>> {
        self(mode, connection, config)
    }
}

struct Registration {
    type_name: String,
    default_mode: ChannelMode,
    factory: Arc<dyn ChannelFactory>,
}

/// Channel factories keyed by type name.
#[derive(Default)]
pub struct ChannelRegistry {
    entries: RwLock<Vec<Registration>>,
}

static GLOBAL_REGISTRY: OnceLock<Arc<ChannelRegistry>> = OnceLock::new();

impl ChannelRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the image, input and tracking channels.
    pub fn with_builtin_channels() -> Self {
        let registry = Self::new();
        registry.register_factory(IMAGE_CHANNEL_TYPE, ChannelMode::Write, ImageChannel::create);
        registry.register_factory(INPUT_CHANNEL_TYPE, ChannelMode::Read, InputChannel::create);
        registry.register_factory(
            XR_TRACKING_CHANNEL_TYPE,
            ChannelMode::Read,
            XRTrackingChannel::create,
        );
        registry
    }

    /// The process-wide registry, created with the built-in channels.
    pub fn global() -> Arc<ChannelRegistry> {
        Arc::clone(GLOBAL_REGISTRY.get_or_init(|| Arc::new(Self::with_builtin_channels())))
    }

    /// Register a factory, replacing any factory with the same type name.
    ///
    /// The returned handle identifies this registration for
    /// [`ChannelRegistry::remove_factory`].
    pub fn register_factory<F>(
        &self,
        type_name: impl Into<String>,
        default_mode: ChannelMode,
        factory: F,
    ) -> Arc<dyn ChannelFactory>
    where
        F: ChannelFactory + 'static,
    {
        let type_name = type_name.into();
        let factory: Arc<dyn ChannelFactory> = Arc::new(factory);
        let mut entries = self.write();

        if let Some(existing) = entries.iter_mut().find(|e| e.type_name == type_name) {
            warn!(%type_name, "replacing channel factory");
            existing.default_mode = default_mode;
            existing.factory = Arc::clone(&factory);
        } else {
            debug!(%type_name, %default_mode, "channel factory registered");
            entries.push(Registration {
                type_name,
                default_mode,
                factory: Arc::clone(&factory),
            });
        }
        factory
    }

    /// Remove the registration made with `factory`. Returns `false` if it
    /// was already removed or replaced.
    pub fn remove_factory(&self, factory: &Arc<dyn ChannelFactory>) -> bool {
        let mut entries = self.write();
        let before = entries.len();
        entries.retain(|entry| !Arc::ptr_eq(&entry.factory, factory));
        before != entries.len()
    }

    pub fn find_factory(&self, type_name: &str) -> Option<Arc<dyn ChannelFactory>> {
        self.read()
            .iter()
            .find(|entry| entry.type_name == type_name)
            .map(|entry| Arc::clone(&entry.factory))
    }

    pub fn default_mode(&self, type_name: &str) -> Option<ChannelMode> {
        self.read()
            .iter()
            .find(|entry| entry.type_name == type_name)
            .map(|entry| entry.default_mode)
    }

    /// Registered types with their default modes, in registration order.
    pub fn registered(&self) -> Vec<ChannelInfo> {
        self.read()
            .iter()
            .map(|entry| ChannelInfo::new(entry.type_name.clone(), entry.default_mode))
            .collect()
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<Registration>> {
        self.entries
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<Registration>> {
        self.entries
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl std::fmt::Debug for ChannelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelRegistry")
            .field("channels", &self.registered())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::any::Any;

    use super::*;

    struct NullChannel(ChannelMode);

    impl Channel for NullChannel {
        fn type_name(&self) -> &'static str {
            "NullChannel"
        }

        fn mode(&self) -> ChannelMode {
            self.0
        }

        fn as_any(&self) -> &dyn Any {
            self
        }

        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }
    }

    fn null_factory(
        mode: ChannelMode,
        _connection: &Arc<Connection>,
        _config: &SessionConfig,
    ) -> Result<Box<dyn Channel>> {
        Ok(Box::new(NullChannel(mode)))
    }

    #[test]
    fn builtin_channels_are_registered() {
        let registry = ChannelRegistry::with_builtin_channels();
        assert_eq!(registry.registered(), crate::config::default_channels());
        assert!(registry.find_factory(IMAGE_CHANNEL_TYPE).is_some());
        assert_eq!(
            registry.default_mode(INPUT_CHANNEL_TYPE),
            Some(ChannelMode::Read)
        );
        assert!(registry.find_factory("Nope").is_none());
    }

    #[test]
    fn global_registry_is_shared() {
        let a = ChannelRegistry::global();
        let b = ChannelRegistry::global();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(a.find_factory(XR_TRACKING_CHANNEL_TYPE).is_some());
    }

    #[test]
    fn register_replace_and_remove() {
        let registry = ChannelRegistry::new();
        let first = registry.register_factory("NullChannel", ChannelMode::Read, null_factory);
        let second = registry.register_factory("NullChannel", ChannelMode::Write, null_factory);

        assert_eq!(registry.registered().len(), 1);
        assert_eq!(
            registry.default_mode("NullChannel"),
            Some(ChannelMode::Write)
        );

        assert!(!registry.remove_factory(&first));
        assert!(registry.remove_factory(&second));
        assert!(registry.find_factory("NullChannel").is_none());
        assert!(!registry.remove_factory(&second));
    }

    #[cfg(unix)]
    #[test]
    fn closure_factories_create_channels() {
        use mirrorlink_connection::ConnectionConfig;
        use mirrorlink_transport::LinkStream;

        let registry = ChannelRegistry::new();
        registry.register_factory(
            "NullChannel",
            ChannelMode::Read,
            |mode: ChannelMode, _conn: &Arc<Connection>, _config: &SessionConfig| {
                Ok(Box::new(NullChannel(mode)) as Box<dyn Channel>)
            },
        );

        let (left, _right) = LinkStream::pair().unwrap();
        let connection = Arc::new(Connection::new(left, ConnectionConfig::default()).unwrap());
        let factory = registry.find_factory("NullChannel").unwrap();
        let channel = factory
            .create(ChannelMode::Write, &connection, &SessionConfig::default())
            .unwrap();

        assert_eq!(channel.mode(), ChannelMode::Write);
        assert!(channel.as_any().downcast_ref::<NullChannel>().is_some());
    }
}
