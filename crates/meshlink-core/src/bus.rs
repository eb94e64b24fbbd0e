// ── Event bus ──
//
// Outbound surface of the core. Every channel is a `broadcast`: a slow
// consumer lags and skips records, it never blocks a session.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::trace;

use crate::config::SupervisorConfig;
use crate::model::{
    DeviceAdded, EntityDiscovered, NotificationEvent, Platform, ValueNotificationEvent,
};

/// Fan-out of everything the core publishes.
///
/// Cheaply cloneable; clones share the same channels.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

struct BusInner {
    capacity: usize,
    value_notifications: broadcast::Sender<Arc<ValueNotificationEvent>>,
    notifications: broadcast::Sender<Arc<NotificationEvent>>,
    device_added: broadcast::Sender<Arc<DeviceAdded>>,
    /// Entity-discovered channels, one per platform, created on first use.
    discovered: DashMap<Platform, broadcast::Sender<Arc<EntityDiscovered>>>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (value_notifications, _) = broadcast::channel(capacity);
        let (notifications, _) = broadcast::channel(capacity);
        let (device_added, _) = broadcast::channel(capacity);

        Self {
            inner: Arc::new(BusInner {
                capacity,
                value_notifications,
                notifications,
                device_added,
                discovered: DashMap::new(),
            }),
        }
    }

    /// Bus sized by the supervisor's channel capacity.
    pub fn from_config(config: &SupervisorConfig) -> Self {
        Self::new(config.event_channel_capacity)
    }

    // ── Subscriptions ────────────────────────────────────────────────

    pub fn subscribe_value_notifications(&self) -> broadcast::Receiver<Arc<ValueNotificationEvent>> {
        self.inner.value_notifications.subscribe()
    }

    pub fn subscribe_notifications(&self) -> broadcast::Receiver<Arc<NotificationEvent>> {
        self.inner.notifications.subscribe()
    }

    pub fn subscribe_device_added(&self) -> broadcast::Receiver<Arc<DeviceAdded>> {
        self.inner.device_added.subscribe()
    }

    /// Entity-discovered records for one platform.
    pub fn subscribe_platform(&self, platform: Platform) -> broadcast::Receiver<Arc<EntityDiscovered>> {
        self.platform_sender(platform).subscribe()
    }

    // ── Publishing ───────────────────────────────────────────────────
    //
    // Send errors only mean nobody is subscribed right now.

    pub fn publish_value_notification(&self, event: ValueNotificationEvent) {
        let _ = self.inner.value_notifications.send(Arc::new(event));
    }

    pub fn publish_notification(&self, event: NotificationEvent) {
        let _ = self.inner.notifications.send(Arc::new(event));
    }

    pub fn publish_device_added(&self, event: DeviceAdded) {
        let _ = self.inner.device_added.send(Arc::new(event));
    }

    pub fn publish_discovered(&self, event: EntityDiscovered) {
        let platform = event.platform;
        if self.platform_sender(platform).send(Arc::new(event)).is_err() {
            trace!(%platform, "no entity builder subscribed");
        }
    }

    fn platform_sender(&self, platform: Platform) -> broadcast::Sender<Arc<EntityDiscovered>> {
        self.inner
            .discovered
            .entry(platform)
            .or_insert_with(|| broadcast::channel(self.inner.capacity).0)
            .clone()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::from_config(&SupervisorConfig::default())
    }
}
