// ── Notification relay ──

use std::sync::Arc;

use meshlink_api::{HomeId, Notification, NodeId, ValueNotification};
use tracing::{trace, warn};

use crate::entry::EntryContext;
use crate::model::{DeviceId, DeviceIdentifier, NotificationEvent, ValueNotificationEvent};

/// Forwards stateless node events to the bus with their device context.
///
/// Never fails: an event whose device cannot be resolved is logged and
/// dropped.
pub struct NotificationRelay {
    ctx: Arc<EntryContext>,
}

impl NotificationRelay {
    pub fn new(ctx: Arc<EntryContext>) -> Self {
        Self { ctx }
    }

    /// Returns whether the event was published.
    pub fn relay_value_notification(&self, notification: &ValueNotification) -> bool {
        let Some((home_id, device_id)) = self.resolve(notification.node_id) else {
            return false;
        };
        trace!(node_id = notification.node_id, property = %notification.property, "value notification");
        self.ctx
            .host
            .bus
            .publish_value_notification(ValueNotificationEvent::new(
                home_id,
                device_id,
                notification,
            ));
        true
    }

    /// Returns whether the event was published.
    pub fn relay_notification(&self, notification: &Notification) -> bool {
        let Some((home_id, device_id)) = self.resolve(notification.node_id()) else {
            return false;
        };
        trace!(node_id = notification.node_id(), "notification");
        self.ctx
            .host
            .bus
            .publish_notification(NotificationEvent::new(home_id, device_id, notification));
        true
    }

    fn resolve(&self, node_id: NodeId) -> Option<(HomeId, DeviceId)> {
        let entry_id = &self.ctx.config.entry_id;
        let Ok(home_id) = self.ctx.home_id() else {
            warn!(%entry_id, node_id, "dropping event: driver state not loaded");
            return None;
        };

        let ident = DeviceIdentifier::for_node(home_id, node_id);
        match self.ctx.host.devices.get_device(&[ident]) {
            Some(device) => Some((home_id, device.id)),
            None => {
                warn!(%entry_id, node_id, "dropping event: no device for node");
                None
            }
        }
    }
}
