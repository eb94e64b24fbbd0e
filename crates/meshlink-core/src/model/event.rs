// ── Published events ──
//
// Records the core pushes onto the event bus. Field names follow the
// `zwave_js_*` event payloads consumers already key automations on.

use std::sync::Arc;

use meshlink_api::{
    EntryControlNotification, GenericNotification, HomeId, Notification, NodeId,
    ValueNotification,
};
use serde::Serialize;

use super::descriptor::{DiscoveryDescriptor, Platform};
use super::device::Device;
use super::identity::{DOMAIN, DeviceId, EntryId};

// ── Value notifications ─────────────────────────────────────────────

/// A stateless value event (scene activation, central scene key...).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValueNotificationEvent {
    pub domain: &'static str,
    pub node_id: NodeId,
    pub home_id: HomeId,
    pub endpoint: u8,
    pub device_id: DeviceId,
    pub command_class: u8,
    pub command_class_name: String,
    pub label: Option<String>,
    pub property: serde_json::Value,
    pub property_name: Option<String>,
    pub property_key: Option<serde_json::Value>,
    pub property_key_name: Option<String>,
    /// Human value: the state label when the metadata maps one.
    pub value: serde_json::Value,
    pub value_raw: serde_json::Value,
}

impl ValueNotificationEvent {
    pub fn new(home_id: HomeId, device_id: DeviceId, n: &ValueNotification) -> Self {
        Self {
            domain: DOMAIN,
            node_id: n.node_id,
            home_id,
            endpoint: n.endpoint,
            device_id,
            command_class: n.command_class,
            command_class_name: n.command_class_name.clone(),
            label: n.metadata.label.clone(),
            property: n.property.clone(),
            property_name: n.property_name.clone(),
            property_key: n.property_key.clone(),
            property_key_name: n.property_key_name.clone(),
            value: n.metadata.decode(&n.value),
            value_raw: n.value.clone(),
        }
    }
}

// ── Notifications ───────────────────────────────────────────────────

/// A notification-class report, flattened with its variant fields.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NotificationEvent {
    pub domain: &'static str,
    pub node_id: NodeId,
    pub home_id: HomeId,
    pub device_id: DeviceId,
    pub command_class: u8,
    #[serde(flatten)]
    pub details: NotificationDetails,
}

/// Variant-specific payload of a [`NotificationEvent`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum NotificationDetails {
    EntryControl {
        command_class_name: &'static str,
        event_type: u8,
        data_type: u8,
        event_data: Option<serde_json::Value>,
    },
    Generic {
        command_class_name: &'static str,
        label: String,
        #[serde(rename = "type")]
        notification_type: u8,
        event: u8,
        event_label: String,
        parameters: Option<serde_json::Value>,
    },
}

impl NotificationDetails {
    pub fn command_class_name(&self) -> &'static str {
        match self {
            Self::EntryControl {
                command_class_name, ..
            }
            | Self::Generic {
                command_class_name, ..
            } => command_class_name,
        }
    }
}

impl From<&EntryControlNotification> for NotificationDetails {
    fn from(n: &EntryControlNotification) -> Self {
        Self::EntryControl {
            command_class_name: "Entry Control",
            event_type: n.event_type,
            data_type: n.data_type,
            event_data: n.event_data.clone(),
        }
    }
}

impl From<&GenericNotification> for NotificationDetails {
    fn from(n: &GenericNotification) -> Self {
        Self::Generic {
            command_class_name: "Notification",
            label: n.label.clone(),
            notification_type: n.notification_type,
            event: n.event,
            event_label: n.event_label.clone(),
            parameters: n.parameters.clone(),
        }
    }
}

impl NotificationEvent {
    pub fn new(home_id: HomeId, device_id: DeviceId, n: &Notification) -> Self {
        let details = match n {
            Notification::EntryControl(inner) => NotificationDetails::from(inner),
            Notification::Generic(inner) => NotificationDetails::from(inner),
        };
        Self {
            domain: DOMAIN,
            node_id: n.node_id(),
            home_id,
            device_id,
            command_class: n.command_class(),
            details,
        }
    }
}

// ── Registry / discovery events ─────────────────────────────────────

/// A new entity descriptor for a platform's entity builder.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityDiscovered {
    pub entry_id: EntryId,
    pub platform: Platform,
    pub descriptor: Arc<DiscoveryDescriptor>,
}

/// A device was registered (created or refreshed) for an entry.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceAdded {
    pub entry_id: EntryId,
    pub device: Arc<Device>,
}
