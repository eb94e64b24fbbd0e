// ── Controller event stream ──
//
// Everything the driver pushes after the initial state dump. Transports
// fan these out through a `broadcast` channel; see `Transport::subscribe`.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::model::{Node, NodeId, ValueMetadata};

/// Command class of entry-control notifications (keypads).
pub const COMMAND_CLASS_ENTRY_CONTROL: u8 = 0x6F;

/// Command class of generic alarm-style notifications.
pub const COMMAND_CLASS_NOTIFICATION: u8 = 0x71;

/// A single event pushed by the controller.
///
/// Topology events carry the node snapshot as of the event; the
/// notification variants are stateless and tied to a node by id.
#[derive(Debug, Clone)]
pub enum ControllerEvent {
    /// A node joined the network (possibly not ready yet).
    NodeAdded(Arc<Node>),
    /// A node left the network.
    NodeRemoved(Arc<Node>),
    /// A node finished its interview.
    NodeReady(Arc<Node>),
    /// Stateless value event (scene activation, button press...).
    ValueNotification(Arc<ValueNotification>),
    /// Notification/entry-control command class report.
    Notification(Arc<Notification>),
}

impl ControllerEvent {
    /// Node the event refers to.
    pub fn node_id(&self) -> NodeId {
        match self {
            Self::NodeAdded(node) | Self::NodeRemoved(node) | Self::NodeReady(node) => node.node_id,
            Self::ValueNotification(n) => n.node_id,
            Self::Notification(n) => n.node_id(),
        }
    }
}

// ── ValueNotification ───────────────────────────────────────────────

/// A stateless value event. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValueNotification {
    pub node_id: NodeId,
    pub command_class: u8,
    pub command_class_name: String,
    #[serde(default)]
    pub endpoint: u8,
    pub property: serde_json::Value,
    #[serde(default)]
    pub property_name: Option<String>,
    #[serde(default)]
    pub property_key: Option<serde_json::Value>,
    #[serde(default)]
    pub property_key_name: Option<String>,
    #[serde(default)]
    pub metadata: ValueMetadata,
    pub value: serde_json::Value,
}

// ── Notification ────────────────────────────────────────────────────

/// Report from the Entry Control command class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryControlNotification {
    pub node_id: NodeId,
    pub event_type: u8,
    pub data_type: u8,
    #[serde(default)]
    pub event_data: Option<serde_json::Value>,
}

/// Report from the Notification command class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenericNotification {
    pub node_id: NodeId,
    pub label: String,
    #[serde(rename = "type")]
    pub notification_type: u8,
    pub event: u8,
    pub event_label: String,
    #[serde(default)]
    pub parameters: Option<serde_json::Value>,
}

/// Notification event, by originating command class.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    EntryControl(EntryControlNotification),
    Generic(GenericNotification),
}

impl Notification {
    pub fn node_id(&self) -> NodeId {
        match self {
            Self::EntryControl(n) => n.node_id,
            Self::Generic(n) => n.node_id,
        }
    }

    pub fn command_class(&self) -> u8 {
        match self {
            Self::EntryControl(_) => COMMAND_CLASS_ENTRY_CONTROL,
            Self::Generic(_) => COMMAND_CLASS_NOTIFICATION,
        }
    }
}
