// ── Registry device ──

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use meshlink_api::{HomeId, Node};
use serde::{Deserialize, Serialize};

use super::identity::{DeviceId, DeviceIdentifier, EntryId};

/// A device record in the device registry.
///
/// One per node identity. Display metadata is a snapshot taken at the last
/// registration and is overwritten, never duplicated, on re-registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub id: DeviceId,
    pub config_entry_id: EntryId,
    pub identifiers: BTreeSet<DeviceIdentifier>,
    pub name: String,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    pub sw_version: Option<String>,
    pub suggested_area: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Device {
    pub fn has_identifier(&self, ident: &DeviceIdentifier) -> bool {
        self.identifiers.contains(ident)
    }
}

/// Arguments of a get-or-create call against the device registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceParams {
    pub config_entry_id: EntryId,
    pub identifiers: BTreeSet<DeviceIdentifier>,
    pub name: String,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    pub sw_version: Option<String>,
    pub suggested_area: Option<String>,
}

impl DeviceParams {
    /// Registration parameters for a node. Valid for nodes that are not
    /// ready yet: missing metadata just yields placeholder fields.
    pub fn for_node(entry_id: &EntryId, home_id: HomeId, node: &Node) -> Self {
        Self {
            config_entry_id: entry_id.clone(),
            identifiers: BTreeSet::from([DeviceIdentifier::for_node(home_id, node.node_id)]),
            name: node.display_name(),
            manufacturer: node.device_config.manufacturer.clone(),
            model: node.device_config.label.clone(),
            sw_version: node.firmware_version.clone(),
            suggested_area: node.location.clone().filter(|l| !l.is_empty()),
        }
    }
}
