// ── Controller-side node model ──
//
// Snapshots of the driver's live view. The transport hands these out as
// `Arc<Node>`; consumers never mutate them and never keep them past the
// session that produced them.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Network (home) identifier of a controller.
pub type HomeId = u32;

/// Node identifier, unique within one home.
pub type NodeId = u16;

// ── NodeIdentity ────────────────────────────────────────────────────

/// Globally unique node identity: home id + node id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeIdentity {
    pub home_id: HomeId,
    pub node_id: NodeId,
}

impl NodeIdentity {
    pub fn new(home_id: HomeId, node_id: NodeId) -> Self {
        Self { home_id, node_id }
    }
}

impl fmt::Display for NodeIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.home_id, self.node_id)
    }
}

// ── DeviceConfig ────────────────────────────────────────────────────

/// Manufacturer database entry the driver matched for a node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceConfig {
    #[serde(default)]
    pub manufacturer: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

// ── Values ──────────────────────────────────────────────────────────

/// Value metadata. `states` maps raw values (as strings) to labels.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValueMetadata {
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub states: BTreeMap<String, String>,
}

impl ValueMetadata {
    /// Translate a raw value through `states`, falling back to the raw value.
    pub fn decode(&self, raw: &serde_json::Value) -> serde_json::Value {
        let key = match raw {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        self.states
            .get(&key)
            .map_or_else(|| raw.clone(), |label| serde_json::Value::String(label.clone()))
    }
}

/// One value exposed by a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Value {
    /// Stable value id: `{node}-{cc}-{endpoint}-{property}[-{key}]`.
    pub value_id: String,
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
    #[serde(default)]
    pub value: Option<serde_json::Value>,
}

// ── Node ────────────────────────────────────────────────────────────

/// A controllable unit on the mesh, as last reported by the driver.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub node_id: NodeId,
    /// Interview complete; metadata is safe to map to entities.
    #[serde(default)]
    pub ready: bool,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub firmware_version: Option<String>,
    #[serde(default)]
    pub device_config: DeviceConfig,
    #[serde(default)]
    pub values: Vec<Value>,
}

impl Node {
    /// Display name: user name, then device description, then `Node {id}`.
    pub fn display_name(&self) -> String {
        self.name
            .clone()
            .filter(|n| !n.is_empty())
            .or_else(|| self.device_config.description.clone())
            .unwrap_or_else(|| format!("Node {}", self.node_id))
    }

    pub fn identity(&self, home_id: HomeId) -> NodeIdentity {
        NodeIdentity::new(home_id, self.node_id)
    }
}
