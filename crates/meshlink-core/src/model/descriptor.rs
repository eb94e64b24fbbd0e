// ── Discovery descriptors ──
//
// Output of the value-discovery rules: one descriptor per entity to create,
// keyed by platform and by the primary value's id within the node.

use meshlink_api::{HomeId, NodeId, Value};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString};

/// Entity category. Each platform needs one-time setup per session.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
    EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Platform {
    BinarySensor,
    Climate,
    Cover,
    Fan,
    Light,
    Lock,
    Number,
    Sensor,
    Switch,
}

/// One entity discovered on a ready node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryDescriptor {
    pub node_id: NodeId,
    pub platform: Platform,
    /// Refinement passed through to the platform's entity builder
    /// (e.g. `"dimmer"` for a light).
    pub platform_hint: Option<String>,
    /// Value the entity is built around.
    pub primary_value: Value,
    /// Value ids this entity may have been registered under by older
    /// releases. Consumed by the unique-id migration.
    #[serde(default)]
    pub legacy_value_ids: Vec<String>,
}

impl DiscoveryDescriptor {
    /// Key of the descriptor within its node.
    pub fn key(&self) -> &str {
        &self.primary_value.value_id
    }

    /// Entity-registry unique id: `{home_id}.{value_id}`.
    pub fn unique_id(&self, home_id: HomeId) -> String {
        unique_id(home_id, self.key())
    }
}

/// Entity-registry unique id for a value id.
pub fn unique_id(home_id: HomeId, value_id: &str) -> String {
    format!("{home_id}.{value_id}")
}
