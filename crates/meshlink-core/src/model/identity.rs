// ── Core identity types ──
//
// EntryId, DeviceId and DeviceIdentifier tie registry records to config
// entries and to controller nodes.

use std::fmt;
use std::str::FromStr;

use meshlink_api::{HomeId, NodeId, NodeIdentity};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Integration domain stamped on identifiers and published events.
pub const DOMAIN: &str = "zwave_js";

// ── EntryId ─────────────────────────────────────────────────────────

/// Identifier of one configured controller entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryId(String);

impl EntryId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for EntryId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for EntryId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

// ── DeviceId ────────────────────────────────────────────────────────

/// Registry-assigned device record id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(Uuid);

impl DeviceId {
    pub fn new_random() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

impl FromStr for DeviceId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl From<Uuid> for DeviceId {
    fn from(u: Uuid) -> Self {
        Self(u)
    }
}

// ── DeviceIdentifier ────────────────────────────────────────────────

/// `(domain, id)` pair linking a registry device to an external identity.
///
/// Nodes map to `("zwave_js", "{home_id}-{node_id}")`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceIdentifier {
    pub domain: String,
    pub id: String,
}

impl DeviceIdentifier {
    pub fn new(domain: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            id: id.into(),
        }
    }

    /// Identifier of the device backing a node.
    pub fn for_node(home_id: HomeId, node_id: NodeId) -> Self {
        Self::new(DOMAIN, NodeIdentity::new(home_id, node_id).to_string())
    }
}

impl fmt::Display for DeviceIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.domain, self.id)
    }
}
