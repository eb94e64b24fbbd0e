// ── Device registry sync ──
//
// Keeps the device registry aligned with the controller's node set: one
// device per node identity, devices of departed nodes removed.

use std::collections::HashSet;
use std::sync::Arc;

use meshlink_api::{Node, NodeId};
use tracing::{debug, info};

use crate::entry::EntryContext;
use crate::error::CoreError;
use crate::model::{Device, DeviceAdded, DeviceId, DeviceIdentifier, DeviceParams};

pub struct DeviceRegistrySync {
    ctx: Arc<EntryContext>,
}

impl DeviceRegistrySync {
    pub fn new(ctx: Arc<EntryContext>) -> Self {
        Self { ctx }
    }

    /// Create or refresh the device of a node and announce it.
    pub fn register_node(&self, node: &Node) -> Result<Arc<Device>, CoreError> {
        let home_id = self.ctx.home_id()?;
        let entry_id = &self.ctx.config.entry_id;

        let device = self
            .ctx
            .host
            .devices
            .get_or_create(DeviceParams::for_node(entry_id, home_id, node));
        debug!(
            %entry_id,
            node_id = node.node_id,
            device_id = %device.id,
            ready = node.ready,
            "device registered"
        );

        self.ctx.host.bus.publish_device_added(DeviceAdded {
            entry_id: entry_id.clone(),
            device: Arc::clone(&device),
        });
        Ok(device)
    }

    /// Remove the device of a node. Returns `false` if it was already gone.
    pub fn remove_node(&self, node_id: NodeId) -> Result<bool, CoreError> {
        let home_id = self.ctx.home_id()?;
        let entry_id = &self.ctx.config.entry_id;
        let ident = DeviceIdentifier::for_node(home_id, node_id);

        let Some(device) = self.ctx.host.devices.get_device(&[ident]) else {
            debug!(%entry_id, node_id, "no device to remove");
            return Ok(false);
        };

        let removed = self.ctx.host.devices.remove(&device.id);
        if removed {
            info!(%entry_id, node_id, device_id = %device.id, "device removed");
        }
        Ok(removed)
    }

    /// Remove every device of this entry that matches none of `live`.
    pub fn remove_stale_devices(&self, live: &[Arc<Node>]) -> Result<Vec<DeviceId>, CoreError> {
        let home_id = self.ctx.home_id()?;
        let entry_id = &self.ctx.config.entry_id;

        let live: HashSet<DeviceIdentifier> = live
            .iter()
            .map(|n| DeviceIdentifier::for_node(home_id, n.node_id))
            .collect();

        let mut removed = Vec::new();
        for device in self.ctx.host.devices.entries_for_entry(entry_id) {
            if device.identifiers.iter().any(|i| live.contains(i)) {
                continue;
            }
            if self.ctx.host.devices.remove(&device.id) {
                info!(%entry_id, device_id = %device.id, name = %device.name, "removed stale device");
                removed.push(device.id);
            }
        }
        Ok(removed)
    }
}
