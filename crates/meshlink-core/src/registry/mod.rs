// ── Device and entity registries ──
//
// The persistent registries are owned by the host application. The core
// only needs the narrow slice below; `memory` holds in-process versions
// used when nothing else is plugged in, and by the tests.

mod collection;
mod memory;

use std::sync::Arc;

use crate::error::CoreError;
use crate::model::{Device, DeviceId, DeviceIdentifier, DeviceParams, EntryId, Platform};

pub use memory::{InMemoryDeviceRegistry, InMemoryEntityRegistry, RegistryEntity};

/// Device records, one per node identity.
pub trait DeviceRegistry: Send + Sync {
    /// Return the device matching any of `params.identifiers`, with its
    /// metadata overwritten from `params`, or create it. Atomic per call.
    fn get_or_create(&self, params: DeviceParams) -> Arc<Device>;

    /// Device matching any of the identifiers.
    fn get_device(&self, identifiers: &[DeviceIdentifier]) -> Option<Arc<Device>>;

    /// Remove a device. Returns `false` if it was already gone.
    fn remove(&self, device_id: &DeviceId) -> bool;

    /// All devices linked to a config entry.
    fn entries_for_entry(&self, entry_id: &EntryId) -> Vec<Arc<Device>>;
}

/// Entity records, keyed by `(platform, unique_id)`.
pub trait EntityRegistry: Send + Sync {
    /// Entity id registered for a unique id on a platform.
    fn entity_id_for(&self, platform: Platform, unique_id: &str) -> Option<String>;

    /// Re-key an entity to a new unique id.
    fn update_unique_id(&self, entity_id: &str, new_unique_id: &str) -> Result<(), CoreError>;
}
