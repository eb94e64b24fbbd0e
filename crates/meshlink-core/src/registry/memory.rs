// ── In-memory registries ──

use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use tracing::debug;

use super::collection::Collection;
use super::{DeviceRegistry, EntityRegistry};
use crate::error::CoreError;
use crate::model::{Device, DeviceId, DeviceIdentifier, DeviceParams, EntryId, Platform};
use crate::stream::RegistryStream;

// ── Devices ─────────────────────────────────────────────────────────

/// Process-local device registry.
///
/// Reads are lock-free; `get_or_create` and `remove` serialize on a write
/// lock so a lookup-then-insert can never race another registration of the
/// same identity.
pub struct InMemoryDeviceRegistry {
    devices: Collection<Device>,
    write: Mutex<()>,
}

impl InMemoryDeviceRegistry {
    pub fn new() -> Self {
        Self {
            devices: Collection::new(),
            write: Mutex::new(()),
        }
    }

    /// Snapshot of every device.
    pub fn devices(&self) -> Arc<Vec<Arc<Device>>> {
        self.devices.snapshot()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Subscribe to device-set changes.
    pub fn subscribe(&self) -> RegistryStream<Device> {
        RegistryStream::new(self.devices.subscribe())
    }

    fn find(&self, identifiers: &[DeviceIdentifier]) -> Option<Arc<Device>> {
        identifiers
            .iter()
            .find_map(|ident| self.devices.get_by_alias(&ident.to_string()))
    }
}

impl Default for InMemoryDeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceRegistry for InMemoryDeviceRegistry {
    fn get_or_create(&self, params: DeviceParams) -> Arc<Device> {
        let _write = self.write.lock().unwrap_or_else(PoisonError::into_inner);

        let lookup: Vec<DeviceIdentifier> = params.identifiers.iter().cloned().collect();
        let now = Utc::now();

        let device = match self.find(&lookup) {
            Some(existing) => {
                let mut identifiers = existing.identifiers.clone();
                identifiers.extend(params.identifiers);
                Device {
                    id: existing.id,
                    config_entry_id: params.config_entry_id,
                    identifiers,
                    name: params.name,
                    manufacturer: params.manufacturer,
                    model: params.model,
                    sw_version: params.sw_version,
                    suggested_area: params.suggested_area,
                    created_at: existing.created_at,
                    updated_at: now,
                }
            }
            None => Device {
                id: DeviceId::new_random(),
                config_entry_id: params.config_entry_id,
                identifiers: params.identifiers,
                name: params.name,
                manufacturer: params.manufacturer,
                model: params.model,
                sw_version: params.sw_version,
                suggested_area: params.suggested_area,
                created_at: now,
                updated_at: now,
            },
        };

        let device = Arc::new(device);
        let aliases = device.identifiers.iter().map(ToString::to_string).collect();
        if self
            .devices
            .upsert(device.id.to_string(), aliases, Arc::clone(&device))
        {
            debug!(device_id = %device.id, name = %device.name, "device created");
        }
        device
    }

    fn get_device(&self, identifiers: &[DeviceIdentifier]) -> Option<Arc<Device>> {
        self.find(identifiers)
    }

    fn remove(&self, device_id: &DeviceId) -> bool {
        let _write = self.write.lock().unwrap_or_else(PoisonError::into_inner);
        self.devices.remove(&device_id.to_string()).is_some()
    }

    fn entries_for_entry(&self, entry_id: &EntryId) -> Vec<Arc<Device>> {
        self.devices
            .snapshot()
            .iter()
            .filter(|d| d.config_entry_id == *entry_id)
            .cloned()
            .collect()
    }
}

// ── Entities ────────────────────────────────────────────────────────

/// One registered entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryEntity {
    pub entity_id: String,
    pub platform: Platform,
    pub unique_id: String,
    pub config_entry_id: EntryId,
}

impl RegistryEntity {
    fn alias(&self) -> String {
        entity_alias(self.platform, &self.unique_id)
    }
}

fn entity_alias(platform: Platform, unique_id: &str) -> String {
    format!("{platform}:{unique_id}")
}

/// Process-local entity registry.
pub struct InMemoryEntityRegistry {
    entities: Collection<RegistryEntity>,
    write: Mutex<()>,
}

impl InMemoryEntityRegistry {
    pub fn new() -> Self {
        Self {
            entities: Collection::new(),
            write: Mutex::new(()),
        }
    }

    /// Register an entity, or return the one already holding
    /// `(platform, unique_id)`.
    pub fn register(
        &self,
        platform: Platform,
        unique_id: &str,
        entry_id: &EntryId,
    ) -> Arc<RegistryEntity> {
        let _write = self.write.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = self.entities.get_by_alias(&entity_alias(platform, unique_id)) {
            return existing;
        }

        let slug: String = unique_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        let entity = Arc::new(RegistryEntity {
            entity_id: format!("{platform}.{slug}"),
            platform,
            unique_id: unique_id.to_owned(),
            config_entry_id: entry_id.clone(),
        });
        self.entities.upsert(
            entity.entity_id.clone(),
            vec![entity.alias()],
            Arc::clone(&entity),
        );
        entity
    }

    pub fn get(&self, entity_id: &str) -> Option<Arc<RegistryEntity>> {
        self.entities.get_by_key(entity_id)
    }

    pub fn entities(&self) -> Arc<Vec<Arc<RegistryEntity>>> {
        self.entities.snapshot()
    }
}

impl Default for InMemoryEntityRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl EntityRegistry for InMemoryEntityRegistry {
    fn entity_id_for(&self, platform: Platform, unique_id: &str) -> Option<String> {
        self.entities
            .key_for_alias(&entity_alias(platform, unique_id))
    }

    fn update_unique_id(&self, entity_id: &str, new_unique_id: &str) -> Result<(), CoreError> {
        let _write = self.write.lock().unwrap_or_else(PoisonError::into_inner);

        let Some(current) = self.entities.get_by_key(entity_id) else {
            return Err(CoreError::RegistryInconsistency {
                message: format!("entity {entity_id} is not registered"),
            });
        };

        let new_alias = entity_alias(current.platform, new_unique_id);
        if let Some(holder) = self.entities.key_for_alias(&new_alias) {
            if holder != entity_id {
                return Err(CoreError::RegistryInconsistency {
                    message: format!(
                        "unique id {new_unique_id} already belongs to entity {holder}"
                    ),
                });
            }
        }

        let updated = Arc::new(RegistryEntity {
            unique_id: new_unique_id.to_owned(),
            ..(*current).clone()
        });
        self.entities
            .upsert(entity_id.to_owned(), vec![new_alias], updated);
        Ok(())
    }
}
