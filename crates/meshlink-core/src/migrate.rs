// ── Unique-id migration ──
//
// Older releases keyed entities by value ids that have since changed shape.
// Before an entity is announced, an entity still registered under one of
// its legacy ids is re-keyed to the current one so it keeps its entity id.

use tracing::{debug, info};

use crate::error::CoreError;
use crate::model::{DiscoveryDescriptor, unique_id};
use crate::registry::EntityRegistry;
use meshlink_api::HomeId;

/// Re-key the entity behind a legacy id of `descriptor`, if any.
///
/// Returns the migrated entity id. A no-op when an entity already holds the
/// current unique id, so running it again is harmless.
pub fn migrate_unique_id(
    entities: &dyn EntityRegistry,
    home_id: HomeId,
    descriptor: &DiscoveryDescriptor,
) -> Result<Option<String>, CoreError> {
    let platform = descriptor.platform;
    let new_unique_id = descriptor.unique_id(home_id);

    if entities.entity_id_for(platform, &new_unique_id).is_some() {
        return Ok(None);
    }

    for legacy in &descriptor.legacy_value_ids {
        let old_unique_id = unique_id(home_id, legacy);
        let Some(entity_id) = entities.entity_id_for(platform, &old_unique_id) else {
            continue;
        };

        entities.update_unique_id(&entity_id, &new_unique_id)?;
        info!(
            %entity_id,
            old = %old_unique_id,
            new = %new_unique_id,
            "migrated entity unique id"
        );
        return Ok(Some(entity_id));
    }

    debug!(unique_id = %new_unique_id, "no legacy entity to migrate");
    Ok(None)
}
