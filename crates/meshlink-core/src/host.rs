// ── Host collaborators ──
//
// Everything the core consumes from the embedding application, bundled so
// the supervisor can hand one value to every entry it sets up.

use std::sync::Arc;

use async_trait::async_trait;
use meshlink_api::Transport;

use crate::addon::AddonLifecycleGuard;
use crate::bus::EventBus;
use crate::config::EntryConfig;
use crate::discovery::ValueDiscovery;
use crate::error::CoreError;
use crate::model::{EntryId, Platform};
use crate::registry::{DeviceRegistry, EntityRegistry};

/// Per-platform entity plumbing of the host application.
#[async_trait]
pub trait PlatformHost: Send + Sync {
    /// Prepare a platform to receive entity-discovered records for an entry.
    async fn setup_platform(&self, entry_id: &EntryId, platform: Platform)
    -> Result<(), CoreError>;

    /// Tear a platform down. Returns `false` if the host refused.
    async fn unload_platform(
        &self,
        entry_id: &EntryId,
        platform: Platform,
    ) -> Result<bool, CoreError>;
}

/// Builds a fresh transport for every session of an entry.
pub trait TransportFactory: Send + Sync {
    fn create(&self, config: &EntryConfig) -> Arc<dyn Transport>;
}

/// Collaborators shared by every entry of a supervisor.
#[derive(Clone)]
pub struct HostServices {
    pub transports: Arc<dyn TransportFactory>,
    /// Lifecycle guard of the server add-on, when one is managed.
    pub addon: Option<Arc<AddonLifecycleGuard>>,
    pub devices: Arc<dyn DeviceRegistry>,
    pub entities: Arc<dyn EntityRegistry>,
    pub discovery: Arc<dyn ValueDiscovery>,
    pub platforms: Arc<dyn PlatformHost>,
    pub bus: EventBus,
}

impl HostServices {
    /// Add-on guard for an entry that manages the add-on.
    pub(crate) fn addon_for(&self, config: &EntryConfig) -> Option<&Arc<AddonLifecycleGuard>> {
        if config.uses_addon() {
            self.addon.as_ref()
        } else {
            None
        }
    }
}
