// meshlink-core: connection lifecycle and device-graph reconciliation for
// Z-Wave JS controller entries.
//
// Everything outside the core (transport, add-on supervisor, registries,
// discovery rules, platform builders) is consumed through traits. The
// `EntrySupervisor` is the entry point; it owns one `EntryRuntime` per
// loaded entry.

pub mod addon;
pub mod bus;
pub mod config;
pub mod coordinator;
pub mod discovery;
pub mod entry;
pub mod error;
pub mod host;
pub mod migrate;
pub mod model;
pub mod registry;
pub mod registry_sync;
pub mod relay;
pub mod session;
pub mod stream;
pub mod supervisor;

// ── Primary re-exports ──────────────────────────────────────────────
pub use addon::{AddonLifecycleGuard, AddonOperation};
pub use bus::EventBus;
pub use config::{EntryConfig, RetryConfig, SupervisorConfig};
pub use coordinator::{NodeReadiness, NodeReadinessCoordinator};
pub use discovery::{DiscoveryError, DiscoveryReconciler, SetupStatus, ValueDiscovery};
pub use entry::{EntryContext, EntryRuntime};
pub use error::CoreError;
pub use host::{HostServices, PlatformHost, TransportFactory};
pub use registry::{
    DeviceRegistry, EntityRegistry, InMemoryDeviceRegistry, InMemoryEntityRegistry,
};
pub use registry_sync::DeviceRegistrySync;
pub use relay::NotificationRelay;
pub use session::{ConnectionSession, SessionNotice, SessionState};
pub use stream::{RegistryStream, Snapshot, SnapshotStream};
pub use supervisor::{EntryState, EntrySupervisor};

// ── Model re-exports ────────────────────────────────────────────────
pub use model::{
    DOMAIN, Device, DeviceAdded, DeviceId, DeviceIdentifier, DeviceParams, DiscoveryDescriptor,
    EntityDiscovered, EntryId, NotificationDetails, NotificationEvent, Platform,
    ValueNotificationEvent,
};
