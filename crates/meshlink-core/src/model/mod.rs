// ── Domain model ──

pub mod descriptor;
pub mod device;
pub mod event;
pub mod identity;

pub use descriptor::{DiscoveryDescriptor, Platform, unique_id};
pub use device::{Device, DeviceParams};
pub use event::{
    DeviceAdded, EntityDiscovered, NotificationDetails, NotificationEvent, ValueNotificationEvent,
};
pub use identity::{DOMAIN, DeviceId, DeviceIdentifier, EntryId};
