// meshlink-api: contracts with a Z-Wave JS controller server (Transport)
// and the add-on supervisor that runs it (AddonManager).
//
// The wire protocol lives behind `Transport`; this crate only fixes the
// shape of what the core consumes.

pub mod addon;
pub mod error;
pub mod event;
pub mod model;
pub mod transport;

pub use addon::{AddonConfig, AddonError, AddonInfo, AddonManager};
pub use error::Error;
pub use event::{
    ControllerEvent, EntryControlNotification, GenericNotification, Notification,
    ValueNotification,
};
pub use model::{DeviceConfig, HomeId, Node, NodeId, NodeIdentity, Value, ValueMetadata};
pub use transport::Transport;
