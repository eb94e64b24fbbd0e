//! Contract with the supervisor that runs the controller server add-on.
//!
//! Every method is a single foreground call. Scheduling, reentry
//! protection and background ownership are layered on top by the core's
//! lifecycle guard.

use async_trait::async_trait;
use secrecy::SecretString;
use thiserror::Error;

/// Options written to the add-on before it is started.
#[derive(Debug, Clone)]
pub struct AddonConfig {
    /// Serial device of the Z-Wave stick (e.g. `/dev/ttyACM0`).
    pub usb_path: String,
    /// S0 network key.
    pub network_key: SecretString,
}

/// Installed/running status reported by the supervisor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddonInfo {
    pub installed: bool,
    pub running: bool,
    pub version: Option<String>,
    pub update_available: bool,
}

/// A supervisor call failed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AddonError {
    #[error("Failed to get the add-on info: {0}")]
    Info(String),

    #[error("Failed to install the add-on: {0}")]
    Install(String),

    #[error("Failed to set the add-on options: {0}")]
    SetOptions(String),

    #[error("Failed to start the add-on: {0}")]
    Start(String),

    #[error("Failed to stop the add-on: {0}")]
    Stop(String),

    #[error("Failed to update the add-on: {0}")]
    Update(String),

    #[error("Failed to create a snapshot of the add-on: {0}")]
    Snapshot(String),

    #[error("Failed to uninstall the add-on: {0}")]
    Uninstall(String),
}

/// Supervisor operations for the controller server add-on.
#[async_trait]
pub trait AddonManager: Send + Sync {
    async fn addon_info(&self) -> Result<AddonInfo, AddonError>;

    async fn install(&self) -> Result<(), AddonError>;

    async fn set_options(&self, config: &AddonConfig) -> Result<(), AddonError>;

    async fn start(&self) -> Result<(), AddonError>;

    async fn stop(&self) -> Result<(), AddonError>;

    async fn update(&self) -> Result<(), AddonError>;

    async fn create_snapshot(&self) -> Result<(), AddonError>;

    async fn uninstall(&self) -> Result<(), AddonError>;
}
