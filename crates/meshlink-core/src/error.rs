// ── Core error types ──
//
// Errors surfaced by the orchestration core. Transport-level failures from
// `meshlink_api` are translated through `From` so callers only ever match
// on `CoreError`.

use meshlink_api::{AddonError, NodeId};
use thiserror::Error;

use crate::model::Platform;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Connection errors ────────────────────────────────────────────
    #[error("Handshake with server timed out after {timeout_secs}s")]
    ConnectTimeout { timeout_secs: u64 },

    #[error("Incompatible server version: {message}")]
    ProtocolVersionMismatch { message: String },

    #[error("Cannot connect to server at {url}: {reason}")]
    ConnectionFailed { url: String, reason: String },

    #[error("Listen loop ended unexpectedly: {reason}")]
    UnexpectedListenFailure { reason: String },

    #[error("Driver state not loaded yet")]
    DriverNotReady,

    // ── Add-on lifecycle ─────────────────────────────────────────────
    #[error("Add-on error: {0}")]
    Addon(#[from] AddonError),

    #[error("Add-on operation '{requested}' rejected: '{running}' is in progress")]
    OperationInProgress { requested: String, running: String },

    // ── Entry lifecycle ──────────────────────────────────────────────
    #[error("Entry not ready: {reason}")]
    NotReady { reason: String },

    #[error("Entry not loaded: {entry_id}")]
    EntryNotLoaded { entry_id: String },

    #[error("Operation cancelled")]
    Cancelled,

    // ── Registry / discovery ─────────────────────────────────────────
    #[error("Registry inconsistency: {message}")]
    RegistryInconsistency { message: String },

    #[error("Discovery failed for node {node_id}: {message}")]
    Discovery { node_id: NodeId, message: String },

    #[error("Setup of platform {platform} failed: {reason}")]
    PlatformSetup { platform: Platform, reason: String },

    #[error("Platforms failed to unload: {platforms}")]
    PlatformUnload { platforms: String },

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Setup failed for a reason a later attempt may not hit.
    ///
    /// Retryable failures keep the entry in "not ready" and schedule
    /// another setup; everything else parks the entry in an error state.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConnectTimeout { .. }
                | Self::ProtocolVersionMismatch { .. }
                | Self::ConnectionFailed { .. }
                | Self::UnexpectedListenFailure { .. }
                | Self::NotReady { .. }
                | Self::OperationInProgress { .. }
        )
    }

    /// Handshake failures (timeout, version, transport).
    pub fn is_connect_failure(&self) -> bool {
        matches!(
            self,
            Self::ConnectTimeout { .. }
                | Self::ProtocolVersionMismatch { .. }
                | Self::ConnectionFailed { .. }
        )
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<meshlink_api::Error> for CoreError {
    fn from(err: meshlink_api::Error) -> Self {
        match err {
            meshlink_api::Error::InvalidServerVersion { .. } => CoreError::ProtocolVersionMismatch {
                message: err.to_string(),
            },
            meshlink_api::Error::Connect(reason) => CoreError::ConnectionFailed {
                url: String::new(),
                reason,
            },
            meshlink_api::Error::NotConnected => CoreError::ConnectionFailed {
                url: String::new(),
                reason: "not connected".into(),
            },
            meshlink_api::Error::ConnectionClosed { code, reason } => {
                CoreError::UnexpectedListenFailure {
                    reason: format!("connection closed (code {code}): {reason}"),
                }
            }
            meshlink_api::Error::Listen(reason) => CoreError::UnexpectedListenFailure { reason },
            meshlink_api::Error::Protocol(message) => {
                CoreError::Internal(format!("Protocol error: {message}"))
            }
            meshlink_api::Error::Deserialization { message, body: _ } => {
                CoreError::Internal(format!("Deserialization error: {message}"))
            }
        }
    }
}
