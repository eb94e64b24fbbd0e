use thiserror::Error;

/// Top-level error type for the `meshlink-api` crate.
///
/// Covers every failure a [`Transport`](crate::Transport) can report:
/// handshake, version negotiation, listen loop and payload decoding.
/// `meshlink-core` maps these into its own taxonomy.
#[derive(Debug, Clone, Error)]
pub enum Error {
    // ── Handshake ───────────────────────────────────────────────────
    /// The server speaks a schema/version this client cannot use.
    #[error("Invalid server version: server {server_version}, required {required_version}")]
    InvalidServerVersion {
        server_version: String,
        required_version: String,
    },

    /// Connection could not be established (refused, DNS failure, TLS...).
    #[error("Cannot connect to server: {0}")]
    Connect(String),

    // ── Session ─────────────────────────────────────────────────────
    /// Operation requires an established connection.
    #[error("Not connected to server")]
    NotConnected,

    /// The server closed the connection.
    #[error("Connection closed (code {code}): {reason}")]
    ConnectionClosed { code: u16, reason: String },

    /// The listen loop failed after the handshake succeeded.
    #[error("Failed to listen: {0}")]
    Listen(String),

    // ── Data ────────────────────────────────────────────────────────
    /// The server sent something the client could not understand.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// JSON deserialization failed, with the raw payload for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },
}

impl Error {
    /// Returns `true` if reconnecting (possibly after a server upgrade)
    /// might resolve this error.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Connect(_) | Self::ConnectionClosed { .. } | Self::Listen(_) | Self::NotConnected
        )
    }

    /// Returns `true` if the server reported an incompatible version.
    pub fn is_version_mismatch(&self) -> bool {
        matches!(self, Self::InvalidServerVersion { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_errors_are_transient() {
        assert!(Error::Connect("refused".into()).is_transient());
        assert!(Error::Listen("reset by peer".into()).is_transient());
    }

    #[test]
    fn version_mismatch_is_not_transient() {
        let err = Error::InvalidServerVersion {
            server_version: "1.0.0".into(),
            required_version: "1.1.0".into(),
        };
        assert!(!err.is_transient());
        assert!(err.is_version_mismatch());
        assert_eq!(
            err.to_string(),
            "Invalid server version: server 1.0.0, required 1.1.0"
        );
    }
}
