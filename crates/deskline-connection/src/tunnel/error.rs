//! Tunnel error type

use deskline_core::DesklineError;

/// Error types for SSH tunnel operations
#[derive(Debug, thiserror::Error)]
pub enum SshTunnelError {
    /// Tunnel settings are missing or contradictory
    #[error("Invalid SSH tunnel configuration: {0}")]
    Configuration(String),

    /// Failed to connect to SSH server
    #[error("Failed to connect to SSH server {host}:{port}: {source}")]
    ConnectionFailed {
        host: String,
        port: u16,
        source: std::io::Error,
    },

    /// SSH handshake failed
    #[error("SSH handshake failed: {0}")]
    HandshakeFailed(String),

    /// Authentication failed
    #[error("SSH authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Private key file not found
    #[error("Private key file not found: {path}")]
    PrivateKeyNotFound { path: String },

    /// Failed to open the local listener or a forwarding channel
    #[error("Failed to establish port forwarding: {0}")]
    PortForwardingFailed(String),

    /// Tunnel is not running
    #[error("SSH tunnel is closed")]
    TunnelClosed,
}

impl From<SshTunnelError> for DesklineError {
    fn from(err: SshTunnelError) -> Self {
        match err {
            SshTunnelError::Configuration(msg) => DesklineError::Configuration(msg),
            other => DesklineError::Tunnel(other.to_string()),
        }
    }
}
