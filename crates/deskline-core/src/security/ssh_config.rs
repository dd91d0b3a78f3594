//! SSH Tunnel Configuration Types
//!
//! Describes how to reach a bastion host that forwards traffic to a database
//! server which is not directly reachable. Exactly one credential must be
//! configured: a private key (optionally encrypted) or a password.

use crate::{DesklineError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Authentication method resolved from an [`SshTunnelConfig`]
#[derive(Debug, Clone, PartialEq)]
pub enum SshAuthMethod<'a> {
    /// Authenticate using a password
    Password { password: &'a str },
    /// Authenticate using a private key file
    PrivateKey {
        path: &'a PathBuf,
        passphrase: Option<&'a str>,
    },
}

/// Configuration for establishing an SSH tunnel
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SshTunnelConfig {
    /// SSH server hostname or IP address
    pub host: String,
    /// SSH server port (default: 22)
    #[serde(default = "default_port")]
    pub port: u16,
    /// Username for SSH authentication
    pub username: String,
    /// Path to a private key file
    #[serde(default)]
    pub private_key_path: Option<PathBuf>,
    /// Passphrase for an encrypted private key
    #[serde(default, skip_serializing)]
    pub passphrase: Option<String>,
    /// Password, used when no private key is configured
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
    /// Connection timeout in seconds (default: 30)
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u32,
    /// Keep-alive interval in seconds (0 to disable)
    #[serde(default)]
    pub keepalive_seconds: u32,
}

fn default_port() -> u16 {
    22
}

fn default_timeout() -> u32 {
    30
}

impl SshTunnelConfig {
    fn base(host: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: default_port(),
            username: username.into(),
            private_key_path: None,
            passphrase: None,
            password: None,
            timeout_seconds: default_timeout(),
            keepalive_seconds: 0,
        }
    }

    /// Create a new SSH tunnel configuration with password authentication
    pub fn with_password(
        host: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        let mut config = Self::base(host, username);
        config.password = Some(password.into());
        config
    }

    /// Create a new SSH tunnel configuration with private key authentication
    pub fn with_private_key(
        host: impl Into<String>,
        username: impl Into<String>,
        key_path: impl Into<PathBuf>,
    ) -> Self {
        let mut config = Self::base(host, username);
        config.private_key_path = Some(key_path.into());
        config
    }

    /// Set the passphrase protecting the private key
    pub fn passphrase(mut self, passphrase: impl Into<String>) -> Self {
        self.passphrase = Some(passphrase.into());
        self
    }

    /// Set the SSH server port
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the connection timeout in seconds
    pub fn timeout(mut self, seconds: u32) -> Self {
        self.timeout_seconds = seconds;
        self
    }

    /// Set the keep-alive interval in seconds
    pub fn keepalive(mut self, seconds: u32) -> Self {
        self.keepalive_seconds = seconds;
        self
    }

    /// Resolve the configured credential.
    ///
    /// Fails when neither or both of private key and password are set.
    pub fn auth_method(&self) -> Result<SshAuthMethod<'_>> {
        let key = self
            .private_key_path
            .as_ref()
            .filter(|p| !p.as_os_str().is_empty());
        let password = self.password.as_deref().filter(|p| !p.is_empty());

        match (key, password) {
            (Some(path), None) => Ok(SshAuthMethod::PrivateKey {
                path,
                passphrase: self.passphrase.as_deref().filter(|p| !p.is_empty()),
            }),
            (None, Some(password)) => Ok(SshAuthMethod::Password { password }),
            (Some(_), Some(_)) => Err(DesklineError::Configuration(
                "SSH tunnel has both a private key and a password configured".to_string(),
            )),
            (None, None) => Err(DesklineError::Configuration(
                "SSH tunnel requires a private key or a password".to_string(),
            )),
        }
    }

    /// Validate the SSH tunnel configuration
    pub fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(DesklineError::Configuration(
                "SSH host cannot be empty".to_string(),
            ));
        }

        if self.port == 0 {
            return Err(DesklineError::Configuration(
                "SSH port cannot be 0".to_string(),
            ));
        }

        if self.username.is_empty() {
            return Err(DesklineError::Configuration(
                "SSH username cannot be empty".to_string(),
            ));
        }

        self.auth_method().map(|_| ())
    }
}

#[cfg(test)]
mod tests;
