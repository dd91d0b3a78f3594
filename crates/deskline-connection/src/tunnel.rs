//! SSH tunnels for databases that sit behind a bastion host
//!
//! A tunnel authenticates to the bastion with ssh2, binds an ephemeral
//! loopback port and relays every local client over its own `direct-tcpip`
//! channel to the database host. ssh2 is a blocking library, so forwarding
//! runs on OS threads: one accept thread per tunnel plus one relay thread
//! per accepted client.
//!
//! # Example
//!
//! ```ignore
//! use deskline_connection::tunnel::SshTunnel;
//! use deskline_core::SshTunnelConfig;
//!
//! let config = SshTunnelConfig::with_private_key("bastion.internal", "deploy", "/etc/deskline/id_ed25519");
//! let mut tunnel = SshTunnel::new(config, "db.internal", 3306);
//! tunnel.start()?;
//! let (host, port) = (tunnel.local_host(), tunnel.local_port());
//! ```

mod error;
mod forward;
mod ssh;


pub use error::SshTunnelError;
pub use ssh::{SshTunnel, TunnelState};

pub(crate) use forward::{ChannelOpener, ForwardChannel, Forwarder};

/// Address every tunnel listens on
pub const LOCAL_HOST: &str = "127.0.0.1";

/// Size of the relay buffer in each direction
pub const RELAY_BUFFER_SIZE: usize = 16 * 1024;
