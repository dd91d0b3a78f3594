//! SSH session management and the tunnel state machine

use std::io::{self, ErrorKind, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use deskline_core::{SshAuthMethod, SshTunnelConfig};
use ssh2::{Channel, Session};
use tracing::{debug, info, warn};

use super::{ChannelOpener, ForwardChannel, Forwarder, LOCAL_HOST, SshTunnelError};

/// Lifecycle of a tunnel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelState {
    Idle,
    Establishing,
    Active,
    Stopping,
}

impl TunnelState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Establishing,
            2 => Self::Active,
            3 => Self::Stopping,
            _ => Self::Idle,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Establishing => 1,
            Self::Active => 2,
            Self::Stopping => 3,
        }
    }
}

/// An SSH tunnel forwarding a loopback port to a database host
///
/// The tunnel is owned by exactly one database connection. Dropping it
/// stops forwarding and disconnects the session.
pub struct SshTunnel {
    config: SshTunnelConfig,
    remote_host: String,
    remote_port: u16,
    state: AtomicU8,
    session: Option<Session>,
    forwarder: Option<Forwarder>,
}

impl std::fmt::Debug for SshTunnel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshTunnel")
            .field("ssh_host", &self.config.host)
            .field("ssh_port", &self.config.port)
            .field("remote_host", &self.remote_host)
            .field("remote_port", &self.remote_port)
            .field("state", &self.state())
            .field("local_port", &self.local_port())
            .finish_non_exhaustive()
    }
}

impl SshTunnel {
    /// Create an idle tunnel; nothing is connected until [`SshTunnel::start`]
    pub fn new(config: SshTunnelConfig, remote_host: impl Into<String>, remote_port: u16) -> Self {
        Self {
            config,
            remote_host: remote_host.into(),
            remote_port,
            state: AtomicU8::new(TunnelState::Idle.as_u8()),
            session: None,
            forwarder: None,
        }
    }

    pub fn state(&self) -> TunnelState {
        TunnelState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: TunnelState) {
        self.state.store(state.as_u8(), Ordering::Release);
    }

    /// Check if the tunnel is forwarding
    pub fn is_active(&self) -> bool {
        self.state() == TunnelState::Active
            && self.forwarder.as_ref().is_some_and(Forwarder::is_running)
    }

    pub fn local_host(&self) -> &'static str {
        LOCAL_HOST
    }

    /// The ephemeral loopback port, once the tunnel is active
    pub fn local_port(&self) -> Option<u16> {
        self.forwarder.as_ref().map(Forwarder::local_port)
    }

    pub fn remote_host(&self) -> &str {
        &self.remote_host
    }

    pub fn remote_port(&self) -> u16 {
        self.remote_port
    }

    /// Connect, authenticate and start forwarding. A no-op when already active.
    ///
    /// On failure every partially created resource is torn down and the
    /// tunnel returns to [`TunnelState::Idle`].
    #[tracing::instrument(skip(self), fields(ssh_host = %self.config.host, remote_host = %self.remote_host, remote_port = self.remote_port))]
    pub fn start(&mut self) -> Result<(), SshTunnelError> {
        if self.state() == TunnelState::Active {
            return Ok(());
        }

        self.set_state(TunnelState::Establishing);
        match self.establish() {
            Ok((session, forwarder)) => {
                info!(local_port = forwarder.local_port(), "SSH tunnel established");
                self.session = Some(session);
                self.forwarder = Some(forwarder);
                self.set_state(TunnelState::Active);
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "failed to establish SSH tunnel");
                self.set_state(TunnelState::Idle);
                Err(e)
            }
        }
    }

    fn establish(&self) -> Result<(Session, Forwarder), SshTunnelError> {
        self.config
            .validate()
            .map_err(|e| SshTunnelError::Configuration(e.to_string()))?;
        let auth = self
            .config
            .auth_method()
            .map_err(|e| SshTunnelError::Configuration(e.to_string()))?;

        let timeout = Duration::from_secs(u64::from(self.config.timeout_seconds.max(1)));
        let tcp = connect_bastion(&self.config.host, self.config.port, timeout)?;
        tcp.set_read_timeout(Some(timeout))
            .and_then(|_| tcp.set_write_timeout(Some(timeout)))
            .map_err(|e| SshTunnelError::ConnectionFailed {
                host: self.config.host.clone(),
                port: self.config.port,
                source: e,
            })?;

        let mut session =
            Session::new().map_err(|e| SshTunnelError::HandshakeFailed(e.to_string()))?;
        session.set_tcp_stream(tcp);
        session.set_timeout(timeout.as_millis() as u32);
        session
            .handshake()
            .map_err(|e| SshTunnelError::HandshakeFailed(e.to_string()))?;

        let torn_down = |session: &Session, e: SshTunnelError| {
            let _ = session.disconnect(None, "Tunnel setup failed", None);
            e
        };

        authenticate(&session, &self.config.username, &auth).map_err(|e| torn_down(&session, e))?;

        if self.config.keepalive_seconds > 0 {
            session.set_keepalive(true, self.config.keepalive_seconds);
        }

        // Relays poll channels; blocking calls would hold the session lock
        session.set_blocking(false);

        let opener = Arc::new(SessionOpener {
            session: session.clone(),
            open_timeout: timeout,
        });
        let forwarder = Forwarder::start(opener, self.remote_host.clone(), self.remote_port)
            .map_err(|e| torn_down(&session, SshTunnelError::PortForwardingFailed(e.to_string())))?;

        Ok((session, forwarder))
    }

    /// Stop forwarding and disconnect the session. Safe to call repeatedly.
    pub fn stop(&mut self) {
        if self.forwarder.is_none() && self.session.is_none() {
            self.set_state(TunnelState::Idle);
            return;
        }

        self.set_state(TunnelState::Stopping);
        let local_port = self.local_port();

        if let Some(mut forwarder) = self.forwarder.take() {
            forwarder.stop();
        }

        if let Some(session) = self.session.take() {
            session.set_blocking(true);
            if let Err(e) = session.disconnect(None, "Tunnel closed", None) {
                warn!(error = %e, "error disconnecting SSH session");
            }
        }

        self.set_state(TunnelState::Idle);
        info!(?local_port, "SSH tunnel closed");
    }
}

impl Drop for SshTunnel {
    fn drop(&mut self) {
        self.stop();
    }
}

fn connect_bastion(host: &str, port: u16, timeout: Duration) -> Result<TcpStream, SshTunnelError> {
    let failed = |source: io::Error| SshTunnelError::ConnectionFailed {
        host: host.to_string(),
        port,
        source,
    };

    let mut last_error = None;
    for addr in (host, port).to_socket_addrs().map_err(failed)? {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                debug!(%addr, error = %e, "bastion address unreachable");
                last_error = Some(e);
            }
        }
    }

    Err(failed(last_error.unwrap_or_else(|| {
        io::Error::new(ErrorKind::NotFound, "host resolved to no addresses")
    })))
}

/// Authenticate to the SSH server using the configured method
fn authenticate(
    session: &Session,
    username: &str,
    auth: &SshAuthMethod<'_>,
) -> Result<(), SshTunnelError> {
    match auth {
        SshAuthMethod::Password { password } => {
            debug!("authenticating with password");
            session
                .userauth_password(username, password)
                .map_err(|e| SshTunnelError::AuthenticationFailed(e.to_string()))?;
        }
        SshAuthMethod::PrivateKey { path, passphrase } => {
            debug!(path = %path.display(), "authenticating with private key");
            if !path.exists() {
                return Err(SshTunnelError::PrivateKeyNotFound {
                    path: path.display().to_string(),
                });
            }
            session
                .userauth_pubkey_file(username, None, path, *passphrase)
                .map_err(|e| SshTunnelError::AuthenticationFailed(e.to_string()))?;
        }
    }

    if !session.authenticated() {
        return Err(SshTunnelError::AuthenticationFailed(
            "Authentication not confirmed".to_string(),
        ));
    }

    debug!("SSH authentication successful");
    Ok(())
}

/// Opens `direct-tcpip` channels through a non-blocking session
struct SessionOpener {
    session: Session,
    open_timeout: Duration,
}

impl ChannelOpener for SessionOpener {
    type Channel = SshChannel;

    fn open(&self, host: &str, port: u16) -> io::Result<SshChannel> {
        let started = Instant::now();
        loop {
            match self.session.channel_direct_tcpip(host, port, None) {
                Ok(channel) => return Ok(SshChannel(channel)),
                Err(e) => {
                    let err = io::Error::from(e);
                    if err.kind() != ErrorKind::WouldBlock {
                        return Err(err);
                    }
                    if started.elapsed() >= self.open_timeout {
                        return Err(io::Error::new(
                            ErrorKind::TimedOut,
                            "timed out opening forwarding channel",
                        ));
                    }
                    thread::sleep(Duration::from_millis(1));
                }
            }
        }
    }
}

struct SshChannel(Channel);

impl Read for SshChannel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }
}

impl Write for SshChannel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

impl ForwardChannel for SshChannel {
    fn is_eof(&self) -> bool {
        self.0.eof()
    }

    fn close(&mut self) {
        let _ = self.0.send_eof();
        let _ = self.0.close();
    }
}
