//! Local listener and per-client relays
//!
//! The forwarder is independent of ssh2: anything that can open a
//! bidirectional byte channel to the remote host implements [`ChannelOpener`].

use std::io::{self, ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::{LOCAL_HOST, RELAY_BUFFER_SIZE};

/// Longest a relay blocks on the local socket before checking the channel
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Pause between retries when the channel reports it would block
const WOULD_BLOCK_BACKOFF: Duration = Duration::from_millis(1);

/// A non-blocking byte channel to the remote host.
///
/// `read` and `write` may fail with [`ErrorKind::WouldBlock`]; a zero-length
/// read only means end of stream when [`ForwardChannel::is_eof`] agrees.
pub(crate) trait ForwardChannel: Read + Write + Send {
    fn is_eof(&self) -> bool;

    /// Best-effort close; errors are ignored
    fn close(&mut self);
}

/// Opens one channel per accepted local client
pub(crate) trait ChannelOpener: Send + Sync + 'static {
    type Channel: ForwardChannel + 'static;

    fn open(&self, host: &str, port: u16) -> io::Result<Self::Channel>;
}

/// Accept loop bound to an ephemeral loopback port
pub(crate) struct Forwarder {
    local_addr: SocketAddr,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl Forwarder {
    /// Bind `127.0.0.1:0` and start accepting clients on a dedicated thread.
    pub(crate) fn start<O: ChannelOpener>(
        opener: Arc<O>,
        remote_host: String,
        remote_port: u16,
    ) -> io::Result<Self> {
        let listener = TcpListener::bind((LOCAL_HOST, 0))?;
        let local_addr = listener.local_addr()?;
        let running = Arc::new(AtomicBool::new(true));

        let thread_running = running.clone();
        let thread = thread::Builder::new()
            .name(format!("tunnel-accept-{}", local_addr.port()))
            .spawn(move || {
                accept_loop(listener, opener, remote_host, remote_port, thread_running);
            })?;

        tracing::debug!(local_port = local_addr.port(), "tunnel listener bound");
        Ok(Self {
            local_addr,
            running,
            thread: Some(thread),
        })
    }

    pub(crate) fn local_port(&self) -> u16 {
        self.local_addr.port()
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Stop accepting, wait for every relay to finish and release the port.
    pub(crate) fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        let Some(thread) = self.thread.take() else {
            return;
        };

        // accept() has no timeout; a throwaway connection wakes it up
        let _ = TcpStream::connect_timeout(&self.local_addr, Duration::from_secs(1));

        if thread.join().is_err() {
            tracing::warn!(local_port = self.local_port(), "tunnel accept thread panicked");
        }
    }
}

impl Drop for Forwarder {
    fn drop(&mut self) {
        self.stop();
    }
}

fn accept_loop<O: ChannelOpener>(
    listener: TcpListener,
    opener: Arc<O>,
    remote_host: String,
    remote_port: u16,
    running: Arc<AtomicBool>,
) {
    let mut relays: Vec<JoinHandle<()>> = Vec::new();

    for incoming in listener.incoming() {
        if !running.load(Ordering::Acquire) {
            break;
        }

        relays.retain(|relay| !relay.is_finished());

        let local = match incoming {
            Ok(stream) => stream,
            Err(e) => {
                tracing::debug!(error = %e, "tunnel accept failed");
                continue;
            }
        };

        let channel = match opener.open(&remote_host, remote_port) {
            Ok(channel) => channel,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    remote_host = %remote_host,
                    remote_port,
                    "failed to open forwarding channel"
                );
                let _ = local.shutdown(Shutdown::Both);
                continue;
            }
        };

        let relay_running = running.clone();
        let spawned = thread::Builder::new()
            .name("tunnel-relay".to_string())
            .spawn(move || {
                let peer = local.peer_addr().ok();
                if let Err(e) = relay(local, channel, &relay_running) {
                    tracing::debug!(error = %e, ?peer, "tunnel relay closed with error");
                }
            });

        match spawned {
            Ok(handle) => relays.push(handle),
            Err(e) => tracing::warn!(error = %e, "failed to spawn tunnel relay"),
        }
    }

    drop(listener);
    for relay in relays {
        let _ = relay.join();
    }
    tracing::debug!("tunnel accept loop exited");
}

/// Shuttle bytes between one local client and its channel until either side
/// closes, an I/O error occurs, or the tunnel stops.
fn relay<C: ForwardChannel>(
    mut local: TcpStream,
    mut channel: C,
    running: &AtomicBool,
) -> io::Result<()> {
    local.set_nonblocking(false)?;
    local.set_read_timeout(Some(POLL_INTERVAL))?;

    let mut upstream = vec![0u8; RELAY_BUFFER_SIZE];
    let mut downstream = vec![0u8; RELAY_BUFFER_SIZE];

    let outcome = loop {
        if !running.load(Ordering::Acquire) {
            break Ok(());
        }

        match local.read(&mut upstream) {
            Ok(0) => break Ok(()),
            Ok(n) => {
                if let Err(e) =
                    write_to_channel(&mut channel, &upstream[..n], &mut local, &mut downstream, running)
                {
                    break Err(e);
                }
            }
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => break Err(e),
        }

        match drain_channel(&mut channel, &mut local, &mut downstream) {
            Ok(true) => break Ok(()),
            Ok(false) => {}
            Err(e) => break Err(e),
        }
    };

    channel.close();
    let _ = local.shutdown(Shutdown::Both);
    outcome
}

/// Write the whole buffer, draining the reverse direction while the channel
/// is full so neither side stalls on a full window.
fn write_to_channel<C: ForwardChannel>(
    channel: &mut C,
    mut data: &[u8],
    local: &mut TcpStream,
    scratch: &mut [u8],
    running: &AtomicBool,
) -> io::Result<()> {
    while !data.is_empty() {
        match channel.write(data) {
            Ok(0) => return Err(io::Error::new(ErrorKind::WriteZero, "channel closed")),
            Ok(n) => data = &data[n..],
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                if !running.load(Ordering::Acquire) {
                    return Err(io::Error::new(ErrorKind::Interrupted, "tunnel stopping"));
                }
                if drain_channel(channel, local, scratch)? {
                    return Err(io::Error::new(ErrorKind::UnexpectedEof, "channel closed"));
                }
                thread::sleep(WOULD_BLOCK_BACKOFF);
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }

    loop {
        match channel.flush() {
            Ok(()) => return Ok(()),
            Err(e) if e.kind() == ErrorKind::WouldBlock => thread::sleep(WOULD_BLOCK_BACKOFF),
            Err(e) => return Err(e),
        }
    }
}

/// Copy everything currently readable from the channel to the local socket.
/// Returns `true` once the channel has reached end of stream.
fn drain_channel<C: ForwardChannel>(
    channel: &mut C,
    local: &mut TcpStream,
    buf: &mut [u8],
) -> io::Result<bool> {
    loop {
        match channel.read(buf) {
            Ok(0) => return Ok(channel.is_eof()),
            Ok(n) => local.write_all(&buf[..n])?,
            Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(false),
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
}
