//! Transports.
//!
//! A [`Connection`] is a pair of queues. I/O threads (if any) encode what is
//! pushed onto the outbound queue and decode frames onto the inbound queue;
//! they never touch simulation state. The main loop drains the inbound queue
//! at a fixed point each tick.

use std::io::{BufWriter, ErrorKind as IoErrorKind};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, unbounded};
use log::{debug, info, warn};
use serde::Serialize;
use serde::de::DeserializeOwned;
use voxelsync_foundation::{Error, Result};

use crate::protocol::{ClientMessage, ServerMessage, decode, encode, read_frame, write_frame};

const ACCEPT_POLL: Duration = Duration::from_millis(10);

// =============================================================================
// Connection
// =============================================================================

/// One end of a bidirectional message stream.
pub struct Connection<Out, In> {
    peer: String,
    outbound: Option<Sender<Out>>,
    inbound: Receiver<In>,
    socket: Option<TcpStream>,
    threads: Vec<JoinHandle<()>>,
}

/// The authority's end of a client connection.
pub type ServerConnection = Connection<ServerMessage, ClientMessage>;

/// A client's end of its connection to the authority.
pub type ClientConnection = Connection<ClientMessage, ServerMessage>;

impl<Out, In> Connection<Out, In> {
    /// Description of the remote end.
    #[must_use]
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Returns true until [`Connection::close`] is called.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.outbound.is_some()
    }

    /// Queues a message for the remote end.
    ///
    /// # Errors
    ///
    /// Returns `Network` if the connection is closed.
    pub fn send(&self, message: Out) -> Result<()> {
        self.outbound
            .as_ref()
            .ok_or_else(|| Error::network(format!("{}: connection closed", self.peer)))?
            .send(message)
            .map_err(|_| Error::network(format!("{}: connection closed", self.peer)))
    }

    /// Takes the next received message without blocking.
    ///
    /// # Errors
    ///
    /// Returns `Network` once the remote end is gone and the queue is empty.
    pub fn try_recv(&self) -> Result<Option<In>> {
        match self.inbound.try_recv() {
            Ok(message) => Ok(Some(message)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => {
                Err(Error::network(format!("{}: connection lost", self.peer)))
            }
        }
    }

    /// Waits up to `timeout` for the next message. Returns `Ok(None)` on timeout.
    ///
    /// # Errors
    ///
    /// Returns `Network` once the remote end is gone and the queue is empty.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Option<In>> {
        match self.inbound.recv_timeout(timeout) {
            Ok(message) => Ok(Some(message)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => {
                Err(Error::network(format!("{}: connection lost", self.peer)))
            }
        }
    }

    /// Closes the connection and waits for its I/O threads.
    ///
    /// Messages still queued for sending are discarded. Repeated calls do
    /// nothing.
    pub fn close(&mut self) {
        if self.outbound.take().is_none() && self.threads.is_empty() {
            return;
        }
        if let Some(socket) = self.socket.take() {
            // The peer may already be gone; nothing to report.
            let _ = socket.shutdown(Shutdown::Both);
        }
        for handle in self.threads.drain(..) {
            if handle.join().is_err() {
                warn!("{}: I/O thread panicked", self.peer);
            }
        }
        debug!("{}: closed", self.peer);
    }

    fn in_memory(peer: String, outbound: Sender<Out>, inbound: Receiver<In>) -> Self {
        Self {
            peer,
            outbound: Some(outbound),
            inbound,
            socket: None,
            threads: Vec::new(),
        }
    }
}

impl<Out, In> Drop for Connection<Out, In> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<Out, In> std::fmt::Debug for Connection<Out, In> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("peer", &self.peer)
            .field("open", &self.is_open())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Listener
// =============================================================================

/// Accepts client connections for the authority.
pub trait Listener: Send {
    /// Takes connections accepted since the last call.
    fn poll_connections(&mut self) -> Vec<ServerConnection>;

    /// Description of where this listener accepts connections.
    fn local_addr(&self) -> String;

    /// Stops accepting and waits for the accept thread, if any.
    fn shutdown(&mut self);
}

// =============================================================================
// Local Transport
// =============================================================================

/// In-memory transport for same-process clients and tests.
pub struct LocalTransport;

impl LocalTransport {
    /// Creates a connected listener and connector pair.
    #[must_use]
    pub fn pair() -> (LocalListener, LocalConnector) {
        let (accept, incoming) = unbounded();
        (
            LocalListener {
                incoming: Some(incoming),
            },
            LocalConnector {
                accept,
                next_peer: Arc::new(AtomicU64::new(1)),
            },
        )
    }
}

/// Server side of a [`LocalTransport`].
#[derive(Debug)]
pub struct LocalListener {
    incoming: Option<Receiver<ServerConnection>>,
}

impl Listener for LocalListener {
    fn poll_connections(&mut self) -> Vec<ServerConnection> {
        self.incoming
            .as_ref()
            .map(|rx| rx.try_iter().collect())
            .unwrap_or_default()
    }

    fn local_addr(&self) -> String {
        "local".to_string()
    }

    fn shutdown(&mut self) {
        self.incoming = None;
    }
}

/// Client side of a [`LocalTransport`]. Cloneable; each call connects a new client.
#[derive(Clone, Debug)]
pub struct LocalConnector {
    accept: Sender<ServerConnection>,
    next_peer: Arc<AtomicU64>,
}

impl LocalConnector {
    /// Opens a new connection.
    ///
    /// # Errors
    ///
    /// Returns `Network` if the listener has shut down.
    pub fn connect(&self) -> Result<ClientConnection> {
        let peer = format!("local-{}", self.next_peer.fetch_add(1, Ordering::Relaxed));
        let (to_server, from_client) = unbounded();
        let (to_client, from_server) = unbounded();

        let server_end = Connection::in_memory(peer.clone(), to_client, from_client);
        self.accept
            .send(server_end)
            .map_err(|_| Error::network("local listener is shut down"))?;
        Ok(Connection::in_memory(
            "local-server".to_string(),
            to_server,
            from_server,
        ))
    }
}

// =============================================================================
// TCP Transport
// =============================================================================

/// TCP listener with an accept thread and reader/writer threads per connection.
pub struct TcpTransport {
    addr: SocketAddr,
    incoming: Receiver<ServerConnection>,
    stop: Arc<AtomicBool>,
    accept: Option<JoinHandle<()>>,
}

impl TcpTransport {
    /// Binds and starts accepting.
    ///
    /// # Errors
    ///
    /// Returns `Io` if the address cannot be bound.
    pub fn bind(addr: impl ToSocketAddrs) -> Result<Self> {
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        let addr = listener.local_addr()?;

        let (tx, incoming) = unbounded();
        let stop = Arc::new(AtomicBool::new(false));
        let accept = thread::Builder::new()
            .name("net-accept".into())
            .spawn({
                let stop = Arc::clone(&stop);
                move || accept_loop(&listener, &tx, &stop)
            })?;

        info!("listening on {addr}");
        Ok(Self {
            addr,
            incoming,
            stop,
            accept: Some(accept),
        })
    }

    /// The bound address.
    #[must_use]
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Connects to an authority.
    ///
    /// # Errors
    ///
    /// Returns `Io` if the connection cannot be made.
    pub fn connect(addr: impl ToSocketAddrs) -> Result<ClientConnection> {
        spawn_stream(TcpStream::connect(addr)?)
    }
}

impl Listener for TcpTransport {
    fn poll_connections(&mut self) -> Vec<ServerConnection> {
        self.incoming.try_iter().collect()
    }

    fn local_addr(&self) -> String {
        self.addr.to_string()
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.accept.take() {
            if handle.join().is_err() {
                warn!("accept thread panicked");
            }
            // Accepted but never polled.
            for mut connection in self.incoming.try_iter() {
                connection.close();
            }
            info!("stopped listening on {}", self.addr);
        }
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn accept_loop(listener: &TcpListener, tx: &Sender<ServerConnection>, stop: &AtomicBool) {
    while !stop.load(Ordering::Acquire) {
        match listener.accept() {
            Ok((stream, addr)) => {
                let accepted = stream
                    .set_nonblocking(false)
                    .map_err(Error::from)
                    .and_then(|()| spawn_stream(stream));
                match accepted {
                    Ok(connection) => {
                        debug!("accepted {addr}");
                        if tx.send(connection).is_err() {
                            return;
                        }
                    }
                    Err(e) => warn!("failed to set up connection from {addr}: {e}"),
                }
            }
            Err(e) if e.kind() == IoErrorKind::WouldBlock => thread::sleep(ACCEPT_POLL),
            Err(e) => {
                warn!("accept failed: {e}");
                thread::sleep(ACCEPT_POLL);
            }
        }
    }
}

fn spawn_stream<Out, In>(stream: TcpStream) -> Result<Connection<Out, In>>
where
    Out: Serialize + Send + 'static,
    In: DeserializeOwned + Send + 'static,
{
    let peer = stream
        .peer_addr()
        .map_or_else(|_| "unknown".to_string(), |addr| addr.to_string());
    stream.set_nodelay(true)?;
    let mut reader = stream.try_clone()?;
    let mut writer = BufWriter::new(stream.try_clone()?);

    let (out_tx, out_rx) = unbounded::<Out>();
    let (in_tx, in_rx) = unbounded::<In>();

    let write_peer = peer.clone();
    let write = thread::Builder::new()
        .name(format!("net-write {peer}"))
        .spawn(move || {
            for message in out_rx {
                let bytes = match encode(&message) {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        warn!("{write_peer}: dropping unencodable message: {e}");
                        continue;
                    }
                };
                if let Err(e) = write_frame(&mut writer, &bytes) {
                    debug!("{write_peer}: write failed: {e}");
                    break;
                }
            }
            let _ = writer.get_ref().shutdown(Shutdown::Write);
        })?;

    let read_peer = peer.clone();
    let read = thread::Builder::new()
        .name(format!("net-read {peer}"))
        .spawn(move || {
            loop {
                match read_frame(&mut reader) {
                    Ok(Some(bytes)) => match decode::<In>(&bytes) {
                        Ok(message) => {
                            if in_tx.send(message).is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            warn!("{read_peer}: dropping connection: {e}");
                            break;
                        }
                    },
                    Ok(None) => break,
                    Err(e) => {
                        debug!("{read_peer}: read failed: {e}");
                        break;
                    }
                }
            }
        })?;

    Ok(Connection {
        peer,
        outbound: Some(out_tx),
        inbound: in_rx,
        socket: Some(stream),
        threads: vec![write, read],
    })
}
