//! The relay engine.
//!
//! One task per accepted connection owns the read half and the
//! connection's registration state. Write halves live behind per-connection
//! mutexes in a shared map so relayed PDUs from other tasks are serialized
//! with replies from the connection's own task; a roster reply holds the
//! requester's write lock for the whole 11/12.../13 sequence so nothing
//! interleaves with it.
//!
//! Routing forwards the received payload bytes verbatim. The engine never
//! rewrites a relayed message.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::Result;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use relaychat_core::protocol::{recv_pdu, send_pdu};
use relaychat_core::{ConnId, Error, Handle, Message, Registry, MAX_PAYLOAD_LEN};

type PeerWriter = Arc<Mutex<OwnedWriteHalf>>;

/// The relay server: a listener plus the shared routing state.
pub struct Server {
    listener: TcpListener,
    state: Arc<ServerState>,
}

impl Server {
    /// Bind to `port` on all interfaces. Port 0 lets the OS assign one;
    /// use [`Server::local_addr`] to discover it.
    pub async fn bind(port: u16) -> io::Result<Self> {
        let listener = TcpListener::bind(("0.0.0.0", port)).await?;
        Ok(Self {
            listener,
            state: Arc::new(ServerState::new()),
        })
    }

    /// The address the listener is bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections forever, spawning one task per client so a slow
    /// connection never blocks new accepts.
    pub async fn run(self) -> Result<()> {
        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    let state = Arc::clone(&self.state);
                    tokio::spawn(async move {
                        serve_connection(stream, peer, state).await;
                    });
                }
                Err(err) => {
                    warn!(error = %err, "failed to accept connection");
                }
            }
        }
    }
}

struct ServerState {
    registry: Mutex<Registry>,
    writers: Mutex<HashMap<ConnId, PeerWriter>>,
    next_conn: AtomicU64,
}

impl ServerState {
    fn new() -> Self {
        Self {
            registry: Mutex::new(Registry::new()),
            writers: Mutex::new(HashMap::new()),
            next_conn: AtomicU64::new(1),
        }
    }

    async fn writer_for(&self, conn: ConnId) -> Option<PeerWriter> {
        self.writers.lock().await.get(&conn).cloned()
    }
}

async fn serve_connection(stream: TcpStream, peer: SocketAddr, state: Arc<ServerState>) {
    let conn = state.next_conn.fetch_add(1, Ordering::Relaxed);
    let (mut reader, writer) = stream.into_split();
    let writer = Arc::new(Mutex::new(writer));
    state.writers.lock().await.insert(conn, Arc::clone(&writer));
    debug!(%peer, conn, "connection accepted");

    let mut session = Session {
        conn,
        writer,
        registered: None,
    };
    if let Err(err) = session.run(&mut reader, &state).await {
        debug!(%peer, conn, error = %err, "closing connection");
    }

    let handle = state.registry.lock().await.remove_by_conn(conn);
    state.writers.lock().await.remove(&conn);
    match handle {
        Some(handle) => info!(%handle, "client disconnected"),
        None => debug!(%peer, conn, "unregistered connection closed"),
    }
}

/// Per-connection state: `registered` is `None` until a flag-1 exchange
/// succeeds, and a handle is set at most once for the connection's life.
struct Session {
    conn: ConnId,
    writer: PeerWriter,
    registered: Option<Handle>,
}

impl Session {
    /// Receive loop. Returns when the peer closes, the transport fails,
    /// or the engine decides to drop the connection.
    async fn run(&mut self, reader: &mut OwnedReadHalf, state: &ServerState) -> Result<(), Error> {
        loop {
            let payload = match recv_pdu(reader, MAX_PAYLOAD_LEN).await? {
                Some(payload) => payload,
                None => return Ok(()),
            };

            match Message::decode(&payload) {
                Ok(message) => {
                    if !self.dispatch(message, &payload, state).await? {
                        return Ok(());
                    }
                }
                Err(Error::UnknownFlag(flag)) => {
                    debug!(flag, conn = self.conn, "dropping PDU with unknown flag");
                }
                Err(err @ Error::Protocol { flag: 1, .. }) if self.registered.is_none() => {
                    // A garbled registration still gets a rejection so the
                    // client can report it before the connection goes away.
                    warn!(conn = self.conn, error = %err, "rejecting malformed registration");
                    self.send_to_self(&Message::RegisterNak.encode()).await;
                    return Ok(());
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Handle one decoded message. Returns `false` to close the connection.
    async fn dispatch(
        &mut self,
        message: Message,
        payload: &[u8],
        state: &ServerState,
    ) -> Result<bool, Error> {
        match (self.registered.is_some(), message) {
            (false, Message::Register { handle }) => {
                return Ok(self.register(handle, state).await)
            }
            (true, Message::Register { .. }) => {
                debug!(conn = self.conn, "ignoring repeat registration");
            }
            (false, _) => {
                debug!(conn = self.conn, "ignoring message from unregistered connection");
            }
            (true, Message::Broadcast { .. }) => {
                let entries = state.registry.lock().await.snapshot();
                for (handle, conn) in entries {
                    if conn != self.conn {
                        forward(state, conn, &handle, payload).await;
                    }
                }
            }
            (true, Message::Unicast { mut dests, .. }) => {
                // The wire shape admits any count; a conforming unicast has
                // exactly one destination and anything else is dropped.
                if dests.len() == 1 {
                    let dest = dests.remove(0);
                    self.route(dest, payload, state).await;
                } else {
                    debug!(
                        conn = self.conn,
                        count = dests.len(),
                        "dropping unicast with a foreign destination count"
                    );
                }
            }
            (true, Message::Multicast { dests, .. }) => {
                for dest in dests {
                    self.route(dest, payload, state).await;
                }
            }
            (true, Message::ListRequest) => self.send_roster(state).await?,
            (true, other) => {
                debug!(
                    conn = self.conn,
                    flag = other.flag().to_byte(),
                    "ignoring server-bound PDU with a reply flag"
                );
            }
        }
        Ok(true)
    }

    /// First-come-first-served handle claim. Returns `false` (close) on
    /// rejection.
    ///
    /// The write lock is taken before the registry entry appears and held
    /// until the verdict is on the wire, so a relay that picks up the new
    /// entry cannot slip a PDU ahead of the flag-2 ack.
    async fn register(&mut self, handle: Handle, state: &ServerState) -> bool {
        let mut writer = self.writer.lock().await;
        let outcome = state.registry.lock().await.add(handle.clone(), self.conn);
        match outcome {
            Ok(()) => {
                if let Err(err) = send_pdu(&mut *writer, &Message::RegisterAck.encode()).await {
                    debug!(conn = self.conn, error = %err, "failed to write ack");
                }
                info!(%handle, "client registered");
                self.registered = Some(handle);
                true
            }
            Err(err) => {
                info!(%handle, error = %err, "registration rejected");
                if let Err(err) = send_pdu(&mut *writer, &Message::RegisterNak.encode()).await {
                    debug!(conn = self.conn, error = %err, "failed to write rejection");
                }
                false
            }
        }
    }

    /// Forward `payload` to `dest`, or answer the sender with a flag-7
    /// error naming the handle that did not resolve.
    async fn route(&self, dest: Handle, payload: &[u8], state: &ServerState) {
        let target = state.registry.lock().await.lookup_by_handle(&dest);
        match target {
            Some(conn) => forward(state, conn, &dest, payload).await,
            None => {
                debug!(conn = self.conn, dest = %dest, "destination not registered");
                self.send_to_self(&Message::UnknownDest { handle: dest }.encode())
                    .await;
            }
        }
    }

    /// Emit the roster reply sequence: count header, one entry per handle
    /// in registration order, terminator. The snapshot and count are
    /// captured under one registry lock; the requester's write lock is
    /// held across the whole sequence.
    async fn send_roster(&self, state: &ServerState) -> Result<(), Error> {
        let entries = {
            let registry = state.registry.lock().await;
            registry.snapshot()
        };

        let mut writer = self.writer.lock().await;
        let count = entries.len() as u32;
        send_pdu(&mut *writer, &Message::ListCount { count }.encode()).await?;
        for (handle, _) in entries {
            send_pdu(&mut *writer, &Message::ListHandle { handle }.encode()).await?;
        }
        send_pdu(&mut *writer, &Message::ListDone.encode()).await?;
        Ok(())
    }

    /// Best-effort send on this session's own connection. A failure here
    /// surfaces soon enough as a dead read side.
    async fn send_to_self(&self, payload: &[u8]) {
        let mut writer = self.writer.lock().await;
        if let Err(err) = send_pdu(&mut *writer, payload).await {
            debug!(conn = self.conn, error = %err, "failed to write reply");
        }
    }
}

/// Relay `payload` verbatim to `conn`. Failures are logged and swallowed:
/// the recipient's own read loop notices the dead connection, and one bad
/// recipient must not disturb the rest of a fan-out.
async fn forward(state: &ServerState, conn: ConnId, dest: &Handle, payload: &[u8]) {
    match state.writer_for(conn).await {
        Some(writer) => {
            let mut writer = writer.lock().await;
            if let Err(err) = send_pdu(&mut *writer, payload).await {
                warn!(dest = %dest, error = %err, "relay failed; dropping recipient");
            }
        }
        None => debug!(dest = %dest, "recipient vanished before relay"),
    }
}
