//! Server core: accept loop, per-connection tasks and send dispatch.
//!
//! Everything runs on one thread inside a `LocalSet`. Shared state sits in a
//! single `RefCell` that every public call and every task event borrows for
//! the duration of one step. A borrow is never held across an `.await` or a
//! delegate call, so each step observes a fully updated state.
//!
//! # Tasks
//!
//! ```text
//!              ┌──────────────┐ accept ┌─────────────────┐
//!   start() ──►│ accept_task  ├───────►│ connection_task │ (one per client)
//!              └──────┬───────┘        └────────┬────────┘
//!   stop() ─ shutdown │                         │ read → decode → delegate
//!                     ▼                         │ Write cmd → encode → write
//!       close clients, full stop                │ Close cmd → drain → FIN
//! ```

use std::cell::RefCell;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::rc::{Rc, Weak};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};

use super::config::{ServerConfig, timeout_from_secs};
use super::connection::{
    ClientInfo, ConnectionCommand, ConnectionId, ConnectionTable, canonical_host,
};
use super::delegate::ServerDelegate;
use super::outbound::{PendingSend, PendingSends, Tag};
use crate::error::{ReadError, ServerError, ServerResult};
use crate::framing::{Decoded, FrameDecoder, FramingMode, encode_frame};
use crate::{Listener, NetworkProvider, PacketCodec, Providers, TaskProvider, TimeProvider};

type ServerStream<P> = <<P as Providers>::Network as NetworkProvider>::TcpStream;
type ServerListener<P> = <<P as Providers>::Network as NetworkProvider>::Listener;

/// Mutable state shared by the public API and the background tasks.
struct ServerState<T> {
    config: ServerConfig,

    /// Reflects whether an accept task is serving the current session.
    listening: bool,

    /// Incremented by every successful start().
    session: u64,

    local_addr: Option<SocketAddr>,

    /// Stops the accept task of the current session.
    listener_shutdown: Option<oneshot::Sender<()>>,

    connections: ConnectionTable,

    pending: PendingSends<T>,

    delegate: Option<Weak<dyn ServerDelegate<T>>>,
}

/// State plus the collaborators every task needs.
struct ServerShared<P: Providers, C: PacketCodec> {
    state: RefCell<ServerState<C::Packet>>,
    providers: P,
    codec: C,
}

enum Destination<'a> {
    All,
    To { host: &'a str, port: u16 },
}

/// An OSC server accepting TCP clients.
///
/// Must be used from within a `tokio::task::LocalSet`. Dropping the server
/// stops it; clients are then closed in the background after their queued
/// writes are flushed.
///
/// # Example
///
/// ```ignore
/// use osctcp_transport::{FramingMode, OscCodec, Server, ServerConfig, TokioProviders};
///
/// let server = Server::new(
///     TokioProviders::new(),
///     OscCodec,
///     ServerConfig::new(9000, FramingMode::Slip),
/// );
/// server.set_delegate(&delegate);
/// let addr = server.start().await?;
/// server.send_data(b"/ping\0\0\0,\0\0\0")?;
/// ```
pub struct Server<P: Providers, C: PacketCodec> {
    shared: Rc<ServerShared<P, C>>,
}

impl<P: Providers, C: PacketCodec> Server<P, C> {
    /// Create an idle server.
    pub fn new(providers: P, codec: C, config: ServerConfig) -> Self {
        let state = ServerState {
            config,
            listening: false,
            session: 0,
            local_addr: None,
            listener_shutdown: None,
            connections: ConnectionTable::new(),
            pending: PendingSends::new(),
            delegate: None,
        };
        Self {
            shared: Rc::new(ServerShared {
                state: RefCell::new(state),
                providers,
                codec,
            }),
        }
    }

    /// Register the event observer.
    ///
    /// Only a weak reference is kept: the caller owns the delegate.
    pub fn set_delegate<D>(&self, delegate: &Rc<D>)
    where
        D: ServerDelegate<C::Packet> + 'static,
    {
        let weak: Weak<D> = Rc::downgrade(delegate);
        let weak: Weak<dyn ServerDelegate<C::Packet>> = weak;
        self.shared.state.borrow_mut().delegate = Some(weak);
    }

    /// Forget the event observer.
    pub fn clear_delegate(&self) {
        self.shared.state.borrow_mut().delegate = None;
    }

    /// Bind the configured interface and port and start accepting clients.
    ///
    /// Returns the bound address, which differs from the configuration when
    /// port 0 was requested.
    ///
    /// # Errors
    ///
    /// - `AlreadyListening` if the server is listening
    /// - `Bind` if the socket could not be bound; the server stays idle
    pub async fn start(&self) -> ServerResult<SocketAddr> {
        let address = {
            let state = self.shared.state.borrow();
            if state.listening {
                return Err(already_listening(&state));
            }
            state.config.bind_address()
        };

        let bind_error = |source| ServerError::Bind {
            address: address.clone(),
            source,
        };
        let listener = self
            .shared
            .providers
            .network()
            .listen(&address)
            .await
            .map_err(bind_error)?;
        let local_addr = listener.local_addr().map_err(bind_error)?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let (session, framing) = {
            let mut state = self.shared.state.borrow_mut();
            // Another start() may have completed while we were binding.
            if state.listening {
                return Err(already_listening(&state));
            }
            state.session += 1;
            state.listening = true;
            state.local_addr = Some(local_addr);
            state.listener_shutdown = Some(shutdown_tx);
            (state.session, state.config.framing)
        };

        self.shared.providers.task().spawn_task(
            "osc_accept",
            accept_task(self.shared.clone(), listener, shutdown_rx, session),
        );

        tracing::info!(address = %local_addr, framing = %framing, session, "listening");
        Ok(local_addr)
    }

    /// Stop listening.
    ///
    /// No-op when idle. Otherwise the listener is closed and every client
    /// is disconnected once the writes queued before this call are flushed.
    /// The delegate then sees one `connection_closed` per client followed by
    /// `listening_socket_closed(None)`.
    pub fn stop(&self) {
        let shutdown = {
            let mut state = self.shared.state.borrow_mut();
            if !state.listening {
                return;
            }
            state.listening = false;
            state.listener_shutdown.take()
        };

        tracing::info!("stopping server");
        if let Some(shutdown) = shutdown {
            // The accept task may already be gone after a listener failure.
            let _ = shutdown.send(());
        }
    }

    /// Send a packet to every connected client.
    ///
    /// Returns the number of writes queued. Completion is reported through
    /// [`ServerDelegate::packet_sent`].
    ///
    /// # Errors
    ///
    /// Returns `Serialization` if the codec cannot serialize the packet.
    pub fn send_packet(&self, packet: &C::Packet) -> ServerResult<usize> {
        self.dispatch(packet, Destination::All)
    }

    /// Parse raw bytes into a packet and send it to every connected client.
    ///
    /// # Errors
    ///
    /// Returns `InvalidPacket` without sending anything if `data` does not
    /// parse.
    pub fn send_data(&self, data: &[u8]) -> ServerResult<usize> {
        let packet = self
            .shared
            .codec
            .parse(data)
            .map_err(ServerError::InvalidPacket)?;
        self.dispatch(&packet, Destination::All)
    }

    /// Send a packet to the client connected from `host:port`.
    ///
    /// Returns `Ok(0)` when no such client is connected.
    pub fn send_packet_to(&self, packet: &C::Packet, host: &str, port: u16) -> ServerResult<usize> {
        self.dispatch(packet, Destination::To { host, port })
    }

    /// Parse raw bytes and send the packet to the client at `host:port`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidPacket` if `data` does not parse, whether or not a
    /// matching client exists.
    pub fn send_data_to(&self, data: &[u8], host: &str, port: u16) -> ServerResult<usize> {
        let packet = self
            .shared
            .codec
            .parse(data)
            .map_err(ServerError::InvalidPacket)?;
        self.dispatch(&packet, Destination::To { host, port })
    }

    fn dispatch(&self, packet: &C::Packet, destination: Destination<'_>) -> ServerResult<usize> {
        let payload: Rc<[u8]> = self
            .shared
            .codec
            .serialize(packet)
            .map_err(ServerError::Serialization)?
            .into();

        let mut guard = self.shared.state.borrow_mut();
        let state = &mut *guard;

        let targets = match destination {
            Destination::All => state.connections.ids(),
            Destination::To { host, port } => state.connections.matching(host, port),
        };
        if targets.is_empty() {
            tracing::debug!("send: no matching client");
            return Ok(0);
        }

        let mut queued = 0;
        for id in targets {
            let Some(connection) = state.connections.get(id) else {
                continue;
            };
            // A tag is only spent on a write that can still be delivered.
            if connection.commands.is_closed() {
                tracing::debug!(connection = %id, "connection task gone, send dropped");
                continue;
            }
            let tag = state.pending.record(PendingSend {
                connection: id,
                host: connection.host(),
                port: connection.peer.port(),
                packet: packet.clone(),
            });
            let command = ConnectionCommand::Write {
                tag,
                payload: payload.clone(),
            };
            if connection.commands.send(command).is_err() {
                tracing::debug!(connection = %id, tag = %tag, "connection task gone, send dropped");
                state.pending.resolve(tag);
                continue;
            }
            tracing::debug!(connection = %id, tag = %tag, len = payload.len(), "write queued");
            queued += 1;
        }
        Ok(queued)
    }

    /// Configured interface; `None` means all interfaces.
    pub fn interface(&self) -> Option<String> {
        self.shared.state.borrow().config.interface.clone()
    }

    /// Change the interface. Stops the server first.
    pub fn set_interface(&self, interface: Option<String>) {
        self.stop();
        self.shared.state.borrow_mut().config.interface = interface;
    }

    /// Configured port.
    pub fn port(&self) -> u16 {
        self.shared.state.borrow().config.port
    }

    /// Change the port. Stops the server first.
    pub fn set_port(&self, port: u16) {
        self.stop();
        self.shared.state.borrow_mut().config.port = port;
    }

    /// Current framing mode.
    pub fn framing(&self) -> FramingMode {
        self.shared.state.borrow().config.framing
    }

    /// Switch framing for every connection.
    ///
    /// Each connection's partial frame is discarded so bytes buffered under
    /// the old framing are never read under the new one.
    pub fn set_framing(&self, framing: FramingMode) {
        let mut state = self.shared.state.borrow_mut();
        if state.config.framing == framing {
            return;
        }
        state.config.framing = framing;
        let max_frame_len = state.config.max_frame_len;
        state.connections.reset_decoders(framing, max_frame_len);
        tracing::info!(framing = %framing, clients = state.connections.len(), "framing changed");
    }

    /// Read/write timeout; `None` means no timeout.
    pub fn timeout(&self) -> Option<Duration> {
        self.shared.state.borrow().config.timeout
    }

    /// Change the read/write timeout for subsequent operations.
    pub fn set_timeout(&self, timeout: Option<Duration>) {
        self.shared.state.borrow_mut().config.timeout = timeout;
    }

    /// Change the read/write timeout in seconds; negative disables it.
    pub fn set_timeout_secs(&self, seconds: f64) {
        self.set_timeout(timeout_from_secs(seconds));
    }

    /// Snapshot of the full configuration.
    pub fn config(&self) -> ServerConfig {
        self.shared.state.borrow().config.clone()
    }

    /// Whether the server is accepting clients.
    pub fn is_listening(&self) -> bool {
        self.shared.state.borrow().listening
    }

    /// Address the listener is bound to, while listening.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.shared.state.borrow().local_addr
    }

    /// Snapshot of connected clients.
    pub fn clients(&self) -> Vec<ClientInfo> {
        self.shared.state.borrow().connections.clients()
    }

    /// Number of writes awaiting completion.
    pub fn pending_sends(&self) -> usize {
        self.shared.state.borrow().pending.len()
    }

    /// Tag the next write will be issued under.
    pub fn next_tag(&self) -> Tag {
        self.shared.state.borrow().pending.next_tag()
    }
}

impl<P: Providers, C: PacketCodec> Drop for Server<P, C> {
    fn drop(&mut self) {
        self.stop();
    }
}

fn already_listening<T>(state: &ServerState<T>) -> ServerError {
    let address = match state.local_addr {
        Some(addr) => addr.to_string(),
        None => state.config.bind_address(),
    };
    ServerError::AlreadyListening { address }
}

impl<P: Providers, C: PacketCodec> ServerShared<P, C> {
    fn delegate(&self) -> Option<Rc<dyn ServerDelegate<C::Packet>>> {
        self.state.borrow().delegate.as_ref().and_then(Weak::upgrade)
    }

    fn timeout(&self) -> Option<Duration> {
        self.state.borrow().config.timeout
    }

    /// Register an accepted client and spawn its task.
    fn handle_accept(self: &Rc<Self>, stream: ServerStream<P>, peer: SocketAddr, session: u64) {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let registered = {
            let mut state = self.state.borrow_mut();
            if !state.listening || state.session != session {
                None
            } else {
                let decoder = FrameDecoder::new(state.config.framing, state.config.max_frame_len);
                Some(
                    state
                        .connections
                        .register(peer, session, decoder, commands_tx),
                )
            }
        };

        let Some(id) = registered else {
            // Dropping the stream closes it.
            tracing::warn!(peer = %peer, session, "connection accepted while not listening, closed");
            return;
        };

        let task = self.providers.task().spawn_task(
            "osc_connection",
            connection_task(self.clone(), id, stream, commands_rx),
        );
        self.state.borrow_mut().connections.attach_task(id, task);

        tracing::info!(connection = %id, peer = %peer, "client connected");
        if let Some(delegate) = self.delegate() {
            delegate.connection_established(&canonical_host(&peer), peer.port());
        }
    }

    /// Decode a chunk read from `id` and report every result.
    fn handle_read(&self, id: ConnectionId, bytes: &[u8]) {
        let (results, host, port) = {
            let mut state = self.state.borrow_mut();
            let Some(connection) = state.connections.get_mut(id) else {
                tracing::debug!(connection = %id, "read for unknown connection ignored");
                return;
            };
            let results = connection.decoder.decode_all(bytes);
            (results, connection.host(), connection.peer.port())
        };

        for decoded in results {
            match decoded {
                Decoded::Frame(frame) => match self.codec.parse(&frame) {
                    Ok(packet) => {
                        tracing::debug!(connection = %id, len = frame.len(), "packet received");
                        if let Some(delegate) = self.delegate() {
                            delegate.packet_received(&packet, &host, port);
                        }
                    }
                    Err(e) => {
                        tracing::warn!(connection = %id, error = %e, "dropping unparseable frame");
                        self.report_read_failure(&frame, ReadError::Parse(e));
                    }
                },
                Decoded::Malformed { partial, error } => {
                    tracing::warn!(connection = %id, error = %error, "dropping malformed frame");
                    self.report_read_failure(&partial, ReadError::Frame(error));
                }
            }
        }
    }

    fn report_read_failure(&self, raw: &[u8], error: ReadError) {
        if let Some(delegate) = self.delegate() {
            delegate.read_failed(raw, &error);
        }
    }

    /// Resolve a completed write.
    fn handle_write_complete(&self, tag: Tag) {
        let resolved = self.state.borrow_mut().pending.resolve(tag);
        let Some(send) = resolved else {
            tracing::debug!(tag = %tag, "completion for unknown tag ignored");
            return;
        };
        tracing::debug!(tag = %tag, connection = %send.connection, "write completed");
        if let Some(delegate) = self.delegate() {
            delegate.packet_sent(&send.packet, &send.host, send.port);
        }
    }

    /// Forget a client whose task has ended.
    fn handle_disconnect(&self, id: ConnectionId, error: Option<io::Error>) {
        let removed = {
            let mut state = self.state.borrow_mut();
            match state.connections.remove(id) {
                Some(connection) => {
                    let dropped = state.pending.discard_connection(id);
                    Some((connection.host(), connection.peer.port(), dropped))
                }
                None => None,
            }
        };

        let Some((host, port, dropped)) = removed else {
            return;
        };
        match error {
            Some(e) => {
                tracing::info!(connection = %id, error = %e, dropped_sends = dropped, "client disconnected")
            }
            None => tracing::info!(connection = %id, dropped_sends = dropped, "client disconnected"),
        }
        if let Some(delegate) = self.delegate() {
            delegate.connection_closed(&host, port);
        }
    }

    /// Full stop after the listener of `session` closed.
    fn handle_listener_closed(&self, session: u64, error: Option<io::Error>) {
        {
            let mut state = self.state.borrow_mut();
            // Clients of an older session may still be draining; they
            // report their own close through handle_disconnect.
            for id in state.connections.remove_session(session) {
                state.pending.discard_connection(id);
            }
            // A newer start() owns the listener now.
            if state.session == session {
                state.pending.restart_tags();
                state.listening = false;
                state.listener_shutdown = None;
                state.local_addr = None;
            }
        }

        match &error {
            Some(e) => tracing::warn!(session, error = %e, "listening socket closed"),
            None => tracing::info!(session, "listening socket closed"),
        }
        if let Some(delegate) = self.delegate() {
            delegate.listening_socket_closed(error.as_ref());
        }
    }

    /// Frame and write one payload, then complete its tag.
    async fn write_packet(
        &self,
        stream: &mut ServerStream<P>,
        id: ConnectionId,
        tag: Tag,
        payload: &[u8],
    ) -> io::Result<()> {
        let (framing, timeout) = {
            let state = self.state.borrow();
            (state.config.framing, state.config.timeout)
        };

        let wire = match encode_frame(framing, payload) {
            Ok(wire) => wire,
            Err(e) => {
                tracing::warn!(connection = %id, tag = %tag, error = %e, "cannot frame packet, dropped");
                self.state.borrow_mut().pending.resolve(tag);
                return Ok(());
            }
        };

        let time = self.providers.time();
        with_timeout(time, timeout, stream.write_all(&wire)).await?;
        with_timeout(time, timeout, stream.flush()).await?;

        self.handle_write_complete(tag);
        Ok(())
    }
}

/// Accept clients until shut down or the listener fails, then close every
/// client of this session and perform the full stop.
async fn accept_task<P: Providers, C: PacketCodec>(
    shared: Rc<ServerShared<P, C>>,
    listener: ServerListener<P>,
    mut shutdown_rx: oneshot::Receiver<()>,
    session: u64,
) {
    let error = loop {
        tokio::select! {
            biased;

            // Also fires when the sender is dropped.
            _ = &mut shutdown_rx => break None,

            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => shared.handle_accept(stream, peer, session),
                Err(e) => {
                    tracing::warn!(session, error = %e, "accept failed");
                    break Some(e);
                }
            }
        }
    };
    drop(listener);

    let tasks = shared.state.borrow_mut().connections.close_session(session);
    tracing::debug!(session, clients = tasks.len(), "closing clients");
    for task in tasks {
        let _ = task.await;
    }

    shared.handle_listener_closed(session, error);
}

/// Drive one client: continuous reads, queued writes, graceful close.
async fn connection_task<P: Providers, C: PacketCodec>(
    shared: Rc<ServerShared<P, C>>,
    id: ConnectionId,
    mut stream: ServerStream<P>,
    mut commands: mpsc::UnboundedReceiver<ConnectionCommand>,
) {
    let buffer_size = shared.state.borrow().config.read_buffer_size.max(1);
    let mut read_buf = vec![0u8; buffer_size];
    let time = shared.providers.time().clone();

    let error = loop {
        let timeout = shared.timeout();

        tokio::select! {
            biased;

            command = commands.recv() => match command {
                Some(ConnectionCommand::Write { tag, payload }) => {
                    if let Err(e) = shared.write_packet(&mut stream, id, tag, &payload).await {
                        tracing::debug!(connection = %id, tag = %tag, error = %e, "write failed");
                        break Some(e);
                    }
                }
                Some(ConnectionCommand::Close) | None => {
                    // Writes queued before Close were handled by earlier iterations.
                    if let Err(e) = with_timeout(&time, timeout, stream.shutdown()).await {
                        tracing::debug!(connection = %id, error = %e, "shutdown failed");
                    }
                    break None;
                }
            },

            // The read is re-armed, with a fresh timeout, on every iteration.
            read = with_timeout(&time, timeout, stream.read(&mut read_buf)) => match read {
                Ok(0) => {
                    tracing::debug!(connection = %id, "peer closed the connection");
                    break None;
                }
                Ok(n) => {
                    tracing::trace!(connection = %id, len = n, "read");
                    shared.handle_read(id, &read_buf[..n]);
                }
                Err(e) => {
                    tracing::debug!(connection = %id, error = %e, "read failed");
                    break Some(e);
                }
            }
        }
    };

    shared.handle_disconnect(id, error);
}

/// Apply an optional timeout to an I/O future; expiry becomes `TimedOut`.
async fn with_timeout<T, F, O>(time: &T, timeout: Option<Duration>, future: F) -> io::Result<O>
where
    T: TimeProvider,
    F: Future<Output = io::Result<O>>,
{
    match timeout {
        None => future.await,
        Some(duration) => match time.timeout(duration, future).await {
            Ok(result) => result,
            Err(_) => Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("operation timed out after {:?}", duration),
            )),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framing::{FrameError, slip};
    use crate::{OscCodec, OscPacket, TokioProviders};

    const PING: &[u8] = b"/ping\0\0\0,\0\0\0";
    const PONG: &[u8] = b"/pong\0\0\0,\0\0\0";

    #[derive(Debug, Clone, PartialEq)]
    enum Event {
        Established(String, u16),
        Closed(String, u16),
        Received(Vec<u8>, String, u16),
        Sent(Vec<u8>, String, u16),
        ReadFailed(ReadError),
        ListenerClosed(Option<io::ErrorKind>),
    }

    #[derive(Default)]
    struct Recorder {
        events: RefCell<Vec<Event>>,
    }

    impl Recorder {
        fn take(&self) -> Vec<Event> {
            std::mem::take(&mut *self.events.borrow_mut())
        }
    }

    impl ServerDelegate<OscPacket> for Recorder {
        fn connection_established(&self, host: &str, port: u16) {
            self.events
                .borrow_mut()
                .push(Event::Established(host.to_string(), port));
        }

        fn connection_closed(&self, host: &str, port: u16) {
            self.events
                .borrow_mut()
                .push(Event::Closed(host.to_string(), port));
        }

        fn packet_received(&self, packet: &OscPacket, host: &str, port: u16) {
            self.events.borrow_mut().push(Event::Received(
                packet.as_bytes().to_vec(),
                host.to_string(),
                port,
            ));
        }

        fn packet_sent(&self, packet: &OscPacket, host: &str, port: u16) {
            self.events.borrow_mut().push(Event::Sent(
                packet.as_bytes().to_vec(),
                host.to_string(),
                port,
            ));
        }

        fn read_failed(&self, _raw: &[u8], error: &ReadError) {
            self.events
                .borrow_mut()
                .push(Event::ReadFailed(error.clone()));
        }

        fn listening_socket_closed(&self, error: Option<&io::Error>) {
            self.events
                .borrow_mut()
                .push(Event::ListenerClosed(error.map(io::Error::kind)));
        }
    }

    type TestServer = Server<TokioProviders, OscCodec>;

    fn server(framing: FramingMode) -> (TestServer, Rc<Recorder>) {
        let server = Server::new(
            TokioProviders::new(),
            OscCodec,
            ServerConfig::local_network(0, framing),
        );
        let recorder = Rc::new(Recorder::default());
        server.set_delegate(&recorder);
        (server, recorder)
    }

    /// Mark the server listening under session 1 without a real socket.
    fn fake_listening(server: &TestServer) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        let mut state = server.shared.state.borrow_mut();
        state.listening = true;
        state.session = 1;
        state.listener_shutdown = Some(tx);
        rx
    }

    /// Register a client without a socket; its commands land in the receiver.
    fn fake_client(
        server: &TestServer,
        peer: &str,
    ) -> (ConnectionId, mpsc::UnboundedReceiver<ConnectionCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = server.shared.state.borrow_mut();
        let decoder = FrameDecoder::new(state.config.framing, state.config.max_frame_len);
        let session = state.session;
        let id = state
            .connections
            .register(peer.parse().expect("peer addr"), session, decoder, tx);
        (id, rx)
    }

    fn next_write(rx: &mut mpsc::UnboundedReceiver<ConnectionCommand>) -> (Tag, Vec<u8>) {
        match rx.try_recv() {
            Ok(ConnectionCommand::Write { tag, payload }) => (tag, payload.to_vec()),
            other => panic!("expected a write, got {:?}", other),
        }
    }

    #[test]
    fn test_read_delivers_every_frame_in_a_chunk() {
        let (server, recorder) = server(FramingMode::Slip);
        let _shutdown = fake_listening(&server);
        let (id, _rx) = fake_client(&server, "127.0.0.1:50000");

        let mut chunk = slip::encode(PING);
        chunk.extend(slip::encode(PONG));
        server.shared.handle_read(id, &chunk);

        assert_eq!(
            recorder.take(),
            vec![
                Event::Received(PING.to_vec(), "127.0.0.1".into(), 50000),
                Event::Received(PONG.to_vec(), "127.0.0.1".into(), 50000),
            ]
        );
    }

    #[test]
    fn test_read_reassembles_split_frame() {
        let (server, recorder) = server(FramingMode::Plh);
        let _shutdown = fake_listening(&server);
        let (id, _rx) = fake_client(&server, "127.0.0.1:50000");

        let wire = encode_frame(FramingMode::Plh, PING).expect("encode");
        server.shared.handle_read(id, &wire[..3]);
        server.shared.handle_read(id, &wire[3..9]);
        assert!(recorder.take().is_empty());

        server.shared.handle_read(id, &wire[9..]);
        assert_eq!(
            recorder.take(),
            vec![Event::Received(PING.to_vec(), "127.0.0.1".into(), 50000)]
        );
    }

    #[test]
    fn test_malformed_frame_reports_and_keeps_reading() {
        let (server, recorder) = server(FramingMode::Slip);
        let _shutdown = fake_listening(&server);
        let (id, _rx) = fake_client(&server, "127.0.0.1:50000");

        // No END after the bad escape: the next frame must still arrive.
        let mut chunk = vec![b'/', slip::ESC, 0x01];
        chunk.extend(slip::encode(PING));
        server.shared.handle_read(id, &chunk);

        assert_eq!(
            recorder.take(),
            vec![
                Event::ReadFailed(ReadError::Frame(FrameError::InvalidEscape { byte: 0x01 })),
                Event::Received(PING.to_vec(), "127.0.0.1".into(), 50000),
            ]
        );
        assert_eq!(server.clients().len(), 1);
    }

    #[test]
    fn test_bad_escape_split_across_reads_keeps_next_frame() {
        let (server, recorder) = server(FramingMode::Slip);
        let _shutdown = fake_listening(&server);
        let (id, _rx) = fake_client(&server, "127.0.0.1:50000");

        let mut chunk = vec![b'/', slip::ESC, 0x01];
        chunk.extend(slip::encode(PONG));
        server.shared.handle_read(id, &chunk[..2]);
        server.shared.handle_read(id, &chunk[2..]);

        let events = recorder.take();
        assert_eq!(events.len(), 2);
        assert!(matches!(
            events[0],
            Event::ReadFailed(ReadError::Frame(FrameError::InvalidEscape { byte: 0x01 }))
        ));
        assert_eq!(
            events[1],
            Event::Received(PONG.to_vec(), "127.0.0.1".into(), 50000)
        );
    }

    #[test]
    fn test_unparseable_frame_reports_parse_error() {
        let (server, recorder) = server(FramingMode::Plh);
        let _shutdown = fake_listening(&server);
        let (id, _rx) = fake_client(&server, "127.0.0.1:50000");

        server.shared.handle_read(id, &[0, 0, 0, 0]);

        let events = recorder.take();
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], Event::ReadFailed(ReadError::Parse(_))));
    }

    #[test]
    fn test_read_for_unknown_connection_is_ignored() {
        let (server, recorder) = server(FramingMode::Slip);
        let _shutdown = fake_listening(&server);
        let (id, _rx) = fake_client(&server, "127.0.0.1:50000");
        server.shared.handle_disconnect(id, None);
        recorder.take();

        server.shared.handle_read(id, &slip::encode(PING));
        assert!(recorder.take().is_empty());
    }

    #[test]
    fn test_broadcast_tags_each_write_and_completes_by_tag() {
        let (server, recorder) = server(FramingMode::Slip);
        let _shutdown = fake_listening(&server);
        let (_a, mut rx_a) = fake_client(&server, "127.0.0.1:50000");
        let (_b, mut rx_b) = fake_client(&server, "127.0.0.1:50001");

        let packet = OscPacket::from_bytes(PING.to_vec());
        assert_eq!(server.send_packet(&packet).expect("send"), 2);
        assert_eq!(server.pending_sends(), 2);
        assert_eq!(server.next_tag().as_u32(), 2);

        let (tag_a, payload_a) = next_write(&mut rx_a);
        let (tag_b, payload_b) = next_write(&mut rx_b);
        assert_ne!(tag_a, tag_b);
        assert_eq!(payload_a, PING);
        assert_eq!(payload_b, PING);

        server.shared.handle_write_complete(tag_b);
        assert_eq!(
            recorder.take(),
            vec![Event::Sent(PING.to_vec(), "127.0.0.1".into(), 50001)]
        );
        assert_eq!(server.pending_sends(), 1);

        // A completion is only reported once.
        server.shared.handle_write_complete(tag_b);
        assert!(recorder.take().is_empty());
    }

    #[test]
    fn test_targeted_send_reaches_only_matching_client() {
        let (server, _recorder) = server(FramingMode::Slip);
        let _shutdown = fake_listening(&server);
        let (_a, mut rx_a) = fake_client(&server, "127.0.0.1:50000");
        let (_b, mut rx_b) = fake_client(&server, "127.0.0.1:50001");

        assert_eq!(server.send_data_to(PONG, "127.0.0.1", 50001).expect("send"), 1);
        assert!(rx_a.try_recv().is_err());
        assert_eq!(next_write(&mut rx_b).1, PONG);
    }

    #[test]
    fn test_send_to_unknown_client_is_a_no_op() {
        let (server, recorder) = server(FramingMode::Slip);
        let _shutdown = fake_listening(&server);
        let (_a, _rx_a) = fake_client(&server, "127.0.0.1:50000");

        assert_eq!(server.send_data_to(PING, "10.1.1.1", 50000).expect("send"), 0);
        assert_eq!(server.next_tag().as_u32(), 0);
        assert_eq!(server.pending_sends(), 0);
        assert!(recorder.take().is_empty());
    }

    #[test]
    fn test_send_data_rejects_invalid_packet() {
        let (server, _recorder) = server(FramingMode::Slip);
        let _shutdown = fake_listening(&server);
        let (_a, mut rx_a) = fake_client(&server, "127.0.0.1:50000");

        let result = server.send_data(b"not osc");
        assert!(matches!(result, Err(ServerError::InvalidPacket(_))));
        assert!(rx_a.try_recv().is_err());
        assert_eq!(server.next_tag().as_u32(), 0);
    }

    #[test]
    fn test_disconnect_discards_pending_sends() {
        let (server, recorder) = server(FramingMode::Slip);
        let _shutdown = fake_listening(&server);
        let (a, mut rx_a) = fake_client(&server, "127.0.0.1:50000");

        server.send_data(PING).expect("send");
        let (tag, _) = next_write(&mut rx_a);

        server.shared.handle_disconnect(a, None);
        assert_eq!(
            recorder.take(),
            vec![Event::Closed("127.0.0.1".into(), 50000)]
        );
        assert_eq!(server.pending_sends(), 0);
        assert!(server.clients().is_empty());

        server.shared.handle_write_complete(tag);
        assert!(recorder.take().is_empty());
    }

    #[test]
    fn test_send_after_task_exit_is_not_counted() {
        let (server, _recorder) = server(FramingMode::Slip);
        let _shutdown = fake_listening(&server);
        let (_a, rx_a) = fake_client(&server, "127.0.0.1:50000");
        drop(rx_a);

        assert_eq!(server.send_data(PING).expect("send"), 0);
        assert_eq!(server.pending_sends(), 0);
        assert_eq!(server.next_tag().as_u32(), 0);

        // A live client still gets the first tag.
        let (_b, mut rx_b) = fake_client(&server, "127.0.0.1:50001");
        assert_eq!(server.send_data(PING).expect("send"), 1);
        let (tag, _) = next_write(&mut rx_b);
        assert_eq!(tag.as_u32(), 0);
    }

    #[test]
    fn test_listener_failure_performs_full_stop() {
        let (server, recorder) = server(FramingMode::Slip);
        let _shutdown = fake_listening(&server);
        let (_a, _rx_a) = fake_client(&server, "127.0.0.1:50000");
        server.send_data(PING).expect("send");

        let error = io::Error::new(io::ErrorKind::ConnectionAborted, "listener failed");
        server.shared.handle_listener_closed(1, Some(error));

        assert!(!server.is_listening());
        assert!(server.clients().is_empty());
        assert_eq!(server.pending_sends(), 0);
        assert_eq!(server.next_tag().as_u32(), 0);
        assert_eq!(
            recorder.take(),
            vec![Event::ListenerClosed(Some(io::ErrorKind::ConnectionAborted))]
        );
    }

    #[test]
    fn test_stale_listener_close_keeps_current_session() {
        let (server, recorder) = server(FramingMode::Slip);
        let _shutdown = fake_listening(&server);
        server.shared.state.borrow_mut().session = 2;
        let (_a, _rx_a) = fake_client(&server, "127.0.0.1:50000");

        server.shared.handle_listener_closed(1, None);

        assert!(server.is_listening());
        assert_eq!(server.clients().len(), 1);
        assert_eq!(recorder.take(), vec![Event::ListenerClosed(None)]);
    }

    #[test]
    fn test_full_stop_keeps_clients_of_older_session() {
        let (server, recorder) = server(FramingMode::Slip);
        let _shutdown = fake_listening(&server);
        let (old, _rx_old) = fake_client(&server, "127.0.0.1:50000");
        server.shared.state.borrow_mut().session = 2;
        let (_new, _rx_new) = fake_client(&server, "127.0.0.1:50001");
        server.send_data(PING).expect("send");

        server.shared.handle_listener_closed(2, None);

        let clients = server.clients();
        assert_eq!(clients.len(), 1);
        assert_eq!(clients[0].id, old);
        assert_eq!(server.pending_sends(), 1);
        assert_eq!(server.next_tag().as_u32(), 0);
        assert_eq!(recorder.take(), vec![Event::ListenerClosed(None)]);

        // The draining client still reports its close.
        server.shared.handle_disconnect(old, None);
        assert_eq!(
            recorder.take(),
            vec![Event::Closed("127.0.0.1".into(), 50000)]
        );
        assert!(server.clients().is_empty());
        assert_eq!(server.pending_sends(), 0);
    }

    #[test]
    fn test_stop_signals_accept_task_once() {
        let (server, _recorder) = server(FramingMode::Slip);
        let mut shutdown = fake_listening(&server);

        server.stop();
        assert!(!server.is_listening());
        assert_eq!(shutdown.try_recv(), Ok(()));

        // Idle stop is a no-op.
        server.stop();
        assert!(!server.is_listening());
    }

    #[test]
    fn test_set_port_stops_listening_server() {
        let (server, _recorder) = server(FramingMode::Slip);
        let mut shutdown = fake_listening(&server);

        server.set_port(9100);
        assert_eq!(server.port(), 9100);
        assert!(!server.is_listening());
        assert_eq!(shutdown.try_recv(), Ok(()));
    }

    #[test]
    fn test_set_interface_stops_listening_server() {
        let (server, _recorder) = server(FramingMode::Slip);
        let mut shutdown = fake_listening(&server);

        server.set_interface(None);
        assert_eq!(server.interface(), None);
        assert!(!server.is_listening());
        assert_eq!(shutdown.try_recv(), Ok(()));
    }

    #[test]
    fn test_set_framing_discards_partial_frames() {
        let (server, recorder) = server(FramingMode::Slip);
        let _shutdown = fake_listening(&server);
        let (id, _rx) = fake_client(&server, "127.0.0.1:50000");

        server.shared.handle_read(id, &PING[..5]);
        server.set_framing(FramingMode::Plh);
        assert_eq!(server.framing(), FramingMode::Plh);

        let wire = encode_frame(FramingMode::Plh, PONG).expect("encode");
        server.shared.handle_read(id, &wire);
        assert_eq!(
            recorder.take(),
            vec![Event::Received(PONG.to_vec(), "127.0.0.1".into(), 50000)]
        );
    }

    #[test]
    fn test_same_framing_keeps_partial_frames() {
        let (server, recorder) = server(FramingMode::Slip);
        let _shutdown = fake_listening(&server);
        let (id, _rx) = fake_client(&server, "127.0.0.1:50000");

        let wire = slip::encode(PING);
        server.shared.handle_read(id, &wire[..4]);
        server.set_framing(FramingMode::Slip);
        server.shared.handle_read(id, &wire[4..]);
        assert_eq!(recorder.take().len(), 1);
    }

    #[test]
    fn test_timeout_accessors() {
        let (server, _recorder) = server(FramingMode::Slip);
        assert_eq!(server.timeout(), None);

        server.set_timeout_secs(0.25);
        assert_eq!(server.timeout(), Some(Duration::from_millis(250)));

        server.set_timeout_secs(-1.0);
        assert_eq!(server.timeout(), None);
    }

    #[test]
    fn test_dropped_delegate_is_skipped() {
        let (server, recorder) = server(FramingMode::Slip);
        let _shutdown = fake_listening(&server);
        let (id, _rx) = fake_client(&server, "127.0.0.1:50000");
        drop(recorder);

        server.shared.handle_read(id, &slip::encode(PING));
        server.shared.handle_disconnect(id, None);
        assert!(server.clients().is_empty());
    }
}
