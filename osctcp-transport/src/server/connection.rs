//! Connection state table.
//!
//! Every accepted client gets a [`ConnectionId`] at accept time. The id, not
//! the socket, is the table key; the socket itself is owned by the
//! connection task, which the table reaches through a command channel.

use std::collections::BTreeMap;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::rc::Rc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::outbound::Tag;
use crate::framing::{FrameDecoder, FramingMode};

/// Stable identifier of an accepted connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Raw id value.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Read-only snapshot of a connected client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
    /// Connection identifier.
    pub id: ConnectionId,
    /// Remote host address.
    pub host: String,
    /// Remote port.
    pub port: u16,
}

/// Work queued for a connection task, processed in order.
#[derive(Debug)]
pub(crate) enum ConnectionCommand {
    /// Frame and write a serialized packet, then complete `tag`.
    Write { tag: Tag, payload: Rc<[u8]> },
    /// Finish the writes queued before this command, then disconnect.
    Close,
}

/// One accepted peer.
#[derive(Debug)]
pub(crate) struct Connection {
    pub(crate) peer: SocketAddr,
    /// Listening session that accepted this connection.
    pub(crate) session: u64,
    pub(crate) decoder: FrameDecoder,
    pub(crate) commands: mpsc::UnboundedSender<ConnectionCommand>,
    pub(crate) task: Option<JoinHandle<()>>,
}

impl Connection {
    pub(crate) fn host(&self) -> String {
        canonical_host(&self.peer)
    }
}

/// Host string reported for `peer`; IPv4-mapped IPv6 shows as IPv4.
pub(crate) fn canonical_host(peer: &SocketAddr) -> String {
    peer.ip().to_canonical().to_string()
}

/// Table of live connections keyed by [`ConnectionId`].
#[derive(Debug, Default)]
pub(crate) struct ConnectionTable {
    entries: BTreeMap<ConnectionId, Connection>,
    next_id: u64,
}

impl ConnectionTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Register a freshly accepted connection.
    pub(crate) fn register(
        &mut self,
        peer: SocketAddr,
        session: u64,
        decoder: FrameDecoder,
        commands: mpsc::UnboundedSender<ConnectionCommand>,
    ) -> ConnectionId {
        let id = ConnectionId(self.next_id);
        self.next_id += 1;
        self.entries.insert(
            id,
            Connection {
                peer,
                session,
                decoder,
                commands,
                task: None,
            },
        );
        id
    }

    /// Record the task driving `id`, so stop() can wait for it.
    pub(crate) fn attach_task(&mut self, id: ConnectionId, task: JoinHandle<()>) {
        if let Some(connection) = self.entries.get_mut(&id) {
            connection.task = Some(task);
        }
    }

    pub(crate) fn get(&self, id: ConnectionId) -> Option<&Connection> {
        self.entries.get(&id)
    }

    pub(crate) fn get_mut(&mut self, id: ConnectionId) -> Option<&mut Connection> {
        self.entries.get_mut(&id)
    }

    pub(crate) fn remove(&mut self, id: ConnectionId) -> Option<Connection> {
        self.entries.remove(&id)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Drop every connection accepted by `session` and return their ids.
    pub(crate) fn remove_session(&mut self, session: u64) -> Vec<ConnectionId> {
        let mut removed = Vec::new();
        self.entries.retain(|id, connection| {
            if connection.session == session {
                removed.push(*id);
                false
            } else {
                true
            }
        });
        removed
    }

    /// Snapshot of every connected client, in accept order.
    pub(crate) fn clients(&self) -> Vec<ClientInfo> {
        self.entries
            .iter()
            .map(|(id, connection)| ClientInfo {
                id: *id,
                host: connection.host(),
                port: connection.peer.port(),
            })
            .collect()
    }

    /// Every connection id, in accept order.
    pub(crate) fn ids(&self) -> Vec<ConnectionId> {
        self.entries.keys().copied().collect()
    }

    /// Connections whose remote address is `host:port`.
    pub(crate) fn matching(&self, host: &str, port: u16) -> Vec<ConnectionId> {
        self.entries
            .iter()
            .filter(|(_, connection)| {
                connection.peer.port() == port && host_matches(&connection.peer, host)
            })
            .map(|(id, _)| *id)
            .collect()
    }

    /// Replace every decoder with a fresh one for `mode`.
    pub(crate) fn reset_decoders(&mut self, mode: FramingMode, max_frame_len: usize) {
        for connection in self.entries.values_mut() {
            connection.decoder = FrameDecoder::new(mode, max_frame_len);
        }
    }

    /// Ask every connection of `session` to close and collect their tasks.
    pub(crate) fn close_session(&mut self, session: u64) -> Vec<JoinHandle<()>> {
        let mut tasks = Vec::new();
        for connection in self.entries.values_mut() {
            if connection.session != session {
                continue;
            }
            // A send error means the task already exited.
            let _ = connection.commands.send(ConnectionCommand::Close);
            if let Some(task) = connection.task.take() {
                tasks.push(task);
            }
        }
        tasks
    }
}

/// Whether `host` names the address of `peer`.
///
/// IP literals are compared canonically, so `::ffff:127.0.0.1` matches
/// `127.0.0.1`. `localhost` matches any loopback peer.
pub(crate) fn host_matches(peer: &SocketAddr, host: &str) -> bool {
    let host = host.trim_start_matches('[').trim_end_matches(']');
    match host.parse::<IpAddr>() {
        Ok(ip) => ip.to_canonical() == peer.ip().to_canonical(),
        Err(_) => host.eq_ignore_ascii_case("localhost") && peer.ip().is_loopback(),
    }
}
