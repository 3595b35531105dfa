//! Observer interface for server events.

use std::io;

use crate::error::ReadError;

/// Receives every lifecycle and I/O event of a [`Server`](crate::Server).
///
/// The server holds its delegate through a `Weak` reference: it never keeps
/// the delegate alive, and events raised after the delegate was dropped are
/// skipped. All methods run on the server's local task set, one at a time,
/// so implementations use `Cell`/`RefCell` for their own state.
///
/// Every method defaults to a no-op.
pub trait ServerDelegate<T> {
    /// A client connected.
    fn connection_established(&self, _host: &str, _port: u16) {}

    /// A client disconnected, or was disconnected by the server.
    fn connection_closed(&self, _host: &str, _port: u16) {}

    /// A complete packet arrived from a client.
    fn packet_received(&self, _packet: &T, _from_host: &str, _from_port: u16) {}

    /// A queued packet was fully written to a client.
    fn packet_sent(&self, _packet: &T, _to_host: &str, _to_port: u16) {}

    /// A frame could not be decoded or parsed. The connection stays open.
    ///
    /// `raw` holds the frame bytes that were dropped.
    fn read_failed(&self, _raw: &[u8], _error: &ReadError) {}

    /// The listening socket closed and the server is idle again.
    ///
    /// `error` is `None` after a requested stop.
    fn listening_socket_closed(&self, _error: Option<&io::Error>) {}
}
