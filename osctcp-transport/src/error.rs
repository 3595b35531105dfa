//! Error types for the OSC TCP server.

use std::io;

use crate::CodecError;
use crate::framing::FrameError;

/// Errors returned by the public [`Server`](crate::Server) API.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Binding the listening socket failed. The server stays idle.
    #[error("failed to bind {address}: {source}")]
    Bind {
        /// The `host:port` the server tried to bind.
        address: String,
        /// The underlying socket error.
        #[source]
        source: io::Error,
    },

    /// `start()` was called while the server is already listening.
    #[error("server is already listening on {address}")]
    AlreadyListening {
        /// The address the server is currently bound to.
        address: String,
    },

    /// Raw bytes handed to a send call are not a valid packet.
    #[error("outbound data is not a valid packet: {0}")]
    InvalidPacket(#[source] CodecError),

    /// The packet could not be serialized.
    #[error("failed to serialize packet: {0}")]
    Serialization(#[source] CodecError),
}

/// Failure reading one frame from a connection.
///
/// Reported through
/// [`ServerDelegate::read_failed`](crate::ServerDelegate::read_failed); the
/// connection stays open.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReadError {
    /// The byte stream violated the framing.
    #[error("frame decode error: {0}")]
    Frame(#[from] FrameError),

    /// A complete frame did not contain a valid packet.
    #[error("packet parse error: {0}")]
    Parse(#[from] CodecError),
}

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;
