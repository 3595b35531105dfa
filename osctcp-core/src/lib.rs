//! # osctcp-core
//!
//! Core abstractions for the osctcp transport.
//!
//! This crate provides the seams the TCP transport is written against:
//!
//! - **Provider traits**: sockets, deadlines and task spawning
//! - **Codec trait**: pluggable OSC packet parsing and serialization
//!
//! ## Provider Traits
//!
//! The provider traits keep the transport independent from the concrete
//! socket and timer implementation:
//!
//! - [`NetworkProvider`] and [`Listener`]: listening sockets and accept
//! - [`TimeProvider`]: deadlines on reads and writes
//! - [`TaskProvider`]: spawning on the current thread
//! - [`Providers`]: one type parameter naming all three
//!
//! ## Packet Codec
//!
//! OSC payload encoding is opaque to the transport. It only needs a
//! "parse bytes into a packet" / "serialize a packet into bytes" pair,
//! expressed by [`PacketCodec`]. [`OscCodec`] is a structural default.

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

mod codec;
mod network;
mod providers;
mod task;
mod time;

// Codec exports
pub use codec::{CodecError, OscCodec, OscPacket, PacketCodec, PacketKind};

// Provider trait exports
pub use network::{Listener, NetworkProvider, TokioListener, TokioNetworkProvider};
pub use providers::{Providers, TokioProviders};
pub use task::{TaskProvider, TokioTaskProvider};
pub use time::{TimeError, TimeProvider, TokioTimeProvider};
