//! OSC over TCP: framing, connection handling and the server.
//!
//! TCP is a byte stream, so every OSC packet travels inside a frame:
//!
//! - **SLIP** (RFC 1055): payload bytes escaped, frame terminated by `0xC0`
//! - **PLH**: 4-byte big-endian length header followed by the payload
//!
//! The [`Server`] accepts clients, decodes inbound frames into packets,
//! serializes and frames outbound packets, and reports everything to a
//! [`ServerDelegate`]. It runs on a single thread inside a
//! `tokio::task::LocalSet`; every event is handled to completion before the
//! next one starts.
//!
//! # Quick start
//!
//! ```ignore
//! use std::rc::Rc;
//! use osctcp_transport::{
//!     FramingMode, OscCodec, OscPacket, Server, ServerConfig, ServerDelegate, TokioProviders,
//! };
//!
//! struct Printer;
//!
//! impl ServerDelegate<OscPacket> for Printer {
//!     fn packet_received(&self, packet: &OscPacket, host: &str, port: u16) {
//!         println!("{}:{} sent {:?}", host, port, packet.address());
//!     }
//! }
//!
//! let delegate = Rc::new(Printer);
//! let server = Server::new(
//!     TokioProviders::new(),
//!     OscCodec,
//!     ServerConfig::new(9000, FramingMode::Slip),
//! );
//! server.set_delegate(&delegate);
//! server.start().await?;
//! ```

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

pub use osctcp_core::{
    CodecError, Listener, NetworkProvider, OscCodec, OscPacket, PacketCodec, PacketKind,
    Providers, TaskProvider, TimeError, TimeProvider, TokioListener, TokioNetworkProvider,
    TokioProviders, TokioTaskProvider, TokioTimeProvider,
};

pub mod error;
pub mod framing;
pub mod server;

pub use error::{ReadError, ServerError, ServerResult};
pub use framing::{
    DEFAULT_MAX_FRAME_LEN, Decoded, FrameDecoder, FrameError, FramingMode, UnknownFramingMode,
    encode_frame,
};
pub use server::{ClientInfo, ConnectionId, Server, ServerConfig, ServerDelegate, Tag};
