//! OSC server over TCP.
//!
//! - [`Server`]: lifecycle, send API and configuration accessors
//! - [`ServerConfig`]: interface, port, framing and timeouts
//! - [`ServerDelegate`]: observer for connection, packet and error events
//!
//! Inbound bytes flow `socket → FrameDecoder → PacketCodec → delegate`.
//! Outbound packets flow `send_* → PacketCodec → tag → connection task →
//! encode_frame → socket → packet_sent`.

mod config;
mod connection;
mod core;
mod delegate;
mod outbound;

pub use self::core::Server;
pub use config::ServerConfig;
pub use connection::{ClientInfo, ConnectionId};
pub use delegate::ServerDelegate;
pub use outbound::Tag;
