//! Pluggable OSC packet parsing and serialization.
//!
//! The transport frames bytes; it does not understand OSC address patterns,
//! type tags or arguments. The [`PacketCodec`] trait lets users bring a full
//! OSC implementation while osctcp ships [`OscCodec`], a structural codec
//! that validates packet shape and otherwise keeps the bytes opaque.
//!
//! # Example
//!
//! ```rust
//! use osctcp_core::{OscCodec, PacketCodec, PacketKind};
//!
//! let codec = OscCodec;
//! let packet = codec.parse(b"/ping\0\0\0,\0\0\0").unwrap();
//! assert_eq!(packet.kind(), PacketKind::Message);
//! assert_eq!(codec.serialize(&packet).unwrap(), b"/ping\0\0\0,\0\0\0");
//! ```

use thiserror::Error;

/// Error type for codec operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// The bytes are not a valid packet.
    #[error("parse error: {reason}")]
    Parse {
        /// Why the bytes were rejected.
        reason: String,
    },

    /// The packet could not be turned into bytes.
    #[error("serialize error: {reason}")]
    Serialize {
        /// Why serialization failed.
        reason: String,
    },
}

impl CodecError {
    /// Shorthand for a [`CodecError::Parse`].
    pub fn parse(reason: impl Into<String>) -> Self {
        CodecError::Parse {
            reason: reason.into(),
        }
    }
}

/// Pluggable packet serialization format.
///
/// The trait requires `Clone + 'static` so codec instances can be moved into
/// per-connection tasks.
pub trait PacketCodec: Clone + 'static {
    /// The packet type produced by [`parse`](Self::parse).
    type Packet: Clone + std::fmt::Debug + 'static;

    /// Parse one complete frame payload into a packet.
    ///
    /// # Errors
    ///
    /// Returns `CodecError::Parse` if the bytes are not a valid packet.
    fn parse(&self, bytes: &[u8]) -> Result<Self::Packet, CodecError>;

    /// Serialize a packet into its payload bytes (without framing).
    ///
    /// # Errors
    ///
    /// Returns `CodecError::Serialize` if the packet cannot be encoded.
    fn serialize(&self, packet: &Self::Packet) -> Result<Vec<u8>, CodecError>;
}

/// Marker that starts every OSC bundle.
const BUNDLE_MARKER: &[u8] = b"#bundle\0";

/// Top-level shape of an OSC packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    /// A message, starting with an address pattern.
    Message,
    /// A bundle, starting with `#bundle`.
    Bundle,
}

/// An OSC packet kept as its serialized bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OscPacket {
    kind: PacketKind,
    bytes: Vec<u8>,
}

impl OscPacket {
    /// Wrap already-serialized bytes without validating them.
    ///
    /// The kind is derived from the first bytes: `#bundle` prefixes make a
    /// bundle, everything else is treated as a message.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        let kind = if bytes.starts_with(BUNDLE_MARKER) {
            PacketKind::Bundle
        } else {
            PacketKind::Message
        };
        Self { kind, bytes }
    }

    /// Message or bundle.
    pub fn kind(&self) -> PacketKind {
        self.kind
    }

    /// The serialized packet bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// The address pattern of a message, if it is valid UTF-8.
    pub fn address(&self) -> Option<&str> {
        if self.kind != PacketKind::Message {
            return None;
        }
        let end = self.bytes.iter().position(|&b| b == 0)?;
        std::str::from_utf8(&self.bytes[..end]).ok()
    }

    /// Consume the packet and return its bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

/// Structural OSC codec.
///
/// Accepts any payload that is non-empty, a multiple of four bytes long, and
/// starts with either `/` (message) or `#bundle\0` (bundle). Arguments are
/// never decoded.
#[derive(Clone, Default, Debug, Copy)]
pub struct OscCodec;

impl PacketCodec for OscCodec {
    type Packet = OscPacket;

    fn parse(&self, bytes: &[u8]) -> Result<OscPacket, CodecError> {
        if bytes.is_empty() {
            return Err(CodecError::parse("empty packet"));
        }
        if bytes.len() % 4 != 0 {
            return Err(CodecError::parse(format!(
                "packet length {} is not a multiple of 4",
                bytes.len()
            )));
        }
        if bytes.starts_with(BUNDLE_MARKER) {
            if bytes.len() < BUNDLE_MARKER.len() + 8 {
                return Err(CodecError::parse("bundle is missing its time tag"));
            }
        } else if bytes[0] != b'/' {
            return Err(CodecError::parse(format!(
                "unexpected leading byte {:#04x}",
                bytes[0]
            )));
        } else if !bytes.contains(&0) {
            return Err(CodecError::parse("address pattern is not terminated"));
        }
        Ok(OscPacket::from_bytes(bytes.to_vec()))
    }

    fn serialize(&self, packet: &OscPacket) -> Result<Vec<u8>, CodecError> {
        Ok(packet.bytes.clone())
    }
}
