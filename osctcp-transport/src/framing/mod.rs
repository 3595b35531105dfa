//! Stream framing for OSC over TCP.
//!
//! TCP delivers an unbounded byte stream, OSC packets carry no length of
//! their own, so every packet on the wire is wrapped in one of two framings:
//!
//! - **SLIP** (OSC 1.1, RFC 1055): `[escaped payload][END]`
//! - **PLH** (OSC 1.0): `[length:4 big-endian][payload:N]`
//!
//! Decoders are incremental: [`FrameDecoder::decode`] accepts chunks split at
//! arbitrary boundaries and keeps the incomplete tail of the current frame in
//! its own buffer until the rest arrives.

use serde::{Deserialize, Serialize};

pub mod plh;
pub mod slip;

pub use plh::PlhDecoder;
pub use slip::SlipDecoder;

/// Default upper bound for a single decoded frame (1MB).
///
/// Frames larger than this are rejected to prevent memory exhaustion.
pub const DEFAULT_MAX_FRAME_LEN: usize = 1024 * 1024;

/// Framing convention applied to every connection of a server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FramingMode {
    /// SLIP byte stuffing (OSC 1.1).
    #[default]
    Slip,
    /// 4-byte big-endian packet length header (OSC 1.0).
    Plh,
}

impl std::fmt::Display for FramingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FramingMode::Slip => f.write_str("SLIP"),
            FramingMode::Plh => f.write_str("PLH"),
        }
    }
}

impl std::str::FromStr for FramingMode {
    type Err = UnknownFramingMode;

    /// Parse `slip` or `plh`, in any case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("slip") {
            Ok(FramingMode::Slip)
        } else if s.eq_ignore_ascii_case("plh") {
            Ok(FramingMode::Plh)
        } else {
            Err(UnknownFramingMode(s.to_string()))
        }
    }
}

/// A framing mode name other than `slip` or `plh`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown framing mode: {0} (expected slip or plh)")]
pub struct UnknownFramingMode(pub String);

/// Framing error types.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    /// An ESC byte was followed by something other than ESC_END or ESC_ESC.
    #[error("invalid SLIP escape sequence: 0xdb followed by {byte:#04x}")]
    InvalidEscape {
        /// The byte that followed the escape marker.
        byte: u8,
    },

    /// A frame is larger than the configured limit.
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge {
        /// Declared (PLH) or accumulated (SLIP) frame size.
        size: usize,
        /// The configured limit.
        max: usize,
    },
}

/// One result produced by a decoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// A complete frame payload.
    Frame(Vec<u8>),
    /// The current frame was abandoned.
    Malformed {
        /// Bytes of the abandoned frame that had been buffered.
        partial: Vec<u8>,
        /// Why the frame was abandoned.
        error: FrameError,
    },
}

/// Per-connection decode state for the configured framing mode.
#[derive(Debug, Clone)]
pub enum FrameDecoder {
    /// SLIP decoder state.
    Slip(SlipDecoder),
    /// PLH decoder state.
    Plh(PlhDecoder),
}

impl FrameDecoder {
    /// Create a fresh decoder for `mode`.
    pub fn new(mode: FramingMode, max_frame_len: usize) -> Self {
        match mode {
            FramingMode::Slip => FrameDecoder::Slip(SlipDecoder::new(max_frame_len)),
            FramingMode::Plh => FrameDecoder::Plh(PlhDecoder::new(max_frame_len)),
        }
    }

    /// The framing mode this decoder understands.
    pub fn mode(&self) -> FramingMode {
        match self {
            FrameDecoder::Slip(_) => FramingMode::Slip,
            FrameDecoder::Plh(_) => FramingMode::Plh,
        }
    }

    /// Feed a chunk of received bytes, calling `emit` once per result in
    /// stream order.
    pub fn decode<F>(&mut self, chunk: &[u8], emit: F)
    where
        F: FnMut(Decoded),
    {
        match self {
            FrameDecoder::Slip(decoder) => decoder.decode(chunk, emit),
            FrameDecoder::Plh(decoder) => decoder.decode(chunk, emit),
        }
    }

    /// Convenience wrapper around [`decode`](Self::decode) collecting results.
    pub fn decode_all(&mut self, chunk: &[u8]) -> Vec<Decoded> {
        let mut out = Vec::new();
        self.decode(chunk, |decoded| out.push(decoded));
        out
    }

    /// Number of bytes buffered for the current, incomplete frame.
    pub fn buffered(&self) -> usize {
        match self {
            FrameDecoder::Slip(decoder) => decoder.buffered(),
            FrameDecoder::Plh(decoder) => decoder.buffered(),
        }
    }

    /// Return to the zero state, dropping any partial frame.
    pub fn reset(&mut self) {
        match self {
            FrameDecoder::Slip(decoder) => decoder.reset(),
            FrameDecoder::Plh(decoder) => decoder.reset(),
        }
    }
}

/// Wrap a serialized packet for the wire.
///
/// # Errors
///
/// Returns `FrameTooLarge` if a PLH payload does not fit the 32-bit header.
///
/// # Examples
///
/// ```
/// use osctcp_transport::framing::{FramingMode, encode_frame};
///
/// let wire = encode_frame(FramingMode::Plh, b"/a\0\0").expect("encode");
/// assert_eq!(wire, [0, 0, 0, 4, b'/', b'a', 0, 0]);
///
/// let wire = encode_frame(FramingMode::Slip, &[0x01, 0xC0]).expect("encode");
/// assert_eq!(wire, [0x01, 0xDB, 0xDC, 0xC0]);
/// ```
pub fn encode_frame(mode: FramingMode, payload: &[u8]) -> Result<Vec<u8>, FrameError> {
    match mode {
        FramingMode::Slip => Ok(slip::encode(payload)),
        FramingMode::Plh => plh::encode(payload),
    }
}
