//! SLIP framing (RFC 1055), as used by OSC 1.1 over TCP.
//!
//! Frame format: `[payload with END/ESC escaped][END]`
//!
//! - `END` (0xC0) terminates a frame
//! - `ESC` (0xDB) introduces a two-byte escape
//! - `ESC ESC_END` decodes to a literal 0xC0
//! - `ESC ESC_ESC` decodes to a literal 0xDB

use super::{Decoded, FrameError};

/// Frame terminator.
pub const END: u8 = 0xC0;
/// Escape marker.
pub const ESC: u8 = 0xDB;
/// Escaped form of [`END`].
pub const ESC_END: u8 = 0xDC;
/// Escaped form of [`ESC`].
pub const ESC_ESC: u8 = 0xDD;

/// Encode a payload as one SLIP frame.
///
/// Every literal `END` and `ESC` in the payload is escaped and a single
/// trailing `END` is appended.
pub fn encode(payload: &[u8]) -> Vec<u8> {
    let mut encoded = Vec::with_capacity(payload.len() + payload.len() / 8 + 1);
    for &byte in payload {
        match byte {
            END => encoded.extend_from_slice(&[ESC, ESC_END]),
            ESC => encoded.extend_from_slice(&[ESC, ESC_ESC]),
            _ => encoded.push(byte),
        }
    }
    encoded.push(END);
    encoded
}

/// Incremental SLIP decoder.
///
/// Holds the bytes of the frame currently being received and whether the
/// previous byte was an unconsumed `ESC`. Both survive across calls to
/// [`decode`](Self::decode), so chunk boundaries may fall anywhere.
#[derive(Debug, Clone)]
pub struct SlipDecoder {
    buffer: Vec<u8>,
    escape_pending: bool,
    /// Set after an oversized frame: bytes are dropped up to the next END.
    discarding: bool,
    max_frame_len: usize,
}

impl SlipDecoder {
    /// Create an empty decoder rejecting frames longer than `max_frame_len`.
    pub fn new(max_frame_len: usize) -> Self {
        Self {
            buffer: Vec::new(),
            escape_pending: false,
            discarding: false,
            max_frame_len,
        }
    }

    /// Feed received bytes, emitting complete frames and frame errors.
    pub fn decode<F>(&mut self, chunk: &[u8], mut emit: F)
    where
        F: FnMut(Decoded),
    {
        for &byte in chunk {
            if self.escape_pending {
                self.escape_pending = false;
                match byte {
                    ESC_END => self.push(END, &mut emit),
                    ESC_ESC => self.push(ESC, &mut emit),
                    // END still closes an oversized frame being skipped.
                    END if self.discarding => self.discarding = false,
                    _ if self.discarding => {}
                    _ => self.reject_escape(byte, &mut emit),
                }
                continue;
            }

            match byte {
                END => {
                    if self.discarding {
                        self.discarding = false;
                    } else if !self.buffer.is_empty() {
                        emit(Decoded::Frame(std::mem::take(&mut self.buffer)));
                    }
                }
                ESC => self.escape_pending = true,
                _ => self.push(byte, &mut emit),
            }
        }
    }

    /// Number of decoded bytes buffered for the current frame.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Drop the partial frame and any pending escape.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.escape_pending = false;
        self.discarding = false;
    }

    fn push<F>(&mut self, byte: u8, emit: &mut F)
    where
        F: FnMut(Decoded),
    {
        if self.discarding {
            return;
        }
        if self.buffer.len() >= self.max_frame_len {
            let error = FrameError::FrameTooLarge {
                size: self.buffer.len() + 1,
                max: self.max_frame_len,
            };
            let partial = std::mem::take(&mut self.buffer);
            self.discarding = true;
            emit(Decoded::Malformed { partial, error });
            return;
        }
        self.buffer.push(byte);
    }

    /// Drop the current frame after a bad escape. Decoding resumes with the
    /// next byte as the start of a new frame.
    fn reject_escape<F>(&mut self, byte: u8, emit: &mut F)
    where
        F: FnMut(Decoded),
    {
        let partial = std::mem::take(&mut self.buffer);
        emit(Decoded::Malformed {
            partial,
            error: FrameError::InvalidEscape { byte },
        });
    }
}
