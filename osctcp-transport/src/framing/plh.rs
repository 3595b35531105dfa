//! Packet-length-header framing, as used by OSC 1.0 over TCP.
//!
//! Frame format: `[length:4][payload:N]`
//!
//! - **length**: payload size in bytes (big-endian u32)
//! - **payload**: one serialized OSC packet

use super::{Decoded, FrameError};

/// Size of the length header.
pub const HEADER_SIZE: usize = 4;

/// Encode a payload as one PLH frame.
///
/// # Errors
///
/// Returns `FrameTooLarge` if the payload length does not fit in a u32.
pub fn encode(payload: &[u8]) -> Result<Vec<u8>, FrameError> {
    let length = u32::try_from(payload.len()).map_err(|_| FrameError::FrameTooLarge {
        size: payload.len(),
        max: u32::MAX as usize,
    })?;

    let mut encoded = Vec::with_capacity(HEADER_SIZE + payload.len());
    encoded.extend_from_slice(&length.to_be_bytes());
    encoded.extend_from_slice(payload);
    Ok(encoded)
}

/// Incremental PLH decoder.
///
/// `remaining == 0` means the decoder is collecting a header; `buffer` then
/// holds up to three header bytes. Otherwise `buffer` holds the payload bytes
/// received so far and `remaining` counts the payload bytes still expected.
#[derive(Debug, Clone)]
pub struct PlhDecoder {
    buffer: Vec<u8>,
    remaining: usize,
    /// Payload bytes of a rejected frame still to be skipped.
    skipping: usize,
    max_frame_len: usize,
}

impl PlhDecoder {
    /// Create an empty decoder rejecting frames longer than `max_frame_len`.
    pub fn new(max_frame_len: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(HEADER_SIZE),
            remaining: 0,
            skipping: 0,
            max_frame_len,
        }
    }

    /// Feed received bytes, emitting complete frames and frame errors.
    ///
    /// A declared length above the limit is reported once, then exactly that
    /// many bytes are skipped so the next header is read at the right offset.
    pub fn decode<F>(&mut self, chunk: &[u8], mut emit: F)
    where
        F: FnMut(Decoded),
    {
        let mut input = chunk;

        while !input.is_empty() {
            if self.skipping > 0 {
                let n = self.skipping.min(input.len());
                self.skipping -= n;
                input = &input[n..];
                continue;
            }

            if self.remaining == 0 {
                let needed = HEADER_SIZE - self.buffer.len();
                let n = needed.min(input.len());
                self.buffer.extend_from_slice(&input[..n]);
                input = &input[n..];
                if self.buffer.len() < HEADER_SIZE {
                    break; // Need more data for header
                }

                let length = u32::from_be_bytes([
                    self.buffer[0],
                    self.buffer[1],
                    self.buffer[2],
                    self.buffer[3],
                ]) as usize;
                self.buffer.clear();

                if length > self.max_frame_len {
                    self.skipping = length;
                    emit(Decoded::Malformed {
                        partial: Vec::new(),
                        error: FrameError::FrameTooLarge {
                            size: length,
                            max: self.max_frame_len,
                        },
                    });
                } else if length == 0 {
                    emit(Decoded::Frame(Vec::new()));
                } else {
                    self.remaining = length;
                    self.buffer.reserve(length);
                }
                continue;
            }

            let n = self.remaining.min(input.len());
            self.buffer.extend_from_slice(&input[..n]);
            self.remaining -= n;
            input = &input[n..];

            if self.remaining == 0 {
                let frame = std::mem::replace(&mut self.buffer, Vec::with_capacity(HEADER_SIZE));
                emit(Decoded::Frame(frame));
            }
        }
    }

    /// Number of bytes buffered for the current frame (header or payload).
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Payload bytes still expected for the current frame.
    pub fn remaining(&self) -> usize {
        self.remaining
    }

    /// Return to "expecting a header", dropping any partial frame.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.remaining = 0;
        self.skipping = 0;
    }
}
