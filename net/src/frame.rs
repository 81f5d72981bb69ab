//! Length-prefixed framing with a configurable magic header.
//!
//! ## Wire format
//!
//! Every frame on the wire is:
//!
//! ```text
//! [header bytes] [4 bytes: payload length (u32-be)] [N bytes: payload]
//! ```
//!
//! The header is the UTF-8 encoding of the configured magic string and is
//! part of the wire-compatibility contract, as is the 4-byte big-endian
//! length. [`FrameCodec::unpack`] resynchronises on the header, so garbage
//! between frames and lengths beyond the configured cap cost bytes, not the
//! connection.

use log::warn;

/// Magic string used when none is configured.
pub const DEFAULT_PACK_HEADER: &str = "henrylee2cn";

/// Width of the big-endian length prefix.
pub const LEN_PREFIX_BYTES: usize = 4;

/// Splits a byte stream into frames and packs payloads into frames.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    header: Vec<u8>,
    max_frame_len: usize,
}

impl FrameCodec {
    /// Create a codec for the given magic string. An empty string falls
    /// back to [`DEFAULT_PACK_HEADER`]; the header must be non-empty for
    /// resynchronisation to terminate.
    pub fn new(header: &str, max_frame_len: usize) -> Self {
        let header = if header.is_empty() {
            DEFAULT_PACK_HEADER
        } else {
            header
        };
        Self {
            header: header.as_bytes().to_vec(),
            max_frame_len,
        }
    }

    /// The magic bytes this codec frames with.
    pub fn header(&self) -> &[u8] {
        &self.header
    }

    /// Frame a payload: `header ‖ len ‖ payload`.
    ///
    /// Fails if the payload exceeds the configured cap, since the receiving
    /// side would discard the frame as mis-framing anyway.
    pub fn pack(&self, payload: &[u8]) -> crate::Result<Vec<u8>> {
        if payload.len() > self.max_frame_len {
            return Err(crate::NetError::FrameTooLarge {
                size: payload.len(),
                max: self.max_frame_len,
            });
        }
        let mut frame =
            Vec::with_capacity(self.header.len() + LEN_PREFIX_BYTES + payload.len());
        frame.extend_from_slice(&self.header);
        frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        frame.extend_from_slice(payload);
        Ok(frame)
    }

    /// Extract every complete payload from `buf`, leaving the residual
    /// bytes (a partial frame, or pre-header garbage with no header in
    /// sight) in place for the next read to extend.
    ///
    /// Tolerant of reads split at any byte boundary: a header, length
    /// prefix, or payload cut in half stays in the residual until the rest
    /// arrives. A declared length above the cap skips to the next header
    /// occurrence.
    pub fn unpack(&self, buf: &mut Vec<u8>) -> Vec<Vec<u8>> {
        let mut frames = Vec::new();
        // Index below which everything is consumed (frames or discarded bytes).
        let mut pos = 0;

        while let Some(idx) = find(&buf[pos..], &self.header) {
            let start = pos + idx;
            let len_end = start + self.header.len() + LEN_PREFIX_BYTES;
            if buf.len() < len_end {
                // Length prefix still incomplete; keep from the header on.
                pos = start;
                break;
            }

            let mut len_bytes = [0u8; LEN_PREFIX_BYTES];
            len_bytes.copy_from_slice(&buf[start + self.header.len()..len_end]);
            let len = u32::from_be_bytes(len_bytes) as usize;

            if len > self.max_frame_len {
                warn!(
                    "declared frame length {} exceeds cap {}, resyncing on next header",
                    len, self.max_frame_len
                );
                pos = start + self.header.len();
                continue;
            }

            if buf.len() < len_end + len {
                // Partial payload; keep from the header on.
                pos = start;
                break;
            }

            frames.push(buf[len_end..len_end + len].to_vec());
            pos = len_end + len;
        }

        buf.drain(..pos);
        frames
    }
}

/// First occurrence of `needle` in `haystack`.
fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

// ── Tests ───────────────────────────────────────────────────────────────────
