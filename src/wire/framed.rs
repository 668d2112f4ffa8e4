//! Varint and length-delimited reads over a [`ChunkCursor`].
//!
//! Every read distinguishes "needs more bytes later" from "this is garbage":
//! the former is [`Step::Incomplete`] (the caller rewinds and waits for the
//! next chunk), the latter is a [`FrameError`] and terminal for the stream.
//! Helpers never mark the cursor themselves; callers own mark/rewind.

use thiserror::Error;

use super::cursor::ChunkCursor;

/// Maximum encoded length of a base-128 unsigned 32-bit integer.
const MAX_VARINT32_BYTES: usize = 5;

/// Outcome of a resumable decode step that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step<T> {
    /// The value was fully decoded.
    Ready(T),
    /// The byte source ran out mid-field; retry once more bytes arrive.
    Incomplete,
}

impl<T> Step<T> {
    pub fn is_incomplete(&self) -> bool {
        matches!(self, Step::Incomplete)
    }
}

/// Errors that make the enclosing stream unrecoverable.
#[derive(Error, Debug)]
pub enum FrameError {
    #[error("varint value overruns 32 bits")]
    VarintOverflow,

    #[error("frame of {len} bytes exceeds the {max} byte limit")]
    Oversized { len: usize, max: usize },

    #[error("zero-length frame")]
    EmptyFrame,

    #[error("checksum mismatch: declared {declared:#010x}, computed {computed:#010x}")]
    ChecksumMismatch { declared: u32, computed: u32 },

    #[error("malformed message payload: {0}")]
    Malformed(#[from] prost::DecodeError),
}

/// Reads a base-128 varint one byte at a time.
///
/// Returns `Incomplete` if the cursor is exhausted before a terminating byte,
/// and `VarintOverflow` if the encoding overruns 32 bits while bytes remain
/// available.
pub fn read_varint32(cursor: &mut ChunkCursor) -> Result<Step<u32>, FrameError> {
    let mut value: u32 = 0;
    for i in 0..MAX_VARINT32_BYTES {
        let Some(byte) = cursor.read_u8() else {
            return Ok(Step::Incomplete);
        };
        let bits = u32::from(byte & 0x7f);
        if i == MAX_VARINT32_BYTES - 1 && bits > 0x0f {
            // The fifth byte may only carry the top four bits of a u32.
            return Err(FrameError::VarintOverflow);
        }
        value |= bits << (7 * i);
        if byte & 0x80 == 0 {
            return Ok(Step::Ready(value));
        }
    }
    Err(FrameError::VarintOverflow)
}

/// Reads a varint length prefix followed by exactly that many payload bytes.
///
/// The declared length is bounded by `max` (and must be nonzero unless
/// `allow_empty`). Returns `Incomplete` if either the prefix or the payload
/// is not fully buffered yet; the caller rewinds and the prefix is re-read on
/// the next attempt.
pub fn read_framed(
    cursor: &mut ChunkCursor,
    max: usize,
    allow_empty: bool,
) -> Result<Step<Vec<u8>>, FrameError> {
    let len = match read_varint32(cursor)? {
        Step::Ready(len) => len as usize,
        Step::Incomplete => return Ok(Step::Incomplete),
    };
    if len == 0 && !allow_empty {
        return Err(FrameError::EmptyFrame);
    }
    if len > max {
        return Err(FrameError::Oversized { len, max });
    }
    match cursor.read_bytes(len) {
        Some(bytes) => Ok(Step::Ready(bytes.to_vec())),
        None => Ok(Step::Incomplete),
    }
}
