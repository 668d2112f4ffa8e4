//! Wire protocol: resumable decoding of the recorder upload stream.
//!
//! A request body is one header envelope followed by zero or more entry
//! envelopes followed by a clean end of stream. Envelopes are varint
//! length-prefixed protobuf payloads with a trailing Adler-32 checksum; the
//! framing itself is not protobuf. Chunk boundaries are arbitrary, so every
//! decoder here can return [`framed::Step::Incomplete`] and resume on the
//! next chunk without losing or double-counting bytes.

pub mod cursor;
pub mod entry;
pub mod framed;
pub mod header;
pub mod proto;

pub use cursor::ChunkCursor;
pub use entry::EntryDecoder;
pub use framed::{FrameError, Step};
pub use header::HeaderDecoder;
