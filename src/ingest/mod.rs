//! Ingestion of recorder upload streams.
//!
//! One [`IngestSession`] services one request: the HTTP layer (out of scope
//! here) calls [`IngestSession::feed`] for every body chunk and
//! [`IngestSession::close`] when the body ends. Sessions for the same window
//! run concurrently; the [`WorkGate`] guarantees at most one session per
//! work id.

pub mod gate;
pub mod session;

pub use gate::WorkGate;
pub use session::{IngestError, IngestSession, WindowResolver};
