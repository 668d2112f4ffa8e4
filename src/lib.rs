//! Continuous-profiling ingestion and aggregation core.
//!
//! Recorder processes stream profiling data over a chunked transport as a
//! checksummed binary protocol: one header envelope, then any number of
//! work-status-entry envelopes, then a clean end of stream. This crate parses
//! that stream incrementally (chunk boundaries are arbitrary), tracks each
//! scheduled recording through its status lifecycle, and merges stack samples
//! into per-process call trees inside bounded aggregation windows.
//!
//! The surrounding service owns HTTP handling, work scheduling and storage;
//! it drives this crate through [`ingest::IngestSession`] as request chunks
//! arrive and reads results back out of [`aggregate::AggregationWindow`].

pub mod aggregate;
pub mod config;
pub mod ingest;
pub mod wire;
