//! Per-request ingest orchestration.

use std::sync::Arc;
use std::time::SystemTime;

use thiserror::Error;
use tracing::{info, warn};

use super::gate::WorkGate;
use crate::aggregate::bucket::EntryIndexes;
use crate::aggregate::store::WindowStore;
use crate::aggregate::window::AggregationWindow;
use crate::aggregate::AggregationError;
use crate::config::IngestConfig;
use crate::wire::cursor::ChunkCursor;
use crate::wire::entry::EntryDecoder;
use crate::wire::framed::{FrameError, Step};
use crate::wire::header::HeaderDecoder;

/// Resolves a work id (from a parsed header) to its owning window.
///
/// [`crate::aggregate::WindowStore`] is the in-crate implementation; the
/// surrounding scheduling subsystem may substitute its own.
pub trait WindowResolver: Send + Sync {
    fn resolve(&self, work_id: u64) -> Option<Arc<AggregationWindow>>;
}

impl WindowResolver for WindowStore {
    fn resolve(&self, work_id: u64) -> Option<Arc<AggregationWindow>> {
        WindowStore::resolve(self, work_id)
    }
}

/// Terminal ingest failures. `Incomplete` decoder results never surface
/// here — they simply pause the session until the next chunk.
#[derive(Error, Debug)]
pub enum IngestError {
    /// Transport-level corruption: bad checksum, bad framing, undecodable
    /// payload.
    #[error("corrupt profile payload: {0}")]
    Corrupt(#[from] FrameError),

    /// The window rejected a transition or a merge.
    #[error(transparent)]
    Aggregation(#[from] AggregationError),

    /// Another session already holds the gate for this work id.
    #[error("profile for work id {work_id} is already being ingested by another session")]
    DuplicateSubmission { work_id: u64 },

    /// The header's work id does not resolve to an active window.
    #[error("work id {work_id} does not resolve to an active aggregation window")]
    UnknownWorkId { work_id: u64 },

    /// The header carries no work assignment to resolve.
    #[error("recording header carries no work assignment")]
    MissingWorkAssignment,

    /// The transport ended while an entry (or the header) was mid-decode.
    #[error("transport ended mid-payload, profile is incomplete")]
    IncompletePayload,

    /// `feed` was called again after the session failed terminally.
    #[error("session already failed terminally")]
    AlreadyFailed,
}

impl IngestError {
    /// True when the sender caused the failure (corruption, protocol
    /// violation, duplicate or late submission); false for caller logic
    /// errors on this side. The HTTP layer maps this to the response class.
    pub fn is_sender_fault(&self) -> bool {
        match self {
            IngestError::Corrupt(_)
            | IngestError::DuplicateSubmission { .. }
            | IngestError::UnknownWorkId { .. }
            | IngestError::MissingWorkAssignment
            | IngestError::IncompletePayload => true,
            IngestError::Aggregation(err) => err.is_sender_fault(),
            IngestError::AlreadyFailed => false,
        }
    }
}

/// One ingest session services one upload request.
///
/// Call [`feed`](Self::feed) for each body chunk as it arrives and
/// [`close`](Self::close) exactly once when the transport signals
/// end-of-input. The session guarantees exactly one terminal outcome for the
/// work item and releases the work gate exactly once on every exit path,
/// including drop-without-close.
pub struct IngestSession {
    resolver: Arc<dyn WindowResolver>,
    gate: Arc<WorkGate>,
    cursor: ChunkCursor,
    header_decoder: HeaderDecoder,
    entry_decoder: EntryDecoder,
    indexes: EntryIndexes,
    window: Option<Arc<AggregationWindow>>,
    work_id: Option<u64>,
    gate_held: bool,
    started_at: Option<SystemTime>,
    errored: bool,
}

impl IngestSession {
    pub fn new(
        resolver: Arc<dyn WindowResolver>,
        gate: Arc<WorkGate>,
        config: &IngestConfig,
    ) -> Self {
        Self {
            resolver,
            gate,
            cursor: ChunkCursor::new(),
            header_decoder: HeaderDecoder::new(config.max_header_bytes),
            entry_decoder: EntryDecoder::new(config.max_entry_bytes),
            indexes: EntryIndexes::new(),
            window: None,
            work_id: None,
            gate_held: false,
            started_at: None,
            errored: false,
        }
    }

    /// The work id this session is ingesting, once the header has parsed.
    pub fn work_id(&self) -> Option<u64> {
        self.work_id
    }

    /// Consumes one transport chunk, advancing the decoders as far as the
    /// buffered bytes allow. Running out of bytes mid-field is not an error;
    /// the session resumes on the next chunk.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<(), IngestError> {
        if self.errored {
            return Err(IngestError::AlreadyFailed);
        }
        if self.started_at.is_none() {
            self.started_at = Some(SystemTime::now());
        }
        self.cursor.push_chunk(chunk);

        match self.process() {
            Ok(()) => Ok(()),
            Err(err) => {
                self.fail(&err);
                Err(err)
            }
        }
    }

    fn process(&mut self) -> Result<(), IngestError> {
        if self.window.is_none() {
            match self.header_decoder.decode(&mut self.cursor)? {
                Step::Incomplete => return Ok(()),
                Step::Ready(()) => self.on_header_parsed()?,
            }
        }

        while self.cursor.available() > 0 {
            match self.entry_decoder.decode(&mut self.cursor)? {
                Step::Incomplete => break,
                Step::Ready(()) => {
                    let Some(entry) = self.entry_decoder.take() else {
                        break;
                    };
                    self.entry_decoder.reset();

                    if let Some(indexed) = &entry.indexed_data {
                        self.indexes.update(indexed);
                    }
                    let (window, work_id) = self.window_and_id()?;
                    window.record_entry(work_id, &entry, &self.indexes)?;
                }
            }
        }
        Ok(())
    }

    fn on_header_parsed(&mut self) -> Result<(), IngestError> {
        let (work_id, recorder_version) = match self.header_decoder.header() {
            Some(header) => match &header.work_assignment {
                Some(assignment) => (assignment.work_id, header.recorder_version),
                None => return Err(IngestError::MissingWorkAssignment),
            },
            None => return Err(IngestError::MissingWorkAssignment),
        };

        self.gate
            .acquire(work_id)
            .map_err(|_| IngestError::DuplicateSubmission { work_id })?;
        self.gate_held = true;
        self.work_id = Some(work_id);

        let window = self
            .resolver
            .resolve(work_id)
            .ok_or(IngestError::UnknownWorkId { work_id })?;

        let started_at = self.started_at.unwrap_or_else(SystemTime::now);
        window.start_work(work_id, recorder_version, started_at)?;
        info!(work_id, recorder_version, "profile ingestion started");

        self.window = Some(window);
        Ok(())
    }

    fn window_and_id(&self) -> Result<(Arc<AggregationWindow>, u64), IngestError> {
        match (&self.window, self.work_id) {
            (Some(window), Some(work_id)) => Ok((Arc::clone(window), work_id)),
            _ => Err(IngestError::AlreadyFailed),
        }
    }

    fn fail(&mut self, err: &IngestError) {
        self.errored = true;
        warn!(work_id = ?self.work_id, error = %err, "profile ingestion failed");
        self.release_gate();
    }

    fn release_gate(&mut self) {
        if self.gate_held {
            if let Some(work_id) = self.work_id {
                self.gate.release(work_id);
            }
            self.gate_held = false;
        }
    }

    /// Finishes the session once the transport signals end-of-input.
    ///
    /// A clean close (header parsed, no entry mid-decode, no buffered bytes)
    /// completes the work item. A session that failed earlier aborts it. An
    /// incomplete tail abandons the item as partial and reports
    /// [`IngestError::IncompletePayload`].
    pub fn close(mut self) -> Result<(), IngestError> {
        // The gate is released by the drop hook as `self` leaves scope.
        self.finish()
    }

    fn finish(&mut self) -> Result<(), IngestError> {
        let Some(window) = self.window.take() else {
            if self.errored {
                // The terminal failure already surfaced from feed().
                return Ok(());
            }
            return Err(IngestError::IncompletePayload);
        };
        let Some(work_id) = self.work_id else {
            return Err(IngestError::AlreadyFailed);
        };

        if self.errored {
            // Corrupt or conflicted mid-stream; the failure already
            // surfaced. Ignore a transition rejection here: the item may
            // have reached a terminal status through the expiry sweep.
            if let Err(err) = window.abort_work(work_id) {
                warn!(work_id, error = %err, "could not abort failed profile");
            }
            return Ok(());
        }

        let clean = self.entry_decoder.at_envelope_boundary() && self.cursor.available() == 0;
        if clean {
            let status = window.complete_work(work_id)?;
            info!(work_id, ?status, "profile ingestion committed");
            Ok(())
        } else {
            window.abandon_work(work_id)?;
            warn!(work_id, "profile abandoned with incomplete payload");
            Err(IngestError::IncompletePayload)
        }
    }
}

impl Drop for IngestSession {
    fn drop(&mut self) {
        self.release_gate();
    }
}
