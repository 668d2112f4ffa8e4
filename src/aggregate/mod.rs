//! Windowed aggregation of decoded profiling data.
//!
//! An [`AggregationWindow`] owns everything mutable for one bounded time
//! bucket of one process: the per-work-id status table, the method-name
//! interner and the per-work-type sample buckets. Many ingest sessions feed
//! the same window concurrently; all shared state here is either a
//! concurrent map or an atomic counter, and a finalized window rejects every
//! further write.

pub mod bucket;
pub mod interner;
pub mod store;
pub mod tree;
pub mod window;
pub mod work;

use thiserror::Error;

use crate::wire::proto::WorkKind;
use work::{WorkEvent, WorkStatus};

pub use bucket::{CpuSampleBucket, EntryIndexes, TraceSnapshot};
pub use interner::MethodInterner;
pub use store::WindowStore;
pub use tree::{StacktraceTree, TreeSnapshot};
pub use window::{AggregationWindow, FinalizedWindow};
pub use work::WorkDetails;

/// Failures raised while mutating an aggregation window.
#[derive(Error, Debug)]
pub enum AggregationError {
    /// The window has been finalized; its snapshot must stay stable.
    #[error("aggregation window is finalized, rejecting write")]
    Finalized,

    /// The work id was never scheduled into this window.
    #[error("work id {work_id} is not registered in this aggregation window")]
    UnknownWorkId { work_id: u64 },

    /// A stack sample referenced a trace id no index has introduced.
    #[error("stack sample references unknown trace id {trace_id}")]
    UnknownTraceId { trace_id: u32 },

    /// A stack frame referenced a method id no index has introduced.
    #[error("stack frame references unknown method id {method_id}")]
    UnknownMethodId { method_id: u64 },

    /// The entry's work kind has no aggregation bucket.
    #[error("no aggregation bucket for work kind {kind:?}")]
    UnsupportedWorkKind { kind: Option<WorkKind> },

    /// The caller requested a transition the status machine forbids.
    #[error("work id {work_id}: status {status:?} cannot accept {event:?}")]
    InvalidTransition {
        work_id: u64,
        status: WorkStatus,
        event: WorkEvent,
    },
}

impl AggregationError {
    /// True when the failure is attributable to the sender (a protocol
    /// violation or a submission against an expired window) rather than a
    /// caller logic error on this side.
    pub fn is_sender_fault(&self) -> bool {
        !matches!(self, AggregationError::InvalidTransition { .. })
    }
}
