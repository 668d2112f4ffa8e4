//! Recorder message shapes.
//!
//! The protocol carries exactly two top-level messages: the one-time
//! [`RecordingHeader`] and the repeated [`WorkStatusEntry`]. Both are
//! declared as hand-written prost derives; the envelope framing around them
//! (length prefixes, checksums) is not protobuf and lives in the decoders.
//!
//! Ids inside an entry (`method_id`, `trace_id`) are local to the uploading
//! session: each entry's [`IndexedData`] introduces the names for ids first
//! referenced by that entry, and later entries reuse them. Window-global ids
//! are assigned by the aggregation layer, never taken from the wire.

/// One-time stream preamble identifying the recorder and its assigned work.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RecordingHeader {
    #[prost(uint32, tag = "1")]
    pub recorder_version: u32,
    #[prost(uint32, tag = "2")]
    pub controller_version: u32,
    #[prost(uint32, tag = "3")]
    pub controller_id: u32,
    #[prost(message, optional, tag = "4")]
    pub work_assignment: Option<WorkAssignment>,
    #[prost(string, tag = "5")]
    pub work_description: String,
}

/// The scheduled recording this upload reports against.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct WorkAssignment {
    #[prost(uint64, tag = "1")]
    pub work_id: u64,
    #[prost(string, tag = "2")]
    pub issue_time: String,
    #[prost(uint32, tag = "3")]
    pub delay_secs: u32,
    #[prost(uint32, tag = "4")]
    pub duration_secs: u32,
}

/// One work-status entry: a self-contained batch of profiling data.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct WorkStatusEntry {
    #[prost(enumeration = "WorkKind", tag = "1")]
    pub work_kind: i32,
    #[prost(message, optional, tag = "2")]
    pub indexed_data: Option<IndexedData>,
    #[prost(message, optional, tag = "3")]
    pub cpu_sample_entry: Option<StackSampleBatch>,
}

impl WorkStatusEntry {
    /// The entry's work kind, or `None` for an unrecognized wire value.
    pub fn kind(&self) -> Option<WorkKind> {
        WorkKind::try_from(self.work_kind).ok()
    }
}

/// Kinds of scheduled recording work.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum WorkKind {
    CpuSample = 0,
    ThreadSample = 1,
    MonitorContention = 2,
    MonitorWait = 3,
}

/// Incremental name index: methods and trace contexts first referenced by
/// this entry.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct IndexedData {
    #[prost(message, repeated, tag = "1")]
    pub method_records: Vec<MethodRecord>,
    #[prost(message, repeated, tag = "2")]
    pub trace_records: Vec<TraceRecord>,
}

/// Maps an entry-local method id to its fully-qualified signature parts.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MethodRecord {
    #[prost(uint64, tag = "1")]
    pub method_id: u64,
    #[prost(string, tag = "2")]
    pub class_fqdn: String,
    #[prost(string, tag = "3")]
    pub method_name: String,
    #[prost(string, tag = "4")]
    pub signature: String,
}

impl MethodRecord {
    /// The interned form: `{class_fqdn}#{method_name} {signature}`.
    pub fn qualified_signature(&self) -> String {
        format!(
            "{}#{} {}",
            self.class_fqdn, self.method_name, self.signature
        )
    }
}

/// Maps an entry-local trace id to a trace-context name and its sampling
/// coverage percentage.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TraceRecord {
    #[prost(uint32, tag = "1")]
    pub trace_id: u32,
    #[prost(string, tag = "2")]
    pub trace_name: String,
    #[prost(uint32, tag = "3")]
    pub coverage_pct: u32,
}

/// Stack samples captured for cpu-sample work.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StackSampleBatch {
    #[prost(message, repeated, tag = "1")]
    pub samples: Vec<StackSample>,
}

/// One captured stack, frames ordered entry point → currently executing.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StackSample {
    #[prost(uint32, tag = "1")]
    pub start_offset_micros: u32,
    #[prost(uint64, tag = "2")]
    pub thread_id: u64,
    #[prost(message, repeated, tag = "3")]
    pub frames: Vec<Frame>,
    #[prost(uint32, tag = "4")]
    pub trace_id: u32,
    /// Set when the recorder truncated the stack; the outermost frame is
    /// then not the process entry point.
    #[prost(bool, tag = "5")]
    pub snipped: bool,
}

/// One call frame within a sample.
#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct Frame {
    #[prost(uint64, tag = "1")]
    pub method_id: u64,
    #[prost(uint32, tag = "2")]
    pub bci: u32,
    #[prost(uint32, tag = "3")]
    pub line_no: u32,
}
