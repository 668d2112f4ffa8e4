//! Per-work-type aggregation buckets and the entry merge walk.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

use super::interner::MethodInterner;
use super::tree::{StacktraceTree, TreeSnapshot};
use super::AggregationError;
use crate::wire::proto::{IndexedData, StackSampleBatch};

/// Session-scoped mapping from entry-local ids to names.
///
/// Each entry's indexed data introduces the names for ids first referenced
/// by that entry; later entries from the same session reuse them. The ids
/// themselves never leave the session — the tree only ever sees
/// window-global interned ids.
#[derive(Debug, Default)]
pub struct EntryIndexes {
    methods: HashMap<u64, String>,
    traces: HashMap<u32, String>,
}

impl EntryIndexes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Absorbs one entry's incremental index.
    pub fn update(&mut self, indexed: &IndexedData) {
        for record in &indexed.method_records {
            self.methods
                .insert(record.method_id, record.qualified_signature());
        }
        for record in &indexed.trace_records {
            self.traces
                .insert(record.trace_id, record.trace_name.clone());
        }
    }

    pub fn method_signature(&self, method_id: u64) -> Option<&str> {
        self.methods.get(&method_id).map(String::as_str)
    }

    pub fn trace_name(&self, trace_id: u32) -> Option<&str> {
        self.traces.get(&trace_id).map(String::as_str)
    }
}

/// Aggregated state for one trace context: a call tree plus a sample count.
pub struct TraceDetail {
    samples: AtomicU64,
    tree: StacktraceTree,
}

impl TraceDetail {
    fn new() -> Self {
        Self {
            samples: AtomicU64::new(0),
            tree: StacktraceTree::new(),
        }
    }

    pub fn samples(&self) -> u64 {
        self.samples.load(Ordering::Relaxed)
    }

    pub fn tree(&self) -> &StacktraceTree {
        &self.tree
    }
}

/// Immutable copy of one trace context's aggregated state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceSnapshot {
    pub samples: u64,
    pub tree: TreeSnapshot,
}

/// Aggregation bucket for cpu-sample work.
///
/// Trace details are created on first use and shared across sessions; the
/// merge walk itself only touches concurrent structures, so sessions for the
/// same process proceed without any bucket-wide lock.
pub struct CpuSampleBucket {
    traces: DashMap<String, Arc<TraceDetail>>,
}

impl CpuSampleBucket {
    pub fn new() -> Self {
        Self {
            traces: DashMap::new(),
        }
    }

    fn trace_detail(&self, trace_name: &str) -> Arc<TraceDetail> {
        if let Some(detail) = self.traces.get(trace_name) {
            return Arc::clone(&detail);
        }
        Arc::clone(
            &self
                .traces
                .entry(trace_name.to_string())
                .or_insert_with(|| Arc::new(TraceDetail::new())),
        )
    }

    /// Merges one entry's stack samples into the bucket.
    ///
    /// Frames arrive ordered entry point → currently-executing; the walk
    /// descends from the selected root in that order, bumping each node's
    /// on-stack counter and the final leaf's on-cpu counter. A sample whose
    /// stack was snipped by the recorder hangs off the unclassifiable root.
    /// Returns the number of samples merged (empty-frame samples are
    /// skipped).
    pub fn aggregate(
        &self,
        batch: &StackSampleBatch,
        indexes: &EntryIndexes,
        interner: &MethodInterner,
    ) -> Result<u64, AggregationError> {
        let mut merged = 0u64;

        for sample in &batch.samples {
            let trace_name = indexes.trace_name(sample.trace_id).ok_or(
                AggregationError::UnknownTraceId {
                    trace_id: sample.trace_id,
                },
            )?;
            if sample.frames.is_empty() {
                continue;
            }

            let detail = self.trace_detail(trace_name);
            let tree = detail.tree();
            let mut node = if sample.snipped {
                tree.unclassifiable_root()
            } else {
                tree.global_root()
            };

            for frame in &sample.frames {
                let signature = indexes.method_signature(frame.method_id).ok_or(
                    AggregationError::UnknownMethodId {
                        method_id: frame.method_id,
                    },
                )?;
                let method_id = interner.get_or_add(signature);
                node = tree.child_or_insert(node, method_id, frame.line_no);
                tree.record_on_stack(node);
            }
            tree.record_on_cpu(node);

            detail.samples.fetch_add(1, Ordering::Relaxed);
            merged += 1;
        }

        Ok(merged)
    }

    /// The trace detail for `trace_name`, if any sample has referenced it.
    pub fn trace(&self, trace_name: &str) -> Option<Arc<TraceDetail>> {
        self.traces.get(trace_name).map(|d| Arc::clone(&d))
    }

    pub fn trace_names(&self) -> Vec<String> {
        self.traces.iter().map(|e| e.key().clone()).collect()
    }

    /// Point-in-time copy of every trace context.
    pub fn snapshot(&self) -> HashMap<String, TraceSnapshot> {
        self.traces
            .iter()
            .map(|entry| {
                (
                    entry.key().clone(),
                    TraceSnapshot {
                        samples: entry.value().samples(),
                        tree: entry.value().tree().snapshot(),
                    },
                )
            })
            .collect()
    }
}

impl Default for CpuSampleBucket {
    fn default() -> Self {
        Self::new()
    }
}
