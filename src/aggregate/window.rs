//! The aggregation window: one bounded time bucket for one process.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;
use std::time::{Duration, SystemTime};

use dashmap::DashMap;
use tracing::{debug, info, warn};

use super::bucket::{CpuSampleBucket, EntryIndexes, TraceSnapshot};
use super::interner::MethodInterner;
use super::store::WindowStore;
use super::work::{WorkDetails, WorkEvent, WorkItem, WorkStatus};
use super::AggregationError;
use crate::wire::proto::{WorkKind, WorkStatusEntry};

/// Aggregation state for one process over one bounded time bucket.
///
/// Constructed with the full set of scheduled work ids; every id starts as
/// SCHEDULED and is never removed. Many ingest sessions mutate the window
/// concurrently. After [`expire`](Self::expire) the window is finalized:
/// every write fails fast, reads stay available.
pub struct AggregationWindow {
    app_id: String,
    cluster_id: String,
    proc_id: String,
    started_at: SystemTime,
    duration: Duration,
    tolerance: Duration,
    ended_at: OnceLock<SystemTime>,
    work_items: DashMap<u64, WorkItem>,
    interner: MethodInterner,
    cpu_bucket: CpuSampleBucket,
    finalized: AtomicBool,
}

impl AggregationWindow {
    pub fn new(
        app_id: impl Into<String>,
        cluster_id: impl Into<String>,
        proc_id: impl Into<String>,
        started_at: SystemTime,
        duration: Duration,
        tolerance: Duration,
        work_ids: &[u64],
    ) -> Self {
        let work_items = DashMap::with_capacity(work_ids.len());
        for &work_id in work_ids {
            work_items.insert(work_id, WorkItem::new());
        }
        Self {
            app_id: app_id.into(),
            cluster_id: cluster_id.into(),
            proc_id: proc_id.into(),
            started_at,
            duration,
            tolerance,
            ended_at: OnceLock::new(),
            work_items,
            interner: MethodInterner::new(),
            cpu_bucket: CpuSampleBucket::new(),
            finalized: AtomicBool::new(false),
        }
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    pub fn cluster_id(&self) -> &str {
        &self.cluster_id
    }

    pub fn proc_id(&self) -> &str {
        &self.proc_id
    }

    pub fn started_at(&self) -> SystemTime {
        self.started_at
    }

    /// The instant after which the expiry scheduler should sweep this
    /// window: start + duration + tolerance.
    pub fn expires_at(&self) -> SystemTime {
        self.started_at + self.duration + self.tolerance
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized.load(Ordering::Acquire)
    }

    pub fn work_ids(&self) -> Vec<u64> {
        self.work_items.iter().map(|e| *e.key()).collect()
    }

    pub fn interner(&self) -> &MethodInterner {
        &self.interner
    }

    fn ensure_writable(&self) -> Result<(), AggregationError> {
        if self.is_finalized() {
            return Err(AggregationError::Finalized);
        }
        Ok(())
    }

    fn transition(
        &self,
        work_id: u64,
        event: WorkEvent,
        at: SystemTime,
    ) -> Result<WorkStatus, AggregationError> {
        self.ensure_writable()?;
        let mut item = self
            .work_items
            .get_mut(&work_id)
            .ok_or(AggregationError::UnknownWorkId { work_id })?;
        let status = item.status();
        item.apply_event(event, at)
            .ok_or(AggregationError::InvalidTransition {
                work_id,
                status,
                event,
            })
    }

    /// Marks the work item as receiving: first successful header parse for
    /// this work id (or a resubmission of a partial profile).
    pub fn start_work(
        &self,
        work_id: u64,
        recorder_version: u32,
        at: SystemTime,
    ) -> Result<WorkStatus, AggregationError> {
        let status = self.transition(work_id, WorkEvent::Start, at)?;
        if let Some(mut item) = self.work_items.get_mut(&work_id) {
            item.set_recorder_version(recorder_version);
        }
        debug!(work_id, ?status, "work item receiving");
        Ok(status)
    }

    /// Marks a cleanly-closed submission as completed (or retried, for a
    /// resubmitted partial profile).
    pub fn complete_work(&self, work_id: u64) -> Result<WorkStatus, AggregationError> {
        self.transition(work_id, WorkEvent::Complete, SystemTime::now())
    }

    /// Marks a submission whose transport ended mid-entry as partial.
    pub fn abandon_work(&self, work_id: u64) -> Result<WorkStatus, AggregationError> {
        self.transition(work_id, WorkEvent::Abandon, SystemTime::now())
    }

    /// Aborts a submission after a corrupt payload or a superseding
    /// resubmission.
    pub fn abort_work(&self, work_id: u64) -> Result<WorkStatus, AggregationError> {
        self.transition(work_id, WorkEvent::Abort, SystemTime::now())
    }

    /// Merges one decoded entry into the window: tags the work item, absorbs
    /// new trace coverages, and feeds stack samples through the interner
    /// into the owning bucket's trees.
    pub fn record_entry(
        &self,
        work_id: u64,
        entry: &WorkStatusEntry,
        indexes: &EntryIndexes,
    ) -> Result<(), AggregationError> {
        self.ensure_writable()?;
        if !self.work_items.contains_key(&work_id) {
            return Err(AggregationError::UnknownWorkId { work_id });
        }

        let kind = entry
            .kind()
            .ok_or(AggregationError::UnsupportedWorkKind { kind: None })?;

        let new_traces = entry
            .indexed_data
            .as_ref()
            .map(|indexed| indexed.trace_records.as_slice())
            .unwrap_or(&[]);

        let merged = match kind {
            WorkKind::CpuSample => {
                let batch = entry.cpu_sample_entry.as_ref().ok_or(
                    AggregationError::UnsupportedWorkKind { kind: Some(kind) },
                )?;
                self.cpu_bucket.aggregate(batch, indexes, &self.interner)?
            }
            _ => return Err(AggregationError::UnsupportedWorkKind { kind: Some(kind) }),
        };

        if let Some(mut item) = self.work_items.get_mut(&work_id) {
            item.record_entry(kind, new_traces, merged);
        }
        Ok(())
    }

    /// Read-only work item details; available for terminal items and after
    /// finalization.
    pub fn details_for(&self, work_id: u64) -> Option<WorkDetails> {
        self.work_items.get(&work_id).map(|item| item.details())
    }

    /// Point-in-time copy of one trace context's aggregated state.
    pub fn trace_snapshot(&self, trace_name: &str) -> Option<TraceSnapshot> {
        self.cpu_bucket.trace(trace_name).map(|detail| TraceSnapshot {
            samples: detail.samples(),
            tree: detail.tree().snapshot(),
        })
    }

    /// Aborts every work item a session is still receiving. Invoked by the
    /// expiry path; scheduled and terminal items are left untouched.
    pub fn abort_ongoing(&self) {
        let now = SystemTime::now();
        let mut aborted = 0usize;
        for mut entry in self.work_items.iter_mut() {
            if entry.value().status().is_active()
                && entry.value_mut().apply_event(WorkEvent::Abort, now).is_some()
            {
                aborted += 1;
            }
        }
        if aborted > 0 {
            warn!(
                app_id = %self.app_id,
                proc_id = %self.proc_id,
                aborted,
                "aborted in-flight profiles at window expiry"
            );
        }
    }

    /// Expires the window: aborts in-flight profiles, de-associates its work
    /// ids from `store`, flips the finalization barrier and returns the
    /// immutable snapshot. Later writes fail with
    /// [`AggregationError::Finalized`].
    pub fn expire(&self, store: &WindowStore) -> FinalizedWindow {
        self.abort_ongoing();
        store.deassociate(&self.work_ids());

        let ended_at = *self.ended_at.get_or_init(SystemTime::now);
        self.finalized.store(true, Ordering::Release);

        info!(
            app_id = %self.app_id,
            cluster_id = %self.cluster_id,
            proc_id = %self.proc_id,
            "aggregation window finalized"
        );

        FinalizedWindow {
            app_id: self.app_id.clone(),
            cluster_id: self.cluster_id.clone(),
            proc_id: self.proc_id.clone(),
            started_at: self.started_at,
            ended_at,
            duration: self.duration,
            work: self
                .work_items
                .iter()
                .map(|e| (*e.key(), e.value().details()))
                .collect(),
            methods: self.interner.reverse_lookup(),
            traces: self.cpu_bucket.snapshot(),
        }
    }
}

/// Immutable snapshot of an expired window, handed to the serialization and
/// reporting collaborators.
#[derive(Debug, Clone)]
pub struct FinalizedWindow {
    pub app_id: String,
    pub cluster_id: String,
    pub proc_id: String,
    pub started_at: SystemTime,
    pub ended_at: SystemTime,
    pub duration: Duration,
    pub work: HashMap<u64, WorkDetails>,
    /// Dense reverse method lookup: index = interned id.
    pub methods: Vec<String>,
    pub traces: HashMap<String, TraceSnapshot>,
}
