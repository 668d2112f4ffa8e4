//! Work-item lifecycle tracking.
//!
//! Every scheduled recording moves through a small status machine:
//!
//! ```text
//! SCHEDULED --start--> ONGOING --complete--> COMPLETED
//!                         |    \--abandon--> PARTIAL --start--> ONGOING_PARTIAL
//!                         \-------abort----> ABORTED                |
//!                                                   complete -> RETRIED
//!                                                   abandon  -> PARTIAL
//!                                                   abort    -> ABORTED
//! ```
//!
//! COMPLETED, RETRIED and ABORTED are terminal. An event a status cannot
//! accept is a logic error in the caller, not a protocol outcome.

use std::collections::{HashMap, HashSet};
use std::time::SystemTime;

use crate::wire::proto::{TraceRecord, WorkKind};

/// Lifecycle status of one scheduled recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkStatus {
    Scheduled,
    Ongoing,
    OngoingPartial,
    Completed,
    Partial,
    Retried,
    Aborted,
}

/// Lifecycle events applied by sessions and the expiry sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkEvent {
    Start,
    Complete,
    Abandon,
    Abort,
}

impl WorkStatus {
    /// The status reached by applying `event`, or `None` when the machine
    /// forbids the transition.
    pub fn apply(self, event: WorkEvent) -> Option<WorkStatus> {
        use WorkEvent::*;
        use WorkStatus::*;
        match (self, event) {
            (Scheduled, Start) => Some(Ongoing),
            (Partial, Start) => Some(OngoingPartial),
            (Ongoing, Complete) => Some(Completed),
            (Ongoing, Abandon) => Some(Partial),
            (Ongoing, Abort) => Some(Aborted),
            (OngoingPartial, Complete) => Some(Retried),
            (OngoingPartial, Abandon) => Some(Partial),
            (OngoingPartial, Abort) => Some(Aborted),
            _ => None,
        }
    }

    /// Terminal statuses accept no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            WorkStatus::Completed | WorkStatus::Retried | WorkStatus::Aborted
        )
    }

    /// A session is actively receiving data for this item.
    pub fn is_active(self) -> bool {
        matches!(self, WorkStatus::Ongoing | WorkStatus::OngoingPartial)
    }
}

/// Mutable per-work-id record inside a window's status table.
///
/// Mutation happens only while the owning session holds the work gate (or
/// from the expiry sweep), so the surrounding concurrent map entry is the
/// only guard needed.
#[derive(Debug)]
pub struct WorkItem {
    status: WorkStatus,
    recorder_version: Option<u32>,
    started_at: Option<SystemTime>,
    ended_at: Option<SystemTime>,
    trace_coverage: HashMap<String, u32>,
    work_kinds: HashSet<WorkKind>,
    sample_counts: HashMap<WorkKind, u64>,
}

impl WorkItem {
    pub(crate) fn new() -> Self {
        Self {
            status: WorkStatus::Scheduled,
            recorder_version: None,
            started_at: None,
            ended_at: None,
            trace_coverage: HashMap::new(),
            work_kinds: HashSet::new(),
            sample_counts: HashMap::new(),
        }
    }

    pub fn status(&self) -> WorkStatus {
        self.status
    }

    /// Applies a lifecycle event, stamping start/end times as appropriate.
    pub(crate) fn apply_event(&mut self, event: WorkEvent, at: SystemTime) -> Option<WorkStatus> {
        let next = self.status.apply(event)?;
        match event {
            WorkEvent::Start => self.started_at = Some(at),
            WorkEvent::Complete | WorkEvent::Abandon | WorkEvent::Abort => {
                self.ended_at = Some(at);
            }
        }
        self.status = next;
        Some(next)
    }

    pub(crate) fn set_recorder_version(&mut self, version: u32) {
        self.recorder_version = Some(version);
    }

    /// Records one decoded entry's contribution: the work kind tag, the
    /// newly-indexed trace coverages and the merged sample count.
    pub(crate) fn record_entry(&mut self, kind: WorkKind, traces: &[TraceRecord], samples: u64) {
        self.work_kinds.insert(kind);
        for record in traces {
            self.trace_coverage
                .insert(record.trace_name.clone(), record.coverage_pct);
        }
        if samples > 0 {
            *self.sample_counts.entry(kind).or_insert(0) += samples;
        }
    }

    pub(crate) fn details(&self) -> WorkDetails {
        WorkDetails {
            status: self.status,
            recorder_version: self.recorder_version,
            started_at: self.started_at,
            ended_at: self.ended_at,
            trace_coverage: self.trace_coverage.clone(),
            work_kinds: self.work_kinds.clone(),
            sample_counts: self.sample_counts.clone(),
        }
    }
}

/// Read-only copy of one work item, for reporting collaborators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkDetails {
    pub status: WorkStatus,
    pub recorder_version: Option<u32>,
    pub started_at: Option<SystemTime>,
    pub ended_at: Option<SystemTime>,
    pub trace_coverage: HashMap<String, u32>,
    pub work_kinds: HashSet<WorkKind>,
    pub sample_counts: HashMap<WorkKind, u64>,
}

impl WorkDetails {
    /// Total samples across all work kinds.
    pub fn total_samples(&self) -> u64 {
        self.sample_counts.values().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        use WorkEvent::*;
        use WorkStatus::*;

        assert_eq!(Scheduled.apply(Start), Some(Ongoing));
        assert_eq!(Ongoing.apply(Complete), Some(Completed));
        assert_eq!(Ongoing.apply(Abandon), Some(Partial));
        assert_eq!(Ongoing.apply(Abort), Some(Aborted));
        assert_eq!(Partial.apply(Start), Some(OngoingPartial));
        assert_eq!(OngoingPartial.apply(Complete), Some(Retried));
        assert_eq!(OngoingPartial.apply(Abandon), Some(Partial));
        assert_eq!(OngoingPartial.apply(Abort), Some(Aborted));
    }

    #[test]
    fn test_terminal_states_accept_nothing() {
        use WorkEvent::*;
        use WorkStatus::*;

        for status in [Completed, Retried, Aborted] {
            assert!(status.is_terminal());
            for event in [Start, Complete, Abandon, Abort] {
                assert_eq!(status.apply(event), None, "{:?} accepted {:?}", status, event);
            }
        }
    }

    #[test]
    fn test_scheduled_rejects_non_start() {
        use WorkEvent::*;
        use WorkStatus::*;

        for event in [Complete, Abandon, Abort] {
            assert_eq!(Scheduled.apply(event), None);
        }
    }

    #[test]
    fn test_item_stamps_times() {
        let mut item = WorkItem::new();
        let t0 = SystemTime::UNIX_EPOCH;
        let t1 = t0 + std::time::Duration::from_secs(60);

        item.apply_event(WorkEvent::Start, t0);
        assert_eq!(item.status(), WorkStatus::Ongoing);
        item.apply_event(WorkEvent::Complete, t1);

        let details = item.details();
        assert_eq!(details.status, WorkStatus::Completed);
        assert_eq!(details.started_at, Some(t0));
        assert_eq!(details.ended_at, Some(t1));
    }

    #[test]
    fn test_invalid_event_leaves_item_untouched() {
        let mut item = WorkItem::new();
        assert_eq!(item.apply_event(WorkEvent::Complete, SystemTime::UNIX_EPOCH), None);
        assert_eq!(item.status(), WorkStatus::Scheduled);
        assert_eq!(item.details().ended_at, None);
    }

    #[test]
    fn test_record_entry_accumulates() {
        let mut item = WorkItem::new();
        let traces = vec![TraceRecord {
            trace_id: 1,
            trace_name: "t1".to_string(),
            coverage_pct: 5,
        }];

        item.record_entry(WorkKind::CpuSample, &traces, 3);
        item.record_entry(WorkKind::CpuSample, &[], 2);

        let details = item.details();
        assert_eq!(details.trace_coverage.get("t1"), Some(&5));
        assert!(details.work_kinds.contains(&WorkKind::CpuSample));
        assert_eq!(details.sample_counts.get(&WorkKind::CpuSample), Some(&5));
        assert_eq!(details.total_samples(), 5);
    }
}
