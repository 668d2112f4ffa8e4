//! Per-work-id mutual exclusion for ingest sessions.

use dashmap::DashMap;
use thiserror::Error;
use tracing::debug;

/// A second session is already ingesting this work id.
#[derive(Error, Debug)]
#[error("work id {work_id} is already being ingested by another session")]
pub struct GateBusy {
    pub work_id: u64,
}

/// Reject-don't-queue exclusion: at most one session may hold a work id at a
/// time. A conflicting acquire fails immediately — duplicate submissions are
/// an error, never queued.
#[derive(Default)]
pub struct WorkGate {
    active: DashMap<u64, ()>,
}

impl WorkGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims `work_id` for the calling session.
    pub fn acquire(&self, work_id: u64) -> Result<(), GateBusy> {
        match self.active.entry(work_id) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(GateBusy { work_id }),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(());
                debug!(work_id, "work gate acquired");
                Ok(())
            }
        }
    }

    /// Releases `work_id`. Releasing an id that is not held is a no-op.
    pub fn release(&self, work_id: u64) {
        self.active.remove(&work_id);
        debug!(work_id, "work gate released");
    }

    pub fn is_active(&self, work_id: u64) -> bool {
        self.active.contains_key(&work_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_release_cycle() {
        let gate = WorkGate::new();
        gate.acquire(1).unwrap();
        assert!(gate.is_active(1));

        gate.release(1);
        assert!(!gate.is_active(1));
        gate.acquire(1).unwrap();
    }

    #[test]
    fn test_conflicting_acquire_rejected() {
        let gate = WorkGate::new();
        gate.acquire(1).unwrap();

        let err = gate.acquire(1).unwrap_err();
        assert_eq!(err.work_id, 1);
        // The holder is unaffected.
        assert!(gate.is_active(1));
    }

    #[test]
    fn test_distinct_ids_independent() {
        let gate = WorkGate::new();
        gate.acquire(1).unwrap();
        gate.acquire(2).unwrap();
        gate.release(1);
        assert!(!gate.is_active(1));
        assert!(gate.is_active(2));
    }

    #[test]
    fn test_concurrent_acquire_exactly_one_winner() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;
        use std::thread;

        let gate = Arc::new(WorkGate::new());
        let wins = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();

        for _ in 0..8 {
            let gate = Arc::clone(&gate);
            let wins = Arc::clone(&wins);
            handles.push(thread::spawn(move || {
                if gate.acquire(42).is_ok() {
                    wins.fetch_add(1, Ordering::Relaxed);
                }
            }));
        }
        for h in handles {
            h.join().expect("thread panicked");
        }

        assert_eq!(wins.load(Ordering::Relaxed), 1);
    }
}
