//! Work-id → active-window lookup.
//!
//! The scheduling layer registers each new window under all of its scheduled
//! work ids at window-open; the expiry path de-associates them. Sessions
//! resolve the work id from a parsed header to the owning window through
//! this table.

use std::sync::Arc;

use dashmap::DashMap;
use thiserror::Error;
use tracing::debug;

use super::window::AggregationWindow;

#[derive(Error, Debug)]
#[error("work id {work_id} is already associated with an active aggregation window")]
pub struct AlreadyAssociated {
    pub work_id: u64,
}

/// Concurrent work-id → window table.
#[derive(Default)]
pub struct WindowStore {
    windows: DashMap<u64, Arc<AggregationWindow>>,
}

impl WindowStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `window` under every one of its scheduled work ids.
    ///
    /// Fails without touching the table further if any id is already taken;
    /// overlapping windows for the same work id are a scheduling bug.
    pub fn associate(&self, window: Arc<AggregationWindow>) -> Result<(), AlreadyAssociated> {
        for work_id in window.work_ids() {
            match self.windows.entry(work_id) {
                dashmap::mapref::entry::Entry::Occupied(_) => {
                    return Err(AlreadyAssociated { work_id });
                }
                dashmap::mapref::entry::Entry::Vacant(slot) => {
                    slot.insert(Arc::clone(&window));
                }
            }
        }
        debug!(
            app_id = %window.app_id(),
            proc_id = %window.proc_id(),
            work_ids = window.work_ids().len(),
            "aggregation window associated"
        );
        Ok(())
    }

    /// Drops the association for the given work ids. Ids not present are
    /// ignored.
    pub fn deassociate(&self, work_ids: &[u64]) {
        for work_id in work_ids {
            self.windows.remove(work_id);
        }
    }

    /// The window currently associated with `work_id`, if any.
    pub fn resolve(&self, work_id: u64) -> Option<Arc<AggregationWindow>> {
        self.windows.get(&work_id).map(|w| Arc::clone(&w))
    }

    /// Number of associated work ids (not windows).
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, SystemTime};

    use super::*;

    fn window(work_ids: &[u64]) -> Arc<AggregationWindow> {
        Arc::new(AggregationWindow::new(
            "app1",
            "cluster1",
            "proc1",
            SystemTime::UNIX_EPOCH,
            Duration::from_secs(1200),
            Duration::from_secs(120),
            work_ids,
        ))
    }

    #[test]
    fn test_associate_and_resolve() {
        let store = WindowStore::new();
        let win = window(&[1, 2]);
        store.associate(Arc::clone(&win)).unwrap();

        assert!(Arc::ptr_eq(&store.resolve(1).expect("1 resolves"), &win));
        assert!(Arc::ptr_eq(&store.resolve(2).expect("2 resolves"), &win));
        assert!(store.resolve(3).is_none());
    }

    #[test]
    fn test_associate_conflict() {
        let store = WindowStore::new();
        store.associate(window(&[1])).unwrap();

        let err = store.associate(window(&[1])).unwrap_err();
        assert_eq!(err.work_id, 1);
    }

    #[test]
    fn test_deassociate() {
        let store = WindowStore::new();
        store.associate(window(&[1, 2])).unwrap();

        store.deassociate(&[1, 2, 99]);
        assert!(store.resolve(1).is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_expire_deassociates() {
        let store = WindowStore::new();
        let win = window(&[1, 2]);
        store.associate(Arc::clone(&win)).unwrap();

        win.expire(&store);
        assert!(store.resolve(1).is_none());
        assert!(store.resolve(2).is_none());
    }
}
