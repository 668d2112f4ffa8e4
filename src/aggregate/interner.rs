//! Method-signature interning.
//!
//! Tree nodes store a small dense integer id instead of the full method
//! signature. Ids are assigned by an atomically-incrementing counter scoped
//! to the owning window; a signature maps to exactly one id for the window's
//! lifetime, and ids are never reused. Two negative sentinel ids sit outside
//! the counter's range: the synthetic global root of all stacks, and the
//! synthetic root for stacks that cannot be classified to a known entry
//! point.

use std::sync::atomic::{AtomicI32, Ordering};

use dashmap::DashMap;

/// Sentinel id for the synthetic root all stacks hang off.
pub const GLOBAL_ROOT_METHOD_ID: i32 = -1;
pub const GLOBAL_ROOT_SIGNATURE: &str = "~ ROOT ~.()";

/// Sentinel id for the synthetic root of unclassifiable (truncated) stacks.
pub const UNCLASSIFIABLE_ROOT_METHOD_ID: i32 = -2;
pub const UNCLASSIFIABLE_ROOT_SIGNATURE: &str = "~ UNCLASSIFIABLE ~.()";

/// Append-only signature ↔ id table, safe for concurrent get-or-add.
pub struct MethodInterner {
    lookup: DashMap<String, i32>,
    counter: AtomicI32,
}

impl MethodInterner {
    pub fn new() -> Self {
        let lookup = DashMap::new();
        lookup.insert(GLOBAL_ROOT_SIGNATURE.to_string(), GLOBAL_ROOT_METHOD_ID);
        lookup.insert(
            UNCLASSIFIABLE_ROOT_SIGNATURE.to_string(),
            UNCLASSIFIABLE_ROOT_METHOD_ID,
        );
        Self {
            lookup,
            counter: AtomicI32::new(0),
        }
    }

    /// Returns the id for `signature`, assigning the next dense id on first
    /// sight. Get-or-add is a single insert-if-absent: concurrent callers
    /// always observe the same id for the same signature.
    pub fn get_or_add(&self, signature: &str) -> i32 {
        if let Some(id) = self.lookup.get(signature) {
            return *id;
        }
        *self
            .lookup
            .entry(signature.to_string())
            .or_insert_with(|| self.counter.fetch_add(1, Ordering::Relaxed))
    }

    /// Looks up a signature without interning it.
    pub fn get(&self, signature: &str) -> Option<i32> {
        self.lookup.get(signature).map(|id| *id)
    }

    /// Number of interned signatures, sentinels excluded.
    pub fn len(&self) -> usize {
        self.counter.load(Ordering::Relaxed) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Dense reverse table where index = id; sentinels are excluded.
    ///
    /// The atomic counter guarantees ids are dense, so the reverse mapping
    /// is an array rather than a map.
    pub fn reverse_lookup(&self) -> Vec<String> {
        let len = self.len();
        let mut out = vec![String::new(); len];
        for entry in self.lookup.iter() {
            let id = *entry.value();
            if id >= 0 {
                if let Some(slot) = out.get_mut(id as usize) {
                    *slot = entry.key().clone();
                }
            }
        }
        out
    }
}

impl Default for MethodInterner {
    fn default() -> Self {
        Self::new()
    }
}
