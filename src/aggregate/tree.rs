//! Concurrently-extendable trie of call frames.
//!
//! Nodes live in an arena keyed by integer handle; a concurrent map from
//! `(parent, method_id, line_no)` to the child handle makes find-or-create a
//! single insert-if-absent, so two sessions walking the same path never
//! create duplicate siblings. Counters are plain atomics — increments from
//! different sessions interleave freely. Nodes are created lazily on first
//! traversal and never removed; counters only ever increase.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use dashmap::DashMap;

use super::interner::{GLOBAL_ROOT_METHOD_ID, UNCLASSIFIABLE_ROOT_METHOD_ID};

/// Arena index of a frame node.
pub type NodeHandle = u32;

/// Line number used for the synthetic root nodes.
const ROOT_LINE_NO: u32 = 0;

struct FrameNode {
    method_id: i32,
    line_no: u32,
    /// Samples where this frame appeared anywhere in the call chain.
    on_stack: AtomicU64,
    /// Samples where this frame was the innermost (executing) frame.
    on_cpu: AtomicU64,
}

impl FrameNode {
    fn new(method_id: i32, line_no: u32) -> Self {
        Self {
            method_id,
            line_no,
            on_stack: AtomicU64::new(0),
            on_cpu: AtomicU64::new(0),
        }
    }
}

/// One call tree with two permanent roots: the normal entry-point root and
/// the root for unclassifiable (truncated) stacks.
pub struct StacktraceTree {
    nodes: DashMap<NodeHandle, FrameNode>,
    children: DashMap<(NodeHandle, i32, u32), NodeHandle>,
    next_handle: AtomicU32,
    global_root: NodeHandle,
    unclassifiable_root: NodeHandle,
}

impl StacktraceTree {
    pub fn new() -> Self {
        let nodes = DashMap::new();
        let children = DashMap::new();

        let global_root: NodeHandle = 0;
        nodes.insert(
            global_root,
            FrameNode::new(GLOBAL_ROOT_METHOD_ID, ROOT_LINE_NO),
        );

        // The unclassifiable root is a permanent child of the global root.
        let unclassifiable_root: NodeHandle = 1;
        nodes.insert(
            unclassifiable_root,
            FrameNode::new(UNCLASSIFIABLE_ROOT_METHOD_ID, ROOT_LINE_NO),
        );
        children.insert(
            (global_root, UNCLASSIFIABLE_ROOT_METHOD_ID, ROOT_LINE_NO),
            unclassifiable_root,
        );

        Self {
            nodes,
            children,
            next_handle: AtomicU32::new(2),
            global_root,
            unclassifiable_root,
        }
    }

    pub fn global_root(&self) -> NodeHandle {
        self.global_root
    }

    pub fn unclassifiable_root(&self) -> NodeHandle {
        self.unclassifiable_root
    }

    /// Finds or creates the child of `parent` identified by
    /// `(method_id, line_no)`. Creation and lookup race safely: the child
    /// index entry is inserted exactly once and every caller observes the
    /// same handle.
    pub fn child_or_insert(&self, parent: NodeHandle, method_id: i32, line_no: u32) -> NodeHandle {
        let key = (parent, method_id, line_no);
        if let Some(handle) = self.children.get(&key) {
            return *handle;
        }
        *self.children.entry(key).or_insert_with(|| {
            let handle = self.next_handle.fetch_add(1, Ordering::Relaxed);
            self.nodes.insert(handle, FrameNode::new(method_id, line_no));
            handle
        })
    }

    pub fn record_on_stack(&self, handle: NodeHandle) {
        if let Some(node) = self.nodes.get(&handle) {
            node.on_stack.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_on_cpu(&self, handle: NodeHandle) {
        if let Some(node) = self.nodes.get(&handle) {
            node.on_cpu.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn on_stack(&self, handle: NodeHandle) -> u64 {
        self.nodes
            .get(&handle)
            .map(|n| n.on_stack.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn on_cpu(&self, handle: NodeHandle) -> u64 {
        self.nodes
            .get(&handle)
            .map(|n| n.on_cpu.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Total nodes in the arena, roots included.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Point-in-time copy of the whole tree, with child lists rebuilt from
    /// the child index.
    pub fn snapshot(&self) -> TreeSnapshot {
        let len = self.next_handle.load(Ordering::Relaxed) as usize;
        let mut nodes: Vec<FrameNodeSnapshot> = (0..len)
            .map(|_| FrameNodeSnapshot::default())
            .collect();

        for entry in self.nodes.iter() {
            let handle = *entry.key() as usize;
            if let Some(slot) = nodes.get_mut(handle) {
                slot.method_id = entry.value().method_id;
                slot.line_no = entry.value().line_no;
                slot.on_stack = entry.value().on_stack.load(Ordering::Relaxed);
                slot.on_cpu = entry.value().on_cpu.load(Ordering::Relaxed);
            }
        }

        for entry in self.children.iter() {
            let (parent, _, _) = *entry.key();
            if let Some(slot) = nodes.get_mut(parent as usize) {
                slot.children.push(*entry.value());
            }
        }
        for node in &mut nodes {
            node.children.sort_unstable();
        }

        TreeSnapshot {
            nodes,
            global_root: self.global_root,
            unclassifiable_root: self.unclassifiable_root,
        }
    }
}

impl Default for StacktraceTree {
    fn default() -> Self {
        Self::new()
    }
}

/// Immutable copy of one tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeSnapshot {
    pub nodes: Vec<FrameNodeSnapshot>,
    pub global_root: NodeHandle,
    pub unclassifiable_root: NodeHandle,
}

impl TreeSnapshot {
    /// The child of `parent` keyed by `(method_id, line_no)`, if present.
    pub fn child_of(&self, parent: NodeHandle, method_id: i32, line_no: u32) -> Option<NodeHandle> {
        let node = self.nodes.get(parent as usize)?;
        node.children.iter().copied().find(|&c| {
            self.nodes
                .get(c as usize)
                .is_some_and(|n| n.method_id == method_id && n.line_no == line_no)
        })
    }

    pub fn node(&self, handle: NodeHandle) -> Option<&FrameNodeSnapshot> {
        self.nodes.get(handle as usize)
    }
}

/// Immutable copy of one frame node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameNodeSnapshot {
    pub method_id: i32,
    pub line_no: u32,
    pub on_stack: u64,
    pub on_cpu: u64,
    pub children: Vec<NodeHandle>,
}
