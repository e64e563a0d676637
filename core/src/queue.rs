//! CallbackQueueTree - per-deferral callback storage
//!
//! Two trees, one per dispatch phase, mirror the shape of the state tree.
//! Nodes are created lazily on first registration and memoized by full path.
//!
//! * **capture** queues run while the walk narrows from the potential root
//!   toward the resolved state;
//! * **bubble** queues run on the way back up, after every more specific
//!   handler has run.

use crate::callback::Callback;
use ahash::AHashMap;
use fate_flow::State;
use std::fmt;

/// Dispatch phase a callback is queued for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Capture,
    Bubble,
}

struct QueueNode<A> {
    callbacks: Vec<Callback<A>>,
    children: AHashMap<String, usize>,
}

impl<A> QueueNode<A> {
    fn new() -> Self {
        QueueNode {
            callbacks: Vec::new(),
            children: AHashMap::new(),
        }
    }
}

/// One phase's tree. Slot 0 is the root; pruned slots become `None`.
struct QueueTree<A> {
    slots: Vec<Option<QueueNode<A>>>,
    cache: AHashMap<String, usize>,
}

impl<A> QueueTree<A> {
    fn new() -> Self {
        QueueTree {
            slots: vec![Some(QueueNode::new())],
            cache: AHashMap::new(),
        }
    }

    fn live(&self, index: usize) -> bool {
        matches!(self.slots.get(index), Some(Some(_)))
    }

    fn node_mut(&mut self, index: usize) -> &mut QueueNode<A> {
        self.slots[index].get_or_insert_with(QueueNode::new)
    }

    fn locate(&mut self, path: &str, create: bool) -> Option<usize> {
        if let Some(&index) = self.cache.get(path) {
            if self.live(index) {
                return Some(index);
            }
            self.cache.remove(path);
        }

        let mut cursor = 0;
        if !path.is_empty() {
            for segment in path.split('.') {
                let next = self.node_mut(cursor).children.get(segment).copied();
                cursor = match next {
                    Some(index) if self.live(index) => index,
                    _ if create => {
                        let index = self.slots.len();
                        self.slots.push(Some(QueueNode::new()));
                        self.node_mut(cursor).children.insert(segment.to_string(), index);
                        index
                    }
                    _ => return None,
                };
            }
        }
        self.cache.insert(path.to_string(), cursor);
        Some(cursor)
    }

    fn get(&mut self, path: &str) -> &mut Vec<Callback<A>> {
        let index = self.locate(path, true).unwrap_or(0);
        &mut self.node_mut(index).callbacks
    }

    fn take(&mut self, path: &str) -> Vec<Callback<A>> {
        match self.locate(path, false) {
            Some(index) => std::mem::take(&mut self.node_mut(index).callbacks),
            None => Vec::new(),
        }
    }

    fn len(&self) -> usize {
        self.slots
            .iter()
            .flatten()
            .map(|node| node.callbacks.len())
            .sum()
    }

    fn prune(&mut self, path: &str) {
        if path.is_empty() {
            *self = QueueTree::new();
            return;
        }
        let (parent_path, leaf) = match path.rsplit_once('.') {
            Some((parent, leaf)) => (parent, leaf),
            None => ("", path),
        };
        let Some(parent) = self.locate(parent_path, false) else {
            return;
        };
        let Some(branch) = self.node_mut(parent).children.remove(leaf) else {
            return;
        };
        let mut stack = vec![branch];
        while let Some(index) = stack.pop() {
            if let Some(node) = self.slots.get_mut(index).and_then(Option::take) {
                stack.extend(node.children.into_values());
            }
        }
        let prefix = format!("{path}.");
        self.cache
            .retain(|cached, _| cached != path && !cached.starts_with(&prefix));
    }
}

/// Capture and bubble queues for every state of one deferral.
pub struct CallbackQueueTree<A> {
    capture: QueueTree<A>,
    bubble: QueueTree<A>,
}

impl<A> CallbackQueueTree<A> {
    pub fn new() -> Self {
        CallbackQueueTree {
            capture: QueueTree::new(),
            bubble: QueueTree::new(),
        }
    }

    fn tree_mut(&mut self, phase: Phase) -> &mut QueueTree<A> {
        match phase {
            Phase::Capture => &mut self.capture,
            Phase::Bubble => &mut self.bubble,
        }
    }

    /// Mutable queue for `state` in `phase`, created on demand.
    pub fn get(&mut self, state: &State, phase: Phase) -> &mut Vec<Callback<A>> {
        self.tree_mut(phase).get(state.path())
    }

    /// Drain the queue for `state` in `phase`, leaving it empty.
    pub fn take(&mut self, state: &State, phase: Phase) -> Vec<Callback<A>> {
        self.tree_mut(phase).take(state.path())
    }

    /// Number of queued callbacks across both phases.
    pub fn len(&self) -> usize {
        self.capture.len() + self.bubble.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Discard every queue, or only the branch rooted at `state`'s superstate.
    pub fn empty(&mut self, state: Option<&State>) {
        let branch = state.map(|s| s.superstate().unwrap_or_else(|| s.clone()));
        match branch {
            None => {
                self.capture = QueueTree::new();
                self.bubble = QueueTree::new();
            }
            Some(branch) => {
                self.capture.prune(branch.path());
                self.bubble.prune(branch.path());
            }
        }
    }
}

impl<A> Default for CallbackQueueTree<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A> fmt::Debug for CallbackQueueTree<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackQueueTree")
            .field("capture", &self.capture.len())
            .field("bubble", &self.bubble.len())
            .finish()
    }
}
