//! State - The Resolution State Tree
//!
//! A state tree is a single-rooted, acyclic hierarchy of named states.
//! Nodes live in an arena (`StateTree`) and are addressed by index, so a
//! child never holds a pointer to its parent; `State` is a cheap handle
//! pairing the shared arena with one index.
//!
//! ```text
//! ""                 (root, unnamed)
//! ├── pending
//! └── resolved       (potential root)
//!     ├── yes        resolver: affirm
//!     └── no         resolver: negate
//! ```

use std::fmt;
use std::sync::Arc;

/// Index of a node inside its [`StateTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StateId(pub(crate) usize);

impl StateId {
    /// The unnamed root of every tree.
    pub const ROOT: StateId = StateId(0);

    /// Raw arena index.
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug)]
pub(crate) struct StateNode {
    pub(crate) name: String,
    pub(crate) superstate: Option<StateId>,
    pub(crate) substates: Vec<StateId>,
    pub(crate) resolver: Option<String>,
    pub(crate) path: String,
}

/// Arena backing every [`State`] handle of one tree.
///
/// Built once while a potential is declared; immutable afterwards.
#[derive(Debug)]
pub struct StateTree {
    nodes: Vec<StateNode>,
}

impl StateTree {
    pub(crate) fn new() -> Self {
        StateTree {
            nodes: vec![StateNode {
                name: String::new(),
                superstate: None,
                substates: Vec::new(),
                resolver: None,
                path: String::new(),
            }],
        }
    }

    pub(crate) fn push(
        &mut self,
        superstate: StateId,
        name: &str,
        resolver: Option<String>,
    ) -> StateId {
        let id = StateId(self.nodes.len());
        let parent_path = &self.nodes[superstate.0].path;
        let path = if parent_path.is_empty() {
            name.to_string()
        } else {
            format!("{parent_path}.{name}")
        };
        self.nodes.push(StateNode {
            name: name.to_string(),
            superstate: Some(superstate),
            substates: Vec::new(),
            resolver,
            path,
        });
        self.nodes[superstate.0].substates.push(id);
        id
    }

    pub(crate) fn node(&self, id: StateId) -> &StateNode {
        &self.nodes[id.0]
    }

    pub(crate) fn child(&self, id: StateId, name: &str) -> Option<StateId> {
        self.node(id)
            .substates
            .iter()
            .copied()
            .find(|child| self.node(*child).name == name)
    }
}

/// Handle to one state of a shared [`StateTree`].
#[derive(Clone)]
pub struct State {
    tree: Arc<StateTree>,
    id: StateId,
}

impl State {
    pub(crate) fn new(tree: Arc<StateTree>, id: StateId) -> Self {
        State { tree, id }
    }

    fn node(&self) -> &StateNode {
        self.tree.node(self.id)
    }

    fn at(&self, id: StateId) -> State {
        State::new(Arc::clone(&self.tree), id)
    }

    /// Arena index of this state.
    pub fn id(&self) -> StateId {
        self.id
    }

    /// Local name; empty for the root.
    pub fn name(&self) -> &str {
        &self.node().name
    }

    /// Dot-joined ancestry from the root, e.g. `resolved.yes`.
    pub fn path(&self) -> &str {
        &self.node().path
    }

    /// Verb that transitions a deferral into this state, if any.
    pub fn resolver_name(&self) -> Option<&str> {
        self.node().resolver.as_deref()
    }

    pub fn is_root(&self) -> bool {
        self.node().superstate.is_none()
    }

    pub fn superstate(&self) -> Option<State> {
        self.node().superstate.map(|id| self.at(id))
    }

    /// Direct children in declaration order.
    pub fn substates(&self) -> impl Iterator<Item = State> + '_ {
        self.node().substates.iter().map(|id| self.at(*id))
    }

    pub fn has_substates(&self) -> bool {
        !self.node().substates.is_empty()
    }

    /// Number of edges between this state and the root.
    pub fn depth(&self) -> usize {
        let mut depth = 0;
        let mut cursor = self.node().superstate;
        while let Some(id) = cursor {
            depth += 1;
            cursor = self.tree.node(id).superstate;
        }
        depth
    }

    /// Descend along a dot-separated path relative to this state.
    ///
    /// An empty path names `self`. Returns `None` if any segment is missing.
    pub fn substate(&self, path: &str) -> Option<State> {
        if path.is_empty() {
            return Some(self.clone());
        }
        let mut cursor = self.id;
        for segment in path.split('.') {
            cursor = self.tree.child(cursor, segment)?;
        }
        Some(self.at(cursor))
    }

    /// Ancestor chain ordered from the root down to `self`.
    ///
    /// When `stop_at` is an ancestor of `self`, the chain is truncated so that it
    /// starts just below `stop_at`.
    pub fn derivation(&self, stop_at: Option<&State>) -> Vec<State> {
        let stop = stop_at
            .filter(|s| Arc::ptr_eq(&s.tree, &self.tree))
            .map(|s| s.id);
        let mut chain = Vec::with_capacity(self.depth() + 1);
        let mut cursor = Some(self.id);
        while let Some(id) = cursor {
            if Some(id) == stop {
                break;
            }
            chain.push(self.at(id));
            cursor = self.tree.node(id).superstate;
        }
        chain.reverse();
        chain
    }

    /// True if `other` lies strictly below `self` in the same tree.
    pub fn is_superstate_of(&self, other: &State) -> bool {
        if !self.same_tree(other) {
            return false;
        }
        let mut cursor = other.node().superstate;
        while let Some(id) = cursor {
            if id == self.id {
                return true;
            }
            cursor = self.tree.node(id).superstate;
        }
        false
    }

    pub fn is_or_is_superstate_of(&self, other: &State) -> bool {
        self == other || self.is_superstate_of(other)
    }

    /// True if both handles point into the same arena.
    pub fn same_tree(&self, other: &State) -> bool {
        Arc::ptr_eq(&self.tree, &other.tree)
    }
}

impl PartialEq for State {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.same_tree(other)
    }
}

impl Eq for State {}

impl fmt::Debug for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("State").field(&self.path()).finish()
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}
