//! Potential - Declared Resolution Shapes
//!
//! A `Potential` is the `resolved` subtree of a state tree: the set of
//! terminal outcomes a deferral may land in. It is immutable and shared by
//! every deferral of the same shape.
//!
//! # Example
//! ```rust
//! use fate_flow::{Potential, StateSpec};
//!
//! let outcome = Potential::new([
//!     ("yes", StateSpec::resolvable("affirm", [("partial", StateSpec::resolver("partially"))])),
//!     ("no", StateSpec::resolver("negate")),
//! ])
//! .unwrap();
//!
//! assert_eq!(outcome.resolver("partially").unwrap().path(), "resolved.yes.partial");
//! ```

use crate::error::FlowError;
use crate::state::{State, StateId, StateTree};
use ahash::AHashMap;
use serde_json::Value;
use std::fmt;
use std::sync::{Arc, LazyLock};

const RESOLVED: &str = "resolved";
const PENDING: &str = "pending";

static BINARY: LazyLock<Potential> = LazyLock::new(|| {
    Potential::new([
        ("yes", StateSpec::resolver("affirm")),
        ("no", StateSpec::resolver("negate")),
    ])
    .unwrap_or_else(|e| unreachable!("binary potential is well-formed: {e}"))
});

/// Declarative shape of one state inside a potential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateSpec {
    /// A state with no children and no resolver of its own.
    Plain,
    /// A leaf reachable through the named resolver verb.
    Resolver(String),
    /// An interior state; only its descendants carry resolvers.
    Branch(Vec<(String, StateSpec)>),
    /// An interior state that is itself resolvable as well as its children.
    Resolvable(String, Vec<(String, StateSpec)>),
}

impl StateSpec {
    pub fn resolver(name: impl Into<String>) -> Self {
        StateSpec::Resolver(name.into())
    }

    pub fn branch<I, K>(children: I) -> Self
    where
        I: IntoIterator<Item = (K, StateSpec)>,
        K: Into<String>,
    {
        StateSpec::Branch(collect_children(children))
    }

    pub fn resolvable<I, K>(resolver: impl Into<String>, children: I) -> Self
    where
        I: IntoIterator<Item = (K, StateSpec)>,
        K: Into<String>,
    {
        StateSpec::Resolvable(resolver.into(), collect_children(children))
    }

    /// Parse the JSON form of a state declaration.
    ///
    /// `null` → `Plain`, `"verb"` → `Resolver`, `{..}` → `Branch`,
    /// `["verb", {..}]` → `Resolvable`.
    pub fn from_json(value: &Value) -> Result<Self, FlowError> {
        match value {
            Value::Null => Ok(StateSpec::Plain),
            Value::String(verb) => Ok(StateSpec::Resolver(verb.clone())),
            Value::Object(map) => Ok(StateSpec::Branch(children_from_json(map)?)),
            Value::Array(pair) => match pair.as_slice() {
                [Value::String(verb), Value::Object(map)] => Ok(StateSpec::Resolvable(
                    verb.clone(),
                    children_from_json(map)?,
                )),
                _ => Err(FlowError::InvalidSpec(
                    "array declarations must be [resolverName, {children}]".to_string(),
                )),
            },
            other => Err(FlowError::InvalidSpec(format!(
                "unsupported state declaration: {other}"
            ))),
        }
    }

    fn resolver_name(&self) -> Option<&str> {
        match self {
            StateSpec::Resolver(verb) | StateSpec::Resolvable(verb, _) => Some(verb),
            StateSpec::Plain | StateSpec::Branch(_) => None,
        }
    }

    fn children(&self) -> &[(String, StateSpec)] {
        match self {
            StateSpec::Branch(children) | StateSpec::Resolvable(_, children) => children,
            StateSpec::Plain | StateSpec::Resolver(_) => &[],
        }
    }
}

fn collect_children<I, K>(children: I) -> Vec<(String, StateSpec)>
where
    I: IntoIterator<Item = (K, StateSpec)>,
    K: Into<String>,
{
    children
        .into_iter()
        .map(|(name, spec)| (name.into(), spec))
        .collect()
}

fn children_from_json(
    map: &serde_json::Map<String, Value>,
) -> Result<Vec<(String, StateSpec)>, FlowError> {
    map.iter()
        .map(|(name, value)| Ok((name.clone(), StateSpec::from_json(value)?)))
        .collect()
}

struct Inner {
    tree: Arc<StateTree>,
    root: StateId,
    pending: StateId,
    /// Resolver-named states in declaration (pre-)order.
    resolver_order: Vec<(String, StateId)>,
    resolvers: AHashMap<String, StateId>,
}

/// The resolved-state subtree shared by every deferral of one shape.
#[derive(Clone)]
pub struct Potential {
    inner: Arc<Inner>,
}

impl Potential {
    /// Declare a potential from its top-level states.
    pub fn new<I, K>(states: I) -> Result<Self, FlowError>
    where
        I: IntoIterator<Item = (K, StateSpec)>,
        K: Into<String>,
    {
        let states = collect_children(states);
        if states.is_empty() {
            return Err(FlowError::EmptyPotential);
        }

        let mut tree = StateTree::new();
        let root = tree.push(StateId::ROOT, RESOLVED, None);
        let pending = tree.push(StateId::ROOT, PENDING, None);

        let mut builder = Builder {
            tree: &mut tree,
            resolver_order: Vec::new(),
            resolvers: AHashMap::new(),
        };
        builder.insert_all(root, &states)?;
        let Builder {
            resolver_order,
            resolvers,
            ..
        } = builder;

        Ok(Potential {
            inner: Arc::new(Inner {
                tree: Arc::new(tree),
                root,
                pending,
                resolver_order,
                resolvers,
            }),
        })
    }

    /// Declare a potential from its JSON form, which must be an object.
    pub fn from_json(value: &Value) -> Result<Self, FlowError> {
        match value {
            Value::Object(map) => Self::new(children_from_json(map)?),
            _ => Err(FlowError::InvalidSpec(
                "a potential must be declared as an object".to_string(),
            )),
        }
    }

    pub fn from_json_str(source: &str) -> Result<Self, FlowError> {
        let value: Value =
            serde_json::from_str(source).map_err(|e| FlowError::InvalidSpec(e.to_string()))?;
        Self::from_json(&value)
    }

    /// The shared `{ yes: affirm, no: negate }` shape.
    pub fn binary() -> Self {
        BINARY.clone()
    }

    fn state(&self, id: StateId) -> State {
        State::new(Arc::clone(&self.inner.tree), id)
    }

    /// The potential root (`resolved`).
    pub fn root(&self) -> State {
        self.state(self.inner.root)
    }

    /// The root's direct superstate: the unnamed tree root.
    pub fn superstate(&self) -> State {
        self.state(StateId::ROOT)
    }

    /// The distinguished unresolved state.
    pub fn pending(&self) -> State {
        self.state(self.inner.pending)
    }

    /// Look up a state by path relative to the potential root.
    pub fn substate(&self, path: &str) -> Option<State> {
        self.root().substate(path)
    }

    /// Look up a state by its resolver verb.
    pub fn resolver(&self, verb: &str) -> Option<State> {
        self.inner.resolvers.get(verb).map(|id| self.state(*id))
    }

    /// Resolver-named states in declaration order.
    pub fn resolvers(&self) -> impl Iterator<Item = State> + '_ {
        self.inner
            .resolver_order
            .iter()
            .map(|(_, id)| self.state(*id))
    }

    /// Top-level declared states in order.
    pub fn states(&self) -> Vec<State> {
        self.root().substates().collect()
    }

    /// The first declared state, i.e. the affirmative slot.
    pub fn affirmative(&self) -> State {
        self.root()
            .substates()
            .next()
            .unwrap_or_else(|| self.root())
    }

    /// The second declared state, i.e. the negative slot, when there is one.
    pub fn negative(&self) -> Option<State> {
        self.root().substates().nth(1)
    }

    /// True if `state` is the potential root or one of its descendants.
    pub fn contains(&self, state: &State) -> bool {
        self.root().is_or_is_superstate_of(state)
    }

    /// Path of `state` relative to the potential root.
    pub fn relative_path<'a>(&self, state: &'a State) -> Option<&'a str> {
        if !self.contains(state) {
            return None;
        }
        let full = state.path();
        Some(
            full.strip_prefix(RESOLVED)
                .map(|rest| rest.trim_start_matches('.'))
                .unwrap_or(full),
        )
    }

    /// Identity comparison: both handles share one declaration.
    pub fn same_as(&self, other: &Potential) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Potential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Potential")
            .field(
                "resolvers",
                &self
                    .inner
                    .resolver_order
                    .iter()
                    .map(|(verb, _)| verb.as_str())
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}

struct Builder<'t> {
    tree: &'t mut StateTree,
    resolver_order: Vec<(String, StateId)>,
    resolvers: AHashMap<String, StateId>,
}

impl Builder<'_> {
    fn insert_all(
        &mut self,
        superstate: StateId,
        children: &[(String, StateSpec)],
    ) -> Result<(), FlowError> {
        for (name, spec) in children {
            self.insert(superstate, name, spec)?;
        }
        Ok(())
    }

    fn insert(&mut self, superstate: StateId, name: &str, spec: &StateSpec) -> Result<(), FlowError> {
        if name.is_empty() || name.contains('.') {
            return Err(FlowError::InvalidStateName(name.to_string()));
        }
        if self.tree.child(superstate, name).is_some() {
            return Err(FlowError::DuplicateState(name.to_string()));
        }

        let resolver = spec.resolver_name().map(str::to_string);
        let id = self.tree.push(superstate, name, resolver.clone());
        if let Some(verb) = resolver {
            if self.resolvers.insert(verb.clone(), id).is_some() {
                return Err(FlowError::DuplicateResolver(verb));
            }
            self.resolver_order.push((verb, id));
        }
        self.insert_all(id, spec.children())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_binary_is_shared() {
        let a = Potential::binary();
        let b = Potential::binary();
        assert!(a.same_as(&b));
        assert_eq!(a.affirmative().path(), "resolved.yes");
        assert_eq!(a.negative().unwrap().path(), "resolved.no");
        assert_eq!(a.resolver("negate").unwrap().name(), "no");
    }

    #[test]
    fn test_four_declaration_shapes() {
        let potential = Potential::from_json(&json!({
            "done": ["finish", { "early": "finishEarly", "late": null }],
            "failed": { "timeout": "expire", "crash": "crash" },
            "skipped": null,
        }))
        .unwrap();

        let done = potential.substate("done").unwrap();
        assert_eq!(done.resolver_name(), Some("finish"));
        assert!(done.has_substates());

        let late = potential.substate("done.late").unwrap();
        assert_eq!(late.resolver_name(), None);

        let failed = potential.substate("failed").unwrap();
        assert_eq!(failed.resolver_name(), None);
        assert_eq!(
            potential.resolver("expire").unwrap().path(),
            "resolved.failed.timeout"
        );

        let skipped = potential.substate("skipped").unwrap();
        assert!(!skipped.has_substates());
        assert_eq!(skipped.resolver_name(), None);

        let order: Vec<_> = potential
            .resolvers()
            .map(|s| s.resolver_name().unwrap().to_string())
            .collect();
        assert_eq!(order, ["finish", "finishEarly", "expire", "crash"]);
    }

    #[test]
    fn test_rejects_malformed_declarations() {
        assert_eq!(
            Potential::new([("a", StateSpec::resolver("go")), ("b", StateSpec::resolver("go"))])
                .unwrap_err(),
            FlowError::DuplicateResolver("go".to_string())
        );
        assert_eq!(
            Potential::new([("a.b", StateSpec::Plain)]).unwrap_err(),
            FlowError::InvalidStateName("a.b".to_string())
        );
        assert_eq!(
            Potential::new(Vec::<(String, StateSpec)>::new()).unwrap_err(),
            FlowError::EmptyPotential
        );
        assert!(matches!(
            Potential::from_json(&json!({ "a": [1, 2] })),
            Err(FlowError::InvalidSpec(_))
        ));
    }

    #[test]
    fn test_containment_and_relative_paths() {
        let potential = Potential::binary();
        let yes = potential.substate("yes").unwrap();
        assert!(potential.contains(&yes));
        assert!(potential.contains(&potential.root()));
        assert!(!potential.contains(&potential.pending()));
        assert_eq!(potential.relative_path(&yes), Some("yes"));
        assert_eq!(potential.relative_path(&potential.root()), Some(""));
    }
}
