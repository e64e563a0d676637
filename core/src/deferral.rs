//! # Deferral: One-Shot Resolution
//!
//! A `Deferral` is a pending computation that resolves exactly once into one
//! state of its [`Potential`]. Resolution freezes the outcome, walks the
//! derivation of the resolved state root→target through the capture queues and
//! target→root through the bubble queues, then discards every queue.
//!
//! Every later resolution attempt is a no-op. Registrations made afterwards
//! run on the spot when they target an ancestor-or-self of the resolved state
//! and are dropped otherwise.
//!
//! | Phase   | Walk order      | Same node       |
//! |---------|-----------------|-----------------|
//! | capture | root → target   | registration order |
//! | bubble  | target → root   | registration order |

use crate::callback::Callback;
use crate::error::{FateError, FateResult};
use crate::promise::{ArgsFn, Lifecycle, Promise, Shared, Thenable};
use crate::queue::{CallbackQueueTree, Phase};
use crate::resolution::{Context, Payload, Resolution};
use crate::telemetry::FailureReporter;
use fate_flow::{Potential, State};
use std::any::Any;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

/// The owning, resolvable side of a future.
///
/// Dereferences to its [`Promise`] for every registration and query operation.
pub struct Deferral<A> {
    pub(crate) promise: Promise<A>,
}

impl<A> Clone for Deferral<A> {
    fn clone(&self) -> Self {
        Deferral {
            promise: self.promise.clone(),
        }
    }
}

impl<A> Deref for Deferral<A> {
    type Target = Promise<A>;

    fn deref(&self) -> &Promise<A> {
        &self.promise
    }
}

impl<A: Payload> Deferral<A> {
    /// A pending deferral of the given shape.
    pub fn new(potential: Potential) -> Self {
        Deferral {
            promise: Promise {
                shared: Arc::new(Shared::new(potential)),
            },
        }
    }

    /// A pending `{ yes: affirm, no: negate }` deferral.
    pub fn binary() -> Self {
        Self::new(Potential::binary())
    }

    /// A pending deferral seeded by `init`, which runs before this returns.
    pub fn with_initializer<F>(potential: Potential, init: F) -> Self
    where
        F: FnOnce(&Deferral<A>),
    {
        let deferral = Self::new(potential);
        init(&deferral);
        deferral
    }

    /// A deferral already resolved to `path`.
    pub fn resolved(
        potential: Potential,
        path: &str,
        context: Option<Context>,
        args: Vec<A>,
    ) -> FateResult<Self> {
        let target = landing(&potential, potential.substate(path), path)?;
        Ok(Self::settled(potential, target, context, args))
    }

    pub(crate) fn settled(
        potential: Potential,
        target: State,
        context: Option<Context>,
        args: Vec<A>,
    ) -> Self {
        let deferral = Self::new(potential);
        if let Some(context) = context {
            deferral.as_context_arc(context);
        }
        deferral.settle(target, args);
        deferral
    }

    /// A deferral born resolved, without ever holding queues.
    pub(crate) fn from_resolution(potential: Potential, resolution: Arc<Resolution<A>>) -> Self {
        let mut shared = Shared::new(potential);
        *shared.lifecycle.get_mut() = Lifecycle::Resolved(resolution);
        Deferral {
            promise: Promise {
                shared: Arc::new(shared),
            },
        }
    }

    /// Route this deferral's callback failures to `reporter`.
    pub fn with_reporter(self, reporter: impl FailureReporter) -> Self {
        *self.promise.shared.reporter.write() = Some(Arc::new(reporter));
        self
    }

    /// The read-only view handed to consumers.
    pub fn promise(&self) -> Promise<A> {
        self.promise.clone()
    }

    /// Default arguments for a resolution that supplies none.
    pub fn given(&self, args: Vec<A>) -> &Self {
        if let Lifecycle::Pending { given, .. } = &mut *self.promise.shared.lifecycle.lock() {
            *given = Some(args);
        }
        self
    }

    /// Context to resolve "as"; callbacks see it through [`Resolution::context`].
    pub fn as_context<C: Any + Send + Sync>(&self, context: C) -> &Self {
        self.as_context_arc(Arc::new(context))
    }

    pub fn as_context_arc(&self, context: Context) -> &Self {
        if let Lifecycle::Pending { context: slot, .. } = &mut *self.promise.shared.lifecycle.lock()
        {
            *slot = Some(context);
        }
        self
    }

    /// Resolve to `target`, a state declared inside this deferral's potential.
    pub fn resolve_state(&self, target: &State, args: Vec<A>) -> FateResult<&Self> {
        let target = landing(self.potential(), Some(target.clone()), target.path())?;
        self.settle(target, args);
        Ok(self)
    }

    /// Resolve to the state at `path`, relative to the potential root.
    ///
    /// The root itself is not a resolution state, so `""` is rejected.
    pub fn resolve_to(&self, path: &str, args: Vec<A>) -> FateResult<&Self> {
        let target = landing(self.potential(), self.potential().substate(path), path)?;
        self.settle(target, args);
        Ok(self)
    }

    /// Resolve through a resolver verb, e.g. `resolve("affirm", ..)`.
    pub fn resolve(&self, verb: &str, args: Vec<A>) -> FateResult<&Self> {
        let target = self
            .potential()
            .resolver(verb)
            .ok_or_else(|| FateError::UnknownResolver(verb.to_string()))?;
        self.settle(target, args);
        Ok(self)
    }

    /// Resolve to the affirmative slot.
    pub fn affirm(&self, args: Vec<A>) -> &Self {
        let target = self.potential().affirmative();
        self.settle(target, args);
        self
    }

    /// Resolve to the negative slot. Shapes with a single state have none.
    pub fn negate(&self, args: Vec<A>) -> &Self {
        match self.potential().negative() {
            Some(target) => {
                self.settle(target, args);
            }
            None => tracing::warn!(
                fate.deferral = %self.id(),
                "negate ignored: potential declares no negative state"
            ),
        }
        self
    }

    /// The single state transition. Returns false if already resolved.
    pub(crate) fn settle(&self, target: State, args: Vec<A>) -> bool {
        let shared = &self.promise.shared;
        let relative = shared
            .potential
            .relative_path(&target)
            .unwrap_or_default()
            .to_string();

        let (resolution, mut queues) = {
            let mut lifecycle = shared.lifecycle.lock();
            let Lifecycle::Pending {
                queues,
                context,
                given,
            } = &mut *lifecycle
            else {
                tracing::trace!(
                    fate.deferral = %shared.id,
                    fate.state = %relative,
                    "resolution ignored: already resolved"
                );
                return false;
            };
            let args = if args.is_empty() {
                given.take().unwrap_or_default()
            } else {
                args
            };
            let resolution = Arc::new(Resolution::new(target, relative, context.take(), args));
            let queues = std::mem::take(queues);
            *lifecycle = Lifecycle::Resolved(Arc::clone(&resolution));
            (resolution, queues)
        };

        tracing::debug!(
            fate.deferral = %shared.id,
            fate.state = %resolution.path(),
            queued = queues.len(),
            "deferral resolved"
        );

        let derivation = resolution
            .state()
            .derivation(Some(&shared.potential.superstate()));
        let reporter = shared.reporter.read().clone();
        let dispatch = shared.dispatch(&resolution, reporter.as_ref());
        walk(&mut queues, &derivation, |state, phase, callbacks| {
            for callback in callbacks {
                dispatch.invoke(callback, state.path(), Some(phase));
            }
        });
        queues.empty(None);
        true
    }
}

/// A declared state strictly below the potential root.
fn landing(potential: &Potential, target: Option<State>, path: &str) -> FateResult<State> {
    match target {
        Some(state) if potential.contains(&state) && state != potential.root() => Ok(state),
        _ => Err(FateError::invalid_state(path)),
    }
}

/// Visit every queue on `derivation` in dispatch order.
fn walk<A, F>(queues: &mut CallbackQueueTree<A>, derivation: &[State], mut visit: F)
where
    F: FnMut(&State, Phase, Vec<Callback<A>>),
{
    for state in derivation {
        let callbacks = queues.take(state, Phase::Capture);
        visit(state, Phase::Capture, callbacks);
    }
    for state in derivation.iter().rev() {
        let callbacks = queues.take(state, Phase::Bubble);
        visit(state, Phase::Bubble, callbacks);
    }
}

impl<A: Payload> Thenable<A> for Deferral<A> {
    fn then_either(&self, on_affirm: ArgsFn<A>, on_negate: ArgsFn<A>) {
        self.promise.then_either(on_affirm, on_negate);
    }

    fn as_native(&self) -> Option<Promise<A>> {
        Some(self.promise())
    }
}

impl<A> fmt::Debug for Deferral<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deferral")
            .field("id", &self.promise.shared.id)
            .finish()
    }
}
