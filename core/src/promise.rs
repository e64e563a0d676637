//! Promise - the read-only view of a deferral
//!
//! A `Promise` forwards registration and query operations to the deferral it
//! serves and never exposes resolver methods. The registration contract lives
//! here; resolution lives in [`crate::deferral`].

use crate::callback::{Callback, Dispatch};
use crate::config::FateConfig;
use crate::deferral::Deferral;
use crate::error::{FateError, FateResult};
use crate::nullary::Nullary;
use crate::queue::{CallbackQueueTree, Phase};
use crate::resolution::{Context, Payload, Resolution};
use crate::telemetry::FailureReporter;
use fate_flow::{Potential, State};
use parking_lot::{Mutex, RwLock};
use std::any::Any;
use std::fmt;
use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context as TaskContext, Poll};
use tokio::sync::oneshot;
use uuid::Uuid;

/// One-shot continuation receiving a resolution's arguments.
pub type ArgsFn<A> = Box<dyn FnOnce(Vec<A>) + Send>;

pub(crate) enum Lifecycle<A> {
    Pending {
        queues: CallbackQueueTree<A>,
        context: Option<Context>,
        given: Option<Vec<A>>,
    },
    Resolved(Arc<Resolution<A>>),
}

pub(crate) struct Shared<A> {
    pub(crate) id: Uuid,
    pub(crate) potential: Potential,
    pub(crate) lifecycle: Mutex<Lifecycle<A>>,
    pub(crate) reporter: RwLock<Option<Arc<dyn FailureReporter>>>,
}

impl<A: Payload> Shared<A> {
    pub(crate) fn new(potential: Potential) -> Self {
        Shared {
            id: Uuid::new_v4(),
            potential,
            lifecycle: Mutex::new(Lifecycle::Pending {
                queues: CallbackQueueTree::new(),
                context: None,
                given: None,
            }),
            reporter: RwLock::new(None),
        }
    }

    pub(crate) fn dispatch<'a>(
        &self,
        resolution: &'a Resolution<A>,
        reporter: Option<&'a Arc<dyn FailureReporter>>,
    ) -> Dispatch<'a, A> {
        Dispatch {
            deferral: self.id,
            resolution,
            reporter,
            config: FateConfig::current(),
        }
    }

    /// Queue `callbacks` while pending; once resolved, run them now if `target`
    /// covers the resolved state and drop them otherwise.
    pub(crate) fn enqueue(&self, target: &State, phase: Phase, callbacks: Vec<Callback<A>>) {
        let resolution = {
            let mut lifecycle = self.lifecycle.lock();
            match &mut *lifecycle {
                Lifecycle::Pending { queues, .. } => {
                    queues.get(target, phase).extend(callbacks);
                    return;
                }
                Lifecycle::Resolved(resolution) => Arc::clone(resolution),
            }
        };

        if !target.is_or_is_superstate_of(resolution.state()) {
            tracing::trace!(
                fate.deferral = %self.id,
                fate.state = %target,
                "registration discarded: deferral resolved elsewhere"
            );
            return;
        }
        let reporter = self.reporter.read().clone();
        let dispatch = self.dispatch(&resolution, reporter.as_ref());
        for callback in callbacks {
            dispatch.invoke(callback, target.path(), None);
        }
    }

    pub(crate) fn resolution(&self) -> Option<Arc<Resolution<A>>> {
        match &*self.lifecycle.lock() {
            Lifecycle::Pending { .. } => None,
            Lifecycle::Resolved(resolution) => Some(Arc::clone(resolution)),
        }
    }

    fn locate(&self, path: &str) -> FateResult<State> {
        self.potential
            .substate(path)
            .ok_or_else(|| FateError::invalid_state(path))
    }

    fn validate(&self, target: &State) -> FateResult<()> {
        if self.potential.contains(target) {
            Ok(())
        } else {
            Err(FateError::invalid_state(target.path()))
        }
    }
}

/// Read-only view of a [`Deferral`].
pub struct Promise<A> {
    pub(crate) shared: Arc<Shared<A>>,
}

impl<A> Clone for Promise<A> {
    fn clone(&self) -> Self {
        Promise {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<A: Payload> Promise<A> {
    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    pub fn potential(&self) -> &Potential {
        &self.shared.potential
    }

    /// True iff this is the view of `deferral`.
    pub fn serves(&self, deferral: &Deferral<A>) -> bool {
        Arc::ptr_eq(&self.shared, &deferral.promise.shared)
    }

    /// Identity comparison between two views.
    pub fn same(&self, other: &Promise<A>) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    /// Current state: `pending`, or the resolved state.
    pub fn state(&self) -> State {
        match self.shared.resolution() {
            Some(resolution) => resolution.state().clone(),
            None => self.shared.potential.pending(),
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.shared.resolution().is_some()
    }

    /// The frozen resolution, once there is one.
    pub fn resolved(&self) -> Option<Arc<Resolution<A>>> {
        self.shared.resolution()
    }

    /// `Some(true)` if `path` names the resolved state, `Some(false)` if it names
    /// any other state of the potential, `None` if it is not part of it.
    pub fn resolution(&self, path: &str) -> Option<bool> {
        let probe = self.shared.potential.substate(path)?;
        Some(
            self.shared
                .resolution()
                .is_some_and(|resolution| *resolution.state() == probe),
        )
    }

    /// True iff resolved to the state named by `name` (a resolver verb or a
    /// state path) or one of its descendants.
    pub fn did(&self, name: &str) -> bool {
        let potential = &self.shared.potential;
        let Some(target) = potential.resolver(name).or_else(|| potential.substate(name)) else {
            return false;
        };
        self.shared
            .resolution()
            .is_some_and(|resolution| target.is_or_is_superstate_of(resolution.state()))
    }

    /// Register an ordered sequence of callbacks against `target`.
    pub fn register_state<I>(&self, target: &State, phase: Phase, callbacks: I) -> FateResult<&Self>
    where
        I: IntoIterator<Item = Callback<A>>,
    {
        self.shared.validate(target)?;
        self.shared
            .enqueue(target, phase, callbacks.into_iter().collect());
        Ok(self)
    }

    /// Register `f` against the state at `path` (relative to the potential root).
    pub fn register_to<F>(&self, path: &str, phase: Phase, f: F) -> FateResult<&Self>
    where
        F: FnOnce(&Resolution<A>) + Send + 'static,
    {
        let target = self.shared.locate(path)?;
        self.shared.enqueue(&target, phase, vec![Callback::new(f)]);
        Ok(self)
    }

    /// Capture-phase registration by state path, e.g. `on("yes", ..)`.
    pub fn on<F>(&self, path: &str, f: F) -> FateResult<&Self>
    where
        F: FnOnce(&Resolution<A>) + Send + 'static,
    {
        self.register_to(path, Phase::Capture, f)
    }

    /// `on_affirm` runs for the affirmative slot, `on_negate` for any other
    /// top-level state.
    pub fn then<F, G>(&self, on_affirm: F, on_negate: G) -> &Self
    where
        F: FnOnce(&Resolution<A>) + Send + 'static,
        G: FnOnce(&Resolution<A>) + Send + 'static,
    {
        self.on_affirm(on_affirm).on_negate(on_negate)
    }

    pub fn on_affirm<F>(&self, f: F) -> &Self
    where
        F: FnOnce(&Resolution<A>) + Send + 'static,
    {
        let affirmative = self.shared.potential.affirmative();
        self.shared
            .enqueue(&affirmative, Phase::Capture, vec![Callback::new(f)]);
        self
    }

    pub fn on_negate<G>(&self, f: G) -> &Self
    where
        G: FnOnce(&Resolution<A>) + Send + 'static,
    {
        let potential = &self.shared.potential;
        let affirmative = potential.affirmative();
        let slot = Arc::new(Mutex::new(Some(f)));
        for state in potential.states().into_iter().filter(|s| *s != affirmative) {
            let slot = Arc::clone(&slot);
            self.shared.enqueue(
                &state,
                Phase::Capture,
                vec![Callback::new(move |resolution: &Resolution<A>| {
                    if let Some(f) = slot.lock().take() {
                        f(resolution);
                    }
                })],
            );
        }
        self
    }

    /// Runs on any resolution, after every more specific callback.
    pub fn always<F>(&self, f: F) -> &Self
    where
        F: FnOnce(&Resolution<A>) + Send + 'static,
    {
        let root = self.shared.potential.root();
        self.shared.enqueue(&root, Phase::Bubble, vec![Callback::new(f)]);
        self
    }

    pub(crate) fn downgrade(&self) -> WeakPromise<A> {
        WeakPromise {
            shared: Arc::downgrade(&self.shared),
        }
    }
}

impl<A> fmt::Debug for Promise<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Promise").field("id", &self.shared.id).finish()
    }
}

pub(crate) struct WeakPromise<A> {
    shared: Weak<Shared<A>>,
}

impl<A> WeakPromise<A> {
    pub(crate) fn upgrade(&self) -> Option<Promise<A>> {
        self.shared.upgrade().map(|shared| Promise { shared })
    }
}

/// Capability interface for anything future-like.
///
/// Foreign implementations only need `then_either`; the default `promise`
/// adapts them into a fresh binary deferral.
pub trait Thenable<A: Payload>: Send + Sync {
    /// Subscribe to the eventual outcome: `on_affirm` receives the arguments of
    /// an affirmative resolution, `on_negate` those of any other.
    fn then_either(&self, on_affirm: ArgsFn<A>, on_negate: ArgsFn<A>);

    /// A native promise tracking this future.
    fn promise(&self) -> Promise<A> {
        if let Some(native) = self.as_native() {
            return native;
        }
        let adapter = Deferral::binary();
        let (yes, no) = (adapter.clone(), adapter.clone());
        self.then_either(
            Box::new(move |args| {
                yes.affirm(args);
            }),
            Box::new(move |args| {
                no.negate(args);
            }),
        );
        adapter.promise()
    }

    /// `Some` when this is one of the crate's own deferral views.
    fn as_native(&self) -> Option<Promise<A>> {
        None
    }
}

impl<A: Payload> Thenable<A> for Promise<A> {
    fn then_either(&self, on_affirm: ArgsFn<A>, on_negate: ArgsFn<A>) {
        self.then(
            move |resolution| on_affirm(resolution.to_args()),
            move |resolution| on_negate(resolution.to_args()),
        );
    }

    fn as_native(&self) -> Option<Promise<A>> {
        Some(self.clone())
    }
}

/// Duck-type check: does `value` look like a future of `A`?
pub fn resembles<A: Payload>(value: &dyn Any) -> bool {
    value.is::<Promise<A>>()
        || value.is::<Deferral<A>>()
        || value.is::<Nullary<A>>()
        || value.is::<Box<dyn Thenable<A>>>()
        || value.is::<Arc<dyn Thenable<A>>>()
}

/// Future returned by awaiting a [`Promise`].
pub struct ResolutionFuture<A> {
    rx: oneshot::Receiver<Arc<Resolution<A>>>,
}

impl<A> Future for ResolutionFuture<A> {
    type Output = FateResult<Arc<Resolution<A>>>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.map_err(|_| FateError::Abandoned))
    }
}

impl<A: Payload> IntoFuture for Promise<A> {
    type Output = FateResult<Arc<Resolution<A>>>;
    type IntoFuture = ResolutionFuture<A>;

    fn into_future(self) -> Self::IntoFuture {
        let (tx, rx) = oneshot::channel();
        let weak = self.downgrade();
        self.always(move |_| {
            if let Some(resolution) = weak.upgrade().and_then(|promise| promise.resolved()) {
                let _ = tx.send(resolution);
            }
        });
        ResolutionFuture { rx }
    }
}
