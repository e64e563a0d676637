//! # Join Combinators
//!
//! A join watches a set of input futures and resolves a binary master deferral
//! from their outcomes. Each input names the states that count as a *match*
//! (its first declared state by default). The flags pick a polarity and a
//! quorum, and together they route every match and every miss:
//!
//! | flags          | on match          | on miss           |
//! |----------------|-------------------|-------------------|
//! | `when` all     | affirm after all  | negate now        |
//! | `when` any     | affirm now        | negate after all  |
//! | `when` none    | negate now        | affirm after all  |
//! | `unless` all   | negate after all  | affirm now        |
//! | `unless` any   | negate now        | affirm after all  |
//! | `unless` none  | affirm now        | negate after all  |
//!
//! "Now" resolves the master with the identity of the first qualifying input.
//! "After all" resolves it once every input has qualified, with the inputs in
//! completion order.

use crate::deferral::Deferral;
use crate::error::{FateError, FateResult};
use crate::nullary::Nullary;
use crate::promise::{Promise, Thenable};
use crate::resolution::{Payload, Resolution};
use fate_flow::{Potential, State};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

/// React to inputs that match, or to inputs that do not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Polarity {
    When,
    Unless,
}

/// How many inputs must qualify.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Quorum {
    All,
    Any,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JoinFlags {
    pub polarity: Polarity,
    pub quorum: Quorum,
}

impl JoinFlags {
    pub const WHEN_ALL: JoinFlags = JoinFlags::new(Polarity::When, Quorum::All);
    pub const WHEN_ANY: JoinFlags = JoinFlags::new(Polarity::When, Quorum::Any);
    pub const WHEN_NONE: JoinFlags = JoinFlags::new(Polarity::When, Quorum::None);
    pub const UNLESS_ALL: JoinFlags = JoinFlags::new(Polarity::Unless, Quorum::All);
    pub const UNLESS_ANY: JoinFlags = JoinFlags::new(Polarity::Unless, Quorum::Any);
    pub const UNLESS_NONE: JoinFlags = JoinFlags::new(Polarity::Unless, Quorum::None);

    pub const fn new(polarity: Polarity, quorum: Quorum) -> Self {
        JoinFlags { polarity, quorum }
    }

    /// `(on match, on miss)`.
    fn routes(self) -> (Route, Route) {
        use Route::*;
        use Side::*;
        match (self.polarity, self.quorum) {
            (Polarity::When, Quorum::All) => (AfterAll(Affirm), Now(Negate)),
            (Polarity::When, Quorum::Any) => (Now(Affirm), AfterAll(Negate)),
            (Polarity::When, Quorum::None) => (Now(Negate), AfterAll(Affirm)),
            (Polarity::Unless, Quorum::All) => (AfterAll(Negate), Now(Affirm)),
            (Polarity::Unless, Quorum::Any) => (Now(Negate), AfterAll(Affirm)),
            (Polarity::Unless, Quorum::None) => (Now(Affirm), AfterAll(Negate)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Affirm,
    Negate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    Now(Side),
    AfterAll(Side),
}

impl Route {
    fn side(self) -> Side {
        match self {
            Route::Now(side) | Route::AfterAll(side) => side,
        }
    }
}

enum Source<A> {
    Native(Promise<A>),
    Foreign(Box<dyn Thenable<A>>),
}

/// One input of a join: a future plus the states that count as a match.
pub struct JoinInput<A> {
    source: Source<A>,
    targets: Vec<String>,
}

impl<A: Payload> JoinInput<A> {
    pub fn native(promise: Promise<A>) -> Self {
        JoinInput {
            source: Source::Native(promise),
            targets: Vec::new(),
        }
    }

    /// Any future-like object, driven through `then_either`.
    pub fn foreign(future: impl Thenable<A> + 'static) -> Self {
        match future.as_native() {
            Some(promise) => Self::native(promise),
            None => JoinInput {
                source: Source::Foreign(Box::new(future)),
                targets: Vec::new(),
            },
        }
    }

    /// A plain value, joined as an already-affirmed future.
    pub fn value(args: Vec<A>) -> Self {
        Self::native(Nullary::affirmed(args).promise())
    }

    /// States of this input that count as a match.
    pub fn matching<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.targets.extend(paths.into_iter().map(Into::into));
        self
    }

    fn potential(&self) -> Potential {
        match &self.source {
            Source::Native(promise) => promise.potential().clone(),
            Source::Foreign(_) => Potential::binary(),
        }
    }

    fn resolve_targets(&self) -> FateResult<Vec<State>> {
        let potential = self.potential();
        if self.targets.is_empty() {
            return Ok(vec![potential.affirmative()]);
        }
        self.targets
            .iter()
            .map(|path| {
                potential
                    .substate(path)
                    .ok_or_else(|| FateError::invalid_state(path.as_str()))
            })
            .collect()
    }

    fn into_promise(self) -> Promise<A> {
        match self.source {
            Source::Native(promise) => promise,
            Source::Foreign(future) => future.promise(),
        }
    }
}

impl<A: Payload> From<Promise<A>> for JoinInput<A> {
    fn from(promise: Promise<A>) -> Self {
        JoinInput::native(promise)
    }
}

impl<A: Payload> From<&Promise<A>> for JoinInput<A> {
    fn from(promise: &Promise<A>) -> Self {
        JoinInput::native(promise.clone())
    }
}

impl<A: Payload> From<Deferral<A>> for JoinInput<A> {
    fn from(deferral: Deferral<A>) -> Self {
        JoinInput::native(deferral.promise())
    }
}

impl<A: Payload> From<&Deferral<A>> for JoinInput<A> {
    fn from(deferral: &Deferral<A>) -> Self {
        JoinInput::native(deferral.promise())
    }
}

impl<A: Payload> From<Nullary<A>> for JoinInput<A> {
    fn from(nullary: Nullary<A>) -> Self {
        JoinInput::native(nullary.promise())
    }
}

impl<A> fmt::Debug for JoinInput<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.source {
            Source::Native(_) => "native",
            Source::Foreign(_) => "foreign",
        };
        f.debug_struct("JoinInput")
            .field("source", &kind)
            .field("targets", &self.targets)
            .finish()
    }
}

type MasterCallback<A> = Box<dyn FnOnce(&Resolution<Promise<A>>) + Send>;

/// Builder for a join with optional master callbacks.
pub struct Join<A> {
    flags: JoinFlags,
    inputs: Vec<JoinInput<A>>,
    on_affirm: Option<MasterCallback<A>>,
    on_negate: Option<MasterCallback<A>>,
}

impl<A: Payload> Join<A> {
    pub fn new(flags: JoinFlags) -> Self {
        Join {
            flags,
            inputs: Vec::new(),
            on_affirm: None,
            on_negate: None,
        }
    }

    pub fn input(mut self, input: impl Into<JoinInput<A>>) -> Self {
        self.inputs.push(input.into());
        self
    }

    pub fn inputs<I>(mut self, inputs: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<JoinInput<A>>,
    {
        self.inputs.extend(inputs.into_iter().map(Into::into));
        self
    }

    pub fn on_affirm<F>(mut self, f: F) -> Self
    where
        F: FnOnce(&Resolution<Promise<A>>) + Send + 'static,
    {
        self.on_affirm = Some(Box::new(f));
        self
    }

    pub fn on_negate<F>(mut self, f: F) -> Self
    where
        F: FnOnce(&Resolution<Promise<A>>) + Send + 'static,
    {
        self.on_negate = Some(Box::new(f));
        self
    }

    /// Wire every input to the master and return the master's promise.
    ///
    /// Targets are validated before anything is wired, so an invalid target
    /// leaves every input untouched.
    pub fn start(self) -> FateResult<Promise<Promise<A>>> {
        let (on_match, on_miss) = self.flags.routes();
        let targets = self
            .inputs
            .iter()
            .map(JoinInput::resolve_targets)
            .collect::<FateResult<Vec<_>>>()?;

        let master = Deferral::<Promise<A>>::binary();
        if let Some(f) = self.on_affirm {
            master.on_affirm(f);
        }
        if let Some(f) = self.on_negate {
            master.on_negate(f);
        }

        let total = self.inputs.len();
        tracing::debug!(
            fate.deferral = %master.id(),
            flags = ?self.flags,
            inputs = total,
            "join started"
        );
        let tally = Arc::new(Tally {
            master: master.clone(),
            total,
            counts: Mutex::new(Counts::new()),
        });

        if total == 0 {
            let after_all = if matches!(on_match, Route::AfterAll(_)) {
                on_match
            } else {
                on_miss
            };
            tally.resolve(after_all.side(), Vec::new());
            return Ok(master.promise());
        }

        for (input, targets) in self.inputs.into_iter().zip(targets) {
            let identity = input.into_promise();
            let weak = identity.downgrade();
            let tally = Arc::clone(&tally);
            identity.always(move |resolution| {
                let Some(identity) = weak.upgrade() else {
                    return;
                };
                let matched = targets
                    .iter()
                    .any(|target| target.is_or_is_superstate_of(resolution.state()));
                tally.count(if matched { on_match } else { on_miss }, identity);
            });
        }
        Ok(master.promise())
    }
}

struct Counts<A> {
    affirmed: Vec<Promise<A>>,
    negated: Vec<Promise<A>>,
    settled: bool,
}

impl<A> Counts<A> {
    fn new() -> Self {
        Counts {
            affirmed: Vec::new(),
            negated: Vec::new(),
            settled: false,
        }
    }
}

struct Tally<A> {
    master: Deferral<Promise<A>>,
    total: usize,
    counts: Mutex<Counts<A>>,
}

impl<A: Payload> Tally<A> {
    fn count(&self, route: Route, input: Promise<A>) {
        let ready = {
            let mut counts = self.counts.lock();
            if counts.settled {
                return;
            }
            let ready = match route {
                Route::Now(side) => Some((side, vec![input])),
                Route::AfterAll(side) => {
                    let list = match side {
                        Side::Affirm => &mut counts.affirmed,
                        Side::Negate => &mut counts.negated,
                    };
                    list.push(input);
                    (list.len() == self.total).then(|| (side, std::mem::take(list)))
                }
            };
            counts.settled = ready.is_some();
            ready
        };
        if let Some((side, args)) = ready {
            self.resolve(side, args);
        }
    }

    fn resolve(&self, side: Side, args: Vec<Promise<A>>) {
        match side {
            Side::Affirm => self.master.affirm(args),
            Side::Negate => self.master.negate(args),
        };
    }
}

pub fn join<A, I>(flags: JoinFlags, inputs: I) -> FateResult<Promise<Promise<A>>>
where
    A: Payload,
    I: IntoIterator,
    I::Item: Into<JoinInput<A>>,
{
    Join::new(flags).inputs(inputs).start()
}

/// Affirms once every input matches; negates on the first miss.
pub fn when<A, I>(inputs: I) -> FateResult<Promise<Promise<A>>>
where
    A: Payload,
    I: IntoIterator,
    I::Item: Into<JoinInput<A>>,
{
    join(JoinFlags::WHEN_ALL, inputs)
}

/// Affirms on the first match; negates once every input missed.
pub fn when_any<A, I>(inputs: I) -> FateResult<Promise<Promise<A>>>
where
    A: Payload,
    I: IntoIterator,
    I::Item: Into<JoinInput<A>>,
{
    join(JoinFlags::WHEN_ANY, inputs)
}

pub fn when_none<A, I>(inputs: I) -> FateResult<Promise<Promise<A>>>
where
    A: Payload,
    I: IntoIterator,
    I::Item: Into<JoinInput<A>>,
{
    join(JoinFlags::WHEN_NONE, inputs)
}

pub fn unless<A, I>(inputs: I) -> FateResult<Promise<Promise<A>>>
where
    A: Payload,
    I: IntoIterator,
    I::Item: Into<JoinInput<A>>,
{
    join(JoinFlags::UNLESS_ALL, inputs)
}

pub fn unless_any<A, I>(inputs: I) -> FateResult<Promise<Promise<A>>>
where
    A: Payload,
    I: IntoIterator,
    I::Item: Into<JoinInput<A>>,
{
    join(JoinFlags::UNLESS_ANY, inputs)
}

pub fn unless_none<A, I>(inputs: I) -> FateResult<Promise<Promise<A>>>
where
    A: Payload,
    I: IntoIterator,
    I::Item: Into<JoinInput<A>>,
{
    join(JoinFlags::UNLESS_NONE, inputs)
}
