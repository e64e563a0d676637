use crate::deferral::Deferral;
use crate::nullary::Nullary;
use crate::promise::{Promise, Thenable};
use crate::resolution::{Payload, Resolution};
use std::fmt;

/// The explicit result of a pipe stage or pipeline operation.
///
/// `Outcome` represents "Control Flow as Data": a stage either hands back its
/// result now or hands back a future the caller waits on.
pub enum Outcome<A> {
    /// A single result value.
    Value(A),
    /// The full argument list for whatever runs next.
    Args(Vec<A>),
    /// Suspend until this future resolves.
    Future(Box<dyn Thenable<A>>),
}

impl<A: Payload> Outcome<A> {
    pub fn value(value: A) -> Self {
        Outcome::Value(value)
    }

    pub fn args(args: Vec<A>) -> Self {
        Outcome::Args(args)
    }

    /// No arguments at all.
    pub fn empty() -> Self {
        Outcome::Args(Vec::new())
    }

    pub fn future(future: impl Thenable<A> + 'static) -> Self {
        Outcome::Future(Box::new(future))
    }

    /// Forward a resolution's arguments unchanged.
    pub fn forward(resolution: &Resolution<A>) -> Self {
        Outcome::Args(resolution.to_args())
    }

    pub fn is_future(&self) -> bool {
        matches!(self, Outcome::Future(_))
    }

    /// Immediate arguments; `None` for a future.
    pub fn into_args(self) -> Option<Vec<A>> {
        match self {
            Outcome::Value(value) => Some(vec![value]),
            Outcome::Args(args) => Some(args),
            Outcome::Future(_) => None,
        }
    }

    /// Any outcome as a promise: immediate results become an affirmed nullary.
    pub fn into_promise(self) -> Promise<A> {
        match self {
            Outcome::Future(future) => future.promise(),
            immediate => Nullary::affirmed(immediate.into_args().unwrap_or_default()).promise(),
        }
    }
}

impl<A: Payload> From<Promise<A>> for Outcome<A> {
    fn from(promise: Promise<A>) -> Self {
        Outcome::Future(Box::new(promise))
    }
}

impl<A: Payload> From<Deferral<A>> for Outcome<A> {
    fn from(deferral: Deferral<A>) -> Self {
        Outcome::Future(Box::new(deferral.promise()))
    }
}

impl<A: Payload> From<Vec<A>> for Outcome<A> {
    fn from(args: Vec<A>) -> Self {
        Outcome::Args(args)
    }
}

impl<A: fmt::Debug> fmt::Debug for Outcome<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Outcome::Args(args) => f.debug_tuple("Args").field(args).finish(),
            Outcome::Future(_) => f.write_str("Future(..)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_immediate_outcomes_become_args() {
        assert_eq!(Outcome::value(3).into_args(), Some(vec![3]));
        assert_eq!(Outcome::args(vec![1, 2]).into_args(), Some(vec![1, 2]));
        assert!(Outcome::<i32>::empty().into_args().unwrap().is_empty());

        let pending = Deferral::<i32>::binary();
        let outcome = Outcome::from(pending.clone());
        assert!(outcome.is_future());
        assert!(outcome.into_args().is_none());
    }

    #[test]
    fn test_into_promise_wraps_values() {
        let promise = Outcome::value(8).into_promise();
        assert!(promise.did("affirm"));
        assert_eq!(promise.resolved().unwrap().args(), &[8]);

        let deferral = Deferral::<i32>::binary();
        let promise = Outcome::from(deferral.promise()).into_promise();
        assert!(promise.serves(&deferral));
    }
}
