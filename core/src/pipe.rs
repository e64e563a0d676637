//! Resolution chaining.
//!
//! `pipe` allocates a `next` deferral of the same shape and feeds it from this
//! one. Each resolver-named slot may carry a stage. A stage sees the arriving
//! resolution and returns an [`Outcome`]: an immediate result resolves `next`
//! at the same state, a future forwards its own resolution into `next` once it
//! lands. A slot without a stage forwards the original resolution unchanged.

use crate::deferral::Deferral;
use crate::outcome::Outcome;
use crate::promise::{Promise, Thenable};
use crate::resolution::{Payload, Resolution};
use fate_flow::State;

/// One pipe stage.
pub type PipeStage<A> = Box<dyn FnOnce(&Resolution<A>) -> Outcome<A> + Send>;

/// Box a closure as a [`PipeStage`].
pub fn stage<A, F>(f: F) -> PipeStage<A>
where
    F: FnOnce(&Resolution<A>) -> Outcome<A> + Send + 'static,
{
    Box::new(f)
}

impl<A: Payload> Promise<A> {
    /// Chain stages onto this future, one optional stage per resolver-named
    /// slot in declaration order. Extra stages are ignored.
    pub fn pipe<I>(&self, stages: I) -> Promise<A>
    where
        I: IntoIterator<Item = Option<PipeStage<A>>>,
    {
        let next = Deferral::new(self.potential().clone());
        let mut slots: Vec<(State, PipeStage<A>)> = self
            .potential()
            .resolvers()
            .zip(stages)
            .filter_map(|(slot, stage)| stage.map(|stage| (slot, stage)))
            .collect();

        let target = next.clone();
        self.always(move |resolution| {
            let stage = take_stage(&mut slots, resolution.state());
            if let Some(context) = resolution.context() {
                target.as_context_arc(context.clone());
            }
            match stage {
                None => {
                    target.settle(resolution.state().clone(), resolution.to_args());
                }
                Some(stage) => forward(&target, resolution.state(), stage(resolution)),
            }
        });

        tracing::trace!(
            fate.deferral = %self.id(),
            next = %next.id(),
            "pipe attached"
        );
        next.promise()
    }

    /// Pipe only the first resolver slot; every other outcome passes through.
    pub fn pipe_with<F>(&self, f: F) -> Promise<A>
    where
        F: FnOnce(&Resolution<A>) -> Outcome<A> + Send + 'static,
    {
        self.pipe([Some(stage(f))])
    }
}

/// The stage registered at the outermost ancestor-or-self of `state`, matching
/// capture order.
fn take_stage<A>(slots: &mut Vec<(State, PipeStage<A>)>, state: &State) -> Option<PipeStage<A>> {
    let index = state
        .derivation(None)
        .iter()
        .find_map(|ancestor| slots.iter().position(|(slot, _)| slot == ancestor))?;
    Some(slots.swap_remove(index).1)
}

fn forward<A: Payload>(next: &Deferral<A>, at: &State, outcome: Outcome<A>) {
    match outcome {
        Outcome::Value(value) => {
            next.settle(at.clone(), vec![value]);
        }
        Outcome::Args(args) => {
            next.settle(at.clone(), args);
        }
        Outcome::Future(future) => match future.as_native() {
            Some(native) => {
                let next = next.clone();
                let source_affirmative = native.potential().affirmative();
                native.always(move |resolution| {
                    // Same-named slots pair up; anything else maps by polarity.
                    let mapped = next.potential().substate(resolution.path()).or_else(|| {
                        if source_affirmative.is_or_is_superstate_of(resolution.state()) {
                            Some(next.potential().affirmative())
                        } else {
                            next.potential().negative()
                        }
                    });
                    if let Some(state) = mapped {
                        next.settle(state, resolution.to_args());
                    }
                });
            }
            None => {
                let (yes, no) = (next.clone(), next.clone());
                future.then_either(
                    Box::new(move |args| {
                        yes.affirm(args);
                    }),
                    Box::new(move |args| {
                        no.negate(args);
                    }),
                );
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::promise::ArgsFn;
    use fate_flow::{Potential, StateSpec};
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[test]
    fn test_plain_value_resolves_next_immediately() {
        let source = Deferral::<i32>::binary();
        let next = source.pipe_with(|r| Outcome::value(r.args()[0] * 10));
        assert!(!next.is_resolved());

        source.affirm(vec![4]);
        assert!(next.did("affirm"));
        assert_eq!(next.resolved().unwrap().args(), &[40]);
    }

    #[test]
    fn test_slot_without_stage_forwards() {
        let source = Deferral::<i32>::binary();
        let next = source.pipe_with(|_| Outcome::value(0));
        source.negate(vec![7, 8]);

        assert!(next.did("negate"));
        assert_eq!(next.resolved().unwrap().args(), &[7, 8]);
    }

    #[test]
    fn test_negative_slot_stage() {
        let source = Deferral::<i32>::binary();
        let next = source.pipe([None, Some(stage(|_| Outcome::args(vec![1, 2])))]);
        source.negate(vec![]);
        assert!(next.did("negate"));
        assert_eq!(next.resolved().unwrap().args(), &[1, 2]);
    }

    #[test]
    fn test_chained_pipes_wait_for_pending_future() {
        let source = Deferral::<i32>::binary();
        let inner = Deferral::<i32>::binary();
        let handed = inner.promise();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let last = source
            .pipe_with(move |_| Outcome::from(handed))
            .pipe_with(move |r| {
                sink.lock().push(r.args()[0]);
                Outcome::value(r.args()[0] + 1)
            });

        source.affirm(vec![1]);
        assert!(!last.is_resolved());
        assert!(seen.lock().is_empty());

        inner.affirm(vec![4]);
        assert_eq!(*seen.lock(), [4]);
        assert_eq!(last.resolved().unwrap().args(), &[5]);
    }

    #[test]
    fn test_returned_future_forwards_by_path() {
        let shape = Potential::new([
            ("done", StateSpec::resolver("finish")),
            ("failed", StateSpec::resolver("fail")),
            ("retry", StateSpec::resolver("retry")),
        ])
        .unwrap();
        let source = Deferral::<i32>::new(shape.clone());
        let inner = Deferral::<i32>::new(shape);
        let handed = inner.promise();
        let next = source.pipe_with(move |_| handed.into());

        source.resolve("finish", vec![]).unwrap();
        inner.resolve("retry", vec![3]).unwrap();
        assert!(next.did("retry"));
    }

    #[test]
    fn test_resolver_owns_its_plain_descendants() {
        let shape = Potential::new([
            (
                "yes",
                StateSpec::resolvable("affirm", [("cached", StateSpec::Plain)]),
            ),
            ("no", StateSpec::resolver("negate")),
        ])
        .unwrap();
        let source = Deferral::<i32>::new(shape);
        let next = source.pipe_with(|r| Outcome::value(r.args().len() as i32));
        source.resolve_to("yes.cached", vec![9, 9]).unwrap();

        let resolution = next.resolved().unwrap();
        assert_eq!(resolution.path(), "yes.cached");
        assert_eq!(resolution.args(), &[2]);
    }

    #[test]
    fn test_interior_slot_stage_covers_resolver_descendants() {
        let shape = Potential::new([
            (
                "yes",
                StateSpec::resolvable("affirm", [("partial", StateSpec::resolver("partially"))]),
            ),
            ("no", StateSpec::resolver("negate")),
        ])
        .unwrap();
        let source = Deferral::<i32>::new(shape);
        let next = source.pipe([Some(stage(|r| Outcome::value(r.args()[0] * 10)))]);
        source.resolve("partially", vec![3]).unwrap();

        let resolution = next.resolved().unwrap();
        assert_eq!(resolution.path(), "yes.partial");
        assert_eq!(resolution.args(), &[30]);
    }

    #[test]
    fn test_descendant_stage_runs_when_ancestor_has_none() {
        let shape = Potential::new([
            (
                "yes",
                StateSpec::resolvable("affirm", [("partial", StateSpec::resolver("partially"))]),
            ),
            ("no", StateSpec::resolver("negate")),
        ])
        .unwrap();
        let source = Deferral::<i32>::new(shape);
        // Resolver slots in declaration order: affirm, partially, negate.
        let next = source.pipe([None, Some(stage(|_| Outcome::value(-1))), None]);
        source.resolve("partially", vec![3]).unwrap();
        assert_eq!(next.resolved().unwrap().args(), &[-1]);
    }

    struct Foreign {
        succeed: bool,
    }

    impl Thenable<i32> for Foreign {
        fn then_either(&self, on_affirm: ArgsFn<i32>, on_negate: ArgsFn<i32>) {
            if self.succeed {
                on_affirm(vec![100]);
            } else {
                on_negate(vec![-1]);
            }
        }
    }

    #[test]
    fn test_foreign_future_forwards_through_then_either() {
        let source = Deferral::<i32>::binary();
        let next = source.pipe_with(|_| Outcome::future(Foreign { succeed: false }));
        source.affirm(vec![]);
        assert!(next.did("negate"));
        assert_eq!(next.resolved().unwrap().args(), &[-1]);
    }

    #[test]
    fn test_context_propagates() {
        let source = Deferral::<i32>::binary();
        source.as_context("owner");
        let next = source.pipe_with(|_| Outcome::empty());
        source.affirm(vec![]);
        assert_eq!(next.resolved().unwrap().context_as::<&str>(), Some(&"owner"));
    }
}
