//! # Pipeline: Sequential Operation Drain
//!
//! A `Pipeline` dequeues operations from an [`OperationQueue`] one at a time,
//! feeding each the arguments the previous one produced. Immediate results
//! keep the drain going in the same call; a returned future suspends it until
//! that future resolves.
//!
//! ```text
//! idle → running ⇄ paused
//!          ↓
//!   stopped (affirmed) | aborted (negated)   → start() again for a fresh run
//! ```
//!
//! * `pause` takes effect at the next suspension point; an in-flight future is
//!   never interrupted.
//! * `stop` and `abort` resolve the pipeline's deferral immediately. A future
//!   still in flight is left alone and its late result is ignored.
//! * Each run has an epoch. Continuations carry the epoch they were created in
//!   and are dropped once it is stale.

use crate::queue::{Operation, OperationQueue};
use fate_core::{Deferral, FateError, FateResult, Outcome, Payload, Promise, Thenable};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Lifecycle of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineStatus {
    Idle,
    Running,
    Paused,
    Stopped,
    Aborted,
}

impl PipelineStatus {
    /// Running or paused: the run's deferral is still pending.
    pub fn is_active(self) -> bool {
        matches!(self, PipelineStatus::Running | PipelineStatus::Paused)
    }
}

/// Invoked before every dequeue; `false` keeps the pipeline from dequeuing.
pub type ContinueHook<A> = Arc<dyn Fn(&Pipeline<A>) -> bool + Send + Sync>;

type Settlement<A> = Result<Vec<A>, Vec<A>>;

/// Where the drain stands with respect to a returned future.
enum Awaiting<A> {
    Nothing,
    /// Subscribing right now; a result arriving meanwhile is parked here.
    Registering,
    Waiting,
    Settled(Settlement<A>),
}

struct Run<A> {
    status: PipelineStatus,
    epoch: u64,
    args: Vec<A>,
    deferral: Deferral<A>,
    pause_requested: bool,
    awaiting: Awaiting<A>,
}

struct Inner<A> {
    id: Uuid,
    queue: OperationQueue<A>,
    run: Mutex<Run<A>>,
    on_continue: Mutex<Option<ContinueHook<A>>>,
}

/// Shared handle to one pipeline.
pub struct Pipeline<A> {
    inner: Arc<Inner<A>>,
}

impl<A> Clone for Pipeline<A> {
    fn clone(&self) -> Self {
        Pipeline {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<A: Payload> Pipeline<A> {
    pub fn new(queue: OperationQueue<A>) -> Self {
        Pipeline {
            inner: Arc::new(Inner {
                id: Uuid::new_v4(),
                queue,
                run: Mutex::new(Run {
                    status: PipelineStatus::Idle,
                    epoch: 0,
                    args: Vec::new(),
                    deferral: Deferral::binary(),
                    pause_requested: false,
                    awaiting: Awaiting::Nothing,
                }),
                on_continue: Mutex::new(None),
            }),
        }
    }

    pub fn from_operations<I>(operations: I) -> Self
    where
        I: IntoIterator<Item = Operation<A>>,
    {
        Self::new(operations.into_iter().collect())
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    /// The queue this pipeline drains. Operations may be added while running.
    pub fn queue(&self) -> &OperationQueue<A> {
        &self.inner.queue
    }

    pub fn status(&self) -> PipelineStatus {
        self.inner.run.lock().status
    }

    /// Arguments produced by the most recent operation.
    pub fn args(&self) -> Vec<A> {
        self.inner.run.lock().args.clone()
    }

    /// Promise of the current run, or of the next run while idle.
    pub fn promise(&self) -> Promise<A> {
        self.inner.run.lock().deferral.promise()
    }

    pub fn set_on_continue<F>(&self, hook: F) -> &Self
    where
        F: Fn(&Pipeline<A>) -> bool + Send + Sync + 'static,
    {
        *self.inner.on_continue.lock() = Some(Arc::new(hook));
        self
    }

    pub fn same(&self, other: &Pipeline<A>) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Begin draining with `args`. A finished pipeline restarts with a fresh
    /// deferral.
    pub fn start(&self, args: Vec<A>) -> FateResult<Promise<A>> {
        let (epoch, promise) = {
            let mut run = self.inner.run.lock();
            if run.status.is_active() {
                return Err(FateError::AlreadyRunning);
            }
            if run.status != PipelineStatus::Idle {
                run.deferral = Deferral::binary();
            }
            run.status = PipelineStatus::Running;
            run.epoch += 1;
            run.args = args;
            run.pause_requested = false;
            run.awaiting = Awaiting::Nothing;
            (run.epoch, run.deferral.promise())
        };
        tracing::debug!(fate.pipeline = %self.id(), epoch, "pipeline started");
        self.drain(epoch);
        Ok(promise)
    }

    /// Halt at the next suspension point.
    pub fn pause(&self) -> &Self {
        let mut run = self.inner.run.lock();
        if run.status == PipelineStatus::Running {
            run.pause_requested = true;
        }
        self
    }

    /// Continue a paused pipeline, or withdraw a pause that has not landed yet.
    pub fn resume(&self) -> &Self {
        let epoch = {
            let mut run = self.inner.run.lock();
            run.pause_requested = false;
            if run.status != PipelineStatus::Paused {
                return self;
            }
            run.status = PipelineStatus::Running;
            run.epoch
        };
        tracing::debug!(fate.pipeline = %self.id(), "pipeline resumed");
        self.drain(epoch);
        self
    }

    /// Affirm now with the current arguments. Returns false if not active.
    pub fn stop(&self) -> bool {
        self.conclude(None, PipelineStatus::Stopped, None)
    }

    /// Negate now with the current arguments. Returns false if not active.
    pub fn abort(&self) -> bool {
        self.conclude(None, PipelineStatus::Aborted, None)
    }

    fn is_current(&self, epoch: u64) -> bool {
        let run = self.inner.run.lock();
        run.epoch == epoch && run.status == PipelineStatus::Running
    }

    fn drain(&self, epoch: u64) {
        let span = tracing::info_span!("Pipeline", fate.pipeline = %self.id());
        let _entered = span.enter();

        loop {
            if !self.is_current(epoch) {
                return;
            }
            let hook = self.inner.on_continue.lock().clone();
            if let Some(hook) = hook {
                if !hook(self) || !self.is_current(epoch) {
                    return;
                }
            }

            let Some(operation) = self.inner.queue.shift() else {
                self.conclude(Some(epoch), PipelineStatus::Stopped, None);
                return;
            };
            let args = self.args();
            let outcome = operation.run(self, args);

            let (settlement, suspended) = match outcome {
                Outcome::Value(value) => (Ok(vec![value]), false),
                Outcome::Args(args) => (Ok(args), false),
                Outcome::Future(future) => match self.subscribe(epoch, &*future) {
                    Some(settlement) => (settlement, true),
                    None => return,
                },
            };
            if !self.advance(epoch, settlement) || (suspended && self.take_pause(epoch)) {
                return;
            }
        }
    }

    /// Wait on `future`. Returns its settlement if it was already resolved.
    fn subscribe(&self, epoch: u64, future: &dyn Thenable<A>) -> Option<Settlement<A>> {
        {
            let mut run = self.inner.run.lock();
            if run.epoch != epoch {
                return None;
            }
            run.awaiting = Awaiting::Registering;
        }
        let (yes, no) = (self.clone(), self.clone());
        future.then_either(
            Box::new(move |args| yes.settled(epoch, Ok(args))),
            Box::new(move |args| no.settled(epoch, Err(args))),
        );

        let mut run = self.inner.run.lock();
        if run.epoch != epoch {
            return None;
        }
        match std::mem::replace(&mut run.awaiting, Awaiting::Nothing) {
            Awaiting::Settled(settlement) => Some(settlement),
            _ => {
                run.awaiting = Awaiting::Waiting;
                None
            }
        }
    }

    /// Continuation of an asynchronous operation.
    fn settled(&self, epoch: u64, settlement: Settlement<A>) {
        {
            let mut run = self.inner.run.lock();
            if run.epoch != epoch {
                tracing::trace!(fate.pipeline = %self.inner.id, "late operation result ignored");
                return;
            }
            match std::mem::replace(&mut run.awaiting, Awaiting::Nothing) {
                Awaiting::Registering => {
                    run.awaiting = Awaiting::Settled(settlement);
                    return;
                }
                Awaiting::Waiting => {}
                other => {
                    run.awaiting = other;
                    return;
                }
            }
        }
        if self.advance(epoch, settlement) && !self.take_pause(epoch) {
            self.drain(epoch);
        }
    }

    /// Record one operation's result. Returns true if draining should go on.
    fn advance(&self, epoch: u64, settlement: Settlement<A>) -> bool {
        match settlement {
            Ok(args) => {
                let mut run = self.inner.run.lock();
                if run.epoch != epoch || run.status != PipelineStatus::Running {
                    return false;
                }
                run.args = args;
                true
            }
            Err(args) => {
                self.conclude(Some(epoch), PipelineStatus::Aborted, Some(args));
                false
            }
        }
    }

    /// Apply a pending pause once an asynchronous result has landed.
    fn take_pause(&self, epoch: u64) -> bool {
        let mut run = self.inner.run.lock();
        if run.epoch == epoch && run.pause_requested && run.status == PipelineStatus::Running {
            run.pause_requested = false;
            run.status = PipelineStatus::Paused;
            return true;
        }
        false
    }

    /// End the current run. `epoch` of `None` means "whatever run is active".
    fn conclude(&self, epoch: Option<u64>, status: PipelineStatus, args: Option<Vec<A>>) -> bool {
        let (deferral, args) = {
            let mut run = self.inner.run.lock();
            if !run.status.is_active() || epoch.is_some_and(|epoch| epoch != run.epoch) {
                return false;
            }
            if let Some(args) = args {
                run.args = args;
            }
            run.status = status;
            run.epoch += 1;
            run.pause_requested = false;
            run.awaiting = Awaiting::Nothing;
            (run.deferral.clone(), run.args.clone())
        };
        tracing::debug!(fate.pipeline = %self.id(), status = ?status, "pipeline finished");
        match status {
            PipelineStatus::Aborted => deferral.negate(args),
            _ => deferral.affirm(args),
        };
        true
    }
}

impl<A> fmt::Debug for Pipeline<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline").field("id", &self.inner.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fate_core::Nullary;

    type Seen = Arc<Mutex<Vec<Vec<i32>>>>;

    fn add(n: i32) -> Operation<i32> {
        Operation::new(move |args: Vec<i32>| Outcome::value(args[0] + n))
    }

    fn record(seen: &Seen) -> Operation<i32> {
        let seen = Arc::clone(seen);
        Operation::new(move |args: Vec<i32>| {
            seen.lock().push(args.clone());
            Outcome::args(args)
        })
    }

    fn wait_on(deferral: &Deferral<i32>) -> Operation<i32> {
        let promise = deferral.promise();
        Operation::new(move |_: Vec<i32>| Outcome::from(promise))
    }

    #[test]
    fn test_synchronous_drain() {
        let pipeline = Pipeline::from_operations([add(1), add(10)]);
        let promise = pipeline.start(vec![3]).unwrap();

        assert_eq!(pipeline.status(), PipelineStatus::Stopped);
        assert!(promise.did("affirm"));
        assert_eq!(promise.resolved().unwrap().args(), &[14]);
    }

    #[test]
    fn test_future_result_feeds_next_operation() {
        let seen: Seen = Arc::default();
        let inner = Deferral::binary();
        let pipeline = Pipeline::from_operations([add(1), wait_on(&inner), record(&seen)]);
        let promise = pipeline.start(vec![0]).unwrap();

        assert_eq!(pipeline.status(), PipelineStatus::Running);
        assert_eq!(pipeline.args(), [1]);
        assert!(seen.lock().is_empty());

        inner.affirm(vec![4]);
        assert_eq!(pipeline.args(), [4]);
        assert_eq!(*seen.lock(), [vec![4]]);
        assert!(promise.did("affirm"));
    }

    #[test]
    fn test_negated_future_aborts() {
        let seen: Seen = Arc::default();
        let inner = Deferral::binary();
        let pipeline = Pipeline::from_operations([wait_on(&inner), record(&seen)]);
        let promise = pipeline.start(vec![]).unwrap();

        inner.negate(vec![-1]);
        assert_eq!(pipeline.status(), PipelineStatus::Aborted);
        assert!(promise.did("negate"));
        assert_eq!(promise.resolved().unwrap().args(), &[-1]);
        assert!(seen.lock().is_empty());
        assert_eq!(pipeline.queue().len(), 1);
    }

    #[test]
    fn test_awaited_future_cannot_land_on_the_potential_root() {
        let gate = Deferral::binary();
        let pipeline = Pipeline::from_operations([wait_on(&gate)]);
        let promise = pipeline.start(vec![]).unwrap();

        assert!(gate.resolve_to("", vec![2]).is_err());
        assert_eq!(pipeline.status(), PipelineStatus::Running);

        gate.affirm(vec![2]);
        assert_eq!(pipeline.status(), PipelineStatus::Stopped);
        assert_eq!(promise.resolved().unwrap().args(), &[2]);
    }

    #[test]
    fn test_pause_lands_at_next_suspension() {
        let seen: Seen = Arc::default();
        let inner = Deferral::binary();
        let pipeline = Pipeline::from_operations([wait_on(&inner), record(&seen)]);
        pipeline.start(vec![]).unwrap();

        pipeline.pause();
        assert_eq!(pipeline.status(), PipelineStatus::Running);
        inner.affirm(vec![2]);
        assert_eq!(pipeline.status(), PipelineStatus::Paused);
        assert!(seen.lock().is_empty());

        pipeline.resume();
        assert_eq!(*seen.lock(), [vec![2]]);
        assert_eq!(pipeline.status(), PipelineStatus::Stopped);
    }

    #[test]
    fn test_stop_ignores_in_flight_result() {
        let seen: Seen = Arc::default();
        let inner = Deferral::binary();
        let pipeline = Pipeline::from_operations([add(1), wait_on(&inner), record(&seen)]);
        let promise = pipeline.start(vec![1]).unwrap();

        assert!(pipeline.stop());
        assert!(promise.did("affirm"));
        assert_eq!(promise.resolved().unwrap().args(), &[2]);
        assert!(!pipeline.abort());

        inner.affirm(vec![9]);
        assert!(seen.lock().is_empty());
        assert_eq!(pipeline.args(), [2]);
    }

    #[test]
    fn test_restart_and_already_running() {
        let inner = Deferral::binary();
        let pipeline = Pipeline::from_operations([wait_on(&inner)]);
        let first = pipeline.start(vec![]).unwrap();
        assert_eq!(pipeline.start(vec![]).unwrap_err(), FateError::AlreadyRunning);

        pipeline.abort();
        assert!(first.did("negate"));

        pipeline.queue().push(add(5));
        let second = pipeline.start(vec![1]).unwrap();
        assert!(!second.same(&first));
        assert_eq!(second.resolved().unwrap().args(), &[6]);
    }

    #[test]
    fn test_operations_extend_their_pipeline() {
        let extend = Operation::with_pipeline(|pipeline: &Pipeline<i32>, args: Vec<i32>| {
            pipeline.queue().push(add(100));
            Outcome::args(args)
        });
        let pipeline = Pipeline::from_operations([extend]);
        let promise = pipeline.start(vec![1]).unwrap();
        assert_eq!(promise.resolved().unwrap().args(), &[101]);
    }

    #[test]
    fn test_resolved_future_continues_in_place() {
        let ready = Operation::new(|_: Vec<i32>| Outcome::future(Nullary::affirmed(vec![7])));
        let pipeline = Pipeline::from_operations([ready, add(1)]);
        let promise = pipeline.start(vec![]).unwrap();
        assert_eq!(promise.resolved().unwrap().args(), &[8]);
    }

    #[test]
    fn test_continue_hook_can_hold_the_drain() {
        let pipeline = Pipeline::from_operations([add(1), add(1)]);
        pipeline.set_on_continue(|p: &Pipeline<i32>| p.args().first().is_none_or(|n| *n < 1));
        pipeline.start(vec![0]).unwrap();

        assert_eq!(pipeline.status(), PipelineStatus::Running);
        assert_eq!(pipeline.args(), [1]);
        assert_eq!(pipeline.queue().len(), 1);
    }
}
