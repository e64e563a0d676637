//! # Multiplex: Bounded Pipeline Fan-out
//!
//! A `Multiplex` drains one shared [`OperationQueue`] with up to `width`
//! pipelines at a time. Width can change while running:
//!
//! * raising it starts the extra pipelines right away;
//! * lowering it retires surplus pipelines one by one, each just before it
//!   would dequeue its next operation, so shrinking never drops work.
//!
//! The multiplex affirms with the last pipeline's arguments once every
//! pipeline is gone and the queue is empty. A pipeline aborting on its own
//! aborts the whole multiplex.

use crate::pipeline::{Pipeline, PipelineStatus};
use crate::queue::OperationQueue;
use fate_core::{Deferral, FateError, FateResult, Payload, Promise};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::{Arc, Weak};
use uuid::Uuid;

struct Pool<A> {
    width: usize,
    status: PipelineStatus,
    epoch: u64,
    initial: Vec<A>,
    last: Vec<A>,
    deferral: Deferral<A>,
    active: BTreeMap<u64, Pipeline<A>>,
    /// Slots picked for retirement whose removal has not landed yet.
    retiring: BTreeSet<u64>,
    next_slot: u64,
    filling: bool,
}

impl<A> Pool<A> {
    fn live(&self) -> usize {
        self.active.len() - self.retiring.len()
    }
}

struct Inner<A> {
    id: Uuid,
    queue: OperationQueue<A>,
    pool: Mutex<Pool<A>>,
}

/// Clears `Pool::filling` on exit from a pipeline start, unwinding included.
struct FillGuard<'m, A> {
    inner: &'m Inner<A>,
}

impl<A> Drop for FillGuard<'_, A> {
    fn drop(&mut self) {
        self.inner.pool.lock().filling = false;
    }
}

pub struct Multiplex<A> {
    inner: Arc<Inner<A>>,
}

impl<A> Clone for Multiplex<A> {
    fn clone(&self) -> Self {
        Multiplex {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<A: Payload> Multiplex<A> {
    pub fn new(width: usize, queue: OperationQueue<A>) -> Self {
        Multiplex {
            inner: Arc::new(Inner {
                id: Uuid::new_v4(),
                queue,
                pool: Mutex::new(Pool {
                    width,
                    status: PipelineStatus::Idle,
                    epoch: 0,
                    initial: Vec::new(),
                    last: Vec::new(),
                    deferral: Deferral::binary(),
                    active: BTreeMap::new(),
                    retiring: BTreeSet::new(),
                    next_slot: 0,
                    filling: false,
                }),
            }),
        }
    }

    /// Maximal fan-out: one pipeline per queued operation.
    pub fn from_queue(queue: OperationQueue<A>) -> Self {
        let width = queue.len();
        Self::new(width, queue)
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn queue(&self) -> &OperationQueue<A> {
        &self.inner.queue
    }

    pub fn status(&self) -> PipelineStatus {
        self.inner.pool.lock().status
    }

    pub fn promise(&self) -> Promise<A> {
        self.inner.pool.lock().deferral.promise()
    }

    pub fn width(&self) -> usize {
        self.inner.pool.lock().width
    }

    /// Pipelines currently draining, retiring ones excluded.
    pub fn active(&self) -> usize {
        self.inner.pool.lock().live()
    }

    /// Arguments of the most recently finished pipeline.
    pub fn args(&self) -> Vec<A> {
        self.inner.pool.lock().last.clone()
    }

    pub fn set_width(&self, width: usize) -> &Self {
        let running = {
            let mut pool = self.inner.pool.lock();
            tracing::debug!(
                fate.multiplex = %self.inner.id,
                from = pool.width,
                to = width,
                "multiplex resized"
            );
            pool.width = width;
            (pool.status == PipelineStatus::Running && pool.live() < width).then_some(pool.epoch)
        };
        if let Some(epoch) = running {
            self.fill(epoch);
        }
        self
    }

    /// Start `width` pipelines, each with `args`.
    pub fn start(&self, args: Vec<A>) -> FateResult<Promise<A>> {
        let (epoch, promise) = {
            let mut pool = self.inner.pool.lock();
            if pool.status.is_active() {
                return Err(FateError::AlreadyRunning);
            }
            if pool.status != PipelineStatus::Idle {
                pool.deferral = Deferral::binary();
            }
            pool.status = PipelineStatus::Running;
            pool.epoch += 1;
            pool.last = args.clone();
            pool.initial = args;
            (pool.epoch, pool.deferral.promise())
        };
        tracing::debug!(fate.multiplex = %self.inner.id, width = self.width(), "multiplex started");
        self.fill(epoch);
        Ok(promise)
    }

    /// Stop every pipeline and affirm now.
    pub fn stop(&self) -> bool {
        self.conclude(None, PipelineStatus::Stopped, None)
    }

    /// Stop every pipeline and negate now.
    pub fn abort(&self) -> bool {
        self.conclude(None, PipelineStatus::Aborted, None)
    }

    /// Top the pool up to `width`, then check for completion.
    fn fill(&self, epoch: u64) {
        loop {
            let (slot, pipeline, args) = {
                let mut pool = self.inner.pool.lock();
                if pool.epoch != epoch || pool.status != PipelineStatus::Running {
                    return;
                }
                if pool.filling {
                    // The outer fill re-checks before it exits.
                    return;
                }
                if pool.live() >= pool.width || self.inner.queue.is_empty() {
                    break;
                }
                pool.filling = true;
                let slot = pool.next_slot;
                pool.next_slot += 1;
                let pipeline = Pipeline::new(self.inner.queue.clone());
                pool.active.insert(slot, pipeline.clone());
                (slot, pipeline, pool.initial.clone())
            };
            self.wire(epoch, slot, &pipeline);
            let started = {
                let _filling = FillGuard { inner: &self.inner };
                pipeline.start(args)
            };
            if let Err(error) = started {
                tracing::warn!(fate.multiplex = %self.inner.id, %error, "pipeline failed to start");
                return;
            }
        }
        self.complete_if_drained(epoch);
    }

    fn wire(&self, epoch: u64, slot: u64, pipeline: &Pipeline<A>) {
        let weak = Arc::downgrade(&self.inner);
        pipeline.set_on_continue(move |pipeline| {
            Self::upgrade(&weak).is_some_and(|mux| mux.will_continue(epoch, slot, pipeline))
        });

        let weak = Arc::downgrade(&self.inner);
        let promise = pipeline.promise();
        let affirmative = promise.potential().affirmative();
        promise.always(move |resolution| {
            if let Some(mux) = Self::upgrade(&weak) {
                let aborted = !affirmative.is_or_is_superstate_of(resolution.state());
                mux.remove(epoch, slot, aborted, resolution.to_args());
            }
        });
    }

    fn upgrade(weak: &Weak<Inner<A>>) -> Option<Multiplex<A>> {
        weak.upgrade().map(|inner| Multiplex { inner })
    }

    /// The pipeline in `slot` is about to dequeue.
    fn will_continue(&self, epoch: u64, slot: u64, pipeline: &Pipeline<A>) -> bool {
        enum Verdict {
            Retire,
            Continue { top_up: bool },
            Halt,
        }
        let verdict = {
            let mut pool = self.inner.pool.lock();
            if pool.epoch != epoch || pool.status != PipelineStatus::Running {
                Verdict::Halt
            } else if pool.retiring.contains(&slot) {
                Verdict::Halt
            } else if pool.live() > pool.width {
                pool.retiring.insert(slot);
                Verdict::Retire
            } else {
                Verdict::Continue {
                    top_up: pool.live() < pool.width && self.inner.queue.len() > 1,
                }
            }
        };
        match verdict {
            Verdict::Retire => {
                tracing::debug!(fate.multiplex = %self.inner.id, slot, "pipeline retired");
                pipeline.stop();
                false
            }
            Verdict::Continue { top_up } => {
                if top_up {
                    self.fill(epoch);
                }
                true
            }
            Verdict::Halt => false,
        }
    }

    fn remove(&self, epoch: u64, slot: u64, aborted: bool, args: Vec<A>) {
        {
            let mut pool = self.inner.pool.lock();
            if pool.epoch != epoch || pool.active.remove(&slot).is_none() {
                return;
            }
            let retired = pool.retiring.remove(&slot);
            pool.last = args.clone();
            if !aborted || retired {
                drop(pool);
                self.fill(epoch);
                return;
            }
        }
        self.conclude(Some(epoch), PipelineStatus::Aborted, Some(args));
    }

    fn complete_if_drained(&self, epoch: u64) {
        let done = {
            let pool = self.inner.pool.lock();
            pool.epoch == epoch
                && pool.status == PipelineStatus::Running
                && pool.active.is_empty()
                && self.inner.queue.is_empty()
        };
        if done {
            self.conclude(Some(epoch), PipelineStatus::Stopped, None);
        }
    }

    fn conclude(&self, epoch: Option<u64>, status: PipelineStatus, args: Option<Vec<A>>) -> bool {
        let (deferral, args, pipelines) = {
            let mut pool = self.inner.pool.lock();
            if !pool.status.is_active() || epoch.is_some_and(|epoch| epoch != pool.epoch) {
                return false;
            }
            if let Some(args) = args {
                pool.last = args;
            }
            pool.status = status;
            pool.epoch += 1;
            pool.retiring.clear();
            let pipelines: Vec<_> = std::mem::take(&mut pool.active).into_values().collect();
            (pool.deferral.clone(), pool.last.clone(), pipelines)
        };
        tracing::debug!(
            fate.multiplex = %self.inner.id,
            status = ?status,
            stopped = pipelines.len(),
            "multiplex finished"
        );
        for pipeline in pipelines {
            pipeline.stop();
        }
        match status {
            PipelineStatus::Aborted => deferral.negate(args),
            _ => deferral.affirm(args),
        };
        true
    }
}

impl<A> fmt::Debug for Multiplex<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Multiplex").field("id", &self.inner.id).finish()
    }
}
