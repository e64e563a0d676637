use crate::pipeline::Pipeline;
use fate_core::{Outcome, Payload};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

type Run<A> = Box<dyn FnOnce(&Pipeline<A>, Vec<A>) -> Outcome<A> + Send>;

/// One unit of pipeline work.
///
/// Receives the arguments produced by the previous operation and returns the
/// next ones, or a future to wait on.
pub struct Operation<A> {
    run: Run<A>,
}

impl<A: Payload> Operation<A> {
    pub fn new<F>(f: F) -> Self
    where
        F: FnOnce(Vec<A>) -> Outcome<A> + Send + 'static,
    {
        Operation {
            run: Box::new(move |_: &Pipeline<A>, args: Vec<A>| f(args)),
        }
    }

    /// An operation that also sees the pipeline running it, e.g. to push more work.
    pub fn with_pipeline<F>(f: F) -> Self
    where
        F: FnOnce(&Pipeline<A>, Vec<A>) -> Outcome<A> + Send + 'static,
    {
        Operation { run: Box::new(f) }
    }

    pub(crate) fn run(self, pipeline: &Pipeline<A>, args: Vec<A>) -> Outcome<A> {
        (self.run)(pipeline, args)
    }
}

impl<A> fmt::Debug for Operation<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operation").finish_non_exhaustive()
    }
}

/// Shared double-ended operation queue.
///
/// Clones share storage, so every pipeline of a multiplex dequeues from the
/// same queue. Every mutation is serialized by one lock.
pub struct OperationQueue<A> {
    inner: Arc<Mutex<VecDeque<Operation<A>>>>,
}

impl<A> Clone for OperationQueue<A> {
    fn clone(&self) -> Self {
        OperationQueue {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<A: Payload> OperationQueue<A> {
    pub fn new() -> Self {
        OperationQueue {
            inner: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    /// Append at the back.
    pub fn push(&self, operation: Operation<A>) -> &Self {
        self.inner.lock().push_back(operation);
        self
    }

    /// Remove from the back.
    pub fn pop(&self) -> Option<Operation<A>> {
        self.inner.lock().pop_back()
    }

    /// Remove from the front. This is the dequeue pipelines use.
    pub fn shift(&self) -> Option<Operation<A>> {
        self.inner.lock().pop_front()
    }

    /// Prepend at the front, so it runs next.
    pub fn unshift(&self, operation: Operation<A>) -> &Self {
        self.inner.lock().push_front(operation);
        self
    }

    /// Remove `remove` operations starting at `index`, insert `insert` in their
    /// place, and return the removed ones. Out-of-range bounds are clamped.
    pub fn splice<I>(&self, index: usize, remove: usize, insert: I) -> Vec<Operation<A>>
    where
        I: IntoIterator<Item = Operation<A>>,
    {
        let mut queue = self.inner.lock();
        let start = index.min(queue.len());
        let end = start.saturating_add(remove).min(queue.len());
        let removed: Vec<_> = queue.drain(start..end).collect();
        for (offset, operation) in insert.into_iter().enumerate() {
            queue.insert(start + offset, operation);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

impl<A: Payload> Default for OperationQueue<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: Payload> FromIterator<Operation<A>> for OperationQueue<A> {
    fn from_iter<I: IntoIterator<Item = Operation<A>>>(iter: I) -> Self {
        OperationQueue {
            inner: Arc::new(Mutex::new(iter.into_iter().collect())),
        }
    }
}

impl<A> fmt::Debug for OperationQueue<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationQueue")
            .field("len", &self.inner.lock().len())
            .finish()
    }
}
