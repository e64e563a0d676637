use crate::deferral::Deferral;
use crate::promise::{ArgsFn, Promise, Thenable};
use crate::resolution::{Context, Payload, Resolution};
use fate_flow::Potential;
use std::sync::Arc;

/// An already-affirmed future wrapping a plain value.
///
/// Lets combinators treat "value available now" and "future in flight" the
/// same way. There is nothing to register against and nothing to resolve:
/// `then` and `always` run their callbacks on the spot.
#[derive(Clone, Debug)]
pub struct Nullary<A> {
    inner: Deferral<A>,
    resolution: Arc<Resolution<A>>,
}

impl<A: Payload> Nullary<A> {
    pub fn new(context: Option<Context>, args: Vec<A>) -> Self {
        let potential = Potential::binary();
        let yes = potential.affirmative();
        let path = potential.relative_path(&yes).unwrap_or_default().to_string();
        let resolution = Arc::new(Resolution::new(yes, path, context, args));
        Nullary {
            inner: Deferral::from_resolution(potential, Arc::clone(&resolution)),
            resolution,
        }
    }

    pub fn affirmed(args: Vec<A>) -> Self {
        Self::new(None, args)
    }

    /// Runs `on_affirm` immediately. `on_negate` is never called.
    pub fn then<F, G>(&self, on_affirm: F, _on_negate: G) -> &Self
    where
        F: FnOnce(&Resolution<A>) + Send + 'static,
        G: FnOnce(&Resolution<A>) + Send + 'static,
    {
        self.inner.on_affirm(on_affirm);
        self
    }

    pub fn always<F>(&self, f: F) -> &Self
    where
        F: FnOnce(&Resolution<A>) + Send + 'static,
    {
        self.inner.always(f);
        self
    }

    pub fn promise(&self) -> Promise<A> {
        self.inner.promise()
    }

    pub fn resolution(&self) -> &Arc<Resolution<A>> {
        &self.resolution
    }

    pub fn args(&self) -> Vec<A> {
        self.resolution.to_args()
    }
}

impl<A: Payload> Thenable<A> for Nullary<A> {
    fn then_either(&self, on_affirm: ArgsFn<A>, _on_negate: ArgsFn<A>) {
        on_affirm(self.args());
    }

    fn as_native(&self) -> Option<Promise<A>> {
        Some(self.promise())
    }
}
