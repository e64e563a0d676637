use fate_flow::State;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Bound shared by every resolution argument type.
pub trait Payload: Clone + Send + Sync + 'static {}

impl<T> Payload for T where T: Clone + Send + Sync + 'static {}

/// Caller-supplied context a deferral resolves "as".
pub type Context = Arc<dyn Any + Send + Sync>;

/// The frozen outcome of one deferral.
///
/// Created exactly once, at resolution, and shared with every callback that
/// observes it afterwards.
pub struct Resolution<A> {
    pub(crate) state: State,
    pub(crate) relative_path: String,
    pub(crate) context: Option<Context>,
    pub(crate) args: Vec<A>,
}

impl<A> Resolution<A> {
    pub(crate) fn new(state: State, relative_path: String, context: Option<Context>, args: Vec<A>) -> Self {
        Resolution {
            state,
            relative_path,
            context,
            args,
        }
    }

    /// The resolved state.
    pub fn state(&self) -> &State {
        &self.state
    }

    /// Path of the resolved state relative to the potential root, e.g. `yes`.
    pub fn path(&self) -> &str {
        &self.relative_path
    }

    pub fn args(&self) -> &[A] {
        &self.args
    }

    pub fn first(&self) -> Option<&A> {
        self.args.first()
    }

    /// Context bound with `as_context`; `None` means the deferral itself.
    pub fn context(&self) -> Option<&Context> {
        self.context.as_ref()
    }

    pub fn context_as<T: Any>(&self) -> Option<&T> {
        self.context.as_ref().and_then(|ctx| ctx.downcast_ref())
    }
}

impl<A: Clone> Resolution<A> {
    pub fn to_args(&self) -> Vec<A> {
        self.args.clone()
    }
}

impl<A: fmt::Debug> fmt::Debug for Resolution<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolution")
            .field("state", &self.relative_path)
            .field("has_context", &self.context.is_some())
            .field("args", &self.args)
            .finish()
    }
}
