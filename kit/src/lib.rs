//! Fate facade crate.
//!
//! Re-exports the state tree, the deferral protocol and the pipeline runtime
//! behind a single entry point.
//!
//! ```rust
//! use fate::prelude::*;
//!
//! let deferral = Deferral::<i32>::binary();
//! let doubled = deferral.pipe_with(|r| Outcome::value(r.args()[0] * 2));
//! deferral.affirm(vec![21]);
//! assert_eq!(doubled.resolved().unwrap().args(), &[42]);
//! ```

pub use fate_core as core;
pub use fate_flow as flow;
pub use fate_runtime as runtime;

pub use fate_core::{
    Deferral, FateConfig, FateError, FateResult, Nullary, Outcome, Promise, Resolution, Thenable,
};
pub use fate_flow::{Potential, State, StateSpec};
pub use fate_runtime::{Multiplex, Operation, OperationQueue, Pipeline};

pub mod prelude {
    pub use fate_core::prelude::*;
    pub use fate_runtime::prelude::*;
}
