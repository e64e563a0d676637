pub mod callback;
pub mod config;
pub mod deferral;
pub mod error;
pub mod join;
pub mod nullary;
pub mod outcome;
pub mod pipe;
pub mod promise;
pub mod queue;
pub mod resolution;
pub mod telemetry;

pub mod prelude {
    pub use crate::deferral::Deferral;
    pub use crate::error::{FateError, FateResult};
    pub use crate::join::{
        Join, JoinFlags, JoinInput, join, unless, unless_any, unless_none, when, when_any,
        when_none,
    };
    pub use crate::nullary::Nullary;
    pub use crate::outcome::Outcome;
    pub use crate::pipe::stage;
    pub use crate::promise::{Promise, Thenable};
    pub use crate::queue::Phase;
    pub use crate::resolution::Resolution;
    pub use fate_flow::{Potential, State, StateSpec};
}

pub use callback::Callback;
pub use config::FateConfig;
pub use deferral::Deferral;
pub use error::{FateError, FateResult};
pub use join::{Join, JoinFlags, JoinInput, Polarity, Quorum};
pub use nullary::Nullary;
pub use outcome::Outcome;
pub use pipe::PipeStage;
pub use promise::{ArgsFn, Promise, ResolutionFuture, Thenable, resembles};
pub use queue::{CallbackQueueTree, Phase};
pub use resolution::{Context, Payload, Resolution};
pub use telemetry::{CallbackFailure, FailureKind, FailureReporter, TracingReporter};
