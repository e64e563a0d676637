pub mod multiplex;
pub mod pipeline;
pub mod queue;
pub mod task;

pub mod prelude {
    pub use crate::multiplex::Multiplex;
    pub use crate::pipeline::{Pipeline, PipelineStatus};
    pub use crate::queue::{Operation, OperationQueue};
    pub use crate::task::{defer, delay};
}

pub use multiplex::Multiplex;
pub use pipeline::{ContinueHook, Pipeline, PipelineStatus};
pub use queue::{Operation, OperationQueue};
