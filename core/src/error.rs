use fate_flow::FlowError;
use thiserror::Error;

pub type FateResult<T> = Result<T, FateError>;

/// Structural misuse of the deferral protocol.
///
/// Business failures never show up here: they travel through the
/// resolution channel as a negative outcome.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FateError {
    #[error("state `{path}` is not part of this potential")]
    InvalidState { path: String },
    #[error("no state of this potential is resolved by `{0}`")]
    UnknownResolver(String),
    #[error("pipeline is already running")]
    AlreadyRunning,
    #[error("deferral was dropped before it resolved")]
    Abandoned,
    #[error("configuration error: {0}")]
    Config(String),
    #[error(transparent)]
    Flow(#[from] FlowError),
}

impl FateError {
    pub fn invalid_state(path: impl Into<String>) -> Self {
        FateError::InvalidState { path: path.into() }
    }
}
