use thiserror::Error;

/// Structural errors raised while declaring a [`crate::Potential`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FlowError {
    #[error("resolver name `{0}` is declared more than once")]
    DuplicateResolver(String),
    #[error("state `{0}` is declared more than once under the same superstate")]
    DuplicateState(String),
    #[error("invalid state name `{0}`: names must be non-empty and must not contain '.'")]
    InvalidStateName(String),
    #[error("invalid potential declaration: {0}")]
    InvalidSpec(String),
    #[error("a potential must declare at least one resolved state")]
    EmptyPotential,
}
