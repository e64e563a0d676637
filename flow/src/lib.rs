//! Fate Flow - Resolution State Tree Layer
//!
//! This crate defines the **structural** aspects of Fate:
//! - `State`: a path-addressable node in a resolution state tree
//! - `StateSpec`: the declarative shape of one state
//! - `Potential`: the set of terminal outcomes a deferral may resolve into
//!
//! **IMPORTANT**: This layer is Pure Rust - no callbacks, no IO, no Async.

pub mod error;
pub mod potential;
pub mod state;

pub use error::FlowError;
pub use potential::{Potential, StateSpec};
pub use state::{State, StateId};
