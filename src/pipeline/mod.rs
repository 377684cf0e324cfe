//! Drives a generation from declaration to a terminal state.
pub mod generation;
pub mod options;

pub use generation::{run, Generation, GenerationState};
pub use options::{FailurePolicy, ResolveMode, RunOptions};
