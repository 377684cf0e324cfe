//! Human-readable renderings of a generation.
pub mod trace;

pub use trace::format_trace;
