//! Rule-based validation of produced values.
//!
//! The `Validator` runs the schema and dimensional rules right after a module
//! produces its outputs, evaluates cross-consistency gates as soon as their
//! parameters are resolved, and closes out the remaining gates in a final pass.

pub use self::error::{GateOutcome, GateStatus, Subject, ValidationReport, Violation, ViolationKind};
pub use self::gate::{CustomPredicate, Gate, Predicate};
pub use self::validator::Validator;

// --- MODULE DECLARATIONS ---
mod error;
mod gate;
mod validator;
mod rules {
    pub mod dimensions;
    pub mod schema;
}
