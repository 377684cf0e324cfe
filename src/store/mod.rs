//! The parameter store: declared and resolved parameters of one generation.
pub mod registry;
pub mod types;

pub use registry::ParameterStore;
pub use types::{
    Bounds, ParamId, ParamKind, ParamSchema, Parameter, Provenance, Quantity, Severity, Status, Unit,
};
