//! The error taxonomy shared by the store, the resolver and the validator.

use crate::pipeline::GenerationState;
use crate::store::Severity;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RegistryError {
    // --- Registration time ---
    #[error("parameter '{id}' is declared twice")]
    DuplicateParameter { id: String },
    #[error("parameter '{param}' has two producers: '{first}' and '{second}'")]
    DuplicateProducer { param: String, first: String, second: String },
    #[error("gate '{id}' is declared twice")]
    DuplicateGate { id: String },
    #[error("module '{module}' is malformed: {reason}")]
    MalformedModule { module: String, reason: String },
    #[error("gate '{gate}' is malformed: {reason}")]
    MalformedGate { gate: String, reason: String },

    // --- Store ---
    #[error("unknown parameter '{id}'{}", chain_suffix(.chain))]
    UnknownParameter { id: String, chain: Vec<String> },
    #[error("parameter '{id}' is already resolved")]
    AlreadyResolved { id: String },
    #[error("provenance mismatch for '{id}': {message}")]
    ProvenanceMismatch { id: String, message: String },
    #[error("store is sealed; cannot resolve '{id}'")]
    Sealed { id: String },

    // --- Resolution time ---
    #[error("parameter '{id}' has no producer and no axiomatic value{}", chain_suffix(.chain))]
    UnresolvedFundamental { id: String, chain: Vec<String> },
    #[error("cyclic dependency: {}", .cycle.join(" -> "))]
    CyclicDependency { cycle: Vec<String> },
    #[error("module '{module}' failed: {reason}{}", chain_suffix(.chain))]
    ModuleFailure { module: String, reason: String, chain: Vec<String> },

    // --- Validation time ---
    #[error("schema violation on '{id}': {message}")]
    SchemaViolation { id: String, message: String },
    #[error("dimensional inconsistency in '{module}' for '{id}': {message}")]
    DimensionalInconsistency { module: String, id: String, message: String },
    #[error("gate '{gate}' failed ({severity}): {message}")]
    GateFailure { gate: String, severity: Severity, message: String },

    // --- Generation lifecycle ---
    #[error("invalid generation transition {from:?} -> {to:?}")]
    InvalidTransition { from: GenerationState, to: GenerationState },
}

fn chain_suffix(chain: &[String]) -> String {
    if chain.is_empty() {
        String::new()
    } else {
        format!(" (via {})", chain.join(" -> "))
    }
}

impl RegistryError {
    pub fn unknown(id: impl Into<String>) -> Self {
        RegistryError::UnknownParameter { id: id.into(), chain: Vec::new() }
    }

    /// Validation-class failures reject a generation; everything else is structural.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            RegistryError::SchemaViolation { .. }
                | RegistryError::DimensionalInconsistency { .. }
                | RegistryError::GateFailure { .. }
        )
    }

    /// Attaches the resolution chain to errors that carry one.
    pub(crate) fn with_chain(mut self, path: &[String]) -> Self {
        match &mut self {
            RegistryError::UnknownParameter { chain, .. }
            | RegistryError::UnresolvedFundamental { chain, .. }
            | RegistryError::ModuleFailure { chain, .. } => {
                if chain.is_empty() {
                    *chain = path.to_vec();
                }
            }
            _ => {}
        }
        self
    }
}
