//! Registry manifests.
//!
//! A manifest declares a registry in YAML so it can be run from the command
//! line without writing Rust:
//!
//! ```yaml
//! apiVersion: paramreg/v1
//! kind: Registry
//! label: baseline
//!
//! parameters:
//!   alpha: { unit: "1", kind: fundamental, value: 0.0072973525693, uncertainty: 1.1e-12 }
//!   inv_alpha: { unit: "1" }
//!
//! modules:
//!   fine_structure:
//!     inputs: [alpha]
//!     outputs:
//!       inv_alpha: "1 / alpha"
//!
//! gates:
//!   inv_alpha_range:
//!     check: [inv_alpha]
//!     predicate: { type: in_range, min: 137.0, max: 137.1 }
//! ```
//!
//! Native kernels and custom gate predicates are only available through the
//! Rust API.

pub mod manifest;

pub use manifest::{parse_override, GateDecl, Manifest, ModuleDecl, ParameterDecl, PredicateDecl};

use crate::error::RegistryError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read manifest: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse manifest YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid apiVersion: expected 'paramreg/v1', got '{0}'")]
    InvalidApiVersion(String),

    #[error("invalid kind: expected 'Registry', got '{0}'")]
    InvalidKind(String),

    #[error("unknown parameter '{0}'")]
    UnknownParameter(String),

    #[error("invalid override '{0}': expected ID=VALUE with a finite number")]
    InvalidOverride(String),

    #[error("{0}")]
    Semantic(String),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

pub type ConfigResult<T> = Result<T, ConfigError>;
