//! Parameter dependency-resolution and validation registry.
//!
//! Computation modules declare the parameters they consume and produce. The
//! registry resolves them on demand in a deterministic order, memoizes every
//! value, validates each result against its schema, its units and declarative
//! gates, and publishes one canonical, content-hashed artifact per generation.
//!
//! ```
//! use param_registry_core::compute::{Catalog, ModuleSpec};
//! use param_registry_core::pipeline::{run, GenerationState, RunOptions};
//! use param_registry_core::store::{ParamKind, ParamSchema};
//!
//! let mut catalog = Catalog::new();
//! catalog.declare("x", ParamSchema::new("1"), ParamKind::Derived).unwrap();
//! catalog.declare("y", ParamSchema::new("1"), ParamKind::Derived).unwrap();
//! catalog.register(ModuleSpec::new("A").formula("x", "2.0")).unwrap();
//! catalog.register(ModuleSpec::new("B").inputs(["x"]).formula("y", "x * 3.0")).unwrap();
//!
//! let generation = run(&catalog, [], &RunOptions::default()).unwrap();
//! assert_eq!(generation.state(), GenerationState::Published);
//! assert_eq!(generation.store().get("y").unwrap().value(), Some(6.0));
//! ```

pub mod analysis;
pub mod compute;
pub mod config;
pub mod display;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod publish;
pub mod store;
pub mod validation;

pub use error::RegistryError;
