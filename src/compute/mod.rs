//! Computation modules, the catalog they are registered in, and the resolver
//! that runs them on demand.
pub mod catalog;
pub mod formula;
pub mod module;
pub mod resolver;

pub use catalog::{Catalog, ModuleId, ParamDecl};
pub use formula::{Formula, FormulaError};
pub use module::{IdList, Kernel, Module, ModuleSpec, Outputs};
pub use resolver::{Resolver, ResolverStats};
