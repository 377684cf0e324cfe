//! Static analysis over the catalog: unit algebra and graph topology.
pub mod dimensions;
pub mod topology;
pub mod units;

pub use units::{Dimension, UnitParseError};
