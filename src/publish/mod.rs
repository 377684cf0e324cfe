//! Publication of a validated generation.
//!
//! The canonical artifact is written first; every secondary export is then
//! rendered from that artifact.

pub mod artifact;
pub mod drift;
pub mod exports;
pub mod hash;

pub use artifact::{Artifact, ModuleEntry, ParameterEntry};
pub use drift::{compare, DriftReport};
pub use exports::{default_exports, ConstantsCsv, Export, FlatJson};

use crate::pipeline::{Generation, GenerationState};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum PublishError {
    #[error("I/O error on '{path}': {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("artifact JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unsupported artifact format version {0}")]
    UnsupportedVersion(u32),
    #[error("generation is {state:?}; only published generations are written")]
    NotPublished { state: GenerationState },
}

impl PublishError {
    pub(crate) fn io(path: &Path, source: io::Error) -> Self {
        PublishError::Io { path: path.to_path_buf(), source }
    }
}

/// Writes the canonical artifact and its secondary exports.
pub struct Publisher {
    output: PathBuf,
    exports: Vec<Box<dyn Export>>,
}

impl Publisher {
    pub fn new(output: impl Into<PathBuf>) -> Self {
        Self { output: output.into(), exports: default_exports() }
    }

    pub fn with_exports(mut self, exports: Vec<Box<dyn Export>>) -> Self {
        self.exports = exports;
        self
    }

    pub fn output(&self) -> &Path { &self.output }

    /// Snapshots, writes and returns the artifact. Exports land next to it.
    pub fn publish(&self, generation: &Generation<'_>) -> Result<Artifact, PublishError> {
        let artifact = Artifact::from_generation(generation)?;
        artifact.write_atomic(&self.output)?;

        let dir = self.output.parent().unwrap_or_else(|| Path::new(""));
        for export in &self.exports {
            let path = dir.join(export.file_name());
            artifact::write_atomic(&path, &export.render(&artifact)?)?;
        }
        info!(
            generation = %artifact.generation_id,
            parameters = artifact.parameters.len(),
            path = %self.output.display(),
            "published artifact"
        );
        Ok(artifact)
    }
}
