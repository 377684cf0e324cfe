//! The canonical artifact: the single source of truth every other output derives from.

use super::{hash, PublishError};
use crate::pipeline::{Generation, GenerationState};
use crate::store::{Bounds, ParamKind, ParamSchema, Parameter, ParameterStore, Quantity, Severity, Status, Unit};
use crate::validation::{GateOutcome, Violation};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

pub const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterEntry {
    /// Declaration position, so a reload reproduces the store's order.
    pub index: u32,
    pub value: Option<f64>,
    pub uncertainty: Option<f64>,
    pub unit: Unit,
    pub status: Status,
    pub kind: ParamKind,
    pub producer: Option<String>,
    pub dependencies: BTreeSet<String>,
    #[serde(default)]
    pub bounds: Bounds,
    #[serde(default)]
    pub severity: Severity,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleEntry {
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    /// Output id -> declared formula text. Native outputs without one are absent.
    pub formulas: BTreeMap<String, String>,
    pub invocations: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub format_version: u32,
    pub generation_id: String,
    pub label: String,
    pub axiom_hash: String,
    pub catalog_hash: String,
    pub parameters: BTreeMap<String, ParameterEntry>,
    pub modules: BTreeMap<String, ModuleEntry>,
    pub gates: Vec<GateOutcome>,
    /// Non-fatal violations that were tolerated.
    #[serde(default)]
    pub warnings: Vec<Violation>,
}

impl Artifact {
    /// Snapshots a published generation. Anything else is refused.
    pub fn from_generation(generation: &Generation<'_>) -> Result<Self, PublishError> {
        if generation.state() != GenerationState::Published {
            return Err(PublishError::NotPublished { state: generation.state() });
        }
        let store = generation.store();
        let catalog = generation.catalog();

        let parameters = store
            .iter()
            .enumerate()
            .map(|(i, p)| {
                let entry = ParameterEntry {
                    index: i as u32,
                    value: p.value(),
                    uncertainty: p.uncertainty(),
                    unit: p.schema.unit.clone(),
                    status: p.status(),
                    kind: p.kind,
                    producer: p.produced_by.clone(),
                    dependencies: p.depends_on.clone(),
                    bounds: p.schema.bounds,
                    severity: p.schema.severity,
                };
                (p.id.clone(), entry)
            })
            .collect();

        let modules = catalog
            .modules()
            .iter()
            .map(|m| {
                let formulas = m
                    .outputs
                    .iter()
                    .zip(&m.formulas)
                    .filter_map(|(o, f)| f.as_ref().map(|f| (o.clone(), f.source().to_string())))
                    .collect();
                let entry = ModuleEntry {
                    inputs: m.inputs.to_vec(),
                    outputs: m.outputs.to_vec(),
                    formulas,
                    invocations: generation.stats().invocations_of(&m.id),
                };
                (m.id.clone(), entry)
            })
            .collect();

        let axiom_hash = generation.axiom_hash();
        Ok(Self {
            format_version: FORMAT_VERSION,
            generation_id: hash::generation_id(generation.label(), &axiom_hash),
            label: generation.label().to_string(),
            axiom_hash,
            catalog_hash: hash::catalog_hash(catalog),
            parameters,
            modules,
            gates: generation.report().gates.clone(),
            warnings: generation.report().warnings().cloned().collect(),
        })
    }

    pub fn to_json(&self) -> Result<String, PublishError> {
        let mut json = serde_json::to_string_pretty(self)?;
        json.push('\n');
        Ok(json)
    }

    pub fn from_json(json: &str) -> Result<Self, PublishError> {
        let artifact: Artifact = serde_json::from_str(json)?;
        if artifact.format_version != FORMAT_VERSION {
            return Err(PublishError::UnsupportedVersion(artifact.format_version));
        }
        Ok(artifact)
    }

    pub fn load(path: &Path) -> Result<Self, PublishError> {
        let json = fs::read_to_string(path).map_err(|e| PublishError::io(path, e))?;
        Self::from_json(&json)
    }

    /// Writes the artifact so readers see either the old file or the new one, never a partial write.
    pub fn write_atomic(&self, path: &Path) -> Result<(), PublishError> {
        write_atomic(path, &self.to_json()?)
    }

    /// Resolved entries in declaration order.
    pub fn ordered(&self) -> Vec<(&String, &ParameterEntry)> {
        let mut entries: Vec<_> = self.parameters.iter().collect();
        entries.sort_by_key(|(_, e)| e.index);
        entries
    }
}

/// Temp file in the destination directory, then rename over the target.
pub(crate) fn write_atomic(path: &Path, contents: &str) -> Result<(), PublishError> {
    let dir = match path.parent() {
        Some(d) if !d.as_os_str().is_empty() => d,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir).map_err(|e| PublishError::io(dir, e))?;
    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| PublishError::io(dir, e))?;
    tmp.write_all(contents.as_bytes()).map_err(|e| PublishError::io(path, e))?;
    tmp.persist(path).map_err(|e| PublishError::io(path, e.error))?;
    Ok(())
}

impl ParameterStore {
    /// Rebuilds the sealed store a published artifact was made from.
    pub fn from_artifact(artifact: &Artifact) -> Self {
        let params = artifact
            .ordered()
            .into_iter()
            .map(|(id, e)| Parameter {
                id: id.clone(),
                kind: e.kind,
                schema: ParamSchema { unit: e.unit.clone(), bounds: e.bounds, severity: e.severity },
                quantity: e.value.map(|value| Quantity { value, uncertainty: e.uncertainty }),
                produced_by: e.producer.clone(),
                depends_on: e.dependencies.clone(),
            })
            .collect();
        ParameterStore::from_parameters(params)
    }
}
