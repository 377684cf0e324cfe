//! Manifest type definitions and loading.

use super::{ConfigError, ConfigResult};
use crate::compute::{Catalog, ModuleSpec};
use crate::store::{Bounds, ParamKind, ParamSchema, Quantity, Severity};
use crate::validation::{Gate, Predicate};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const API_VERSION: &str = "paramreg/v1";
pub const KIND: &str = "Registry";

/// A registry declared in YAML: parameters, formula modules and gates.
///
/// Map order is preserved and is the registration order, which breaks ties in
/// the topological sort.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default = "default_kind")]
    pub kind: String,
    /// Prefix of generation ids built from this manifest.
    #[serde(default = "default_label")]
    pub label: String,
    #[serde(default)]
    pub parameters: IndexMap<String, ParameterDecl>,
    #[serde(default)]
    pub modules: IndexMap<String, ModuleDecl>,
    #[serde(default)]
    pub gates: IndexMap<String, GateDecl>,
}

fn default_api_version() -> String { API_VERSION.to_string() }
fn default_kind() -> String { KIND.to_string() }
fn default_label() -> String { "local".to_string() }

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDecl {
    pub unit: String,
    #[serde(default = "default_param_kind")]
    pub kind: ParamKind,
    /// Axiomatic value. Only fundamentals take one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uncertainty: Option<f64>,
    #[serde(default)]
    pub bounds: Bounds,
    #[serde(default)]
    pub severity: Severity,
}

fn default_param_kind() -> ParamKind { ParamKind::Derived }

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleDecl {
    #[serde(default)]
    pub inputs: Vec<String>,
    /// Output id -> formula over the inputs.
    pub outputs: IndexMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PredicateDecl {
    InRange {
        #[serde(default)]
        min: Option<f64>,
        #[serde(default)]
        max: Option<f64>,
    },
    Agree { sigmas: f64 },
    RelativeTolerance { rel: f64 },
    Ordered,
}

impl From<&PredicateDecl> for Predicate {
    fn from(decl: &PredicateDecl) -> Self {
        match *decl {
            PredicateDecl::InRange { min, max } => Predicate::InRange { min, max },
            PredicateDecl::Agree { sigmas } => Predicate::Agree { sigmas },
            PredicateDecl::RelativeTolerance { rel } => Predicate::RelativeTolerance { rel },
            PredicateDecl::Ordered => Predicate::Ordered,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateDecl {
    pub check: Vec<String>,
    pub predicate: PredicateDecl,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Manifest {
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(yaml: &str) -> ConfigResult<Self> {
        let manifest: Manifest = serde_yaml::from_str(yaml)?;
        manifest.validate_schema()?;
        Ok(manifest)
    }

    fn validate_schema(&self) -> ConfigResult<()> {
        if self.api_version != API_VERSION {
            return Err(ConfigError::InvalidApiVersion(self.api_version.clone()));
        }
        if self.kind != KIND {
            return Err(ConfigError::InvalidKind(self.kind.clone()));
        }
        for (id, p) in &self.parameters {
            if p.kind != ParamKind::Fundamental && (p.value.is_some() || p.uncertainty.is_some()) {
                return Err(ConfigError::Semantic(format!(
                    "parameter '{}' is {:?} and cannot carry an axiomatic value",
                    id, p.kind
                )));
            }
        }
        Ok(())
    }

    /// Builds the catalog. Registration errors (duplicate producers, cycles,
    /// bad formulas) surface here, before anything is resolved.
    pub fn catalog(&self) -> ConfigResult<Catalog> {
        let mut catalog = Catalog::new();
        for (id, p) in &self.parameters {
            let schema = ParamSchema { unit: p.unit.as_str().into(), bounds: p.bounds, severity: p.severity };
            catalog.declare(id.clone(), schema, p.kind)?;
        }
        for (id, m) in &self.modules {
            let mut spec = ModuleSpec::new(id.clone()).inputs(m.inputs.iter().cloned());
            for (output, formula) in &m.outputs {
                spec = spec.formula(output.clone(), formula.clone());
            }
            catalog.register(spec)?;
        }
        for (id, g) in &self.gates {
            let mut gate = Gate::new(id.clone(), g.check.clone(), Predicate::from(&g.predicate)).severity(g.severity);
            if let Some(message) = &g.message {
                gate = gate.message(message.clone());
            }
            catalog.add_gate(gate)?;
        }
        Ok(catalog)
    }

    /// The axiomatic values declared for fundamentals, in declaration order.
    pub fn axioms(&self) -> Vec<(String, Quantity)> {
        self.parameters
            .iter()
            .filter(|(_, p)| p.kind == ParamKind::Fundamental)
            .filter_map(|(id, p)| p.value.map(|value| (id.clone(), Quantity { value, uncertainty: p.uncertainty })))
            .collect()
    }

    /// Replaces the value of a fundamental, keeping its uncertainty.
    pub fn set_axiom(&mut self, id: &str, value: f64) -> ConfigResult<()> {
        let decl = self.parameters.get_mut(id).ok_or_else(|| ConfigError::UnknownParameter(id.to_string()))?;
        if decl.kind != ParamKind::Fundamental {
            return Err(ConfigError::Semantic(format!("'{}' is not fundamental and cannot be overridden", id)));
        }
        decl.value = Some(value);
        Ok(())
    }

    /// Applies `ID=VALUE` overrides in order.
    pub fn apply_overrides<S: AsRef<str>>(&mut self, overrides: &[S]) -> ConfigResult<()> {
        for raw in overrides {
            let (id, value) = parse_override(raw.as_ref())?;
            self.set_axiom(&id, value)?;
        }
        Ok(())
    }
}

/// Parses `ID=VALUE`.
pub fn parse_override(raw: &str) -> ConfigResult<(String, f64)> {
    let invalid = || ConfigError::InvalidOverride(raw.to_string());
    let (id, value) = raw.split_once('=').ok_or_else(invalid)?;
    let id = id.trim();
    if id.is_empty() {
        return Err(invalid());
    }
    let value: f64 = value.trim().parse().map_err(|_| invalid())?;
    if !value.is_finite() {
        return Err(invalid());
    }
    Ok((id.to_string(), value))
}
