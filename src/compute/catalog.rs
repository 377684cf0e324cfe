//! The module catalog: parameter declarations, registered modules and gates.
//!
//! The catalog is the `Building` phase of a registry. It is immutable once a
//! generation starts and is shared read-only between generations.

use super::formula::Formula;
use super::module::{IdList, Kernel, Module, ModuleSpec};
use crate::error::RegistryError;
use crate::store::{ParamKind, ParamSchema, ParameterStore};
use crate::validation::Gate;
use indexmap::IndexMap;
use std::collections::{HashMap, HashSet};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleId(pub u32);

impl ModuleId {
    #[inline(always)]
    pub fn index(&self) -> usize { self.0 as usize }
    pub fn new(idx: usize) -> Self { Self(idx as u32) }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParamDecl {
    pub schema: ParamSchema,
    pub kind: ParamKind,
}

#[derive(Debug, Clone, Default)]
pub struct Catalog {
    params: IndexMap<String, ParamDecl>,
    modules: Vec<Module>,
    module_ids: HashMap<String, ModuleId>,
    /// Output parameter -> producing module.
    producers: HashMap<String, ModuleId>,
    gates: Vec<Gate>,
}

impl Catalog {
    pub fn new() -> Self { Self::default() }

    pub fn declare(&mut self, id: impl Into<String>, schema: ParamSchema, kind: ParamKind) -> Result<(), RegistryError> {
        let id = id.into();
        if self.params.contains_key(&id) {
            return Err(RegistryError::DuplicateParameter { id });
        }
        self.params.insert(id, ParamDecl { schema, kind });
        Ok(())
    }

    /// Registers a module, enforcing the contract before anything is resolved.
    pub fn register(&mut self, spec: ModuleSpec) -> Result<ModuleId, RegistryError> {
        let malformed = |reason: String| RegistryError::MalformedModule { module: spec.id.clone(), reason };

        if self.module_ids.contains_key(&spec.id) {
            return Err(malformed("module id is already registered".into()));
        }
        if spec.outputs.is_empty() {
            return Err(malformed("a module must produce at least one output".into()));
        }
        if let Some(dup) = first_duplicate(&spec.inputs) {
            return Err(malformed(format!("input '{}' is listed twice", dup)));
        }
        if let Some(dup) = first_duplicate(&spec.outputs) {
            return Err(malformed(format!("output '{}' is listed twice", dup)));
        }

        for id in spec.inputs.iter().chain(&spec.outputs) {
            if !self.params.contains_key(id) {
                return Err(RegistryError::UnknownParameter { id: id.clone(), chain: vec![spec.id.clone()] });
            }
        }

        for out in &spec.outputs {
            if spec.inputs.contains(out) {
                return Err(RegistryError::CyclicDependency { cycle: vec![out.clone(), out.clone()] });
            }
            if self.params[out].kind == ParamKind::Fundamental {
                return Err(malformed(format!("output '{}' is declared fundamental", out)));
            }
            if let Some(existing) = self.producers.get(out) {
                return Err(RegistryError::DuplicateProducer {
                    param: out.clone(),
                    first: self.modules[existing.index()].id.clone(),
                    second: spec.id.clone(),
                });
            }
        }

        let mut formulas = Vec::with_capacity(spec.formulas.len());
        for (out, source) in spec.outputs.iter().zip(&spec.formulas) {
            let Some(source) = source else {
                formulas.push(None);
                continue;
            };
            let formula = Formula::parse(source).map_err(|e| malformed(format!("formula for '{}': {}", out, e)))?;
            if let Some(unbound) = formula.variables().into_iter().find(|v| !spec.inputs.iter().any(|i| i.as_str() == *v)) {
                return Err(malformed(format!("formula for '{}' reads '{}', which is not an input", out, unbound)));
            }
            formulas.push(Some(formula));
        }

        let kernel = match spec.native {
            Some(native) => native,
            None => {
                if let Some(pos) = formulas.iter().position(Option::is_none) {
                    return Err(malformed(format!("output '{}' has neither a formula nor a native kernel", spec.outputs[pos])));
                }
                Kernel::Formulas
            }
        };

        let mid = ModuleId::new(self.modules.len());
        for out in &spec.outputs {
            self.producers.insert(out.clone(), mid);
        }
        self.module_ids.insert(spec.id.clone(), mid);
        debug!(module = %spec.id, inputs = spec.inputs.len(), outputs = spec.outputs.len(), "registered module");

        self.modules.push(Module {
            id: spec.id,
            inputs: spec.inputs.into_iter().collect::<IdList>(),
            outputs: spec.outputs.into_iter().collect::<IdList>(),
            formulas,
            kernel,
        });
        Ok(mid)
    }

    /// Adds a cross-consistency gate. Every checked parameter must be declared.
    pub fn add_gate(&mut self, gate: Gate) -> Result<(), RegistryError> {
        if self.gates.iter().any(|g| g.id == gate.id) {
            return Err(RegistryError::DuplicateGate { id: gate.id.clone() });
        }
        let n = gate.parameters_checked.len();
        if !gate.predicate.accepts(n) {
            return Err(RegistryError::MalformedGate {
                gate: gate.id.clone(),
                reason: format!("{} cannot check {} parameter(s)", gate.predicate.describe(), n),
            });
        }
        for id in &gate.parameters_checked {
            if !self.params.contains_key(id) {
                return Err(RegistryError::UnknownParameter { id: id.clone(), chain: vec![gate.id.clone()] });
            }
        }
        self.gates.push(gate);
        Ok(())
    }

    // --- Accessors ---
    pub fn param(&self, id: &str) -> Option<&ParamDecl> { self.params.get(id) }
    pub fn params(&self) -> impl Iterator<Item = (&String, &ParamDecl)> { self.params.iter() }
    pub fn param_count(&self) -> usize { self.params.len() }
    pub fn param_position(&self, id: &str) -> Option<usize> { self.params.get_index_of(id) }
    pub fn param_at(&self, idx: usize) -> Option<&str> { self.params.get_index(idx).map(|(k, _)| k.as_str()) }

    pub fn modules(&self) -> &[Module] { &self.modules }
    pub fn module(&self, id: ModuleId) -> &Module { &self.modules[id.index()] }
    pub fn module_by_name(&self, id: &str) -> Option<&Module> {
        self.module_ids.get(id).map(|m| &self.modules[m.index()])
    }

    pub fn producer_of(&self, param: &str) -> Option<ModuleId> { self.producers.get(param).copied() }
    pub fn gates(&self) -> &[Gate] { &self.gates }

    /// Creates the empty (all-unresolved) store a new generation starts from.
    pub fn instantiate(&self) -> Result<ParameterStore, RegistryError> {
        let mut store = ParameterStore::new();
        for (id, decl) in &self.params {
            store.declare(id, decl.schema.clone(), decl.kind)?;
        }
        Ok(store)
    }
}

fn first_duplicate(ids: &[String]) -> Option<&String> {
    let mut seen = HashSet::new();
    ids.iter().find(|id| !seen.insert(id.as_str()))
}
