use super::types::*;
use crate::error::RegistryError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// The parameter table of one generation.
///
/// Append-only: parameters are declared once, resolved once, and never removed.
/// Each generation owns its store outright, so two stores never share state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParameterStore {
    params: Vec<Parameter>,
    sealed: bool,

    // Lookup cache (Not serialized, rebuilt on load)
    #[serde(skip)]
    index: HashMap<String, ParamId>,
}

impl ParameterStore {
    pub fn new() -> Self { Self::default() }
    pub fn count(&self) -> usize { self.params.len() }
    pub fn is_sealed(&self) -> bool { self.sealed }

    /// Rebuilds the `index` lookup after deserialization.
    pub fn rebuild_index(&mut self) {
        self.index = self
            .params
            .iter()
            .enumerate()
            .map(|(i, p)| (p.id.clone(), ParamId::new(i)))
            .collect();
    }

    pub fn declare(&mut self, id: &str, schema: ParamSchema, kind: ParamKind) -> Result<ParamId, RegistryError> {
        if self.index.contains_key(id) {
            return Err(RegistryError::DuplicateParameter { id: id.to_string() });
        }
        let pid = ParamId::new(self.params.len());
        self.params.push(Parameter {
            id: id.to_string(),
            kind,
            schema,
            quantity: None,
            produced_by: None,
            depends_on: BTreeSet::new(),
        });
        self.index.insert(id.to_string(), pid);
        Ok(pid)
    }

    pub fn lookup(&self, id: &str) -> Result<ParamId, RegistryError> {
        self.index.get(id).copied().ok_or_else(|| RegistryError::unknown(id))
    }

    pub fn contains(&self, id: &str) -> bool { self.index.contains_key(id) }

    pub fn get(&self, id: &str) -> Result<&Parameter, RegistryError> {
        let pid = self.lookup(id)?;
        Ok(&self.params[pid.index()])
    }

    /// Writes a value into the store.
    ///
    /// Re-resolving with a bit-identical quantity from the same producer is a no-op.
    /// Fundamentals take no producer; derived and calibrated parameters require one.
    pub fn resolve(
        &mut self,
        id: &str,
        quantity: Quantity,
        producer: Option<Provenance<'_>>,
    ) -> Result<ParamId, RegistryError> {
        let pid = self.lookup(id)?;
        if self.sealed {
            return Err(RegistryError::Sealed { id: id.to_string() });
        }
        let param = &mut self.params[pid.index()];

        match (param.kind, &producer) {
            (ParamKind::Fundamental, Some(p)) => {
                return Err(RegistryError::ProvenanceMismatch {
                    id: id.to_string(),
                    message: format!("fundamental parameter cannot be produced by module '{}'", p.module),
                });
            }
            (ParamKind::Derived | ParamKind::Calibrated, None) => {
                return Err(RegistryError::ProvenanceMismatch {
                    id: id.to_string(),
                    message: "derived parameter requires a producing module".to_string(),
                });
            }
            _ => {}
        }

        if let Some(existing) = &param.quantity {
            let same_producer = param.produced_by.as_deref() == producer.map(|p| p.module);
            if existing.bit_eq(&quantity) && same_producer {
                return Ok(pid);
            }
            return Err(RegistryError::AlreadyResolved { id: id.to_string() });
        }

        param.quantity = Some(quantity);
        if let Some(p) = producer {
            param.produced_by = Some(p.module.to_string());
            param.depends_on = p.inputs.iter().cloned().collect();
        }
        Ok(pid)
    }

    /// Freezes the store. Later `resolve` calls fail with `Sealed`.
    pub fn seal(&mut self) { self.sealed = true; }

    pub fn iter(&self) -> impl Iterator<Item = &Parameter> { self.params.iter() }

    pub fn resolved_count(&self) -> usize {
        self.params.iter().filter(|p| p.is_resolved()).count()
    }

    /// Fundamentals that were declared but never given a value.
    pub fn missing_axioms(&self) -> Vec<&str> {
        self.params
            .iter()
            .filter(|p| p.kind == ParamKind::Fundamental && !p.is_resolved())
            .map(|p| p.id.as_str())
            .collect()
    }

    /// Copies a resolved value verbatim from a previous generation's store,
    /// keeping its provenance. Used when carrying unaffected values forward.
    pub(crate) fn adopt(&mut self, previous: &Parameter) -> Result<ParamId, RegistryError> {
        let pid = self.lookup(&previous.id)?;
        if self.sealed {
            return Err(RegistryError::Sealed { id: previous.id.clone() });
        }
        let param = &mut self.params[pid.index()];
        if param.quantity.is_some() {
            return Err(RegistryError::AlreadyResolved { id: previous.id.clone() });
        }
        param.quantity = previous.quantity;
        param.produced_by = previous.produced_by.clone();
        param.depends_on = previous.depends_on.clone();
        Ok(pid)
    }

    /// Rebuilds a sealed store from already-validated parameters (artifact reload).
    pub(crate) fn from_parameters(params: Vec<Parameter>) -> Self {
        let mut store = Self { params, sealed: true, index: HashMap::new() };
        store.rebuild_index();
        store
    }
}
