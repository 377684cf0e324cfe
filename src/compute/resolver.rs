//! Memoized, demand-driven resolution of parameters.
//!
//! The resolver owns the store of one generation. Asking for a parameter walks
//! its producer's inputs depth-first, invokes each module at most once, writes
//! every output with provenance and hands the result to the validator before
//! returning.

use super::catalog::{Catalog, ModuleId};
use super::module::Outputs;
use crate::analysis::topology;
use crate::error::RegistryError;
use crate::store::{ParamKind, ParameterStore, Provenance, Quantity};
use crate::validation::Validator;
use rayon::prelude::*;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::debug;

/// Bookkeeping of one generation's resolution work.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResolverStats {
    /// Module id -> number of invocations. Never exceeds 1.
    pub invocations: BTreeMap<String, usize>,
    /// Requests answered from the store without running anything.
    pub memo_hits: usize,
}

impl ResolverStats {
    pub fn invocations_of(&self, module: &str) -> usize {
        self.invocations.get(module).copied().unwrap_or(0)
    }

    pub fn total_invocations(&self) -> usize { self.invocations.values().sum() }
}

pub struct Resolver<'a> {
    catalog: &'a Catalog,
    store: ParameterStore,
    validator: Validator<'a>,
    /// Parameters currently being resolved, outermost first.
    stack: Vec<String>,
    stats: ResolverStats,
}

impl<'a> Resolver<'a> {
    /// Starts from an empty store instantiated from the catalog.
    pub fn new(catalog: &'a Catalog, validator: Validator<'a>) -> Result<Self, RegistryError> {
        Ok(Self::from_store(catalog, catalog.instantiate()?, validator))
    }

    /// Starts from a store that may already hold carried-forward values.
    pub fn from_store(catalog: &'a Catalog, store: ParameterStore, validator: Validator<'a>) -> Self {
        Self { catalog, store, validator, stack: Vec::new(), stats: ResolverStats::default() }
    }

    /// Supplies the axiomatic value of a fundamental parameter.
    pub fn supply(&mut self, id: &str, quantity: Quantity) -> Result<(), RegistryError> {
        self.store.resolve(id, quantity, None)?;
        self.validator.after_axiom(id, &self.store)
    }

    /// Resolves `id` and everything it depends on.
    pub fn resolve(&mut self, id: &str) -> Result<Quantity, RegistryError> {
        self.stack.clear();
        self.visit(id)
    }

    /// Resolves every declared parameter: modules in stable topological order
    /// first, then any parameter no module reached.
    pub fn resolve_all(&mut self) -> Result<(), RegistryError> {
        let order = topology::stable_order(self.catalog)?;
        for mid in order {
            if let Some(first) = self.catalog.module(mid).outputs.first() {
                self.resolve(first)?;
            }
        }
        self.resolve_leftovers()
    }

    /// Same result as `resolve_all`, but the modules of each topological wave
    /// are invoked concurrently. Outputs are written in registration order, so
    /// the store ends up identical to the sequential one.
    pub fn resolve_parallel(&mut self) -> Result<(), RegistryError> {
        let catalog = self.catalog;
        for wave in topology::waves(catalog)? {
            let mut batch: Vec<(ModuleId, Vec<Quantity>)> = Vec::with_capacity(wave.len());

            for mid in wave {
                let module = catalog.module(mid);
                if self.outputs_resolved(mid) {
                    self.stats.memo_hits += 1;
                    continue;
                }
                let inputs: Option<Vec<Quantity>> =
                    module.inputs.iter().map(|i| self.store.get(i).ok().and_then(|p| p.quantity)).collect();
                match inputs {
                    Some(inputs) => batch.push((mid, inputs)),
                    // A missing axiom: the sequential walk reports it with its chain.
                    None => {
                        self.resolve(&module.outputs[0])?;
                    }
                }
            }

            let results: Vec<(ModuleId, Result<Outputs, String>)> = batch
                .par_iter()
                .map(|(mid, inputs)| (*mid, catalog.module(*mid).invoke(inputs)))
                .collect();

            for (mid, result) in results {
                let module = catalog.module(mid);
                let outputs = result.map_err(|reason| RegistryError::ModuleFailure {
                    module: module.id.clone(),
                    reason,
                    chain: vec![module.outputs[0].clone()],
                })?;
                self.record_invocation(mid);
                self.write_outputs(mid, &outputs)?;
            }
        }
        self.resolve_leftovers()
    }

    pub fn store(&self) -> &ParameterStore { &self.store }
    pub fn stats(&self) -> &ResolverStats { &self.stats }

    pub fn into_parts(self) -> (ParameterStore, Validator<'a>, ResolverStats) {
        (self.store, self.validator, self.stats)
    }

    fn resolve_leftovers(&mut self) -> Result<(), RegistryError> {
        let pending: Vec<String> =
            self.store.iter().filter(|p| !p.is_resolved()).map(|p| p.id.clone()).collect();
        for id in pending {
            self.resolve(&id)?;
        }
        Ok(())
    }

    fn chain_to(&self, id: &str) -> Vec<String> {
        let mut chain = self.stack.clone();
        chain.push(id.to_string());
        chain
    }

    fn visit(&mut self, id: &str) -> Result<Quantity, RegistryError> {
        let param = self.store.get(id).map_err(|e| e.with_chain(&self.chain_to(id)))?;

        // 1. Memoized
        if let Some(q) = param.quantity {
            self.stats.memo_hits += 1;
            return Ok(q);
        }

        // 2. Cycle
        if let Some(pos) = self.stack.iter().position(|p| p == id) {
            let mut cycle = self.stack[pos..].to_vec();
            cycle.push(id.to_string());
            return Err(RegistryError::CyclicDependency { cycle });
        }

        // 3. Producer
        let kind = param.kind;
        let Some(mid) = self.catalog.producer_of(id) else {
            if kind != ParamKind::Fundamental {
                debug!(param = id, "derived parameter has no registered producer");
            }
            return Err(RegistryError::UnresolvedFundamental { id: id.to_string(), chain: self.chain_to(id) });
        };

        // 4. Inputs, depth-first
        let catalog = self.catalog;
        let module = catalog.module(mid);
        self.stack.push(id.to_string());
        let mut inputs = Vec::with_capacity(module.inputs.len());
        for input in &module.inputs {
            inputs.push(self.visit(input)?);
        }
        let chain = self.stack.clone();
        self.stack.pop();

        // 5. Invoke, write, validate
        debug!(module = %module.id, target = id, "invoking module");
        let outputs = module.invoke(&inputs).map_err(|reason| RegistryError::ModuleFailure {
            module: module.id.clone(),
            reason,
            chain,
        })?;
        self.record_invocation(mid);
        self.write_outputs(mid, &outputs)?;

        self.store.get(id)?.quantity.ok_or_else(|| RegistryError::unknown(id))
    }

    fn outputs_resolved(&self, mid: ModuleId) -> bool {
        self.catalog
            .module(mid)
            .outputs
            .iter()
            .all(|o| self.store.get(o).map_or(false, |p| p.is_resolved()))
    }

    fn record_invocation(&mut self, mid: ModuleId) {
        *self.stats.invocations.entry(self.catalog.module(mid).id.clone()).or_insert(0) += 1;
    }

    fn write_outputs(&mut self, mid: ModuleId, outputs: &[Quantity]) -> Result<(), RegistryError> {
        let module = self.catalog.module(mid);
        let provenance = Provenance { module: &module.id, inputs: module.inputs.as_slice() };
        for (output, q) in module.outputs.iter().zip(outputs) {
            self.store.resolve(output, *q, Some(provenance))?;
        }
        self.validator.after_module(mid, &self.store)
    }
}
