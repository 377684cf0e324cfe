//! The central validator that runs every rule at the right moment of a generation.
use super::error::{GateOutcome, GateStatus, Subject, ValidationReport, Violation, ViolationKind};
use super::rules::{dimensions, schema};
use crate::compute::{Catalog, ModuleId};
use crate::error::RegistryError;
use crate::store::{ParameterStore, Quantity};
use std::collections::{BTreeMap, HashMap};
use tracing::warn;

/// The rule engine of one generation.
///
/// Per-parameter rules (schema, dimensions) run immediately after a module
/// produces its outputs. Gates run lazily, the first time all of their checked
/// parameters are resolved. `finalize` closes out gates that never became ready.
///
/// In fail-fast mode the first fatal violation is returned as an error so the
/// resolver aborts; otherwise everything is collected into the report.
pub struct Validator<'a> {
    catalog: &'a Catalog,
    fail_fast: bool,
    report: ValidationReport,
    dims_checked: Vec<bool>,
    gate_done: Vec<bool>,
    gates_by_param: HashMap<&'a str, Vec<usize>>,
}

impl<'a> Validator<'a> {
    pub fn new(catalog: &'a Catalog, fail_fast: bool) -> Self {
        let mut gates_by_param: HashMap<&str, Vec<usize>> = HashMap::new();
        for (i, gate) in catalog.gates().iter().enumerate() {
            for p in &gate.parameters_checked {
                gates_by_param.entry(p.as_str()).or_default().push(i);
            }
        }
        Self {
            catalog,
            fail_fast,
            report: ValidationReport::default(),
            dims_checked: vec![false; catalog.modules().len()],
            gate_done: vec![false; catalog.gates().len()],
            gates_by_param,
        }
    }

    /// Static pass: dimensional analysis of every module, without computing anything.
    pub fn preflight(&mut self) -> Result<(), RegistryError> {
        for i in 0..self.catalog.modules().len() {
            self.check_dimensions(ModuleId::new(i))?;
        }
        Ok(())
    }

    /// Runs the schema rule on an axiom and any gates it completes.
    pub fn after_axiom(&mut self, id: &str, store: &ParameterStore) -> Result<(), RegistryError> {
        let param = store.get(id)?;
        if let Some(q) = &param.quantity {
            let found = schema::check(param, q);
            self.record(found)?;
        }
        self.check_ready_gates(&[id], store)
    }

    /// Runs per-output rules for a module that just produced, then any gates it completes.
    pub fn after_module(&mut self, mid: ModuleId, store: &ParameterStore) -> Result<(), RegistryError> {
        self.check_dimensions(mid)?;

        let catalog = self.catalog;
        let module = catalog.module(mid);
        for out in &module.outputs {
            let param = store.get(out)?;
            if let Some(q) = &param.quantity {
                let found = schema::check(param, q);
                self.record(found)?;
            }
        }
        let outputs: Vec<&str> = module.outputs.iter().map(String::as_str).collect();
        self.check_ready_gates(&outputs, store)
    }

    /// Final cross-consistency pass: evaluates every gate not yet evaluated,
    /// marking gates over unresolved parameters as skipped.
    pub fn finalize(&mut self, store: &ParameterStore) -> Result<(), RegistryError> {
        for i in 0..self.gate_done.len() {
            if self.gate_done[i] {
                continue;
            }
            if self.gate_ready(i, store) {
                self.evaluate_gate(i, store)?;
            } else {
                let catalog = self.catalog;
                let gate = &catalog.gates()[i];
                self.gate_done[i] = true;
                self.report.gates.push(GateOutcome {
                    id: gate.id.clone(),
                    predicate: gate.predicate.describe(),
                    severity: gate.severity,
                    status: GateStatus::Skipped,
                    parameters_checked: gate.parameters_checked.clone(),
                    values: BTreeMap::new(),
                    message: None,
                });
            }
        }
        Ok(())
    }

    pub fn report(&self) -> &ValidationReport { &self.report }
    pub fn into_report(self) -> ValidationReport { self.report }

    fn check_dimensions(&mut self, mid: ModuleId) -> Result<(), RegistryError> {
        if self.dims_checked[mid.index()] {
            return Ok(());
        }
        self.dims_checked[mid.index()] = true;
        let catalog = self.catalog;
        let found = dimensions::check(catalog.module(mid), catalog);
        self.record(found)
    }

    fn check_ready_gates(&mut self, resolved: &[&str], store: &ParameterStore) -> Result<(), RegistryError> {
        let mut candidates: Vec<usize> = resolved
            .iter()
            .filter_map(|p| self.gates_by_param.get(p))
            .flatten()
            .copied()
            .collect();
        // Declaration order keeps the report deterministic.
        candidates.sort_unstable();
        candidates.dedup();

        for i in candidates {
            if !self.gate_done[i] && self.gate_ready(i, store) {
                self.evaluate_gate(i, store)?;
            }
        }
        Ok(())
    }

    fn gate_ready(&self, i: usize, store: &ParameterStore) -> bool {
        self.catalog.gates()[i]
            .parameters_checked
            .iter()
            .all(|p| store.get(p).map_or(false, |param| param.is_resolved()))
    }

    fn evaluate_gate(&mut self, i: usize, store: &ParameterStore) -> Result<(), RegistryError> {
        let catalog = self.catalog;
        let gate = &catalog.gates()[i];
        self.gate_done[i] = true;

        let mut values = Vec::with_capacity(gate.parameters_checked.len());
        for p in &gate.parameters_checked {
            let q: Quantity = store.get(p)?.quantity.ok_or_else(|| RegistryError::unknown(p.as_str()))?;
            values.push(q);
        }
        let observed: BTreeMap<String, f64> =
            gate.parameters_checked.iter().cloned().zip(values.iter().map(|q| q.value)).collect();

        let passed = gate.predicate.holds(&values);
        let message = (!passed).then(|| gate.render_message(&values));

        self.report.gates.push(GateOutcome {
            id: gate.id.clone(),
            predicate: gate.predicate.describe(),
            severity: gate.severity,
            status: if passed { GateStatus::Passed } else { GateStatus::Failed },
            parameters_checked: gate.parameters_checked.clone(),
            values: observed.clone(),
            message: message.clone(),
        });

        match message {
            None => Ok(()),
            Some(message) => self.record(vec![Violation {
                kind: ViolationKind::Gate,
                severity: gate.severity,
                subject: Subject::Gate(gate.id.clone()),
                parameter: None,
                message,
                values: observed,
            }]),
        }
    }

    fn record(&mut self, found: Vec<Violation>) -> Result<(), RegistryError> {
        for v in found {
            warn!(kind = ?v.kind, severity = %v.severity, "{}", v.message);
            let abort = self.fail_fast && v.is_fatal();
            let err = v.to_error();
            self.report.violations.push(v);
            if abort {
                return Err(err);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::ModuleSpec;
    use crate::store::{Bounds, ParamKind, ParamSchema, Provenance, Severity};
    use crate::validation::Gate;

    fn catalog() -> Catalog {
        let mut cat = Catalog::new();
        cat.declare("x", ParamSchema::new("1"), ParamKind::Fundamental).unwrap();
        cat.declare("y", ParamSchema::new("1").bounded(Bounds::between(0.0, 100.0)), ParamKind::Derived).unwrap();
        cat.declare("z", ParamSchema::new("1"), ParamKind::Derived).unwrap();
        cat.register(ModuleSpec::new("B").inputs(["x"]).formula("y", "x * 3.0")).unwrap();
        cat.add_gate(Gate::in_range("y_bounds", "y", 0.0, 5.0)).unwrap();
        cat.add_gate(Gate::in_range("x_soft", "x", 0.0, 1.0).severity(Severity::Warning)).unwrap();
        cat.add_gate(Gate::in_range("z_bounds", "z", 0.0, 1.0)).unwrap();
        cat
    }

    fn produce_y(cat: &Catalog, store: &mut ParameterStore) -> ModuleId {
        let mid = cat.producer_of("y").unwrap();
        let inputs = vec!["x".to_string()];
        store.resolve("y", Quantity::exact(6.0), Some(Provenance { module: "B", inputs: &inputs })).unwrap();
        mid
    }

    #[test]
    fn test_gates_run_when_ready_and_skip_otherwise() {
        let cat = catalog();
        let mut store = cat.instantiate().unwrap();
        let mut validator = Validator::new(&cat, false);

        store.resolve("x", Quantity::exact(2.0), None).unwrap();
        validator.after_axiom("x", &store).unwrap();
        // x_soft ran as soon as x existed.
        assert_eq!(validator.report().gate("x_soft").unwrap().status, GateStatus::Failed);

        let mid = produce_y(&cat, &mut store);
        validator.after_module(mid, &store).unwrap();
        validator.finalize(&store).unwrap();

        let report = validator.into_report();
        assert_eq!(report.gate("y_bounds").unwrap().status, GateStatus::Failed);
        assert_eq!(report.gate("y_bounds").unwrap().values["y"], 6.0);
        assert_eq!(report.gate("z_bounds").unwrap().status, GateStatus::Skipped);

        let fatal: Vec<_> = report.fatal().collect();
        assert_eq!(fatal.len(), 1);
        assert_eq!(fatal[0].subject, Subject::Gate("y_bounds".into()));
        assert_eq!(report.warnings().count(), 1);
    }

    #[test]
    fn test_fail_fast_returns_first_fatal() {
        let cat = catalog();
        let mut store = cat.instantiate().unwrap();
        let mut validator = Validator::new(&cat, true);

        store.resolve("x", Quantity::exact(2.0), None).unwrap();
        // Warning-level gate does not abort.
        validator.after_axiom("x", &store).unwrap();

        let mid = produce_y(&cat, &mut store);
        let err = validator.after_module(mid, &store).unwrap_err();
        assert!(matches!(err, RegistryError::GateFailure { ref gate, severity: Severity::Fatal, .. } if gate == "y_bounds"));
    }

    #[test]
    fn test_preflight_flags_dimension_errors_once() {
        let mut cat = Catalog::new();
        cat.declare("m", ParamSchema::new("GeV"), ParamKind::Fundamental).unwrap();
        cat.declare("r", ParamSchema::new("1"), ParamKind::Derived).unwrap();
        cat.register(ModuleSpec::new("R").inputs(["m"]).formula("r", "m * 2")).unwrap();

        let mut validator = Validator::new(&cat, false);
        validator.preflight().unwrap();
        validator.preflight().unwrap();
        assert_eq!(validator.report().violations.len(), 1);
        assert_eq!(validator.report().violations[0].kind, ViolationKind::Dimensional);
    }
}
