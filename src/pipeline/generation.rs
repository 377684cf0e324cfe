//! One pipeline run: `Building -> Resolving -> Validating -> {Published | Rejected}`.

use super::options::{ResolveMode, RunOptions};
use crate::analysis::topology;
use crate::compute::{Catalog, Resolver, ResolverStats};
use crate::error::RegistryError;
use crate::publish::hash;
use crate::store::{ParamKind, ParameterStore, Quantity};
use crate::validation::{ValidationReport, Validator, Violation};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationState {
    Building,
    Resolving,
    Validating,
    Published,
    Rejected,
}

impl GenerationState {
    pub fn can_transition_to(self, next: GenerationState) -> bool {
        use GenerationState::*;
        matches!(
            (self, next),
            (Building, Resolving) | (Resolving, Validating) | (Resolving, Rejected) | (Validating, Published) | (Validating, Rejected)
        )
    }
}

/// A registry generation: the store, report and statistics of one run over a catalog.
///
/// Axioms are supplied while `Building`. `run` drives the generation to a
/// terminal state; after that the store is sealed and only readable.
pub struct Generation<'a> {
    catalog: &'a Catalog,
    label: String,
    state: GenerationState,
    axioms: BTreeMap<String, Quantity>,
    store: ParameterStore,
    report: ValidationReport,
    stats: ResolverStats,
    /// Parameters adopted unchanged from the predecessor.
    carried: BTreeSet<String>,
    rejection: Option<RegistryError>,
}

impl fmt::Debug for Generation<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Generation")
            .field("label", &self.label)
            .field("state", &self.state)
            .field("axioms", &self.axioms)
            .field("resolved", &self.store.resolved_count())
            .field("carried", &self.carried)
            .field("rejection", &self.rejection)
            .finish_non_exhaustive()
    }
}

impl<'a> Generation<'a> {
    pub fn new(catalog: &'a Catalog, label: impl Into<String>) -> Result<Self, RegistryError> {
        Ok(Self {
            catalog,
            label: label.into(),
            state: GenerationState::Building,
            axioms: BTreeMap::new(),
            store: catalog.instantiate()?,
            report: ValidationReport::default(),
            stats: ResolverStats::default(),
            carried: BTreeSet::new(),
            rejection: None,
        })
    }

    /// Sets (or replaces) the value of a fundamental parameter before the run.
    pub fn set_axiom(&mut self, id: &str, quantity: Quantity) -> Result<(), RegistryError> {
        if self.state != GenerationState::Building {
            return Err(RegistryError::Sealed { id: id.to_string() });
        }
        let param = self.store.get(id)?;
        if param.kind != ParamKind::Fundamental {
            return Err(RegistryError::ProvenanceMismatch {
                id: id.to_string(),
                message: "only fundamental parameters take axiomatic values".to_string(),
            });
        }
        self.axioms.insert(id.to_string(), quantity);
        Ok(())
    }

    /// Resolves, validates and settles the generation.
    ///
    /// Returns the terminal state. Validation failures are not errors: they
    /// produce `Rejected`. Structural failures (unknown parameter, cycle,
    /// kernel failure) abort the run with `Err` and leave nothing publishable.
    pub fn run(&mut self, options: &RunOptions) -> Result<GenerationState, RegistryError> {
        self.transition(GenerationState::Resolving)?;
        let catalog = self.catalog;

        let validator = Validator::new(catalog, options.policy.is_fail_fast());
        let mut resolver = Resolver::from_store(catalog, std::mem::take(&mut self.store), validator);
        let resolved = Self::drive(&mut resolver, &self.axioms, options);
        let (store, mut validator, stats) = resolver.into_parts();
        self.store = store;
        self.stats = stats;

        if let Err(e) = resolved {
            self.report = validator.into_report();
            return self.settle_error(e);
        }

        self.transition(GenerationState::Validating)?;
        let finalized = validator.finalize(&self.store);
        self.report = validator.into_report();
        if let Err(e) = finalized {
            return self.settle_error(e);
        }

        self.store.seal();
        let rejection = self.report.fatal().next().map(Violation::to_error);
        if let Some(e) = rejection {
            self.rejection = Some(e);
            self.transition(GenerationState::Rejected)?;
        } else {
            self.transition(GenerationState::Published)?;
        }
        Ok(self.state)
    }

    fn drive(resolver: &mut Resolver<'_>, axioms: &BTreeMap<String, Quantity>, options: &RunOptions) -> Result<(), RegistryError> {
        for (id, q) in axioms {
            resolver.supply(id, *q)?;
        }
        match (&options.target, options.mode) {
            (Some(target), _) => resolver.resolve(target).map(|_| ()),
            (None, ResolveMode::Sequential) => resolver.resolve_all(),
            (None, ResolveMode::Parallel) => resolver.resolve_parallel(),
        }
    }

    fn settle_error(&mut self, e: RegistryError) -> Result<GenerationState, RegistryError> {
        if !e.is_validation() {
            warn!(generation = %self.label, error = %e, "generation aborted");
            return Err(e);
        }
        self.store.seal();
        self.rejection = Some(e);
        self.transition(GenerationState::Rejected)?;
        Ok(self.state)
    }

    fn transition(&mut self, next: GenerationState) -> Result<(), RegistryError> {
        if !self.state.can_transition_to(next) {
            return Err(RegistryError::InvalidTransition { from: self.state, to: next });
        }
        info!(generation = %self.label, from = ?self.state, to = ?next, "generation transition");
        self.state = next;
        Ok(())
    }

    /// Starts the next generation from this published one.
    ///
    /// `changes` override axioms. Every value not downstream of a changed axiom
    /// is carried forward with its provenance, so only the affected modules run.
    pub fn successor<I>(&self, label: impl Into<String>, changes: I) -> Result<Generation<'a>, RegistryError>
    where
        I: IntoIterator<Item = (String, Quantity)>,
    {
        if self.state != GenerationState::Published {
            return Err(RegistryError::InvalidTransition { from: self.state, to: GenerationState::Building });
        }
        let mut next = Generation::new(self.catalog, label)?;
        for (id, q) in &self.axioms {
            next.set_axiom(id, *q)?;
        }

        let mut changed = Vec::new();
        for (id, q) in changes {
            let same = self.axioms.get(&id).map_or(false, |old| old.bit_eq(&q));
            next.set_axiom(&id, q)?;
            if !same {
                changed.push(id);
            }
        }

        let changed_refs: Vec<&str> = changed.iter().map(String::as_str).collect();
        let invalidated = topology::downstream_from(self.catalog, &changed_refs);
        for param in self.store.iter() {
            if param.kind == ParamKind::Fundamental || !param.is_resolved() || invalidated.contains(&param.id) {
                continue;
            }
            next.store.adopt(param)?;
            next.carried.insert(param.id.clone());
        }
        info!(
            generation = %next.label,
            changed = changed.len(),
            carried = next.carried.len(),
            invalidated = invalidated.len(),
            "successor generation"
        );
        Ok(next)
    }

    // --- Accessors ---
    pub fn catalog(&self) -> &'a Catalog { self.catalog }
    pub fn label(&self) -> &str { &self.label }
    pub fn state(&self) -> GenerationState { self.state }
    pub fn store(&self) -> &ParameterStore { &self.store }
    pub fn report(&self) -> &ValidationReport { &self.report }
    pub fn stats(&self) -> &ResolverStats { &self.stats }
    pub fn axioms(&self) -> &BTreeMap<String, Quantity> { &self.axioms }
    pub fn carried(&self) -> &BTreeSet<String> { &self.carried }

    /// The error that rejected the generation (first fatal violation).
    pub fn rejection(&self) -> Option<&RegistryError> { self.rejection.as_ref() }

    pub fn axiom_hash(&self) -> String { hash::axiom_hash(&self.store) }

    pub fn generation_id(&self) -> String { hash::generation_id(&self.label, &self.axiom_hash()) }
}

/// Builds a generation from a catalog and a set of axioms and runs it.
pub fn run<'a, I>(catalog: &'a Catalog, axioms: I, options: &RunOptions) -> Result<Generation<'a>, RegistryError>
where
    I: IntoIterator<Item = (String, Quantity)>,
{
    let mut generation = Generation::new(catalog, options.label.clone())?;
    for (id, q) in axioms {
        generation.set_axiom(&id, q)?;
    }
    generation.run(options)?;
    Ok(generation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::ModuleSpec;
    use crate::pipeline::FailurePolicy;
    use crate::store::{ParamSchema, Severity, Status};
    use crate::validation::{Gate, GateStatus};

    fn scenario(with_gate: bool) -> Catalog {
        let mut cat = Catalog::new();
        cat.declare("x", ParamSchema::new("1"), ParamKind::Derived).unwrap();
        cat.declare("y", ParamSchema::new("1"), ParamKind::Derived).unwrap();
        cat.declare("z", ParamSchema::new("1"), ParamKind::Derived).unwrap();
        cat.register(ModuleSpec::new("A").formula("x", "2.0")).unwrap();
        cat.register(ModuleSpec::new("B").inputs(["x"]).formula("y", "x * 3.0")).unwrap();
        cat.register(ModuleSpec::new("C").inputs(["y"]).formula("z", "y + 1")).unwrap();
        if with_gate {
            cat.add_gate(Gate::in_range("y_bounds", "y", 0.0, 5.0)).unwrap();
        }
        cat
    }

    #[test]
    fn test_scenario_published() {
        let cat = scenario(false);
        let generation = run(&cat, [], &RunOptions::default().target("y")).unwrap();
        assert_eq!(generation.state(), GenerationState::Published);
        assert_eq!(generation.store().get("y").unwrap().value(), Some(6.0));
        assert_eq!(generation.stats().invocations_of("A"), 1);
        // Targeted: z was never needed.
        assert_eq!(generation.store().get("z").unwrap().status(), Status::Unresolved);
        assert!(generation.store().is_sealed());
    }

    #[test]
    fn test_scenario_gate_rejects() {
        let cat = scenario(true);
        for policy in [FailurePolicy::FailFast, FailurePolicy::ContinueOnWarning] {
            let generation = run(&cat, [], &RunOptions::default().policy(policy)).unwrap();
            assert_eq!(generation.state(), GenerationState::Rejected);

            let fatal: Vec<_> = generation.report().fatal().collect();
            assert_eq!(fatal.len(), 1);
            assert_eq!(fatal[0].values["y"], 6.0);
            assert!(matches!(
                generation.rejection(),
                Some(RegistryError::GateFailure { gate, severity: Severity::Fatal, .. }) if gate == "y_bounds"
            ));
        }
    }

    #[test]
    fn test_fail_fast_stops_before_later_modules() {
        let cat = scenario(true);

        let fast = run(&cat, [], &RunOptions::default().policy(FailurePolicy::FailFast)).unwrap();
        assert_eq!(fast.state(), GenerationState::Rejected);
        assert_eq!(fast.stats().invocations_of("B"), 1);
        assert_eq!(fast.stats().invocations_of("C"), 0);
        assert_eq!(fast.store().get("z").unwrap().status(), Status::Unresolved);

        let full = run(&cat, [], &RunOptions::default().policy(FailurePolicy::ContinueOnWarning)).unwrap();
        assert_eq!(full.state(), GenerationState::Rejected);
        assert_eq!(full.stats().invocations_of("C"), 1);
        assert_eq!(full.store().get("z").unwrap().value(), Some(7.0));
    }

    #[test]
    fn test_uncertain_input_at_domain_edge_publishes() {
        let mut cat = Catalog::new();
        cat.declare("x", ParamSchema::new("1"), ParamKind::Fundamental).unwrap();
        cat.declare("y", ParamSchema::new("1"), ParamKind::Derived).unwrap();
        cat.register(ModuleSpec::new("Y").inputs(["x"]).formula("y", "sqrt(x)")).unwrap();

        let generation =
            run(&cat, [("x".to_string(), Quantity::with_uncertainty(0.0, 0.1))], &RunOptions::default()).unwrap();
        assert_eq!(generation.state(), GenerationState::Published);
        let y = generation.store().get("y").unwrap();
        assert_eq!(y.value(), Some(0.0));
        assert!(y.uncertainty().map_or(false, f64::is_finite));
    }

    #[test]
    fn test_warning_gate_still_publishes() {
        let mut cat = scenario(false);
        cat.add_gate(Gate::in_range("y_soft", "y", 0.0, 5.0).severity(Severity::Warning)).unwrap();
        let generation = run(&cat, [], &RunOptions::default()).unwrap();
        assert_eq!(generation.state(), GenerationState::Published);
        assert_eq!(generation.report().warnings().count(), 1);
        assert_eq!(generation.report().gate("y_soft").unwrap().status, GateStatus::Failed);
    }

    #[test]
    fn test_structural_error_is_err() {
        let mut cat = Catalog::new();
        cat.declare("g", ParamSchema::new("1"), ParamKind::Fundamental).unwrap();
        let err = run(&cat, [], &RunOptions::default()).unwrap_err();
        assert!(matches!(err, RegistryError::UnresolvedFundamental { ref id, .. } if id == "g"));
    }

    #[test]
    fn test_invalid_transitions() {
        let cat = scenario(false);
        let mut generation = run(&cat, [], &RunOptions::default()).unwrap();
        let err = generation.run(&RunOptions::default()).unwrap_err();
        assert_eq!(
            err,
            RegistryError::InvalidTransition { from: GenerationState::Published, to: GenerationState::Resolving }
        );
        assert!(matches!(generation.set_axiom("x", Quantity::exact(1.0)), Err(RegistryError::Sealed { .. })));
    }

    #[test]
    fn test_successor_only_recomputes_downstream() {
        let mut cat = Catalog::new();
        cat.declare("g", ParamSchema::new("1"), ParamKind::Fundamental).unwrap();
        cat.declare("h", ParamSchema::new("1"), ParamKind::Fundamental).unwrap();
        cat.declare("from_g", ParamSchema::new("1"), ParamKind::Derived).unwrap();
        cat.declare("from_h", ParamSchema::new("1"), ParamKind::Derived).unwrap();
        cat.register(ModuleSpec::new("G").inputs(["g"]).formula("from_g", "g * 2")).unwrap();
        cat.register(ModuleSpec::new("H").inputs(["h"]).formula("from_h", "h * 2")).unwrap();

        let axioms = [("g".to_string(), Quantity::exact(1.0)), ("h".to_string(), Quantity::exact(5.0))];
        let first = run(&cat, axioms, &RunOptions::default()).unwrap();
        assert_eq!(first.state(), GenerationState::Published);

        let mut second = first.successor("next", [("g".to_string(), Quantity::exact(3.0))]).unwrap();
        assert_eq!(second.carried().iter().collect::<Vec<_>>(), ["from_h"]);
        second.run(&RunOptions::default()).unwrap();

        assert_eq!(second.store().get("from_g").unwrap().value(), Some(6.0));
        assert_eq!(second.store().get("from_h").unwrap().value(), Some(10.0));
        assert_eq!(second.stats().invocations_of("G"), 1);
        assert_eq!(second.stats().invocations_of("H"), 0);
        assert_ne!(first.axiom_hash(), second.axiom_hash());
        assert!(second.generation_id().starts_with("next-"));
    }
}
