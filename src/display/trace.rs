use crate::compute::Catalog;
use crate::store::{ParameterStore, Status};
use std::collections::HashMap;
use std::fmt::Write;

/// Renders the dependency tree of `target`: producer, formula, value and
/// provenance of every upstream parameter, plus the gates that check it.
pub fn format_trace(store: &ParameterStore, catalog: &Catalog, target: &str) -> String {
    let mut tracer = Tracer { store, catalog, visited_at_level: HashMap::new(), output: String::new() };

    if store.contains(target) {
        let _ = writeln!(tracer.output, "AUDIT TRACE for parameter '{}':", target);
        let _ = writeln!(tracer.output, "--------------------------------------------------");
        tracer.trace_param(target, 1, "");
        tracer.print_gates(target);
    } else {
        let _ = writeln!(tracer.output, "Error: unknown parameter '{}'", target);
    }
    tracer.output
}

struct Tracer<'a> {
    store: &'a ParameterStore,
    catalog: &'a Catalog,
    visited_at_level: HashMap<String, usize>,
    output: String,
}

impl<'a> Tracer<'a> {
    fn trace_param(&mut self, id: &str, level: usize, prefix: &str) {
        if let Some(&first_seen) = self.visited_at_level.get(id) {
            let _ = writeln!(self.output, "{}{} -> (Ref to L{})", prefix, id, first_seen);
            return;
        }
        self.visited_at_level.insert(id.to_string(), level);

        let Ok(param) = self.store.get(id) else {
            let _ = writeln!(self.output, "{}{} [unknown]", prefix, id);
            return;
        };
        let line_header = format!("[L{}] {}{} {}", level, id, self.format_value(id), param.unit());

        match (param.status(), &param.produced_by) {
            (Status::Fundamental, _) => {
                let _ = writeln!(self.output, "{}{} -> Axiom", prefix, line_header);
            }
            (Status::Unresolved, _) => {
                let _ = writeln!(self.output, "{}{} -> Unresolved", prefix, line_header);
            }
            (_, Some(module)) => {
                let formula = self
                    .catalog
                    .module_by_name(module)
                    .and_then(|m| m.formula_for(id))
                    .map_or_else(|| "<native>".to_string(), |f| f.to_string());
                let _ = writeln!(self.output, "{}{} = {}  (module '{}')", prefix, line_header, formula, module);
                let inputs: Vec<String> = param.depends_on.iter().cloned().collect();
                self.recurse_children(prefix, &inputs, level);
            }
            (_, None) => {
                let _ = writeln!(self.output, "{}{} -> (no producer)", prefix, line_header);
            }
        }
    }

    fn recurse_children(&mut self, prefix: &str, children: &[String], level: usize) {
        let stem = self.build_child_stem(prefix);
        for (i, child) in children.iter().enumerate() {
            let connector = if i == children.len() - 1 { "`--" } else { "|--" };
            let full_prefix = format!("{}{}", stem, connector);
            self.trace_param(child, level + 1, &full_prefix);
        }
    }

    fn print_gates(&mut self, target: &str) {
        let gates: Vec<_> =
            self.catalog.gates().iter().filter(|g| g.parameters_checked.iter().any(|p| p == target)).collect();
        if gates.is_empty() {
            return;
        }
        let _ = writeln!(self.output, "|");
        let _ = writeln!(self.output, "`-- Checked by:");
        for (i, gate) in gates.iter().enumerate() {
            let connector = if i == gates.len() - 1 { "`--" } else { "|--" };
            let _ = writeln!(
                self.output,
                "    {} {} {} ({}) over {:?}",
                connector,
                gate.id,
                gate.predicate.describe(),
                gate.severity,
                gate.parameters_checked
            );
        }
    }

    fn format_value(&self, id: &str) -> String {
        match self.store.get(id).ok().and_then(|p| p.quantity) {
            Some(q) => match q.uncertainty {
                Some(s) => format!("[{:.6} +/- {:.2e}]", q.value, s),
                None => format!("[{:.6}]", q.value),
            },
            None => "[?]".to_string(),
        }
    }

    fn build_child_stem(&self, current_prefix: &str) -> String {
        current_prefix.replace("`--", "   ").replace("|--", "|  ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::ModuleSpec;
    use crate::pipeline::{run, RunOptions};
    use crate::store::{ParamKind, ParamSchema, Quantity};
    use crate::validation::Gate;

    #[test]
    fn test_trace_diamond() {
        let mut cat = Catalog::new();
        cat.declare("g", ParamSchema::new("GeV"), ParamKind::Fundamental).unwrap();
        cat.declare("a", ParamSchema::new("GeV"), ParamKind::Derived).unwrap();
        cat.declare("b", ParamSchema::new("GeV"), ParamKind::Derived).unwrap();
        cat.declare("d", ParamSchema::new("GeV^2"), ParamKind::Derived).unwrap();
        cat.register(ModuleSpec::new("A").inputs(["g"]).formula("a", "g * 2")).unwrap();
        cat.register(ModuleSpec::new("B").inputs(["g"]).formula("b", "g + g")).unwrap();
        cat.register(ModuleSpec::new("D").inputs(["a", "b"]).formula("d", "a * b")).unwrap();
        cat.add_gate(Gate::in_range("d_range", "d", 0.0, 100.0)).unwrap();

        let generation = run(&cat, [("g".to_string(), Quantity::exact(1.5))], &RunOptions::default()).unwrap();
        let trace = format_trace(generation.store(), &cat, "d");

        assert!(trace.contains("[L1] d[9.000000] GeV^2 = a * b  (module 'D')"), "{}", trace);
        assert!(trace.contains("|--[L2] a[3.000000] GeV = g * 2  (module 'A')"), "{}", trace);
        assert!(trace.contains("[L3] g[1.500000] GeV -> Axiom"), "{}", trace);
        // g is reached twice; the second visit is a reference.
        assert!(trace.contains("g -> (Ref to L3)"), "{}", trace);
        assert!(trace.contains("d_range in_range[0.0, 100.0] (fatal)"), "{}", trace);
    }

    #[test]
    fn test_trace_unknown_parameter() {
        let cat = Catalog::new();
        let store = ParameterStore::new();
        assert!(format_trace(&store, &cat, "nope").starts_with("Error: unknown parameter 'nope'"));
    }
}
