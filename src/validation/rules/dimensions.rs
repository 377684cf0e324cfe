//! Dimensional rule: a module's declared formula must reduce to the declared output unit.

use crate::analysis::dimensions::infer;
use crate::analysis::units::Dimension;
use crate::compute::{Catalog, Module};
use crate::store::Severity;
use crate::validation::error::{Subject, Violation, ViolationKind};
use std::collections::BTreeMap;

/// "The Apples and Oranges Rule", generalised to full unit algebra.
///
/// Outputs without a declared formula (native kernels that opted out) are not
/// checked here; their unit is whatever the declaration says. Violations are
/// always fatal.
pub(crate) fn check(module: &Module, catalog: &Catalog) -> Vec<Violation> {
    let unit_of = |name: &str| {
        catalog
            .param(name)
            .and_then(|decl| Dimension::parse(decl.schema.unit.as_str()).ok())
    };

    let mut out = Vec::new();
    for (output, formula) in module.outputs.iter().zip(&module.formulas) {
        let Some(formula) = formula else { continue };

        let message = match (infer(formula.expr(), &unit_of), unit_of(output.as_str())) {
            (Ok(found), Some(declared)) if found == declared => continue,
            (Ok(found), Some(declared)) => format!(
                "formula '{}' has unit '{}', but '{}' is declared as '{}'",
                formula, found, output, declared
            ),
            (Ok(_), None) => format!("declared unit of '{}' is not a valid unit", output),
            (Err(e), _) => format!("formula '{}': {}", formula, e),
        };

        out.push(Violation {
            kind: ViolationKind::Dimensional,
            severity: Severity::Fatal,
            subject: Subject::Module(module.id.clone()),
            parameter: Some(output.clone()),
            message,
            values: BTreeMap::new(),
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::ModuleSpec;
    use crate::store::{ParamKind, ParamSchema};

    fn catalog() -> Catalog {
        let mut cat = Catalog::new();
        cat.declare("m_e", ParamSchema::new("GeV"), ParamKind::Fundamental).unwrap();
        cat.declare("alpha", ParamSchema::new("1"), ParamKind::Fundamental).unwrap();
        cat.declare("m_w", ParamSchema::new("GeV"), ParamKind::Derived).unwrap();
        cat.declare("ratio", ParamSchema::new("1"), ParamKind::Derived).unwrap();
        cat
    }

    #[test]
    fn test_consistent_formula_passes() {
        let mut cat = catalog();
        let m = cat.register(ModuleSpec::new("W").inputs(["m_e", "alpha"]).formula("m_w", "m_e / alpha")).unwrap();
        assert!(check(cat.module(m), &cat).is_empty());
    }

    #[test]
    fn test_mismatch_is_fatal_and_attributed() {
        let mut cat = catalog();
        let m = cat.register(ModuleSpec::new("R").inputs(["m_e"]).formula("ratio", "m_e * 2")).unwrap();
        let v = check(cat.module(m), &cat);
        assert_eq!(v.len(), 1);
        assert!(v[0].is_fatal());
        assert_eq!(v[0].subject, Subject::Module("R".into()));
        assert_eq!(v[0].parameter.as_deref(), Some("ratio"));
        assert!(v[0].message.contains("has unit 'GeV'"), "{}", v[0].message);
    }

    #[test]
    fn test_additive_mismatch_reported() {
        let mut cat = catalog();
        let m = cat.register(ModuleSpec::new("S").inputs(["m_e", "alpha"]).formula("m_w", "m_e + alpha")).unwrap();
        let v = check(cat.module(m), &cat);
        assert!(v[0].message.contains("cannot add or subtract"), "{}", v[0].message);
    }
}
