//! Schema rule: declared unit and numeric range of a single parameter.

use crate::analysis::units::Dimension;
use crate::store::{Parameter, Quantity, Severity};
use crate::validation::error::{Subject, Violation, ViolationKind};
use std::collections::BTreeMap;

/// "The Datasheet Rule": a produced value must fit the parameter's declaration.
///
/// - Non-finite values and negative uncertainties are always fatal.
/// - The declared unit must be a well-formed unit expression (fatal).
/// - A value outside the declared bounds fails with the schema's own severity,
///   which lets a declaration document a known tolerance as a warning.
pub(crate) fn check(param: &Parameter, q: &Quantity) -> Vec<Violation> {
    let mut out = Vec::new();
    let violation = |severity: Severity, message: String| Violation {
        kind: ViolationKind::Schema,
        severity,
        subject: Subject::Parameter(param.id.clone()),
        parameter: None,
        message,
        values: BTreeMap::from([(param.id.clone(), q.value)]),
    };

    if !q.value.is_finite() {
        out.push(violation(Severity::Fatal, format!("value {} is not finite", q.value)));
        return out;
    }
    if let Some(s) = q.uncertainty {
        if !s.is_finite() || s < 0.0 {
            out.push(violation(Severity::Fatal, format!("uncertainty {} is not a finite non-negative number", s)));
        }
    }
    if Dimension::parse(param.schema.unit.as_str()).is_err() {
        out.push(violation(Severity::Fatal, format!("declared unit '{}' is not a valid unit", param.schema.unit)));
    }
    if !param.schema.bounds.contains(q.value) {
        out.push(violation(
            param.schema.severity,
            format!("{} = {:?} {} lies outside {}", param.id, q.value, param.schema.unit, param.schema.bounds),
        ));
    }
    out
}
