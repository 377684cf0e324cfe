//! Drift between two published artifacts.

use super::artifact::Artifact;
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValueChange {
    pub id: String,
    pub old: Option<f64>,
    pub new: Option<f64>,
    /// `|new - old| / max(|old|, |new|)`, when both are present.
    pub relative: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DriftReport {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub changed: Vec<ValueChange>,
    pub axioms_changed: bool,
    pub catalog_changed: bool,
}

impl DriftReport {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }

    /// Values moved although neither the axioms nor the code did.
    pub fn is_unexplained(&self) -> bool {
        !self.changed.is_empty() && !self.axioms_changed && !self.catalog_changed
    }
}

/// Compares two artifacts parameter by parameter. Values are compared bit for bit.
pub fn compare(old: &Artifact, new: &Artifact) -> DriftReport {
    let mut report = DriftReport {
        axioms_changed: old.axiom_hash != new.axiom_hash,
        catalog_changed: old.catalog_hash != new.catalog_hash,
        ..DriftReport::default()
    };

    for (id, entry) in &new.parameters {
        let Some(previous) = old.parameters.get(id) else {
            report.added.push(id.clone());
            continue;
        };
        let same = previous.value.map(f64::to_bits) == entry.value.map(f64::to_bits);
        if !same {
            let relative = match (previous.value, entry.value) {
                (Some(a), Some(b)) => {
                    let scale = a.abs().max(b.abs());
                    Some(if scale == 0.0 { 0.0 } else { (b - a).abs() / scale })
                }
                _ => None,
            };
            report.changed.push(ValueChange { id: id.clone(), old: previous.value, new: entry.value, relative });
        }
    }
    report.removed = old.parameters.keys().filter(|id| !new.parameters.contains_key(*id)).cloned().collect();
    report
}

impl fmt::Display for DriftReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "axioms changed: {}, catalog changed: {}", self.axioms_changed, self.catalog_changed)?;
        for id in &self.added {
            writeln!(f, "+ {}", id)?;
        }
        for id in &self.removed {
            writeln!(f, "- {}", id)?;
        }
        let show = |v: Option<f64>| v.map_or("unresolved".to_string(), |v| format!("{:?}", v));
        for c in &self.changed {
            write!(f, "~ {}: {} -> {}", c.id, show(c.old), show(c.new))?;
            if let Some(rel) = c.relative {
                write!(f, " (rel {:.3e})", rel)?;
            }
            writeln!(f)?;
        }
        if self.is_unexplained() {
            writeln!(f, "WARNING: values drifted with identical axioms and catalog")?;
        }
        Ok(())
    }
}
