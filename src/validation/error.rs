//! Structured reports produced by the validator.
use crate::error::RegistryError;
use crate::store::Severity;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The category of a violation.
///
// Kept as an enum so callers inspect failures programmatically rather than
// string-matching messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    /// Declared unit or range of a parameter was not honoured.
    Schema,
    /// A module's formula does not reduce to the declared output unit.
    Dimensional,
    /// A cross-consistency gate evaluated to false.
    Gate,
}

/// What a violation is attributed to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "lowercase")]
pub enum Subject {
    Parameter(String),
    Module(String),
    Gate(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    pub kind: ViolationKind,
    pub severity: Severity,
    pub subject: Subject,
    /// The parameter concerned, when the subject is a module or gate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameter: Option<String>,
    pub message: String,
    /// Values observed when the check ran.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub values: BTreeMap<String, f64>,
}

impl Violation {
    pub fn is_fatal(&self) -> bool { self.severity == Severity::Fatal }

    /// Converts the violation into the matching error variant (used by fail-fast runs).
    pub fn to_error(&self) -> RegistryError {
        let subject_id = match &self.subject {
            Subject::Parameter(id) | Subject::Module(id) | Subject::Gate(id) => id.clone(),
        };
        match self.kind {
            ViolationKind::Schema => RegistryError::SchemaViolation {
                id: self.parameter.clone().unwrap_or(subject_id),
                message: self.message.clone(),
            },
            ViolationKind::Dimensional => RegistryError::DimensionalInconsistency {
                module: subject_id,
                id: self.parameter.clone().unwrap_or_default(),
                message: self.message.clone(),
            },
            ViolationKind::Gate => RegistryError::GateFailure {
                gate: subject_id,
                severity: self.severity,
                message: self.message.clone(),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GateStatus {
    Passed,
    Failed,
    /// Some checked parameter was never resolved (targeted run).
    Skipped,
}

/// The result of one gate evaluation, as listed in the artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateOutcome {
    pub id: String,
    pub predicate: String,
    pub severity: Severity,
    pub status: GateStatus,
    pub parameters_checked: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub values: BTreeMap<String, f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Everything the validator found during one generation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub violations: Vec<Violation>,
    pub gates: Vec<GateOutcome>,
}

impl ValidationReport {
    pub fn has_fatal(&self) -> bool { self.violations.iter().any(Violation::is_fatal) }

    pub fn fatal(&self) -> impl Iterator<Item = &Violation> {
        self.violations.iter().filter(|v| v.is_fatal())
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Violation> {
        self.violations.iter().filter(|v| !v.is_fatal())
    }

    pub fn gate(&self, id: &str) -> Option<&GateOutcome> { self.gates.iter().find(|g| g.id == id) }
}
