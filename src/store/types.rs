use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct ParamId(pub u32);

impl ParamId {
    #[inline(always)]
    pub fn index(&self) -> usize { self.0 as usize }
    pub fn new(idx: usize) -> Self { Self(idx as u32) }
}

/// How a parameter enters the registry. Fixed at declaration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamKind {
    /// Axiomatic input with no producing module.
    Fundamental,
    Derived,
    /// Produced by a module that fits against external data.
    Calibrated,
}

/// Lifecycle status as reported in artifacts. `Unresolved` until a value is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Fundamental,
    Derived,
    Calibrated,
    Unresolved,
}

impl From<ParamKind> for Status {
    fn from(kind: ParamKind) -> Self {
        match kind {
            ParamKind::Fundamental => Status::Fundamental,
            ParamKind::Derived => Status::Derived,
            ParamKind::Calibrated => Status::Calibrated,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Unit(pub String);

impl Unit {
    pub fn dimensionless() -> Self { Unit("1".to_string()) }
    pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Unit {
    fn from(s: &str) -> Self { Unit(s.to_string()) }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Fatal,
    Warning,
}

impl Default for Severity {
    fn default() -> Self { Severity::Fatal }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Fatal => f.write_str("fatal"),
            Severity::Warning => f.write_str("warning"),
        }
    }
}

/// A value together with its (optional, absolute, one-sigma) uncertainty.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quantity {
    pub value: f64,
    pub uncertainty: Option<f64>,
}

impl Quantity {
    pub fn exact(value: f64) -> Self { Self { value, uncertainty: None } }

    pub fn with_uncertainty(value: f64, uncertainty: f64) -> Self {
        Self { value, uncertainty: Some(uncertainty) }
    }

    /// Bit-level equality. `NaN` payloads and signed zeros are distinguished.
    pub fn bit_eq(&self, other: &Quantity) -> bool {
        self.value.to_bits() == other.value.to_bits()
            && self.uncertainty.map(f64::to_bits) == other.uncertainty.map(f64::to_bits)
    }

    pub fn sigma(&self) -> f64 { self.uncertainty.unwrap_or(0.0) }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
}

impl Bounds {
    pub fn unbounded() -> Self { Self::default() }

    pub fn between(min: f64, max: f64) -> Self {
        Self { min: Some(min), max: Some(max) }
    }

    pub fn contains(&self, value: f64) -> bool {
        self.min.map_or(true, |m| value >= m) && self.max.map_or(true, |m| value <= m)
    }
}

impl fmt::Display for Bounds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let lo = self.min.map_or("-inf".to_string(), |v| v.to_string());
        let hi = self.max.map_or("+inf".to_string(), |v| v.to_string());
        write!(f, "[{}, {}]", lo, hi)
    }
}

/// Declared shape of a parameter: unit, allowed range and how hard a breach fails.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSchema {
    pub unit: Unit,
    #[serde(default)]
    pub bounds: Bounds,
    #[serde(default)]
    pub severity: Severity,
}

impl ParamSchema {
    pub fn new(unit: impl Into<String>) -> Self {
        Self { unit: Unit(unit.into()), bounds: Bounds::unbounded(), severity: Severity::Fatal }
    }

    pub fn bounded(mut self, bounds: Bounds) -> Self {
        self.bounds = bounds;
        self
    }

    pub fn tolerated(mut self) -> Self {
        self.severity = Severity::Warning;
        self
    }
}

/// Who produced a value and from what.
#[derive(Debug, Clone, Copy)]
pub struct Provenance<'a> {
    pub module: &'a str,
    pub inputs: &'a [String],
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub id: String,
    pub kind: ParamKind,
    pub schema: ParamSchema,
    pub quantity: Option<Quantity>,
    pub produced_by: Option<String>,
    pub depends_on: BTreeSet<String>,
}

impl Parameter {
    pub fn status(&self) -> Status {
        if self.quantity.is_some() { self.kind.into() } else { Status::Unresolved }
    }

    pub fn is_resolved(&self) -> bool { self.quantity.is_some() }
    pub fn value(&self) -> Option<f64> { self.quantity.map(|q| q.value) }
    pub fn uncertainty(&self) -> Option<f64> { self.quantity.and_then(|q| q.uncertainty) }
    pub fn unit(&self) -> &Unit { &self.schema.unit }
}
