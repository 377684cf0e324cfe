//! Declarative cross-consistency gates.
//!
//! A gate names the parameters it checks, a predicate over their values and a
//! severity. It is evaluated exactly once, as soon as every checked parameter
//! is resolved.

use crate::store::{Quantity, Severity};
use std::fmt;
use std::sync::Arc;

pub type CustomPredicate = dyn Fn(&[Quantity]) -> bool + Send + Sync;

#[derive(Clone)]
pub enum Predicate {
    /// Every checked value lies in `[min, max]`.
    InRange { min: Option<f64>, max: Option<f64> },
    /// Two values agree within `sigmas` combined standard deviations.
    Agree { sigmas: f64 },
    /// Two values agree within a relative tolerance of the larger magnitude.
    RelativeTolerance { rel: f64 },
    /// Checked values are strictly increasing (e.g. a mass hierarchy).
    Ordered,
    Custom { name: String, check: Arc<CustomPredicate> },
}

impl fmt::Debug for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.describe()) }
}

impl Predicate {
    pub fn describe(&self) -> String {
        match self {
            Predicate::InRange { min, max } => format!(
                "in_range[{}, {}]",
                min.map_or("-inf".to_string(), |v| format!("{:?}", v)),
                max.map_or("+inf".to_string(), |v| format!("{:?}", v))
            ),
            Predicate::Agree { sigmas } => format!("agree({:?} sigma)", sigmas),
            Predicate::RelativeTolerance { rel } => format!("relative_tolerance({:?})", rel),
            Predicate::Ordered => "ordered".to_string(),
            Predicate::Custom { name, .. } => format!("custom({})", name),
        }
    }

    /// Whether the predicate is meaningful over `n` checked parameters.
    pub fn accepts(&self, n: usize) -> bool {
        match self {
            Predicate::Agree { .. } | Predicate::RelativeTolerance { .. } => n == 2,
            Predicate::Ordered => n >= 2,
            Predicate::InRange { .. } | Predicate::Custom { .. } => n >= 1,
        }
    }

    pub fn holds(&self, values: &[Quantity]) -> bool {
        match self {
            Predicate::InRange { min, max } => values.iter().all(|q| {
                min.map_or(true, |m| q.value >= m) && max.map_or(true, |m| q.value <= m)
            }),
            Predicate::Agree { sigmas } => match values {
                [a, b] => {
                    let combined = (a.sigma().powi(2) + b.sigma().powi(2)).sqrt();
                    (a.value - b.value).abs() <= sigmas * combined
                }
                _ => false,
            },
            Predicate::RelativeTolerance { rel } => match values {
                [a, b] => {
                    let scale = a.value.abs().max(b.value.abs());
                    (a.value - b.value).abs() <= rel * scale
                }
                _ => false,
            },
            Predicate::Ordered => values.windows(2).all(|w| w[0].value < w[1].value),
            Predicate::Custom { check, .. } => check(values),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Gate {
    pub id: String,
    pub parameters_checked: Vec<String>,
    pub predicate: Predicate,
    pub severity: Severity,
    /// `{gate}` and `{<param_id>}` placeholders are substituted on failure.
    pub message_template: Option<String>,
}

impl Gate {
    pub fn new(id: impl Into<String>, parameters_checked: Vec<String>, predicate: Predicate) -> Self {
        Self { id: id.into(), parameters_checked, predicate, severity: Severity::Fatal, message_template: None }
    }

    pub fn in_range(id: impl Into<String>, param: impl Into<String>, min: f64, max: f64) -> Self {
        Self::new(id, vec![param.into()], Predicate::InRange { min: Some(min), max: Some(max) })
    }

    pub fn agree(id: impl Into<String>, a: impl Into<String>, b: impl Into<String>, sigmas: f64) -> Self {
        Self::new(id, vec![a.into(), b.into()], Predicate::Agree { sigmas })
    }

    pub fn relative(id: impl Into<String>, a: impl Into<String>, b: impl Into<String>, rel: f64) -> Self {
        Self::new(id, vec![a.into(), b.into()], Predicate::RelativeTolerance { rel })
    }

    pub fn ordered(id: impl Into<String>, params: Vec<String>) -> Self {
        Self::new(id, params, Predicate::Ordered)
    }

    pub fn custom<F>(id: impl Into<String>, params: Vec<String>, name: impl Into<String>, check: F) -> Self
    where
        F: Fn(&[Quantity]) -> bool + Send + Sync + 'static,
    {
        Self::new(id, params, Predicate::Custom { name: name.into(), check: Arc::new(check) })
    }

    pub fn severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn message(mut self, template: impl Into<String>) -> Self {
        self.message_template = Some(template.into());
        self
    }

    /// Renders the failure message from the template (or a default listing the values).
    pub fn render_message(&self, values: &[Quantity]) -> String {
        let template = self.message_template.clone().unwrap_or_else(|| {
            let listed: Vec<String> = self.parameters_checked.iter().map(|p| format!("{} = {{{}}}", p, p)).collect();
            format!("{{gate}} failed {}: {}", self.predicate.describe(), listed.join(", "))
        });

        let mut out = template.replace("{gate}", &self.id);
        for (param, q) in self.parameters_checked.iter().zip(values) {
            out = out.replace(&format!("{{{}}}", param), &format!("{:?}", q.value));
        }
        out
    }
}
