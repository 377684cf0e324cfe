//! The module contract: `{id, inputs, outputs, compute}`.

use super::formula::Formula;
use crate::store::Quantity;
use smallvec::SmallVec;
use std::fmt;
use std::sync::Arc;

/// Most modules read and write a handful of parameters.
pub type IdList = SmallVec<[String; 4]>;

/// Output of a kernel invocation, one entry per declared output, in order.
pub type Outputs = SmallVec<[Quantity; 2]>;

pub type NativeFn = dyn Fn(&[Quantity]) -> Result<Outputs, String> + Send + Sync;

/// How a module turns its inputs into outputs.
#[derive(Clone)]
pub enum Kernel {
    /// Each output is its declared formula, with first-order uncertainty propagation.
    Formulas,
    /// A Rust closure receiving inputs in declaration order.
    Native(Arc<NativeFn>),
}

impl fmt::Debug for Kernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Kernel::Formulas => f.write_str("Formulas"),
            Kernel::Native(_) => f.write_str("Native(..)"),
        }
    }
}

/// A registered computation module. Stateless and referentially transparent.
#[derive(Debug, Clone)]
pub struct Module {
    pub id: String,
    pub inputs: IdList,
    pub outputs: IdList,
    /// Declared formula per output (parallel to `outputs`). Used by the
    /// dimensional check, and as the kernel when `kernel` is `Formulas`.
    pub formulas: Vec<Option<Formula>>,
    pub kernel: Kernel,
}

impl Module {
    pub fn formula_for(&self, output: &str) -> Option<&Formula> {
        let pos = self.outputs.iter().position(|o| o == output)?;
        self.formulas.get(pos)?.as_ref()
    }

    /// Runs the kernel. `inputs` are in declaration order.
    pub fn invoke(&self, inputs: &[Quantity]) -> Result<Outputs, String> {
        let outputs = match &self.kernel {
            Kernel::Native(f) => f(inputs)?,
            Kernel::Formulas => {
                let value_of = |name: &str| {
                    self.inputs.iter().position(|i| i == name).map(|p| inputs[p].value)
                };
                let sigma_of = |name: &str| {
                    self.inputs.iter().position(|i| i == name).and_then(|p| inputs[p].uncertainty)
                };
                let mut out = Outputs::new();
                for (output, formula) in self.outputs.iter().zip(&self.formulas) {
                    let formula = formula
                        .as_ref()
                        .ok_or_else(|| format!("no formula declared for '{}'", output))?;
                    let value = formula.eval(&value_of).map_err(|e| format!("{}: {}", output, e))?;
                    let uncertainty = formula.propagate(&value_of, &sigma_of).map_err(|e| format!("{}: {}", output, e))?;
                    out.push(Quantity { value, uncertainty });
                }
                out
            }
        };

        if outputs.len() != self.outputs.len() {
            return Err(format!(
                "kernel returned {} values for {} declared outputs",
                outputs.len(),
                self.outputs.len()
            ));
        }
        Ok(outputs)
    }
}

/// Builder for the registration contract.
///
/// ```
/// use param_registry_core::compute::ModuleSpec;
/// let spec = ModuleSpec::new("B").inputs(["x"]).formula("y", "x * 3.0");
/// ```
#[derive(Debug, Clone)]
pub struct ModuleSpec {
    pub(crate) id: String,
    pub(crate) inputs: Vec<String>,
    pub(crate) outputs: Vec<String>,
    pub(crate) formulas: Vec<Option<String>>,
    pub(crate) native: Option<Kernel>,
}

impl ModuleSpec {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into(), inputs: Vec::new(), outputs: Vec::new(), formulas: Vec::new(), native: None }
    }

    pub fn inputs<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inputs.extend(ids.into_iter().map(Into::into));
        self
    }

    /// Declares an output with no formula (a native kernel must then compute it).
    pub fn output(mut self, id: impl Into<String>) -> Self {
        self.outputs.push(id.into());
        self.formulas.push(None);
        self
    }

    /// Declares an output together with its formula.
    pub fn formula(mut self, id: impl Into<String>, source: impl Into<String>) -> Self {
        self.outputs.push(id.into());
        self.formulas.push(Some(source.into()));
        self
    }

    pub fn native<F>(mut self, f: F) -> Self
    where
        F: Fn(&[Quantity]) -> Result<Outputs, String> + Send + Sync + 'static,
    {
        self.native = Some(Kernel::Native(Arc::new(f)));
        self
    }

    pub fn id(&self) -> &str { &self.id }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smallvec::smallvec;

    fn formula_module() -> Module {
        Module {
            id: "B".into(),
            inputs: smallvec!["x".to_string()],
            outputs: smallvec!["y".to_string(), "z".to_string()],
            formulas: vec![Some(Formula::parse("x * 3.0").unwrap()), Some(Formula::parse("x + 1").unwrap())],
            kernel: Kernel::Formulas,
        }
    }

    #[test]
    fn test_formula_kernel_evaluates_each_output() {
        let m = formula_module();
        let out = m.invoke(&[Quantity::with_uncertainty(2.0, 0.1)]).unwrap();
        assert_eq!(out[0].value, 6.0);
        assert_eq!(out[1].value, 3.0);
        assert!((out[0].uncertainty.unwrap() - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_native_kernel_arity_is_checked() {
        let mut m = formula_module();
        m.kernel = Kernel::Native(Arc::new(|_| Ok(smallvec![Quantity::exact(1.0)])));
        let err = m.invoke(&[Quantity::exact(2.0)]).unwrap_err();
        assert!(err.contains("1 values for 2 declared outputs"), "{}", err);
    }

    #[test]
    fn test_formula_lookup_by_output() {
        let m = formula_module();
        assert_eq!(m.formula_for("z").unwrap().source(), "x + 1");
        assert!(m.formula_for("w").is_none());
    }
}
