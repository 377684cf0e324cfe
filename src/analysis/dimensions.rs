//! Dimensional inference: reduces a formula over input units to a single unit.

use super::units::Dimension;
use crate::compute::formula::{BinOp, Expr, Func};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DimensionError {
    #[error("'{0}' has no known unit")]
    UnknownSymbol(String),
    #[error("cannot add or subtract '{lhs}' and '{rhs}'")]
    AdditiveMismatch { lhs: String, rhs: String },
    #[error("exponent applied to '{base}' must be a numeric literal")]
    SymbolicExponent { base: String },
    #[error("exponent {exp} applied to '{base}' does not yield integral powers")]
    FractionalPower { base: String, exp: String },
    #[error("{func}() requires a dimensionless argument, got '{arg}'")]
    TranscendentalArgument { func: &'static str, arg: String },
    #[error("unit exponent out of range in '{base}'")]
    ExponentOverflow { base: String },
}

/// Infers the unit of `expr`, given the unit of each variable it reads.
///
/// - `+`/`-` require identical dimensions.
/// - `*`/`/` combine exponents.
/// - `^` needs a literal exponent (possibly negative or half-integral); the
///   result must have integral exponents. Dimensionless bases take any exponent.
/// - `sqrt` needs even exponents; `abs` preserves the unit; every other
///   function needs a dimensionless argument.
pub fn infer<F>(expr: &Expr, unit_of: &F) -> Result<Dimension, DimensionError>
where
    F: Fn(&str) -> Option<Dimension>,
{
    match expr {
        Expr::Num(_) | Expr::Const(..) => Ok(Dimension::dimensionless()),
        Expr::Var(name) => unit_of(name).ok_or_else(|| DimensionError::UnknownSymbol(name.clone())),
        Expr::Neg(inner) => infer(inner, unit_of),
        Expr::Call { func, arg } => {
            let d = infer(arg, unit_of)?;
            match func {
                Func::Abs => Ok(d),
                Func::Sqrt => d.root(2).ok_or_else(|| DimensionError::FractionalPower {
                    base: d.to_string(),
                    exp: "1/2".to_string(),
                }),
                other => {
                    if d.is_dimensionless() {
                        Ok(d)
                    } else {
                        Err(DimensionError::TranscendentalArgument { func: func_name(*other), arg: d.to_string() })
                    }
                }
            }
        }
        Expr::Binary { op, lhs, rhs } => {
            let l = infer(lhs, unit_of)?;
            match op {
                BinOp::Add | BinOp::Sub => {
                    let r = infer(rhs, unit_of)?;
                    if l == r {
                        Ok(l)
                    } else {
                        Err(DimensionError::AdditiveMismatch { lhs: l.to_string(), rhs: r.to_string() })
                    }
                }
                BinOp::Mul | BinOp::Div => {
                    let r = infer(rhs, unit_of)?;
                    let combined = if *op == BinOp::Mul { l.multiply(&r) } else { l.divide(&r) };
                    combined.ok_or_else(|| DimensionError::ExponentOverflow { base: l.to_string() })
                }
                BinOp::Pow => power(l, rhs, unit_of),
            }
        }
    }
}

fn power<F>(base: Dimension, exponent: &Expr, unit_of: &F) -> Result<Dimension, DimensionError>
where
    F: Fn(&str) -> Option<Dimension>,
{
    if base.is_dimensionless() {
        // Any dimensionless exponent is fine, e.g. alpha^(1/3) or 2^n.
        let e = infer(exponent, unit_of)?;
        return if e.is_dimensionless() {
            Ok(base)
        } else {
            Err(DimensionError::TranscendentalArgument { func: "pow", arg: e.to_string() })
        };
    }

    let exp = literal_value(exponent).ok_or_else(|| DimensionError::SymbolicExponent { base: base.to_string() })?;
    let fractional = || DimensionError::FractionalPower { base: base.to_string(), exp: exp.to_string() };
    let overflow = || DimensionError::ExponentOverflow { base: base.to_string() };

    let as_exponent = |v: f64| (v.abs() <= f64::from(i32::MAX)).then_some(v as i32).ok_or_else(overflow);

    if exp.fract() == 0.0 {
        return base.powi(as_exponent(exp)?).ok_or_else(overflow);
    }
    // Half-integral exponents: x^(n/2) = sqrt(x)^n
    let doubled = exp * 2.0;
    if doubled.fract() == 0.0 {
        let doubled = as_exponent(doubled)?;
        let root = base.root(2).ok_or_else(fractional)?;
        return root.powi(doubled).ok_or_else(overflow);
    }
    Err(fractional())
}

/// Folds a constant exponent such as `2`, `-1` or `(1/2)`.
fn literal_value(e: &Expr) -> Option<f64> {
    match e {
        Expr::Num(n) => Some(*n),
        Expr::Neg(inner) => literal_value(inner).map(|v| -v),
        Expr::Binary { op, lhs, rhs } => {
            let (l, r) = (literal_value(lhs)?, literal_value(rhs)?);
            match op {
                BinOp::Add => Some(l + r),
                BinOp::Sub => Some(l - r),
                BinOp::Mul => Some(l * r),
                BinOp::Div => Some(l / r),
                BinOp::Pow => Some(l.powf(r)),
            }
        }
        _ => None,
    }
}

fn func_name(func: Func) -> &'static str {
    match func {
        Func::Sqrt => "sqrt",
        Func::Exp => "exp",
        Func::Ln => "ln",
        Func::Log10 => "log10",
        Func::Sin => "sin",
        Func::Cos => "cos",
        Func::Tan => "tan",
        Func::Abs => "abs",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::formula::Formula;
    use rstest::rstest;

    fn unit_of(name: &str) -> Option<Dimension> {
        let u = match name {
            "m_e" | "m_p" => "GeV",
            "alpha" | "n" => "1",
            "len" => "m",
            "t" => "s",
            "area" => "m^2",
            _ => return None,
        };
        Dimension::parse(u).ok()
    }

    fn infer_src(src: &str) -> Result<String, DimensionError> {
        let f = Formula::parse(src).unwrap();
        infer(f.expr(), &unit_of).map(|d| d.to_string())
    }

    #[rstest]
    #[case("m_e * 3.0", "GeV")]
    #[case("m_p / m_e", "1")]
    #[case("m_e + m_p", "GeV")]
    #[case("len / t^2", "m/s^2")]
    #[case("sqrt(area)", "m")]
    #[case("area^(1/2)", "m")]
    #[case("m_e^-1", "1/GeV")]
    #[case("alpha^(1/3) * m_e", "GeV")]
    #[case("exp(-m_p / m_e)", "1")]
    #[case("2^n", "1")]
    #[case("abs(m_e - m_p)", "GeV")]
    fn test_infer_ok(#[case] src: &str, #[case] expected: &str) {
        assert_eq!(infer_src(src).unwrap(), expected, "{}", src);
    }

    #[test]
    fn test_additive_mismatch() {
        assert!(matches!(infer_src("m_e + len"), Err(DimensionError::AdditiveMismatch { .. })));
    }

    #[test]
    fn test_transcendental_needs_dimensionless() {
        assert!(matches!(infer_src("ln(m_e)"), Err(DimensionError::TranscendentalArgument { func: "ln", .. })));
    }

    #[test]
    fn test_exponent_rules() {
        assert!(matches!(infer_src("len^n"), Err(DimensionError::SymbolicExponent { .. })));
        assert!(matches!(infer_src("sqrt(len)"), Err(DimensionError::FractionalPower { .. })));
        assert!(matches!(infer_src("len^(1/3)"), Err(DimensionError::FractionalPower { .. })));
    }

    #[test]
    fn test_exponent_overflow() {
        assert!(matches!(
            infer_src("len^2000000000 * len^2000000000"),
            Err(DimensionError::ExponentOverflow { .. })
        ));
        assert!(matches!(infer_src("len^1e12"), Err(DimensionError::ExponentOverflow { .. })));
    }

    #[test]
    fn test_unknown_symbol() {
        assert_eq!(infer_src("q * 2"), Err(DimensionError::UnknownSymbol("q".into())));
    }
}
