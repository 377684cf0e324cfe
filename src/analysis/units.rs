//! Unit algebra: units as products of symbols raised to integer powers.

use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("cannot parse unit '{0}'")]
pub struct UnitParseError(pub String);

/// A parsed unit, mapping each base symbol to its exponent.
/// Example: "kg*m/s^2" -> { "kg": 1, "m": 1, "s": -2 }
///
/// Symbols are opaque: `GeV` and `MeV` are different dimensions.
#[derive(Debug, Default, Clone, PartialEq, Eq, Hash)]
pub struct Dimension {
    terms: BTreeMap<String, i32>,
}

impl Dimension {
    pub fn dimensionless() -> Self { Self::default() }

    pub fn parse(s: &str) -> Result<Self, UnitParseError> {
        // Reject empty or whitespace-only strings explicitly; dimensionless is spelled "1".
        if s.trim().is_empty() {
            return Err(UnitParseError(s.to_string()));
        }

        let mut terms = BTreeMap::new();
        let mut parts = s.split('/');

        if let Some(num) = parts.next() { Self::parse_product(s, num, 1, &mut terms)?; }
        if let Some(den) = parts.next() { Self::parse_product(s, den, -1, &mut terms)?; }
        if parts.next().is_some() { return Err(UnitParseError(s.to_string())); } // Multiple slashes

        let mut dim = Self { terms };
        dim.prune();
        Ok(dim)
    }

    fn parse_product(
        full: &str,
        s: &str,
        sign: i32,
        terms: &mut BTreeMap<String, i32>,
    ) -> Result<(), UnitParseError> {
        let err = || UnitParseError(full.to_string());
        if s.trim() == "1" { return Ok(()); }
        if s.trim().is_empty() { return Err(err()); }

        for factor in s.split('*') {
            let mut parts = factor.split('^');
            let base = parts.next().ok_or_else(err)?.trim();
            if base.is_empty() || !base.chars().all(|c| c.is_alphanumeric() || c == '_') {
                return Err(err());
            }
            let exp = parts.next().unwrap_or("1").trim().parse::<i32>().map_err(|_| err())?;
            if parts.next().is_some() { return Err(err()); }
            if base == "1" { continue; }
            let term = terms.entry(base.to_string()).or_insert(0);
            let current = *term;
            *term = exp.checked_mul(sign).and_then(|e| current.checked_add(e)).ok_or_else(err)?;
        }
        Ok(())
    }

    fn prune(&mut self) { self.terms.retain(|_, e| *e != 0); }

    pub fn is_dimensionless(&self) -> bool { self.terms.is_empty() }

    /// Exponent arithmetic is checked: `None` when an exponent leaves `i32`.
    pub fn multiply(&self, other: &Self) -> Option<Self> {
        self.combine(other, 1)
    }

    pub fn divide(&self, other: &Self) -> Option<Self> {
        self.combine(other, -1)
    }

    fn combine(&self, other: &Self, sign: i32) -> Option<Self> {
        let mut out = self.clone();
        for (k, v) in &other.terms {
            let term = out.terms.entry(k.clone()).or_insert(0);
            *term = term.checked_add(v.checked_mul(sign)?)?;
        }
        out.prune();
        Some(out)
    }

    pub fn powi(&self, n: i32) -> Option<Self> {
        let terms = self
            .terms
            .iter()
            .map(|(k, v)| v.checked_mul(n).map(|e| (k.clone(), e)))
            .collect::<Option<BTreeMap<_, _>>>()?;
        let mut out = Self { terms };
        out.prune();
        Some(out)
    }

    /// Integer root. `None` when some exponent is not divisible by `n`.
    pub fn root(&self, n: i32) -> Option<Self> {
        if n == 0 || self.terms.values().any(|e| e % n != 0) {
            return None;
        }
        Some(Self { terms: self.terms.iter().map(|(k, v)| (k.clone(), v / n)).collect() })
    }
}

impl fmt::Display for Dimension {
    /// Canonical form: symbols sorted, numerator before denominator, "1" when empty.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (num, den): (Vec<_>, Vec<_>) = self.terms.iter().partition(|&(_, &v)| v > 0);

        let fmt_terms = |terms: Vec<(&String, &i32)>| -> String {
            if terms.is_empty() { return "1".to_string(); }
            terms
                .into_iter()
                .map(|(k, v)| if v.unsigned_abs() == 1 { k.clone() } else { format!("{}^{}", k, v.unsigned_abs()) })
                .collect::<Vec<_>>()
                .join("*")
        };

        let n_str = fmt_terms(num);
        let d_str = fmt_terms(den);

        if d_str == "1" {
            f.write_str(&n_str)
        } else {
            write!(f, "{}/{}", n_str, d_str)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("GeV", "GeV")]
    #[case("m*s", "m*s")]
    #[case("s*m", "m*s")] // Canonical reordering
    #[case("m/s^2", "m/s^2")]
    #[case("kg*m/s^2", "kg*m/s^2")]
    #[case("m*m", "m^2")]
    #[case("m^2/m", "m")] // Cancellation
    #[case("m/m", "1")] // Full cancellation to dimensionless
    #[case("1", "1")]
    #[case("1/s", "1/s")]
    #[case("GeV^-1", "1/GeV")]
    #[case("m^1", "m")]
    fn test_parse_canonical(#[case] input: &str, #[case] expected: &str) {
        let d = Dimension::parse(input).expect("Failed to parse");
        assert_eq!(d.to_string(), expected, "Input: {}", input);
    }

    #[rstest]
    #[case("")]
    #[case("   ")]
    #[case("USD//MWh")]
    #[case("USD^bar")]
    #[case("m^2^3")]
    #[case("m*")]
    #[case("m+s")]
    fn test_parse_invalid(#[case] input: &str) {
        assert!(Dimension::parse(input).is_err(), "Should fail: '{}'", input);
    }

    #[test]
    fn test_arithmetic() {
        // (kg * m / s^2) * s = kg * m / s
        let force = Dimension::parse("kg*m/s^2").unwrap();
        let time = Dimension::parse("s").unwrap();
        assert_eq!(force.multiply(&time).unwrap().to_string(), "kg*m/s");
        assert_eq!(force.divide(&force), Some(Dimension::dimensionless()));
    }

    #[test]
    fn test_powers_and_roots() {
        let area = Dimension::parse("m^2").unwrap();
        assert_eq!(area.root(2).unwrap().to_string(), "m");
        assert!(Dimension::parse("m").unwrap().root(2).is_none());
        assert_eq!(Dimension::parse("GeV").unwrap().powi(-2).unwrap().to_string(), "1/GeV^2");
    }

    #[test]
    fn test_exponent_overflow_is_an_error() {
        assert!(Dimension::parse("m^2000000000*m^2000000000").is_err());
        assert!(Dimension::parse("1/m^-2147483648").is_err());

        let huge = Dimension::parse("m^2000000000").unwrap();
        assert!(huge.multiply(&huge).is_none());
        assert!(huge.divide(&huge.powi(-1).unwrap()).is_none());
        assert!(huge.powi(2).is_none());
    }
}
