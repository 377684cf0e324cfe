//! Formula expressions declared by modules.
//!
//! A formula is a small arithmetic expression over a module's input ids, e.g.
//! `sqrt(alpha * m_e^2) / (4 * pi)`. Formulas serve two purposes: they are the
//! kernel of manifest-defined modules, and they are the symbolic form the
//! dimensional check reduces to a unit.

use logos::Logos;
use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FormulaError {
    #[error("unexpected character at offset {0}")]
    Lex(usize),
    #[error("unexpected {found} at token {pos}, expected {expected}")]
    Syntax { pos: usize, found: String, expected: &'static str },
    #[error("unknown function '{0}'")]
    UnknownFunction(String),
    #[error("unbound identifier '{0}'")]
    Unbound(String),
    #[error("non-finite result ({0})")]
    NonFinite(f64),
}

#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n]+")]
enum Token {
    #[regex(r"[0-9]+(\.[0-9]*)?([eE][+-]?[0-9]+)?", |lex| lex.slice().parse::<f64>().ok())]
    Number(f64),
    /// Parameter ids may be dotted (`lepton.m_e`).
    #[regex(r"[a-zA-Z_][a-zA-Z0-9_.]*", |lex| lex.slice().to_string())]
    Ident(String),
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("^")]
    Caret,
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Number(n) => write!(f, "number {}", n),
            Token::Ident(s) => write!(f, "identifier '{}'", s),
            Token::Plus => f.write_str("'+'"),
            Token::Minus => f.write_str("'-'"),
            Token::Star => f.write_str("'*'"),
            Token::Slash => f.write_str("'/'"),
            Token::Caret => f.write_str("'^'"),
            Token::LParen => f.write_str("'('"),
            Token::RParen => f.write_str("')'"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Func {
    Sqrt,
    Exp,
    Ln,
    Log10,
    Sin,
    Cos,
    Tan,
    Abs,
}

impl Func {
    fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "sqrt" => Func::Sqrt,
            "exp" => Func::Exp,
            "ln" => Func::Ln,
            "log10" => Func::Log10,
            "sin" => Func::Sin,
            "cos" => Func::Cos,
            "tan" => Func::Tan,
            "abs" => Func::Abs,
            _ => return None,
        })
    }

    fn apply(&self, x: f64) -> f64 {
        match self {
            Func::Sqrt => x.sqrt(),
            Func::Exp => x.exp(),
            Func::Ln => x.ln(),
            Func::Log10 => x.log10(),
            Func::Sin => x.sin(),
            Func::Cos => x.cos(),
            Func::Tan => x.tan(),
            Func::Abs => x.abs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Num(f64),
    /// Named constants `pi` and `e`.
    Const(&'static str, f64),
    Var(String),
    Neg(Box<Expr>),
    Binary { op: BinOp, lhs: Box<Expr>, rhs: Box<Expr> },
    Call { func: Func, arg: Box<Expr> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Assoc {
    Left,
    Right,
}

/// Returns (precedence, associativity, op); higher precedence binds tighter.
fn binary_op_info(token: &Token) -> Option<(u8, Assoc, BinOp)> {
    match token {
        Token::Plus => Some((10, Assoc::Left, BinOp::Add)),
        Token::Minus => Some((10, Assoc::Left, BinOp::Sub)),
        Token::Star => Some((20, Assoc::Left, BinOp::Mul)),
        Token::Slash => Some((20, Assoc::Left, BinOp::Div)),
        Token::Caret => Some((30, Assoc::Right, BinOp::Pow)),
        _ => None,
    }
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> { self.tokens.get(self.pos) }

    fn advance(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        tok
    }

    fn unexpected(&self, found: Option<Token>, expected: &'static str) -> FormulaError {
        FormulaError::Syntax {
            pos: self.pos.saturating_sub(1),
            found: found.map_or("end of input".to_string(), |t| t.to_string()),
            expected,
        }
    }

    fn parse_pratt(&mut self, min_prec: u8) -> Result<Expr, FormulaError> {
        let mut left = self.parse_prefix()?;

        while let Some((prec, assoc, op)) = self.peek().and_then(binary_op_info) {
            if prec < min_prec {
                break;
            }
            self.advance();
            let next_prec = if assoc == Assoc::Left { prec + 1 } else { prec };
            let right = self.parse_pratt(next_prec)?;
            left = Expr::Binary { op, lhs: Box::new(left), rhs: Box::new(right) };
        }
        Ok(left)
    }

    fn parse_prefix(&mut self) -> Result<Expr, FormulaError> {
        if matches!(self.peek(), Some(Token::Minus)) {
            self.advance();
            // Unary minus binds looser than '^': -x^2 == -(x^2)
            let operand = self.parse_pratt(30)?;
            return Ok(Expr::Neg(Box::new(operand)));
        }
        self.parse_atom()
    }

    fn parse_atom(&mut self) -> Result<Expr, FormulaError> {
        match self.advance() {
            Some(Token::Number(n)) => Ok(Expr::Num(n)),
            Some(Token::Ident(name)) => {
                if matches!(self.peek(), Some(Token::LParen)) {
                    let func = Func::from_name(&name).ok_or(FormulaError::UnknownFunction(name))?;
                    self.advance();
                    let arg = self.parse_pratt(0)?;
                    self.expect_rparen()?;
                    return Ok(Expr::Call { func, arg: Box::new(arg) });
                }
                let constant = match name.as_str() {
                    "pi" => Some(Expr::Const("pi", std::f64::consts::PI)),
                    "e" => Some(Expr::Const("e", std::f64::consts::E)),
                    _ => None,
                };
                Ok(constant.unwrap_or_else(|| Expr::Var(name)))
            }
            Some(Token::LParen) => {
                let inner = self.parse_pratt(0)?;
                self.expect_rparen()?;
                Ok(inner)
            }
            other => Err(self.unexpected(other, "a number, identifier or '('")),
        }
    }

    fn expect_rparen(&mut self) -> Result<(), FormulaError> {
        match self.advance() {
            Some(Token::RParen) => Ok(()),
            other => Err(self.unexpected(other, "')'")),
        }
    }
}

/// A parsed formula, kept alongside its source text for provenance.
#[derive(Debug, Clone, PartialEq)]
pub struct Formula {
    source: String,
    expr: Expr,
}

impl Formula {
    pub fn parse(source: &str) -> Result<Self, FormulaError> {
        let mut tokens = Vec::new();
        let mut lexer = Token::lexer(source);
        while let Some(tok) = lexer.next() {
            tokens.push(tok.map_err(|_| FormulaError::Lex(lexer.span().start))?);
        }

        let mut parser = Parser { tokens, pos: 0 };
        let expr = parser.parse_pratt(0)?;
        if let Some(extra) = parser.advance() {
            return Err(parser.unexpected(Some(extra), "end of formula"));
        }
        Ok(Self { source: source.trim().to_string(), expr })
    }

    pub fn source(&self) -> &str { &self.source }
    pub fn expr(&self) -> &Expr { &self.expr }

    /// Identifiers the formula reads, excluding named constants.
    pub fn variables(&self) -> BTreeSet<&str> {
        fn walk<'a>(e: &'a Expr, out: &mut BTreeSet<&'a str>) {
            match e {
                Expr::Var(name) => { out.insert(name.as_str()); }
                Expr::Neg(inner) | Expr::Call { arg: inner, .. } => walk(inner, out),
                Expr::Binary { lhs, rhs, .. } => { walk(lhs, out); walk(rhs, out); }
                Expr::Num(_) | Expr::Const(..) => {}
            }
        }
        let mut out = BTreeSet::new();
        walk(&self.expr, &mut out);
        out
    }

    pub fn eval<F>(&self, lookup: &F) -> Result<f64, FormulaError>
    where
        F: Fn(&str) -> Option<f64>,
    {
        let v = eval_expr(&self.expr, lookup)?;
        if v.is_finite() { Ok(v) } else { Err(FormulaError::NonFinite(v)) }
    }

    /// First-order uncertainty propagation:
    /// sigma_f^2 = sum_i (df/dx_i * sigma_i)^2, with partials by central differences.
    ///
    /// At a domain edge (`sqrt(x)` at `x = 0`) the central difference leaves the
    /// domain, so the partial falls back to the one-sided difference that stays in it.
    ///
    /// Returns `None` when no input carries an uncertainty.
    pub fn propagate<F>(&self, lookup: &F, sigma: &dyn Fn(&str) -> Option<f64>) -> Result<Option<f64>, FormulaError>
    where
        F: Fn(&str) -> Option<f64>,
    {
        let mut acc = 0.0;
        let mut any = false;
        for var in self.variables() {
            let s = match sigma(var) {
                Some(s) if s > 0.0 => s,
                _ => continue,
            };
            any = true;
            let x = lookup(var).ok_or_else(|| FormulaError::Unbound(var.to_string()))?;
            let h = (x.abs() * 1e-6).max(1e-12);
            let shifted = |delta: f64| {
                let env = |name: &str| if name == var { Some(x + delta) } else { lookup(name) };
                eval_expr(&self.expr, &env)
            };
            let d = partial(shifted(h)?, shifted(0.0)?, shifted(-h)?, h)
                .ok_or(FormulaError::NonFinite(f64::NAN))?;
            acc += (d * s).powi(2);
        }
        if !any {
            return Ok(None);
        }
        let out = acc.sqrt();
        if out.is_finite() { Ok(Some(out)) } else { Err(FormulaError::NonFinite(out)) }
    }
}

/// Central difference when both neighbours are finite, otherwise the finite one-sided one.
fn partial(up: f64, mid: f64, down: f64, h: f64) -> Option<f64> {
    let d = match (up.is_finite(), down.is_finite()) {
        (true, true) => (up - down) / (2.0 * h),
        (true, false) => (up - mid) / h,
        (false, true) => (mid - down) / h,
        (false, false) => return None,
    };
    d.is_finite().then_some(d)
}

impl fmt::Display for Formula {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn eval_expr<F>(e: &Expr, lookup: &F) -> Result<f64, FormulaError>
where
    F: Fn(&str) -> Option<f64> + ?Sized,
{
    Ok(match e {
        Expr::Num(n) => *n,
        Expr::Const(_, v) => *v,
        Expr::Var(name) => lookup(name).ok_or_else(|| FormulaError::Unbound(name.clone()))?,
        Expr::Neg(inner) => -eval_expr(inner, lookup)?,
        Expr::Call { func, arg } => func.apply(eval_expr(arg, lookup)?),
        Expr::Binary { op, lhs, rhs } => {
            let l = eval_expr(lhs, lookup)?;
            let r = eval_expr(rhs, lookup)?;
            match op {
                BinOp::Add => l + r,
                BinOp::Sub => l - r,
                BinOp::Mul => l * r,
                BinOp::Div => l / r,
                BinOp::Pow => l.powf(r),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn env(name: &str) -> Option<f64> {
        match name {
            "x" => Some(2.0),
            "y" => Some(3.0),
            "lepton.m_e" => Some(0.5),
            _ => None,
        }
    }

    #[rstest]
    #[case("x * 3.0", 6.0)]
    #[case("1 + 2 * 3", 7.0)]
    #[case("(1 + 2) * 3", 9.0)]
    #[case("2 ^ 3 ^ 2", 512.0)] // Right associative
    #[case("-x ^ 2", -4.0)]
    #[case("x - y - 1", -2.0)] // Left associative
    #[case("sqrt(x * 8)", 4.0)]
    #[case("lepton.m_e * 4", 2.0)]
    #[case("1.5e2 / 3", 50.0)]
    fn test_eval(#[case] src: &str, #[case] expected: f64) {
        let f = Formula::parse(src).unwrap();
        assert!((f.eval(&env).unwrap() - expected).abs() < 1e-12, "{} = {:?}", src, f.eval(&env));
    }

    #[test]
    fn test_constants() {
        let f = Formula::parse("2 * pi").unwrap();
        assert!((f.eval(&env).unwrap() - std::f64::consts::TAU).abs() < 1e-15);
        assert!(f.variables().is_empty());
    }

    #[rstest]
    #[case("x +")]
    #[case("(x")]
    #[case("x y")]
    #[case("x $ y")]
    #[case("")]
    fn test_syntax_errors(#[case] src: &str) {
        assert!(Formula::parse(src).is_err(), "Should fail: '{}'", src);
    }

    #[test]
    fn test_unknown_function() {
        assert_eq!(Formula::parse("gamma(x)").unwrap_err(), FormulaError::UnknownFunction("gamma".into()));
    }

    #[test]
    fn test_variables_and_unbound() {
        let f = Formula::parse("x * z + x").unwrap();
        assert_eq!(f.variables().into_iter().collect::<Vec<_>>(), vec!["x", "z"]);
        assert_eq!(f.eval(&env).unwrap_err(), FormulaError::Unbound("z".into()));
    }

    #[test]
    fn test_non_finite_is_an_error() {
        let f = Formula::parse("x / 0").unwrap();
        assert!(matches!(f.eval(&env), Err(FormulaError::NonFinite(_))));
    }

    #[test]
    fn test_uncertainty_propagation() {
        // f = x * y, sigma_x = 0.1, sigma_y = 0 -> sigma_f = y * 0.1 = 0.3
        let f = Formula::parse("x * y").unwrap();
        let sigma = |name: &str| if name == "x" { Some(0.1) } else { None };
        let s = f.propagate(&env, &sigma).unwrap().unwrap();
        assert!((s - 0.3).abs() < 1e-6, "sigma = {}", s);

        let none = |_: &str| -> Option<f64> { None };
        assert_eq!(f.propagate(&env, &none).unwrap(), None);
    }

    #[rstest]
    #[case(0.0, 0.1)]
    #[case(1e-13, 1e-14)]
    fn test_propagation_at_domain_edge(#[case] x: f64, #[case] sx: f64) {
        // x - h is outside the domain of sqrt; the forward difference is used.
        let f = Formula::parse("sqrt(x)").unwrap();
        let at = |name: &str| (name == "x").then_some(x);
        let sigma = |name: &str| (name == "x").then_some(sx);

        assert!(f.eval(&at).unwrap().is_finite());
        let s = f.propagate(&at, &sigma).unwrap().unwrap();
        assert!(s.is_finite() && s > 0.0, "sigma = {}", s);
    }

    #[test]
    fn test_partial_falls_back_to_one_side() {
        assert_eq!(partial(3.0, 2.0, 1.0, 1.0), Some(1.0));
        assert_eq!(partial(3.0, 2.0, f64::NAN, 0.5), Some(2.0));
        assert_eq!(partial(f64::NAN, 2.0, 1.0, 0.5), Some(2.0));
        assert_eq!(partial(f64::NAN, 2.0, f64::NAN, 0.5), None);
    }
}
