//! Restricted polynomial transforms mapping internal parameter values to the
//! representation handed to external simulation tools.
//!
//! Only a tiny expression language is accepted: numeric literals, the
//! variable `theta`, `+ - * /`, unary minus, parentheses and integer powers
//! written as `**n` or `^n`. Division is only allowed by constant
//! sub-expressions, so every accepted transform is a polynomial in `theta`.

use std::fmt;

use morph_core::errors::{ErrorInfo, MorphError};
use nalgebra::{DMatrix, Schur};
use serde::{Deserialize, Serialize};

/// Largest integer exponent accepted by the parser.
pub const MAX_EXPONENT: u32 = 8;

/// Coefficients below this fraction of the largest one are treated as zero.
const COEFFICIENT_CUTOFF: f64 = 1e-14;

const SCHUR_MAX_ITERATIONS: usize = 10_000;

fn transform_error(code: &str, source: &str, message: impl Into<String>) -> MorphError {
    MorphError::InvalidTransform(ErrorInfo::new(code, message).with_context("source", source))
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Const(f64),
    Theta,
    Neg(Box<Expr>),
    Add(Box<Expr>, Box<Expr>),
    Sub(Box<Expr>, Box<Expr>),
    Mul(Box<Expr>, Box<Expr>),
    Div(Box<Expr>, Box<Expr>),
    Pow(Box<Expr>, u32),
}

impl Expr {
    fn eval(&self, theta: f64) -> f64 {
        match self {
            Expr::Const(value) => *value,
            Expr::Theta => theta,
            Expr::Neg(inner) => -inner.eval(theta),
            Expr::Add(lhs, rhs) => lhs.eval(theta) + rhs.eval(theta),
            Expr::Sub(lhs, rhs) => lhs.eval(theta) - rhs.eval(theta),
            Expr::Mul(lhs, rhs) => lhs.eval(theta) * rhs.eval(theta),
            Expr::Div(lhs, rhs) => lhs.eval(theta) / rhs.eval(theta),
            Expr::Pow(base, exponent) => base.eval(theta).powi(*exponent as i32),
        }
    }

    fn is_constant(&self) -> bool {
        match self {
            Expr::Const(_) => true,
            Expr::Theta => false,
            Expr::Neg(inner) | Expr::Pow(inner, _) => inner.is_constant(),
            Expr::Add(lhs, rhs) | Expr::Sub(lhs, rhs) | Expr::Mul(lhs, rhs) | Expr::Div(lhs, rhs) => {
                lhs.is_constant() && rhs.is_constant()
            }
        }
    }

    fn degree(&self) -> u32 {
        match self {
            Expr::Const(_) => 0,
            Expr::Theta => 1,
            Expr::Neg(inner) => inner.degree(),
            Expr::Add(lhs, rhs) | Expr::Sub(lhs, rhs) => lhs.degree().max(rhs.degree()),
            Expr::Mul(lhs, rhs) => lhs.degree() + rhs.degree(),
            Expr::Div(lhs, _) => lhs.degree(),
            Expr::Pow(base, exponent) => base.degree() * exponent,
        }
    }

    /// Expands the expression into `c` with `p(theta) = sum c[k] * theta^k`.
    fn coefficients(&self) -> Vec<f64> {
        match self {
            Expr::Const(value) => vec![*value],
            Expr::Theta => vec![0.0, 1.0],
            Expr::Neg(inner) => inner.coefficients().into_iter().map(|c| -c).collect(),
            Expr::Add(lhs, rhs) => poly_add(&lhs.coefficients(), &rhs.coefficients(), 1.0),
            Expr::Sub(lhs, rhs) => poly_add(&lhs.coefficients(), &rhs.coefficients(), -1.0),
            Expr::Mul(lhs, rhs) => poly_mul(&lhs.coefficients(), &rhs.coefficients()),
            // The parser only admits constant divisors.
            Expr::Div(lhs, rhs) => {
                let divisor = rhs.eval(0.0);
                lhs.coefficients().into_iter().map(|c| c / divisor).collect()
            }
            Expr::Pow(base, exponent) => {
                let base = base.coefficients();
                (0..*exponent).fold(vec![1.0], |acc, _| poly_mul(&acc, &base))
            }
        }
    }
}

fn poly_add(lhs: &[f64], rhs: &[f64], sign: f64) -> Vec<f64> {
    let mut out = vec![0.0; lhs.len().max(rhs.len())];
    for (k, c) in lhs.iter().enumerate() {
        out[k] += c;
    }
    for (k, c) in rhs.iter().enumerate() {
        out[k] += sign * c;
    }
    out
}

fn poly_mul(lhs: &[f64], rhs: &[f64]) -> Vec<f64> {
    let mut out = vec![0.0; lhs.len() + rhs.len() - 1];
    for (i, a) in lhs.iter().enumerate() {
        for (j, b) in rhs.iter().enumerate() {
            out[i + j] += a * b;
        }
    }
    out
}

fn horner(coefficients: &[f64], x: f64) -> f64 {
    coefficients.iter().rev().fold(0.0, |acc, c| acc * x + c)
}

/// Derivative coefficients with negligible leading terms dropped.
fn trimmed_derivative(coefficients: &[f64]) -> Vec<f64> {
    let mut derivative: Vec<f64> = coefficients
        .iter()
        .enumerate()
        .skip(1)
        .map(|(k, c)| k as f64 * c)
        .collect();
    let scale = derivative.iter().fold(0.0_f64, |acc, c| acc.max(c.abs()));
    while derivative
        .last()
        .is_some_and(|c| c.abs() <= COEFFICIENT_CUTOFF * scale)
    {
        derivative.pop();
    }
    derivative
}

/// Real parts of all complex roots, from the companion matrix eigenvalues.
///
/// Complex pairs contribute their real part too; extra split points only
/// refine the sign scan.
fn root_candidates(coefficients: &[f64]) -> Option<Vec<f64>> {
    let degree = coefficients.len().checked_sub(1)?;
    if degree == 0 {
        return Some(Vec::new());
    }
    let leading = coefficients[degree];
    let companion = DMatrix::from_fn(degree, degree, |row, col| {
        if col == degree - 1 {
            -coefficients[row] / leading
        } else if row == col + 1 {
            1.0
        } else {
            0.0
        }
    });
    let schur = Schur::try_new(companion, f64::EPSILON, SCHUR_MAX_ITERATIONS)?;
    let mut roots: Vec<f64> = schur
        .complex_eigenvalues()
        .iter()
        .map(|z| z.re)
        .filter(|re| re.is_finite())
        .collect();
    roots.sort_by(f64::total_cmp);
    Some(roots)
}

/// Sign of `p(x)`, or zero when it is indistinguishable from rounding noise.
fn sign_at(coefficients: &[f64], x: f64) -> f64 {
    let value = horner(coefficients, x);
    let magnitude = horner(
        &coefficients.iter().map(|c| c.abs()).collect::<Vec<_>>(),
        x.abs(),
    );
    if value.abs() <= 1e-12 * magnitude {
        0.0
    } else {
        value.signum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Token {
    Num(f64),
    Theta,
    Plus,
    Minus,
    Star,
    Slash,
    Pow,
    LParen,
    RParen,
}

fn tokenize(source: &str) -> Result<Vec<Token>, MorphError> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut idx = 0;
    while idx < chars.len() {
        let ch = chars[idx];
        match ch {
            c if c.is_whitespace() => idx += 1,
            '+' => {
                tokens.push(Token::Plus);
                idx += 1;
            }
            '-' => {
                tokens.push(Token::Minus);
                idx += 1;
            }
            '*' if chars.get(idx + 1) == Some(&'*') => {
                tokens.push(Token::Pow);
                idx += 2;
            }
            '*' => {
                tokens.push(Token::Star);
                idx += 1;
            }
            '^' => {
                tokens.push(Token::Pow);
                idx += 1;
            }
            '/' => {
                tokens.push(Token::Slash);
                idx += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                idx += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                idx += 1;
            }
            c if c.is_ascii_digit() || c == '.' => {
                let start = idx;
                while idx < chars.len() && (chars[idx].is_ascii_digit() || chars[idx] == '.') {
                    idx += 1;
                }
                if idx < chars.len() && (chars[idx] == 'e' || chars[idx] == 'E') {
                    let mut look = idx + 1;
                    if look < chars.len() && (chars[look] == '+' || chars[look] == '-') {
                        look += 1;
                    }
                    if look < chars.len() && chars[look].is_ascii_digit() {
                        idx = look;
                        while idx < chars.len() && chars[idx].is_ascii_digit() {
                            idx += 1;
                        }
                    }
                }
                let literal: String = chars[start..idx].iter().collect();
                let value = literal.parse::<f64>().map_err(|_| {
                    transform_error(
                        "transform-literal",
                        source,
                        format!("malformed numeric literal `{literal}`"),
                    )
                })?;
                tokens.push(Token::Num(value));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = idx;
                while idx < chars.len() && (chars[idx].is_alphanumeric() || chars[idx] == '_') {
                    idx += 1;
                }
                let ident: String = chars[start..idx].iter().collect();
                if ident != "theta" {
                    return Err(transform_error(
                        "transform-identifier",
                        source,
                        format!("unknown identifier `{ident}`, only `theta` is allowed"),
                    ));
                }
                tokens.push(Token::Theta);
            }
            other => {
                return Err(transform_error(
                    "transform-character",
                    source,
                    format!("unexpected character `{other}`"),
                ))
            }
        }
    }
    Ok(tokens)
}

struct Parser<'a> {
    source: &'a str,
    tokens: Vec<Token>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<Token> {
        self.tokens.get(self.pos).copied()
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.peek();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn error(&self, message: impl Into<String>) -> MorphError {
        transform_error("transform-syntax", self.source, message)
            .map_position(self.pos)
    }

    fn parse_expr(&mut self) -> Result<Expr, MorphError> {
        let mut lhs = self.parse_term()?;
        while let Some(token) = self.peek() {
            match token {
                Token::Plus => {
                    self.pos += 1;
                    lhs = Expr::Add(Box::new(lhs), Box::new(self.parse_term()?));
                }
                Token::Minus => {
                    self.pos += 1;
                    lhs = Expr::Sub(Box::new(lhs), Box::new(self.parse_term()?));
                }
                _ => break,
            }
        }
        Ok(lhs)
    }

    fn parse_term(&mut self) -> Result<Expr, MorphError> {
        let mut lhs = self.parse_unary()?;
        while let Some(token) = self.peek() {
            match token {
                Token::Star => {
                    self.pos += 1;
                    lhs = Expr::Mul(Box::new(lhs), Box::new(self.parse_unary()?));
                }
                Token::Slash => {
                    self.pos += 1;
                    let divisor = self.parse_unary()?;
                    if !divisor.is_constant() {
                        return Err(self.error("division is only allowed by constants"));
                    }
                    if divisor.eval(0.0) == 0.0 {
                        return Err(self.error("division by zero"));
                    }
                    lhs = Expr::Div(Box::new(lhs), Box::new(divisor));
                }
                _ => break,
            }
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, MorphError> {
        match self.peek() {
            Some(Token::Minus) => {
                self.pos += 1;
                Ok(Expr::Neg(Box::new(self.parse_unary()?)))
            }
            Some(Token::Plus) => {
                self.pos += 1;
                self.parse_unary()
            }
            _ => self.parse_power(),
        }
    }

    fn parse_power(&mut self) -> Result<Expr, MorphError> {
        let base = self.parse_atom()?;
        if self.peek() != Some(Token::Pow) {
            return Ok(base);
        }
        self.pos += 1;
        match self.next() {
            Some(Token::Num(value))
                if value.fract() == 0.0 && value >= 0.0 && value <= MAX_EXPONENT as f64 =>
            {
                Ok(Expr::Pow(Box::new(base), value as u32))
            }
            _ => Err(self.error(format!(
                "exponents must be integer literals between 0 and {MAX_EXPONENT}"
            ))),
        }
    }

    fn parse_atom(&mut self) -> Result<Expr, MorphError> {
        match self.next() {
            Some(Token::Num(value)) => Ok(Expr::Const(value)),
            Some(Token::Theta) => Ok(Expr::Theta),
            Some(Token::LParen) => {
                let inner = self.parse_expr()?;
                match self.next() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err(self.error("missing closing parenthesis")),
                }
            }
            Some(_) => Err(self.error("expected a number, `theta` or `(`")),
            None => Err(self.error("unexpected end of expression")),
        }
    }
}

trait WithPosition {
    fn map_position(self, pos: usize) -> Self;
}

impl WithPosition for MorphError {
    fn map_position(self, pos: usize) -> Self {
        match self {
            MorphError::InvalidTransform(info) => {
                MorphError::InvalidTransform(info.with_context("token", pos.to_string()))
            }
            other => other,
        }
    }
}

/// Parsed transform from internal parameter values to their external form.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Transform {
    source: String,
    expr: Expr,
}

impl Transform {
    /// Parses a transform expression in the variable `theta`.
    pub fn parse(source: &str) -> Result<Self, MorphError> {
        let tokens = tokenize(source)?;
        if tokens.is_empty() {
            return Err(transform_error(
                "transform-empty",
                source,
                "transform expression is empty",
            ));
        }
        let mut parser = Parser {
            source,
            tokens,
            pos: 0,
        };
        let expr = parser.parse_expr()?;
        if parser.pos != parser.tokens.len() {
            return Err(parser.error("unexpected trailing input"));
        }
        Ok(Self {
            source: source.trim().to_string(),
            expr,
        })
    }

    /// Returns the expression text the transform was parsed from.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluates the transform at an internal parameter value.
    pub fn apply(&self, theta: f64) -> f64 {
        self.expr.eval(theta)
    }

    /// Polynomial degree of the expression in `theta`.
    pub fn degree(&self) -> u32 {
        self.expr.degree()
    }

    /// Checks that the transform is strictly monotonic on `[min, max]`, or on
    /// the whole real line when `bounds` is `None`.
    ///
    /// The derivative of the expanded polynomial may touch zero at isolated
    /// points but must keep one sign between all of its real roots.
    pub fn check_monotonic(&self, bounds: Option<(f64, f64)>) -> Result<(), MorphError> {
        let coefficients = self.expr.coefficients();
        let finite = coefficients.iter().all(|c| c.is_finite())
            && bounds.map_or(true, |(min, max)| {
                self.apply(min).is_finite() && self.apply(max).is_finite()
            });
        if !finite {
            return Err(transform_error(
                "transform-non-finite",
                &self.source,
                "transform is not finite on the parameter range",
            ));
        }
        let not_monotonic = |at: Option<f64>| {
            let mut info = ErrorInfo::new(
                "transform-not-monotonic",
                "transform must be strictly monotonic on the parameter range",
            )
            .with_context("source", self.source.as_str());
            if let Some(theta) = at {
                info = info.with_context("theta", theta.to_string());
            }
            MorphError::InvalidTransform(info)
        };
        let derivative = trimmed_derivative(&coefficients);
        if derivative.is_empty() {
            return Err(not_monotonic(None));
        }
        let roots = root_candidates(&derivative).ok_or_else(|| {
            transform_error(
                "transform-roots",
                &self.source,
                "could not locate the critical points of the transform",
            )
        })?;

        let checkpoints: Vec<f64> = match bounds {
            Some((min, max)) => {
                let mut knots = vec![min];
                knots.extend(roots.into_iter().filter(|r| *r > min && *r < max));
                knots.push(max);
                knots.windows(2).map(|w| 0.5 * (w[0] + w[1])).collect()
            }
            None => match (roots.first(), roots.last()) {
                (Some(&first), Some(&last)) => {
                    let mut checkpoints = vec![first - 1.0 - first.abs()];
                    checkpoints.extend(roots.windows(2).map(|w| 0.5 * (w[0] + w[1])));
                    checkpoints.push(last + 1.0 + last.abs());
                    checkpoints
                }
                _ => vec![0.0],
            },
        };

        let mut direction = 0.0_f64;
        for theta in checkpoints {
            let sign = sign_at(&derivative, theta);
            if sign == 0.0 {
                continue;
            }
            if direction != 0.0 && sign != direction {
                return Err(not_monotonic(Some(theta)));
            }
            direction = sign;
        }
        if direction == 0.0 {
            return Err(not_monotonic(None));
        }
        Ok(())
    }
}

impl fmt::Debug for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Transform").field(&self.source).finish()
    }
}

impl fmt::Display for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl TryFrom<String> for Transform {
    type Error = MorphError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Transform::parse(&value)
    }
}

impl From<Transform> for String {
    fn from(value: Transform) -> Self {
        value.source
    }
}
