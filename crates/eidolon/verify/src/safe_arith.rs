//! Restricted arithmetic evaluator.
//!
//! Accepts integer and float literals, unary `+`/`-`, the binary operators
//! `+ - * / // % **` and parentheses, with Python precedence: `**` is
//! right-associative and binds tighter than a leading unary minus, so
//! `-2 ** 2 == -4`. Integer arithmetic is checked; `/` is true division.
//! Anything outside this grammar is an [`ArithError`].

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ArithError;

/// Maximum parenthesis/unary nesting accepted by the parser.
const MAX_NESTING: usize = 128;

/// A safe-arith value. Integral floats canonicalize to integers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    /// Collapse integral floats that fit in an `i64`.
    pub fn canonical(self) -> Number {
        match self {
            Number::Float(f) if f.is_finite() && f.fract() == 0.0 && f.abs() < 9.2e18 => {
                Number::Int(f as i64)
            }
            other => other,
        }
    }

    pub fn as_f64(self) -> f64 {
        match self {
            Number::Int(i) => i as f64,
            Number::Float(f) => f,
        }
    }

    pub fn to_json(self) -> serde_json::Value {
        match self.canonical() {
            Number::Int(i) => serde_json::Value::from(i),
            Number::Float(f) => serde_json::Number::from_f64(f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
        }
    }

    pub fn from_json(value: &serde_json::Value) -> Option<Number> {
        if let Some(i) = value.as_i64() {
            return Some(Number::Int(i));
        }
        value.as_f64().map(|f| Number::Float(f).canonical())
    }

    /// Checked addition with safe-arith semantics.
    pub fn checked_add(self, other: Number) -> Result<Number, ArithError> {
        add(self, other).map(Number::canonical)
    }

    /// Equality after canonicalization.
    pub fn same_value(self, other: Number) -> bool {
        match (self.canonical(), other.canonical()) {
            (Number::Int(a), Number::Int(b)) => a == b,
            (a, b) => a.as_f64() == b.as_f64(),
        }
    }
}

impl fmt::Display for Number {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.canonical() {
            Number::Int(i) => write!(f, "{i}"),
            Number::Float(x) => write!(f, "{x}"),
        }
    }
}

impl From<i64> for Number {
    fn from(value: i64) -> Self {
        Number::Int(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Token {
    Num(Number),
    Plus,
    Minus,
    Star,
    Pow,
    Slash,
    FloorDiv,
    Percent,
    LParen,
    RParen,
}

fn err(msg: impl Into<String>) -> ArithError {
    ArithError(msg.into())
}

fn tokenize(text: &str) -> Result<Vec<Token>, ArithError> {
    let chars: Vec<char> = text.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '0'..='9' | '.' => {
                let start = i;
                let mut is_float = false;
                while i < chars.len() && chars[i].is_ascii_digit() {
                    i += 1;
                }
                if i < chars.len() && chars[i] == '.' {
                    is_float = true;
                    i += 1;
                    while i < chars.len() && chars[i].is_ascii_digit() {
                        i += 1;
                    }
                }
                if i < chars.len() && (chars[i] == 'e' || chars[i] == 'E') {
                    is_float = true;
                    i += 1;
                    if i < chars.len() && (chars[i] == '+' || chars[i] == '-') {
                        i += 1;
                    }
                    let digits = i;
                    while i < chars.len() && chars[i].is_ascii_digit() {
                        i += 1;
                    }
                    if digits == i {
                        return Err(err(format!("malformed exponent at offset {start}")));
                    }
                }
                let literal: String = chars[start..i].iter().collect();
                let number = if is_float {
                    let value: f64 = literal
                        .parse()
                        .map_err(|_| err(format!("malformed number '{literal}'")))?;
                    Number::Float(value)
                } else {
                    let value: i64 = literal
                        .parse()
                        .map_err(|_| err(format!("integer literal out of range '{literal}'")))?;
                    Number::Int(value)
                };
                tokens.push(Token::Num(number));
            }
            '+' => {
                tokens.push(Token::Plus);
                i += 1;
            }
            '-' => {
                tokens.push(Token::Minus);
                i += 1;
            }
            '*' => {
                if chars.get(i + 1) == Some(&'*') {
                    tokens.push(Token::Pow);
                    i += 2;
                } else {
                    tokens.push(Token::Star);
                    i += 1;
                }
            }
            '/' => {
                if chars.get(i + 1) == Some(&'/') {
                    tokens.push(Token::FloorDiv);
                    i += 2;
                } else {
                    tokens.push(Token::Slash);
                    i += 1;
                }
            }
            '%' => {
                tokens.push(Token::Percent);
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            other => return Err(err(format!("unexpected character '{other}' at offset {i}"))),
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    nesting: usize,
}

impl Parser {
    fn peek(&self) -> Option<Token> {
        self.tokens.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<Token> {
        let token = self.peek();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn enter(&mut self) -> Result<(), ArithError> {
        self.nesting += 1;
        if self.nesting > MAX_NESTING {
            return Err(err("expression nested too deeply"));
        }
        Ok(())
    }

    // sum := term (('+' | '-') term)*
    fn sum(&mut self) -> Result<Number, ArithError> {
        let mut acc = self.term()?;
        while let Some(op @ (Token::Plus | Token::Minus)) = self.peek() {
            self.pos += 1;
            let rhs = self.term()?;
            acc = if op == Token::Plus { add(acc, rhs)? } else { sub(acc, rhs)? };
        }
        Ok(acc)
    }

    // term := factor (('*' | '/' | '//' | '%') factor)*
    fn term(&mut self) -> Result<Number, ArithError> {
        let mut acc = self.factor()?;
        while let Some(op @ (Token::Star | Token::Slash | Token::FloorDiv | Token::Percent)) =
            self.peek()
        {
            self.pos += 1;
            let rhs = self.factor()?;
            acc = match op {
                Token::Star => mul(acc, rhs)?,
                Token::Slash => true_div(acc, rhs)?,
                Token::FloorDiv => floor_div(acc, rhs)?,
                _ => modulo(acc, rhs)?,
            };
        }
        Ok(acc)
    }

    // factor := ('+' | '-') factor | power
    fn factor(&mut self) -> Result<Number, ArithError> {
        match self.peek() {
            Some(Token::Plus) => {
                self.pos += 1;
                self.enter()?;
                let value = self.factor()?;
                self.nesting -= 1;
                Ok(value)
            }
            Some(Token::Minus) => {
                self.pos += 1;
                self.enter()?;
                let value = self.factor()?;
                self.nesting -= 1;
                neg(value)
            }
            _ => self.power(),
        }
    }

    // power := atom ['**' factor]
    fn power(&mut self) -> Result<Number, ArithError> {
        let base = self.atom()?;
        if self.peek() == Some(Token::Pow) {
            self.pos += 1;
            self.enter()?;
            let exponent = self.factor()?;
            self.nesting -= 1;
            return pow(base, exponent);
        }
        Ok(base)
    }

    fn atom(&mut self) -> Result<Number, ArithError> {
        match self.bump() {
            Some(Token::Num(n)) => Ok(n),
            Some(Token::LParen) => {
                self.enter()?;
                let value = self.sum()?;
                self.nesting -= 1;
                match self.bump() {
                    Some(Token::RParen) => Ok(value),
                    _ => Err(err("missing closing parenthesis")),
                }
            }
            Some(other) => Err(err(format!("unexpected token {other:?}"))),
            None => Err(err("unexpected end of expression")),
        }
    }
}

fn finite(value: f64) -> Result<Number, ArithError> {
    if value.is_finite() {
        Ok(Number::Float(value))
    } else {
        Err(err("result is not finite"))
    }
}

fn overflow() -> ArithError {
    err("integer overflow")
}

fn add(a: Number, b: Number) -> Result<Number, ArithError> {
    match (a, b) {
        (Number::Int(x), Number::Int(y)) => x.checked_add(y).map(Number::Int).ok_or_else(overflow),
        _ => finite(a.as_f64() + b.as_f64()),
    }
}

fn sub(a: Number, b: Number) -> Result<Number, ArithError> {
    match (a, b) {
        (Number::Int(x), Number::Int(y)) => x.checked_sub(y).map(Number::Int).ok_or_else(overflow),
        _ => finite(a.as_f64() - b.as_f64()),
    }
}

fn mul(a: Number, b: Number) -> Result<Number, ArithError> {
    match (a, b) {
        (Number::Int(x), Number::Int(y)) => x.checked_mul(y).map(Number::Int).ok_or_else(overflow),
        _ => finite(a.as_f64() * b.as_f64()),
    }
}

fn neg(a: Number) -> Result<Number, ArithError> {
    match a {
        Number::Int(x) => x.checked_neg().map(Number::Int).ok_or_else(overflow),
        Number::Float(f) => Ok(Number::Float(-f)),
    }
}

fn is_zero(n: Number) -> bool {
    match n {
        Number::Int(x) => x == 0,
        Number::Float(f) => f == 0.0,
    }
}

fn true_div(a: Number, b: Number) -> Result<Number, ArithError> {
    if is_zero(b) {
        return Err(err("division by zero"));
    }
    finite(a.as_f64() / b.as_f64())
}

fn floor_div(a: Number, b: Number) -> Result<Number, ArithError> {
    if is_zero(b) {
        return Err(err("integer division or modulo by zero"));
    }
    match (a, b) {
        (Number::Int(x), Number::Int(y)) => {
            let q = x.checked_div(y).ok_or_else(overflow)?;
            let r = x % y;
            Ok(Number::Int(if r != 0 && ((r < 0) != (y < 0)) { q - 1 } else { q }))
        }
        _ => finite((a.as_f64() / b.as_f64()).floor()),
    }
}

fn modulo(a: Number, b: Number) -> Result<Number, ArithError> {
    if is_zero(b) {
        return Err(err("integer division or modulo by zero"));
    }
    match (a, b) {
        (Number::Int(x), Number::Int(y)) => {
            let r = x.checked_rem(y).ok_or_else(overflow)?;
            Ok(Number::Int(if r != 0 && ((r < 0) != (y < 0)) { r + y } else { r }))
        }
        _ => {
            let (x, y) = (a.as_f64(), b.as_f64());
            let r = x % y;
            finite(if r != 0.0 && ((r < 0.0) != (y < 0.0)) { r + y } else { r })
        }
    }
}

fn pow(base: Number, exponent: Number) -> Result<Number, ArithError> {
    if is_zero(base) && exponent.as_f64() < 0.0 {
        return Err(err("zero cannot be raised to a negative power"));
    }
    match (base, exponent) {
        (Number::Int(b), Number::Int(e)) if e >= 0 => {
            let e = u32::try_from(e).map_err(|_| overflow())?;
            b.checked_pow(e).map(Number::Int).ok_or_else(overflow)
        }
        _ => {
            let value = base.as_f64().powf(exponent.as_f64());
            if value.is_nan() {
                return Err(err("complex result"));
            }
            finite(value)
        }
    }
}

/// Evaluate an expression. The result is canonicalized.
pub fn evaluate(expression: &str) -> Result<Number, ArithError> {
    let tokens = tokenize(expression)?;
    if tokens.is_empty() {
        return Err(err("empty expression"));
    }
    let mut parser = Parser {
        tokens,
        pos: 0,
        nesting: 0,
    };
    let value = parser.sum()?;
    if let Some(token) = parser.peek() {
        return Err(err(format!("unexpected trailing token {token:?}")));
    }
    Ok(value.canonical())
}

/// Strip a leading `ARITH:` marker (case-insensitive).
pub fn strip_arith_prefix(text: &str) -> Option<&str> {
    let trimmed = text.trim_start();
    let head = trimmed.get(..6)?;
    if head.eq_ignore_ascii_case("arith:") {
        trimmed.get(6..).map(str::trim)
    } else {
        None
    }
}

/// True when the text only uses safe-arith characters and has a digit.
pub fn looks_like_arith(text: &str) -> bool {
    text.chars().any(|c| c.is_ascii_digit())
        && text
            .chars()
            .all(|c| c.is_ascii_digit() || c.is_whitespace() || "+-*/%().".contains(c))
}
