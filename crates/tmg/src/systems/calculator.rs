//! A restricted arithmetic evaluator.
//!
//! Expressions are parsed into a small AST and evaluated directly; nothing is
//! ever handed to an interpreter. The same parser validates the expressions
//! used for function plots, with `x` as the only variable.

use std::fmt;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CalcError {
    #[error("unexpected character '{0}' at position {1}")]
    UnexpectedChar(char, usize),

    #[error("unexpected end of expression")]
    UnexpectedEnd,

    #[error("unexpected '{0}'")]
    UnexpectedToken(String),

    #[error("unknown name '{0}'")]
    UnknownName(String),

    #[error("{name} takes {expected} argument(s), got {got}")]
    WrongArity {
        name: String,
        expected: &'static str,
        got: usize,
    },

    #[error("division by zero")]
    DivisionByZero,

    #[error("{0}")]
    Domain(String),

    #[error("the result is not a finite number")]
    NotFinite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Pow,
}

impl BinaryOp {
    fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
            BinaryOp::Pow => "^",
        }
    }

    fn precedence(self) -> u8 {
        match self {
            BinaryOp::Add | BinaryOp::Sub => 1,
            BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => 2,
            BinaryOp::Pow => 4,
        }
    }
}

pub const FUNCTIONS: &[&str] = &[
    "sqrt", "cbrt", "abs", "exp", "ln", "log", "log2", "log10", "sin", "cos", "tan", "asin",
    "acos", "atan", "sinh", "cosh", "tanh", "floor", "ceil", "round", "min", "max", "factorial",
];

/// Deepest nesting of parentheses, calls, signs and powers the parser accepts
pub const MAX_DEPTH: usize = 64;
/// Longest expression, in tokens; also bounds how deep a `+`/`*` chain grows
pub const MAX_TOKENS: usize = 512;

pub const CONSTANTS: &[(&str, f64)] = &[
    ("pi", std::f64::consts::PI),
    ("e", std::f64::consts::E),
    ("tau", std::f64::consts::TAU),
];

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Constant(&'static str),
    Variable,
    Neg(Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Call(&'static str, Vec<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Op(BinaryOp),
    LParen,
    RParen,
    Comma,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Number(n) => write!(f, "{}", n),
            Token::Ident(name) => f.write_str(name),
            Token::Op(op) => f.write_str(op.symbol()),
            Token::LParen => f.write_str("("),
            Token::RParen => f.write_str(")"),
            Token::Comma => f.write_str(","),
        }
    }
}

fn tokenize(input: &str) -> Result<Vec<Token>, CalcError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '0'..='9' | '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                // exponent, e.g. 1.5e-3
                if i < chars.len() && (chars[i] == 'e' || chars[i] == 'E') {
                    let mut j = i + 1;
                    if j < chars.len() && (chars[j] == '+' || chars[j] == '-') {
                        j += 1;
                    }
                    if j < chars.len() && chars[j].is_ascii_digit() {
                        i = j;
                        while i < chars.len() && chars[i].is_ascii_digit() {
                            i += 1;
                        }
                    }
                }
                let text: String = chars[start..i].iter().collect();
                let value = text
                    .parse::<f64>()
                    .map_err(|_| CalcError::UnexpectedToken(text.clone()))?;
                tokens.push(Token::Number(value));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            '*' if chars.get(i + 1) == Some(&'*') => {
                tokens.push(Token::Op(BinaryOp::Pow));
                i += 2;
            }
            '+' | '-' | '*' | '/' | '%' | '^' => {
                let op = match c {
                    '+' => BinaryOp::Add,
                    '-' => BinaryOp::Sub,
                    '*' => BinaryOp::Mul,
                    '/' => BinaryOp::Div,
                    '%' => BinaryOp::Rem,
                    _ => BinaryOp::Pow,
                };
                tokens.push(Token::Op(op));
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
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            other => return Err(CalcError::UnexpectedChar(other, i)),
        }
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    allow_variable: bool,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn expect(&mut self, expected: Token) -> Result<(), CalcError> {
        match self.next() {
            Some(token) if token == expected => Ok(()),
            Some(token) => Err(CalcError::UnexpectedToken(token.to_string())),
            None => Err(CalcError::UnexpectedEnd),
        }
    }

    // expr := term (("+" | "-") term)*
    fn expr(&mut self) -> Result<Expr, CalcError> {
        let mut left = self.term()?;
        while let Some(Token::Op(op @ (BinaryOp::Add | BinaryOp::Sub))) = self.peek().cloned() {
            self.pos += 1;
            let right = self.term()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    // term := unary (("*" | "/" | "%") unary)*
    fn term(&mut self) -> Result<Expr, CalcError> {
        let mut left = self.unary()?;
        while let Some(Token::Op(op @ (BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem))) =
            self.peek().cloned()
        {
            self.pos += 1;
            let right = self.unary()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    // Every recursive path passes through here, so the depth check lives here
    fn unary(&mut self) -> Result<Expr, CalcError> {
        if self.depth >= MAX_DEPTH {
            return Err(CalcError::Domain("expression nested too deeply".to_string()));
        }
        self.depth += 1;
        let result = self.signed();
        self.depth -= 1;
        result
    }

    // unary binds looser than "^", so -2^2 is -(2^2)
    fn signed(&mut self) -> Result<Expr, CalcError> {
        match self.peek() {
            Some(Token::Op(BinaryOp::Sub)) => {
                self.pos += 1;
                Ok(Expr::Neg(Box::new(self.unary()?)))
            }
            Some(Token::Op(BinaryOp::Add)) => {
                self.pos += 1;
                self.unary()
            }
            _ => self.power(),
        }
    }

    // power := primary ("^" unary)?, right associative
    fn power(&mut self) -> Result<Expr, CalcError> {
        let base = self.primary()?;
        if let Some(Token::Op(BinaryOp::Pow)) = self.peek() {
            self.pos += 1;
            let exponent = self.unary()?;
            return Ok(Expr::Binary(
                BinaryOp::Pow,
                Box::new(base),
                Box::new(exponent),
            ));
        }
        Ok(base)
    }

    fn primary(&mut self) -> Result<Expr, CalcError> {
        match self.next() {
            Some(Token::Number(n)) => Ok(Expr::Number(n)),
            Some(Token::LParen) => {
                let inner = self.expr()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Some(Token::Ident(name)) => self.identifier(name),
            Some(token) => Err(CalcError::UnexpectedToken(token.to_string())),
            None => Err(CalcError::UnexpectedEnd),
        }
    }

    fn identifier(&mut self, name: String) -> Result<Expr, CalcError> {
        if let Some(function) = FUNCTIONS.iter().find(|f| **f == name) {
            self.expect(Token::LParen)?;
            let mut args = Vec::new();
            if self.peek() != Some(&Token::RParen) {
                args.push(self.expr()?);
                while self.peek() == Some(&Token::Comma) {
                    self.pos += 1;
                    args.push(self.expr()?);
                }
            }
            self.expect(Token::RParen)?;
            check_arity(function, args.len())?;
            return Ok(Expr::Call(*function, args));
        }
        if let Some((constant, _)) = CONSTANTS.iter().find(|(c, _)| *c == name) {
            return Ok(Expr::Constant(*constant));
        }
        if self.allow_variable && name == "x" {
            return Ok(Expr::Variable);
        }
        Err(CalcError::UnknownName(name))
    }
}

fn check_arity(name: &str, got: usize) -> Result<(), CalcError> {
    let (ok, expected) = match name {
        "log" => ((1..=2).contains(&got), "1 or 2"),
        "min" | "max" => (got >= 1, "at least 1"),
        _ => (got == 1, "1"),
    };
    if ok {
        Ok(())
    } else {
        Err(CalcError::WrongArity {
            name: name.to_string(),
            expected,
            got,
        })
    }
}

fn parse_with(input: &str, allow_variable: bool) -> Result<Expr, CalcError> {
    let tokens = tokenize(input)?;
    if tokens.len() > MAX_TOKENS {
        return Err(CalcError::Domain("expression is too long".to_string()));
    }
    let mut parser = Parser {
        tokens,
        pos: 0,
        allow_variable,
        depth: 0,
    };
    let expr = parser.expr()?;
    match parser.next() {
        None => Ok(expr),
        Some(token) => Err(CalcError::UnexpectedToken(token.to_string())),
    }
}

/// Parse a constant expression
pub fn parse(input: &str) -> Result<Expr, CalcError> {
    parse_with(input, false)
}

/// Parse an expression in the single variable `x`
pub fn parse_function(input: &str) -> Result<Expr, CalcError> {
    parse_with(input, true)
}

fn factorial(n: f64) -> Result<f64, CalcError> {
    if n < 0.0 || n.fract() != 0.0 {
        return Err(CalcError::Domain(
            "factorial is only defined for non-negative integers".to_string(),
        ));
    }
    if n > 170.0 {
        return Err(CalcError::NotFinite);
    }
    Ok((1..=n as u64).fold(1.0, |acc, k| acc * k as f64))
}

fn domain(condition: bool, message: &str) -> Result<(), CalcError> {
    if condition {
        Ok(())
    } else {
        Err(CalcError::Domain(message.to_string()))
    }
}

impl Expr {
    /// Evaluate with `x` bound to the given value
    pub fn eval_at(&self, x: f64) -> Result<f64, CalcError> {
        let value = match self {
            Expr::Number(n) => *n,
            Expr::Variable => x,
            Expr::Constant(name) => CONSTANTS
                .iter()
                .find(|(c, _)| c == name)
                .map(|(_, v)| *v)
                .ok_or_else(|| CalcError::UnknownName(name.to_string()))?,
            Expr::Neg(inner) => -inner.eval_at(x)?,
            Expr::Binary(op, left, right) => {
                let (a, b) = (left.eval_at(x)?, right.eval_at(x)?);
                match op {
                    BinaryOp::Add => a + b,
                    BinaryOp::Sub => a - b,
                    BinaryOp::Mul => a * b,
                    BinaryOp::Div | BinaryOp::Rem if b == 0.0 => {
                        return Err(CalcError::DivisionByZero)
                    }
                    BinaryOp::Div => a / b,
                    // floored modulo, sign follows the divisor
                    BinaryOp::Rem => a - b * (a / b).floor(),
                    BinaryOp::Pow => a.powf(b),
                }
            }
            Expr::Call(name, args) => {
                let values = args
                    .iter()
                    .map(|arg| arg.eval_at(x))
                    .collect::<Result<Vec<f64>, CalcError>>()?;
                let v = values.first().copied().unwrap_or(f64::NAN);
                match *name {
                    "sqrt" => {
                        domain(v >= 0.0, "sqrt of a negative number")?;
                        v.sqrt()
                    }
                    "cbrt" => v.cbrt(),
                    "abs" => v.abs(),
                    "exp" => v.exp(),
                    "ln" => {
                        domain(v > 0.0, "logarithm of a non-positive number")?;
                        v.ln()
                    }
                    "log" => {
                        domain(v > 0.0, "logarithm of a non-positive number")?;
                        match values.get(1) {
                            Some(base) => {
                                domain(*base > 0.0 && *base != 1.0, "invalid logarithm base")?;
                                v.log(*base)
                            }
                            None => v.ln(),
                        }
                    }
                    "log2" => {
                        domain(v > 0.0, "logarithm of a non-positive number")?;
                        v.log2()
                    }
                    "log10" => {
                        domain(v > 0.0, "logarithm of a non-positive number")?;
                        v.log10()
                    }
                    "sin" => v.sin(),
                    "cos" => v.cos(),
                    "tan" => v.tan(),
                    "asin" => {
                        domain((-1.0..=1.0).contains(&v), "asin is defined on [-1, 1]")?;
                        v.asin()
                    }
                    "acos" => {
                        domain((-1.0..=1.0).contains(&v), "acos is defined on [-1, 1]")?;
                        v.acos()
                    }
                    "atan" => v.atan(),
                    "sinh" => v.sinh(),
                    "cosh" => v.cosh(),
                    "tanh" => v.tanh(),
                    "floor" => v.floor(),
                    "ceil" => v.ceil(),
                    "round" => v.round(),
                    "min" => values.iter().copied().fold(f64::INFINITY, f64::min),
                    "max" => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
                    "factorial" => factorial(v)?,
                    other => return Err(CalcError::UnknownName(other.to_string())),
                }
            }
        };
        if value.is_finite() {
            Ok(value)
        } else {
            Err(CalcError::NotFinite)
        }
    }

    pub fn eval(&self) -> Result<f64, CalcError> {
        self.eval_at(0.0)
    }

    fn precedence(&self) -> u8 {
        match self {
            Expr::Binary(op, _, _) => op.precedence(),
            Expr::Neg(_) => 3,
            _ => 5,
        }
    }

    fn fmt_operand(&self, f: &mut fmt::Formatter<'_>, parent: u8, wrap_equal: bool) -> fmt::Result {
        let own = self.precedence();
        if own < parent || (wrap_equal && own == parent) {
            write!(f, "({})", self)
        } else {
            write!(f, "{}", self)
        }
    }
}

/// Prints the normalized form of an expression, fully re-derived from the AST
impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Number(n) => write!(f, "{}", n),
            Expr::Constant(name) => f.write_str(name),
            Expr::Variable => f.write_str("x"),
            Expr::Neg(inner) => {
                f.write_str("-")?;
                inner.fmt_operand(f, 3, false)
            }
            Expr::Binary(op, left, right) => {
                let p = op.precedence();
                // "^" is right associative, the others left associative
                let is_pow = *op == BinaryOp::Pow;
                left.fmt_operand(f, p, is_pow)?;
                write!(f, " {} ", op.symbol())?;
                right.fmt_operand(f, p, !is_pow)
            }
            Expr::Call(name, args) => {
                write!(f, "{}(", name)?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", arg)?;
                }
                f.write_str(")")
            }
        }
    }
}

/// Render a result the way a person would write it
pub fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

/// Parse and evaluate a constant expression
pub fn evaluate(input: &str) -> Result<f64, CalcError> {
    parse(input)?.eval()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(input: &str) -> f64 {
        evaluate(input).unwrap()
    }

    #[test]
    fn test_arithmetic() {
        assert_eq!(eval("2+2"), 4.0);
        assert_eq!(eval("2 + 3 * 4"), 14.0);
        assert_eq!(eval("(2 + 3) * 4"), 20.0);
        assert_eq!(eval("7 % 3"), 1.0);
        assert_eq!(eval("-7 % 3"), 2.0);
        assert_eq!(eval("2^3^2"), 512.0);
        assert_eq!(eval("2**10"), 1024.0);
        assert_eq!(eval("-2^2"), -4.0);
        assert_eq!(eval("1.5e3 / 3"), 500.0);
    }

    #[test]
    fn test_deep_nesting_is_rejected() {
        let nested = |d: usize| format!("{}1{}", "(".repeat(d), ")".repeat(d));
        assert_eq!(eval(&nested(MAX_DEPTH - 1)), 1.0);
        assert_eq!(
            evaluate(&nested(200)),
            Err(CalcError::Domain("expression nested too deeply".to_string()))
        );
        assert!(evaluate(&nested(5000)).is_err());
        assert!(evaluate(&format!("{}1", "-".repeat(300))).is_err());
        assert!(evaluate(&vec!["2"; 200].join("^")).is_err());
        assert!(parse_function(&format!("{}x{}", "sin(".repeat(100), ")".repeat(100))).is_err());
    }

    #[test]
    fn test_long_chains_are_rejected() {
        assert_eq!(eval(&vec!["1"; 200].join("+")), 200.0);
        assert_eq!(
            evaluate(&vec!["1"; 5000].join("+")),
            Err(CalcError::Domain("expression is too long".to_string()))
        );
    }

    #[test]
    fn test_functions_and_constants() {
        assert_eq!(eval("sqrt(16)"), 4.0);
        assert_eq!(eval("factorial(5)"), 120.0);
        assert_eq!(eval("max(1, 7, 3)"), 7.0);
        assert!((eval("log(8, 2)") - 3.0).abs() < 1e-12);
        assert!((eval("log10(1000)") - 3.0).abs() < 1e-12);
        assert!((eval("sin(pi / 2)") - 1.0).abs() < 1e-12);
        assert!((eval("ln(e)") - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_errors_are_descriptive() {
        assert_eq!(evaluate("1 / 0"), Err(CalcError::DivisionByZero));
        assert_eq!(evaluate("2 +"), Err(CalcError::UnexpectedEnd));
        assert_eq!(evaluate("2 $ 3"), Err(CalcError::UnexpectedChar('$', 2)));
        assert_eq!(
            evaluate("__import__(os)"),
            Err(CalcError::UnknownName("__import__".into()))
        );
        assert!(matches!(evaluate("sqrt(-1)"), Err(CalcError::Domain(_))));
        assert!(matches!(evaluate("factorial(2.5)"), Err(CalcError::Domain(_))));
        assert!(matches!(evaluate("sqrt(1, 2)"), Err(CalcError::WrongArity { .. })));
        assert_eq!(evaluate("x + 1"), Err(CalcError::UnknownName("x".into())));
        assert_eq!(evaluate("(1 + 2"), Err(CalcError::UnexpectedEnd));
        assert_eq!(evaluate("1 2"), Err(CalcError::UnexpectedToken("2".into())));
    }

    #[test]
    fn test_function_of_x() {
        let f = parse_function("x^2 - 3*x + 2").unwrap();
        assert_eq!(f.eval_at(1.0), Ok(0.0));
        assert_eq!(f.eval_at(3.0), Ok(2.0));
        assert_eq!(parse_function("1/x").unwrap().eval_at(0.0), Err(CalcError::DivisionByZero));
    }

    #[test]
    fn test_printer_round_trips_structure() {
        for input in ["(1 + 2) * 3", "2 ^ 3 ^ 2", "(2 ^ 3) ^ 2", "1 - (2 - 3)", "-(x + 1) * sin(x)", "max(x, 1)"] {
            let parsed = parse_function(input).unwrap();
            let printed = parsed.to_string();
            assert_eq!(parse_function(&printed).unwrap(), parsed, "{}", printed);
        }
        assert_eq!(parse("2+3*4").unwrap().to_string(), "2 + 3 * 4");
    }

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(4.0), "4");
        assert_eq!(format_number(-12.0), "-12");
        assert_eq!(format_number(0.5), "0.5");
    }
}
