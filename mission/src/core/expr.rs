//! Restricted expression language for `eval:` criteria.
//!
//! Grammar (lowest to highest precedence):
//!
//! ```text
//! or      := and (("or" | "||") and)*
//! and     := not (("and" | "&&") not)*
//! not     := ("not" | "!") not | cmp
//! cmp     := add (("==" | "!=" | "<" | "<=" | ">" | ">=") add)?
//! add     := mul (("+" | "-") mul)*
//! mul     := unary (("*" | "/" | "%") unary)*
//! unary   := "-" unary | primary
//! primary := number | string | true | false | ident "(" args ")" | "(" or ")"
//! ```
//!
//! There are no variables, attribute access, or assignment. Filesystem access
//! goes through [`ExprHost`], which the caller confines to the repository.

use std::fmt;

use regex::Regex;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Number(f64),
    Str(String),
}

impl Value {
    pub fn truthy(&self) -> bool {
        match self {
            Value::Bool(value) => *value,
            Value::Number(value) => *value != 0.0,
            Value::Str(value) => !value.is_empty(),
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            Value::Bool(_) => "bool",
            Value::Number(_) => "number",
            Value::Str(_) => "string",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(value) => write!(f, "{value}"),
            Value::Number(value) if value.fract() == 0.0 && value.abs() < 1e15 => {
                write!(f, "{}", *value as i64)
            }
            Value::Number(value) => write!(f, "{value}"),
            Value::Str(value) => write!(f, "{value:?}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExprError {
    #[error("parse error at offset {offset}: {message}")]
    Parse { offset: usize, message: String },
    #[error("type error: {0}")]
    Type(String),
    #[error("unknown function '{0}'")]
    UnknownFunction(String),
    #[error("{name}() takes {expected} argument(s), got {got}")]
    Arity {
        name: String,
        expected: usize,
        got: usize,
    },
    #[error("division by zero")]
    DivisionByZero,
    #[error("{0}")]
    Host(String),
}

/// Filesystem capabilities available to expressions.
pub trait ExprHost {
    fn exists(&self, path: &str) -> Result<bool, String>;
    fn is_file(&self, path: &str) -> Result<bool, String>;
    fn is_dir(&self, path: &str) -> Result<bool, String>;
    fn read(&self, path: &str) -> Result<String, String>;
    fn size(&self, path: &str) -> Result<u64, String>;
    fn glob_count(&self, pattern: &str) -> Result<usize, String>;
}

/// Host with no filesystem; every path query fails.
pub struct NoHost;

impl ExprHost for NoHost {
    fn exists(&self, _path: &str) -> Result<bool, String> {
        Err("filesystem access is unavailable".to_string())
    }
    fn is_file(&self, path: &str) -> Result<bool, String> {
        self.exists(path)
    }
    fn is_dir(&self, path: &str) -> Result<bool, String> {
        self.exists(path)
    }
    fn read(&self, path: &str) -> Result<String, String> {
        self.exists(path).map(|_| String::new())
    }
    fn size(&self, path: &str) -> Result<u64, String> {
        self.exists(path).map(|_| 0)
    }
    fn glob_count(&self, pattern: &str) -> Result<usize, String> {
        self.exists(pattern).map(|_| 0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Not(Box<Expr>),
    Neg(Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Call(String, Vec<Expr>),
}

/// Parse and evaluate an expression in one step.
pub fn evaluate_str(source: &str, host: &dyn ExprHost) -> Result<Value, ExprError> {
    let expr = parse(source)?;
    evaluate(&expr, host)
}

pub fn parse(source: &str) -> Result<Expr, ExprError> {
    let tokens = tokenize(source)?;
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.or()?;
    if let Some(token) = parser.tokens.get(parser.pos) {
        return Err(ExprError::Parse {
            offset: token.offset,
            message: format!("unexpected {}", token.kind),
        });
    }
    Ok(expr)
}

#[derive(Debug, Clone, PartialEq)]
enum TokenKind {
    Number(f64),
    Str(String),
    Ident(String),
    Op(&'static str),
    LParen,
    RParen,
    Comma,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::Number(value) => write!(f, "number {value}"),
            TokenKind::Str(value) => write!(f, "string {value:?}"),
            TokenKind::Ident(name) => write!(f, "identifier '{name}'"),
            TokenKind::Op(op) => write!(f, "operator '{op}'"),
            TokenKind::LParen => f.write_str("'('"),
            TokenKind::RParen => f.write_str("')'"),
            TokenKind::Comma => f.write_str("','"),
        }
    }
}

#[derive(Debug, Clone)]
struct Token {
    kind: TokenKind,
    offset: usize,
}

const OPERATORS: &[&str] = &[
    "==", "!=", "<=", ">=", "&&", "||", "<", ">", "+", "-", "*", "/", "%", "!",
];

fn tokenize(source: &str) -> Result<Vec<Token>, ExprError> {
    let bytes = source.as_bytes();
    let mut tokens = Vec::new();
    let mut idx = 0;

    while idx < bytes.len() {
        let ch = bytes[idx];
        if ch.is_ascii_whitespace() {
            idx += 1;
            continue;
        }
        let start = idx;
        let kind = match ch {
            b'(' => {
                idx += 1;
                TokenKind::LParen
            }
            b')' => {
                idx += 1;
                TokenKind::RParen
            }
            b',' => {
                idx += 1;
                TokenKind::Comma
            }
            b'\'' | b'"' => {
                let (value, next) = read_string(source, idx)?;
                idx = next;
                TokenKind::Str(value)
            }
            b'0'..=b'9' | b'.' => {
                while idx < bytes.len() && (bytes[idx].is_ascii_digit() || bytes[idx] == b'.') {
                    idx += 1;
                }
                let text = &source[start..idx];
                let value = text.parse::<f64>().map_err(|_| ExprError::Parse {
                    offset: start,
                    message: format!("bad number '{text}'"),
                })?;
                TokenKind::Number(value)
            }
            ch if ch.is_ascii_alphabetic() || ch == b'_' => {
                while idx < bytes.len() && (bytes[idx].is_ascii_alphanumeric() || bytes[idx] == b'_')
                {
                    idx += 1;
                }
                TokenKind::Ident(source[start..idx].to_string())
            }
            _ => {
                let rest = &source[idx..];
                let Some(op) = OPERATORS.iter().find(|op| rest.starts_with(**op)) else {
                    let found = rest.chars().next().unwrap_or_default();
                    return Err(ExprError::Parse {
                        offset: idx,
                        message: format!("unexpected character '{found}'"),
                    });
                };
                idx += op.len();
                TokenKind::Op(op)
            }
        };
        tokens.push(Token {
            kind,
            offset: start,
        });
    }
    Ok(tokens)
}

fn read_string(source: &str, start: usize) -> Result<(String, usize), ExprError> {
    let mut chars = source[start..].char_indices();
    let (_, quote) = chars.next().ok_or(ExprError::Parse {
        offset: start,
        message: "expected string".to_string(),
    })?;
    let mut value = String::new();
    while let Some((offset, ch)) = chars.next() {
        match ch {
            '\\' => {
                let Some((_, escaped)) = chars.next() else {
                    break;
                };
                value.push(match escaped {
                    'n' => '\n',
                    't' => '\t',
                    other => other,
                });
            }
            ch if ch == quote => return Ok((value, start + offset + ch.len_utf8())),
            ch => value.push(ch),
        }
    }
    Err(ExprError::Parse {
        offset: start,
        message: "unterminated string".to_string(),
    })
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&TokenKind> {
        self.tokens.get(self.pos).map(|token| &token.kind)
    }

    fn offset(&self) -> usize {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map_or(0, |token| token.offset)
    }

    fn error(&self, message: impl Into<String>) -> ExprError {
        ExprError::Parse {
            offset: self.offset(),
            message: message.into(),
        }
    }

    fn eat_op(&mut self, ops: &[&str]) -> Option<&'static str> {
        if let Some(TokenKind::Op(op)) = self.peek()
            && ops.contains(op)
        {
            let op = *op;
            self.pos += 1;
            return Some(op);
        }
        None
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if let Some(TokenKind::Ident(name)) = self.peek()
            && name == keyword
        {
            self.pos += 1;
            return true;
        }
        false
    }

    fn or(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.and()?;
        while self.eat_keyword("or") || self.eat_op(&["||"]).is_some() {
            let right = self.and()?;
            left = Expr::Binary(BinaryOp::Or, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.not()?;
        while self.eat_keyword("and") || self.eat_op(&["&&"]).is_some() {
            let right = self.not()?;
            left = Expr::Binary(BinaryOp::And, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn not(&mut self) -> Result<Expr, ExprError> {
        if self.eat_keyword("not") || self.eat_op(&["!"]).is_some() {
            return Ok(Expr::Not(Box::new(self.not()?)));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Expr, ExprError> {
        let left = self.additive()?;
        let Some(op) = self.eat_op(&["==", "!=", "<", "<=", ">", ">="]) else {
            return Ok(left);
        };
        let op = match op {
            "==" => BinaryOp::Eq,
            "!=" => BinaryOp::Ne,
            "<" => BinaryOp::Lt,
            "<=" => BinaryOp::Le,
            ">" => BinaryOp::Gt,
            _ => BinaryOp::Ge,
        };
        let right = self.additive()?;
        Ok(Expr::Binary(op, Box::new(left), Box::new(right)))
    }

    fn additive(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.multiplicative()?;
        while let Some(op) = self.eat_op(&["+", "-"]) {
            let op = if op == "+" { BinaryOp::Add } else { BinaryOp::Sub };
            let right = self.multiplicative()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn multiplicative(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.unary()?;
        while let Some(op) = self.eat_op(&["*", "/", "%"]) {
            let op = match op {
                "*" => BinaryOp::Mul,
                "/" => BinaryOp::Div,
                _ => BinaryOp::Rem,
            };
            let right = self.unary()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<Expr, ExprError> {
        if self.eat_op(&["-"]).is_some() {
            return Ok(Expr::Neg(Box::new(self.unary()?)));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Expr, ExprError> {
        let Some(kind) = self.peek().cloned() else {
            return Err(self.error("unexpected end of expression"));
        };
        self.pos += 1;
        match kind {
            TokenKind::Number(value) => Ok(Expr::Literal(Value::Number(value))),
            TokenKind::Str(value) => Ok(Expr::Literal(Value::Str(value))),
            TokenKind::LParen => {
                let inner = self.or()?;
                self.expect_rparen()?;
                Ok(inner)
            }
            TokenKind::Ident(name) => match name.as_str() {
                "true" | "True" => Ok(Expr::Literal(Value::Bool(true))),
                "false" | "False" => Ok(Expr::Literal(Value::Bool(false))),
                _ => self.call(name),
            },
            other => {
                self.pos -= 1;
                Err(self.error(format!("unexpected {other}")))
            }
        }
    }

    fn call(&mut self, name: String) -> Result<Expr, ExprError> {
        if self.peek() != Some(&TokenKind::LParen) {
            self.pos -= 1;
            return Err(self.error(format!("unknown name '{name}'")));
        }
        self.pos += 1;
        let mut args = Vec::new();
        if self.peek() == Some(&TokenKind::RParen) {
            self.pos += 1;
            return Ok(Expr::Call(name, args));
        }
        loop {
            args.push(self.or()?);
            match self.peek() {
                Some(TokenKind::Comma) => self.pos += 1,
                _ => break,
            }
        }
        self.expect_rparen()?;
        Ok(Expr::Call(name, args))
    }

    fn expect_rparen(&mut self) -> Result<(), ExprError> {
        if self.peek() == Some(&TokenKind::RParen) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error("expected ')'"))
        }
    }
}

pub fn evaluate(expr: &Expr, host: &dyn ExprHost) -> Result<Value, ExprError> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Not(inner) => Ok(Value::Bool(!evaluate(inner, host)?.truthy())),
        Expr::Neg(inner) => match evaluate(inner, host)? {
            Value::Number(value) => Ok(Value::Number(-value)),
            other => Err(ExprError::Type(format!(
                "cannot negate {}",
                other.type_name()
            ))),
        },
        Expr::Binary(BinaryOp::And, left, right) => {
            let left = evaluate(left, host)?;
            if !left.truthy() {
                return Ok(left);
            }
            evaluate(right, host)
        }
        Expr::Binary(BinaryOp::Or, left, right) => {
            let left = evaluate(left, host)?;
            if left.truthy() {
                return Ok(left);
            }
            evaluate(right, host)
        }
        Expr::Binary(op, left, right) => {
            let left = evaluate(left, host)?;
            let right = evaluate(right, host)?;
            binary(*op, left, right)
        }
        Expr::Call(name, args) => {
            let values = args
                .iter()
                .map(|arg| evaluate(arg, host))
                .collect::<Result<Vec<_>, _>>()?;
            call(name, &values, host)
        }
    }
}

fn binary(op: BinaryOp, left: Value, right: Value) -> Result<Value, ExprError> {
    match op {
        BinaryOp::Eq => Ok(Value::Bool(left == right)),
        BinaryOp::Ne => Ok(Value::Bool(left != right)),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ordering = match (&left, &right) {
                (Value::Number(a), Value::Number(b)) => a.partial_cmp(b),
                (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
                _ => None,
            }
            .ok_or_else(|| {
                ExprError::Type(format!(
                    "cannot compare {} with {}",
                    left.type_name(),
                    right.type_name()
                ))
            })?;
            Ok(Value::Bool(match op {
                BinaryOp::Lt => ordering.is_lt(),
                BinaryOp::Le => ordering.is_le(),
                BinaryOp::Gt => ordering.is_gt(),
                _ => ordering.is_ge(),
            }))
        }
        BinaryOp::Add => match (left, right) {
            (Value::Number(a), Value::Number(b)) => Ok(Value::Number(a + b)),
            (Value::Str(a), Value::Str(b)) => Ok(Value::Str(a + &b)),
            (a, b) => Err(ExprError::Type(format!(
                "cannot add {} and {}",
                a.type_name(),
                b.type_name()
            ))),
        },
        BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => {
            let (Value::Number(a), Value::Number(b)) = (&left, &right) else {
                return Err(ExprError::Type(format!(
                    "arithmetic needs numbers, got {} and {}",
                    left.type_name(),
                    right.type_name()
                )));
            };
            let value = match op {
                BinaryOp::Sub => a - b,
                BinaryOp::Mul => a * b,
                _ if *b == 0.0 => return Err(ExprError::DivisionByZero),
                BinaryOp::Div => a / b,
                _ => a % b,
            };
            Ok(Value::Number(value))
        }
        BinaryOp::And | BinaryOp::Or => unreachable!("short-circuit operators handled by caller"),
    }
}

fn call(name: &str, args: &[Value], host: &dyn ExprHost) -> Result<Value, ExprError> {
    let arity = |expected: usize| {
        if args.len() == expected {
            Ok(())
        } else {
            Err(ExprError::Arity {
                name: name.to_string(),
                expected,
                got: args.len(),
            })
        }
    };
    let host_err = ExprError::Host;

    match name {
        "exists" => {
            arity(1)?;
            host.exists(string_arg(name, &args[0])?)
                .map(Value::Bool)
                .map_err(host_err)
        }
        "is_file" => {
            arity(1)?;
            host.is_file(string_arg(name, &args[0])?)
                .map(Value::Bool)
                .map_err(host_err)
        }
        "is_dir" => {
            arity(1)?;
            host.is_dir(string_arg(name, &args[0])?)
                .map(Value::Bool)
                .map_err(host_err)
        }
        "read" => {
            arity(1)?;
            host.read(string_arg(name, &args[0])?)
                .map(Value::Str)
                .map_err(host_err)
        }
        "size" => {
            arity(1)?;
            host.size(string_arg(name, &args[0])?)
                .map(|size| Value::Number(size as f64))
                .map_err(host_err)
        }
        "glob_count" => {
            arity(1)?;
            host.glob_count(string_arg(name, &args[0])?)
                .map(|count| Value::Number(count as f64))
                .map_err(host_err)
        }
        "contains" => {
            arity(2)?;
            let haystack = string_arg(name, &args[0])?;
            let needle = string_arg(name, &args[1])?;
            Ok(Value::Bool(haystack.contains(needle)))
        }
        "matches" => {
            arity(2)?;
            let text = string_arg(name, &args[0])?;
            let pattern = string_arg(name, &args[1])?;
            let re = Regex::new(pattern)
                .map_err(|err| ExprError::Type(format!("invalid regex: {err}")))?;
            Ok(Value::Bool(re.is_match(text)))
        }
        "lines" => {
            arity(1)?;
            Ok(Value::Number(string_arg(name, &args[0])?.lines().count() as f64))
        }
        "len" => {
            arity(1)?;
            Ok(Value::Number(
                string_arg(name, &args[0])?.chars().count() as f64,
            ))
        }
        _ => Err(ExprError::UnknownFunction(name.to_string())),
    }
}

fn string_arg<'a>(name: &str, value: &'a Value) -> Result<&'a str, ExprError> {
    match value {
        Value::Str(text) => Ok(text),
        other => Err(ExprError::Type(format!(
            "{name}() expects a string, got {}",
            other.type_name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    struct MapHost(BTreeMap<&'static str, &'static str>);

    impl ExprHost for MapHost {
        fn exists(&self, path: &str) -> Result<bool, String> {
            Ok(self.0.contains_key(path))
        }
        fn is_file(&self, path: &str) -> Result<bool, String> {
            self.exists(path)
        }
        fn is_dir(&self, _path: &str) -> Result<bool, String> {
            Ok(false)
        }
        fn read(&self, path: &str) -> Result<String, String> {
            self.0
                .get(path)
                .map(|text| text.to_string())
                .ok_or_else(|| format!("{path} not found"))
        }
        fn size(&self, path: &str) -> Result<u64, String> {
            self.read(path).map(|text| text.len() as u64)
        }
        fn glob_count(&self, pattern: &str) -> Result<usize, String> {
            let suffix = pattern.trim_start_matches('*');
            Ok(self.0.keys().filter(|key| key.ends_with(suffix)).count())
        }
    }

    fn host() -> MapHost {
        MapHost(BTreeMap::from([
            ("README.md", "# Title\nbody\n"),
            ("src/app.py", "print('hi')\n"),
        ]))
    }

    fn eval(source: &str) -> Result<Value, ExprError> {
        evaluate_str(source, &host())
    }

    #[test]
    fn arithmetic_and_comparison() {
        assert_eq!(eval("1 + 1 == 2"), Ok(Value::Bool(true)));
        assert_eq!(eval("2 * 3 - 4 / 2"), Ok(Value::Number(4.0)));
        assert_eq!(eval("-(2 + 3) < -4"), Ok(Value::Bool(true)));
        assert_eq!(eval("7 % 4"), Ok(Value::Number(3.0)));
    }

    #[test]
    fn boolean_operators_in_both_spellings() {
        assert_eq!(eval("true and not false"), Ok(Value::Bool(true)));
        assert_eq!(eval("True && !False"), Ok(Value::Bool(true)));
        assert_eq!(eval("false or 1 > 2"), Ok(Value::Bool(false)));
        assert_eq!(eval("false || 'x' == 'x'"), Ok(Value::Bool(true)));
    }

    #[test]
    fn short_circuit_skips_failing_branch() {
        assert_eq!(eval("false and read('missing')"), Ok(Value::Bool(false)));
        assert_eq!(eval("true or read('missing')"), Ok(Value::Bool(true)));
    }

    #[test]
    fn filesystem_functions_use_host() {
        assert_eq!(eval("exists('README.md')"), Ok(Value::Bool(true)));
        assert_eq!(eval("exists('nope.md')"), Ok(Value::Bool(false)));
        assert_eq!(eval("lines(read('README.md')) == 2"), Ok(Value::Bool(true)));
        assert_eq!(
            eval("contains(read('src/app.py'), 'print')"),
            Ok(Value::Bool(true))
        );
        assert_eq!(
            eval("matches(read('README.md'), '^# ')"),
            Ok(Value::Bool(true))
        );
        assert_eq!(eval("glob_count('*.py') >= 1"), Ok(Value::Bool(true)));
        assert_eq!(eval("size('src/app.py')"), Ok(Value::Number(12.0)));
    }

    #[test]
    fn host_errors_surface() {
        assert_eq!(
            eval("read('missing')"),
            Err(ExprError::Host("missing not found".to_string()))
        );
    }

    #[test]
    fn rejects_unknown_names_and_functions() {
        assert!(matches!(eval("os"), Err(ExprError::Parse { .. })));
        assert_eq!(
            eval("system('rm -rf /')"),
            Err(ExprError::UnknownFunction("system".to_string()))
        );
        assert!(matches!(
            eval("__import__('os').system('ls')"),
            Err(ExprError::Parse { .. }) | Err(ExprError::UnknownFunction(_))
        ));
    }

    #[test]
    fn rejects_type_errors_and_bad_arity() {
        assert!(matches!(eval("1 + 'a'"), Err(ExprError::Type(_))));
        assert!(matches!(eval("'a' < 1"), Err(ExprError::Type(_))));
        assert_eq!(
            eval("exists()"),
            Err(ExprError::Arity {
                name: "exists".to_string(),
                expected: 1,
                got: 0
            })
        );
        assert_eq!(eval("1 / 0"), Err(ExprError::DivisionByZero));
    }

    #[test]
    fn rejects_malformed_source() {
        assert!(matches!(eval("(1 + 2"), Err(ExprError::Parse { .. })));
        assert!(matches!(eval("1 +"), Err(ExprError::Parse { .. })));
        assert!(matches!(eval("'open"), Err(ExprError::Parse { .. })));
        assert!(matches!(eval("1 2"), Err(ExprError::Parse { .. })));
        assert!(matches!(eval("a = 1"), Err(ExprError::Parse { .. })));
    }

    #[test]
    fn display_renders_integral_numbers_without_fraction() {
        assert_eq!(Value::Number(2.0).to_string(), "2");
        assert_eq!(Value::Number(2.5).to_string(), "2.5");
        assert_eq!(Value::Bool(true).to_string(), "true");
    }

    #[test]
    fn string_escapes() {
        assert_eq!(eval(r#"len("a\"b")"#), Ok(Value::Number(3.0)));
        assert_eq!(eval(r"'it\'s' + 's'"), Ok(Value::Str("it'ss".to_string())));
    }
}
