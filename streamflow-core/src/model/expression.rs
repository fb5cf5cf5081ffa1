//! Minimal expression language used for conditions, mappings and timer
//! definitions.
//!
//! Text without a leading `=` is a static string. Text with a leading `=` is
//! an expression over literals, variable paths, comparisons, arithmetic,
//! `and` / `or` and `not(...)`.

use crate::record::Variables;
use serde_json::{Number, Value};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExpressionError {
    #[error("failed to parse expression '{expression}': {message}")]
    Parse { expression: String, message: String },
    #[error("failed to evaluate expression '{expression}': {message}")]
    Evaluation { expression: String, message: String },
    #[error("Expected result of the expression '{expression}' to be '{expected}', but was '{actual}'.")]
    UnexpectedType {
        expression: String,
        expected: &'static str,
        actual: &'static str,
    },
}

/// Variables visible to an expression.
pub trait VariableScope {
    fn variable(&self, name: &str) -> Option<Value>;
}

impl VariableScope for Variables {
    fn variable(&self, name: &str) -> Option<Value> {
        self.get(name).cloned()
    }
}

/// Variables of `top` shadow those of `below`.
pub struct Layered<'a> {
    pub top: &'a Variables,
    pub below: &'a dyn VariableScope,
}

impl VariableScope for Layered<'_> {
    fn variable(&self, name: &str) -> Option<Value> {
        self.top
            .get(name)
            .cloned()
            .or_else(|| self.below.variable(name))
    }
}

pub struct EmptyScope;

impl VariableScope for EmptyScope {
    fn variable(&self, _name: &str) -> Option<Value> {
        None
    }
}

pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "NULL",
        Value::Bool(_) => "BOOLEAN",
        Value::Number(_) => "NUMBER",
        Value::String(_) => "STRING",
        Value::Array(_) => "ARRAY",
        Value::Object(_) => "OBJECT",
    }
}

pub trait ExpressionLanguage: Send + Sync + fmt::Debug {
    fn validate(&self, expression: &str) -> Result<(), ExpressionError>;

    fn evaluate(&self, expression: &str, scope: &dyn VariableScope)
        -> Result<Value, ExpressionError>;

    fn evaluate_boolean(
        &self,
        expression: &str,
        scope: &dyn VariableScope,
    ) -> Result<bool, ExpressionError> {
        match self.evaluate(expression, scope)? {
            Value::Bool(b) => Ok(b),
            other => Err(ExpressionError::UnexpectedType {
                expression: expression.to_string(),
                expected: "BOOLEAN",
                actual: type_name(&other),
            }),
        }
    }

    fn evaluate_string(
        &self,
        expression: &str,
        scope: &dyn VariableScope,
    ) -> Result<String, ExpressionError> {
        match self.evaluate(expression, scope)? {
            Value::String(s) => Ok(s),
            other => Err(ExpressionError::UnexpectedType {
                expression: expression.to_string(),
                expected: "STRING",
                actual: type_name(&other),
            }),
        }
    }

    /// Accepts numbers and numeric strings (static values are strings).
    fn evaluate_integer(
        &self,
        expression: &str,
        scope: &dyn VariableScope,
    ) -> Result<i64, ExpressionError> {
        let value = self.evaluate(expression, scope)?;
        let parsed = match &value {
            Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
            Value::String(s) => s.trim().parse::<i64>().ok(),
            _ => None,
        };
        parsed.ok_or_else(|| ExpressionError::UnexpectedType {
            expression: expression.to_string(),
            expected: "NUMBER",
            actual: type_name(&value),
        })
    }

    fn evaluate_string_list(
        &self,
        expression: &str,
        scope: &dyn VariableScope,
    ) -> Result<Vec<String>, ExpressionError> {
        match self.evaluate(expression, scope)? {
            Value::Array(items) => items
                .into_iter()
                .map(|item| match item {
                    Value::String(s) => Ok(s),
                    other => Err(ExpressionError::UnexpectedType {
                        expression: expression.to_string(),
                        expected: "STRING",
                        actual: type_name(&other),
                    }),
                })
                .collect(),
            other => Err(ExpressionError::UnexpectedType {
                expression: expression.to_string(),
                expected: "ARRAY",
                actual: type_name(&other),
            }),
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SimpleExpressionLanguage;

impl ExpressionLanguage for SimpleExpressionLanguage {
    fn validate(&self, expression: &str) -> Result<(), ExpressionError> {
        match expression.strip_prefix('=') {
            Some(body) => parse(expression, body).map(|_| ()),
            None => Ok(()),
        }
    }

    fn evaluate(
        &self,
        expression: &str,
        scope: &dyn VariableScope,
    ) -> Result<Value, ExpressionError> {
        match expression.strip_prefix('=') {
            Some(body) => {
                let ast = parse(expression, body)?;
                eval(&ast, scope).map_err(|message| ExpressionError::Evaluation {
                    expression: expression.to_string(),
                    message,
                })
            }
            None => Ok(Value::String(expression.to_string())),
        }
    }
}

// ── Tokens ──

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Str(String),
    Ident(String),
    Op(&'static str),
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Dot,
}

fn tokenize(input: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' | '\n' | '\r' => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '[' => {
                tokens.push(Token::LBracket);
                i += 1;
            }
            ']' => {
                tokens.push(Token::RBracket);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '.' => {
                tokens.push(Token::Dot);
                i += 1;
            }
            '+' => {
                tokens.push(Token::Op("+"));
                i += 1;
            }
            '-' => {
                tokens.push(Token::Op("-"));
                i += 1;
            }
            '*' => {
                tokens.push(Token::Op("*"));
                i += 1;
            }
            '/' => {
                tokens.push(Token::Op("/"));
                i += 1;
            }
            '=' => {
                // `==` is accepted as an alias of `=`
                i += if chars.get(i + 1) == Some(&'=') { 2 } else { 1 };
                tokens.push(Token::Op("="));
            }
            '!' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Op("!="));
                i += 2;
            }
            '<' | '>' => {
                let with_eq = chars.get(i + 1) == Some(&'=');
                let op = match (c, with_eq) {
                    ('<', true) => "<=",
                    ('<', false) => "<",
                    ('>', true) => ">=",
                    _ => ">",
                };
                tokens.push(Token::Op(op));
                i += if with_eq { 2 } else { 1 };
            }
            '"' => {
                let mut text = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => return Err("unterminated string literal".to_string()),
                        Some('"') => {
                            i += 1;
                            break;
                        }
                        Some('\\') => {
                            if let Some(next) = chars.get(i + 1) {
                                text.push(*next);
                            }
                            i += 2;
                        }
                        Some(ch) => {
                            text.push(*ch);
                            i += 1;
                        }
                    }
                }
                tokens.push(Token::Str(text));
            }
            c if c.is_ascii_digit() => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let n = text
                    .parse::<f64>()
                    .map_err(|_| format!("invalid number '{text}'"))?;
                tokens.push(Token::Number(n));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            other => return Err(format!("unexpected character '{other}'")),
        }
    }
    Ok(tokens)
}

// ── AST ──

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Literal(Value),
    Path(Vec<String>),
    List(Vec<Expr>),
    Not(Box<Expr>),
    Binary(&'static str, Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
}

fn parse(expression: &str, body: &str) -> Result<Expr, ExpressionError> {
    let to_error = |message: String| ExpressionError::Parse {
        expression: expression.to_string(),
        message,
    };
    let tokens = tokenize(body).map_err(to_error)?;
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.or().map_err(to_error)?;
    if parser.pos != parser.tokens.len() {
        return Err(to_error(format!(
            "unexpected token {:?}",
            parser.tokens[parser.pos]
        )));
    }
    Ok(expr)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn expect(&mut self, expected: Token) -> Result<(), String> {
        match self.advance() {
            Some(token) if token == expected => Ok(()),
            other => Err(format!("expected {expected:?}, found {other:?}")),
        }
    }

    fn is_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Some(Token::Ident(id)) if id == keyword)
    }

    fn or(&mut self) -> Result<Expr, String> {
        let mut left = self.and()?;
        while self.is_keyword("or") {
            self.pos += 1;
            let right = self.and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and(&mut self) -> Result<Expr, String> {
        let mut left = self.comparison()?;
        while self.is_keyword("and") {
            self.pos += 1;
            let right = self.comparison()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn comparison(&mut self) -> Result<Expr, String> {
        let left = self.additive()?;
        if let Some(Token::Op(op)) = self.peek() {
            let op = *op;
            if matches!(op, "=" | "!=" | "<" | "<=" | ">" | ">=") {
                self.pos += 1;
                let right = self.additive()?;
                return Ok(Expr::Binary(op, Box::new(left), Box::new(right)));
            }
        }
        Ok(left)
    }

    fn additive(&mut self) -> Result<Expr, String> {
        let mut left = self.multiplicative()?;
        while let Some(Token::Op(op)) = self.peek() {
            let op = *op;
            if !matches!(op, "+" | "-") {
                break;
            }
            self.pos += 1;
            let right = self.multiplicative()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn multiplicative(&mut self) -> Result<Expr, String> {
        let mut left = self.unary()?;
        while let Some(Token::Op(op)) = self.peek() {
            let op = *op;
            if !matches!(op, "*" | "/") {
                break;
            }
            self.pos += 1;
            let right = self.unary()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<Expr, String> {
        if let Some(Token::Op("-")) = self.peek() {
            self.pos += 1;
            let operand = self.primary()?;
            return Ok(Expr::Binary(
                "-",
                Box::new(Expr::Literal(Value::from(0))),
                Box::new(operand),
            ));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Expr, String> {
        match self.advance() {
            Some(Token::Number(n)) => Ok(Expr::Literal(number(n))),
            Some(Token::Str(s)) => Ok(Expr::Literal(Value::String(s))),
            Some(Token::LParen) => {
                let inner = self.or()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Some(Token::LBracket) => {
                let mut items = Vec::new();
                if self.peek() != Some(&Token::RBracket) {
                    loop {
                        items.push(self.or()?);
                        if self.peek() == Some(&Token::Comma) {
                            self.pos += 1;
                        } else {
                            break;
                        }
                    }
                }
                self.expect(Token::RBracket)?;
                Ok(Expr::List(items))
            }
            Some(Token::Ident(id)) => match id.as_str() {
                "true" => Ok(Expr::Literal(Value::Bool(true))),
                "false" => Ok(Expr::Literal(Value::Bool(false))),
                "null" => Ok(Expr::Literal(Value::Null)),
                "not" => {
                    self.expect(Token::LParen)?;
                    let inner = self.or()?;
                    self.expect(Token::RParen)?;
                    Ok(Expr::Not(Box::new(inner)))
                }
                _ => {
                    let mut path = vec![id];
                    while self.peek() == Some(&Token::Dot) {
                        self.pos += 1;
                        match self.advance() {
                            Some(Token::Ident(segment)) => path.push(segment),
                            other => return Err(format!("expected property name, found {other:?}")),
                        }
                    }
                    Ok(Expr::Path(path))
                }
            },
            other => Err(format!("unexpected token {other:?}")),
        }
    }
}

fn number(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        Value::from(n as i64)
    } else {
        Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null)
    }
}

fn eval(expr: &Expr, scope: &dyn VariableScope) -> Result<Value, String> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::List(items) => items
            .iter()
            .map(|item| eval(item, scope))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Expr::Path(path) => {
            let mut current = scope.variable(&path[0]).unwrap_or(Value::Null);
            for (depth, segment) in path.iter().enumerate().skip(1) {
                current = match current {
                    Value::Object(mut map) => map.remove(segment).unwrap_or(Value::Null),
                    Value::Null => Value::Null,
                    other => {
                        return Err(format!(
                            "expected '{}' to be an object, but was '{}'",
                            path[..depth].join("."),
                            type_name(&other)
                        ))
                    }
                };
            }
            Ok(current)
        }
        Expr::Not(inner) => match eval(inner, scope)? {
            Value::Bool(b) => Ok(Value::Bool(!b)),
            _ => Ok(Value::Null),
        },
        Expr::And(left, right) => {
            let l = eval(left, scope)?;
            if l == Value::Bool(false) {
                return Ok(Value::Bool(false));
            }
            let r = eval(right, scope)?;
            Ok(match (l, r) {
                (Value::Bool(true), Value::Bool(b)) => Value::Bool(b),
                (_, Value::Bool(false)) => Value::Bool(false),
                _ => Value::Null,
            })
        }
        Expr::Or(left, right) => {
            let l = eval(left, scope)?;
            if l == Value::Bool(true) {
                return Ok(Value::Bool(true));
            }
            let r = eval(right, scope)?;
            Ok(match (l, r) {
                (Value::Bool(false), Value::Bool(b)) => Value::Bool(b),
                (_, Value::Bool(true)) => Value::Bool(true),
                _ => Value::Null,
            })
        }
        Expr::Binary(op, left, right) => {
            let l = eval(left, scope)?;
            let r = eval(right, scope)?;
            Ok(binary(op, &l, &r))
        }
    }
}

fn binary(op: &str, l: &Value, r: &Value) -> Value {
    match op {
        "=" => Value::Bool(equals(l, r)),
        "!=" => Value::Bool(!equals(l, r)),
        "<" | "<=" | ">" | ">=" => {
            let ordering = match (l, r) {
                (Value::Number(a), Value::Number(b)) => {
                    a.as_f64().zip(b.as_f64()).and_then(|(a, b)| a.partial_cmp(&b))
                }
                (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
                _ => None,
            };
            match ordering {
                Some(ordering) => Value::Bool(match op {
                    "<" => ordering.is_lt(),
                    "<=" => ordering.is_le(),
                    ">" => ordering.is_gt(),
                    _ => ordering.is_ge(),
                }),
                None => Value::Null,
            }
        }
        "+" => match (l, r) {
            (Value::String(a), Value::String(b)) => Value::String(format!("{a}{b}")),
            _ => arithmetic(l, r, |a, b| a + b),
        },
        "-" => arithmetic(l, r, |a, b| a - b),
        "*" => arithmetic(l, r, |a, b| a * b),
        "/" => match r.as_f64() {
            Some(d) if d != 0.0 => arithmetic(l, r, |a, b| a / b),
            _ => Value::Null,
        },
        _ => Value::Null,
    }
}

fn arithmetic(l: &Value, r: &Value, f: impl Fn(f64, f64) -> f64) -> Value {
    match (l.as_f64(), r.as_f64()) {
        (Some(a), Some(b)) => number(f(a, b)),
        _ => Value::Null,
    }
}

fn equals(l: &Value, r: &Value) -> bool {
    match (l, r) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => l == r,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vars(value: Value) -> Variables {
        match value {
            Value::Object(map) => map,
            _ => Variables::new(),
        }
    }

    #[test]
    fn static_values_are_strings() {
        let lang = SimpleExpressionLanguage;
        assert_eq!(lang.evaluate("PT1M", &EmptyScope).unwrap(), json!("PT1M"));
    }

    #[test]
    fn conditions_over_paths() {
        let lang = SimpleExpressionLanguage;
        let scope = vars(json!({"order": {"amount": 120, "express": true}, "count": 2}));
        assert!(lang
            .evaluate_boolean("=order.amount > 100 and order.express", &scope)
            .unwrap());
        assert!(!lang.evaluate_boolean("=not(count = 2)", &scope).unwrap());
        assert!(lang.evaluate_boolean("=count + 1 >= 3 or false", &scope).unwrap());
        assert_eq!(lang.evaluate("=[\"a\", count]", &scope).unwrap(), json!(["a", 2]));
    }

    #[test]
    fn missing_variables_are_null() {
        let lang = SimpleExpressionLanguage;
        assert_eq!(lang.evaluate("=missing.deep", &EmptyScope).unwrap(), Value::Null);
    }

    #[test]
    fn non_boolean_condition_reports_type() {
        let lang = SimpleExpressionLanguage;
        let err = lang.evaluate_boolean("=missing", &EmptyScope).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Expected result of the expression '=missing' to be 'BOOLEAN', but was 'NULL'."
        );
    }

    #[test]
    fn path_into_scalar_fails() {
        let lang = SimpleExpressionLanguage;
        let scope = vars(json!({"x": 5}));
        assert!(matches!(
            lang.evaluate("=x.y", &scope),
            Err(ExpressionError::Evaluation { .. })
        ));
    }

    #[test]
    fn parse_errors_are_reported() {
        let lang = SimpleExpressionLanguage;
        assert!(lang.validate("=(a = 1").is_err());
        assert!(lang.validate("=a = 1").is_ok());
        assert!(lang.validate("no expression at all").is_ok());
    }

    #[test]
    fn layered_scope_shadows() {
        let lang = SimpleExpressionLanguage;
        let below = vars(json!({"x": 1, "y": 2}));
        let top = vars(json!({"x": 10}));
        let scope = Layered {
            top: &top,
            below: &below,
        };
        assert_eq!(lang.evaluate("=x + y", &scope).unwrap(), json!(12));
    }
}
