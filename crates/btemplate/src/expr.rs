/*
 * expr.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Expressions used by interpolations and directive arguments.
//!
//! Grammar, loosest binding first:
//!
//! ```text
//! interpolation := expr ( '|' filter )*
//! filter        := ident ( '(' args? ')' )?
//! expr          := or
//! or            := and ( '||' and )*
//! and           := equality ( '&&' equality )*
//! equality      := compare ( ( '==' | '!=' | '===' | '!==' ) compare )*
//! compare       := additive ( ( '<' | '<=' | '>' | '>=' ) additive )*
//! additive      := term ( ( '+' | '-' ) term )*
//! term          := unary ( ( '*' | '/' | '%' ) unary )*
//! unary         := ( '!' | '-' ) unary | primary
//! primary       := number | string | path | '${' interpolation '}' | '(' expr ')'
//! path          := ident ( '.' ( ident | integer ) )*
//! ```
//!
//! Paths resolve against the render scope; a missing segment anywhere in a
//! path yields `null` instead of an error.

use std::cmp::Ordering;

use crate::context::TemplateValue;
use crate::error::TemplateResult;
use crate::lexer::find_closing;

/// A parsed expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(TemplateValue),
    /// Dotted lookup, e.g. `["it", "name"]`.
    Path(Vec<String>),
    Interpolation(Box<Interpolation>),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    And,
    Eq,
    Ne,
    StrictEq,
    StrictNe,
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

/// An expression followed by a filter chain: `a.b | url | truncate(10)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Interpolation {
    pub expr: Expr,
    pub filters: Vec<FilterCall>,
}

/// One link of a filter chain.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterCall {
    pub name: String,
    pub args: Vec<Expr>,
}

impl FilterCall {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: Vec::new(),
        }
    }
}

/// A call argument, `key = expr` or a bare positional `expr`.
#[derive(Debug, Clone, PartialEq)]
pub struct Argument {
    pub name: Option<String>,
    pub value: Expr,
}

/// What expression evaluation needs from the renderer.
pub trait Environment {
    /// Resolve a dotted path. `None` when any segment is missing.
    fn lookup(&self, path: &[String]) -> Option<TemplateValue>;

    /// Run a named filter over text.
    fn apply_filter(&self, name: &str, input: &str, args: &[TemplateValue])
    -> TemplateResult<String>;
}

impl Expr {
    pub fn evaluate(&self, env: &dyn Environment) -> TemplateResult<TemplateValue> {
        match self {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Path(path) => Ok(env.lookup(path).unwrap_or_default()),
            Expr::Interpolation(interp) => interp.evaluate(env),
            Expr::Unary(op, operand) => {
                let value = operand.evaluate(env)?;
                Ok(match op {
                    UnaryOp::Not => TemplateValue::Bool(!value.is_truthy()),
                    UnaryOp::Neg => TemplateValue::Number(-value.to_number()),
                })
            }
            Expr::Binary(BinaryOp::Or, lhs, rhs) => {
                let left = lhs.evaluate(env)?;
                if left.is_truthy() {
                    Ok(left)
                } else {
                    rhs.evaluate(env)
                }
            }
            Expr::Binary(BinaryOp::And, lhs, rhs) => {
                let left = lhs.evaluate(env)?;
                if left.is_truthy() {
                    rhs.evaluate(env)
                } else {
                    Ok(left)
                }
            }
            Expr::Binary(op, lhs, rhs) => {
                let left = lhs.evaluate(env)?;
                let right = rhs.evaluate(env)?;
                Ok(binary(*op, &left, &right))
            }
        }
    }

    /// Visit every filter call reachable from this expression.
    pub fn for_each_filter<'a>(&'a self, f: &mut dyn FnMut(&'a FilterCall)) {
        match self {
            Expr::Literal(_) | Expr::Path(_) => {}
            Expr::Interpolation(interp) => interp.for_each_filter(f),
            Expr::Unary(_, operand) => operand.for_each_filter(f),
            Expr::Binary(_, lhs, rhs) => {
                lhs.for_each_filter(f);
                rhs.for_each_filter(f);
            }
        }
    }
}

impl Interpolation {
    /// Evaluate the expression and thread its text through the filter chain.
    ///
    /// Without filters the raw value is returned, so interpolations used as
    /// conditions or loop lists keep their structure.
    pub fn evaluate(&self, env: &dyn Environment) -> TemplateResult<TemplateValue> {
        let value = self.expr.evaluate(env)?;
        if self.filters.is_empty() {
            return Ok(value);
        }

        let mut text = value.render();
        for call in &self.filters {
            let args = call
                .args
                .iter()
                .map(|arg| arg.evaluate(env))
                .collect::<TemplateResult<Vec<_>>>()?;
            text = env.apply_filter(&call.name, &text, &args)?;
        }
        Ok(TemplateValue::String(text))
    }

    pub fn for_each_filter<'a>(&'a self, f: &mut dyn FnMut(&'a FilterCall)) {
        self.expr.for_each_filter(f);
        for call in &self.filters {
            f(call);
            for arg in &call.args {
                arg.for_each_filter(f);
            }
        }
    }
}

fn binary(op: BinaryOp, left: &TemplateValue, right: &TemplateValue) -> TemplateValue {
    use TemplateValue::{Bool, Number};
    match op {
        BinaryOp::Eq => Bool(loose_eq(left, right)),
        BinaryOp::Ne => Bool(!loose_eq(left, right)),
        BinaryOp::StrictEq => Bool(left == right),
        BinaryOp::StrictNe => Bool(left != right),
        BinaryOp::Lt => Bool(compare(left, right) == Some(Ordering::Less)),
        BinaryOp::Le => Bool(matches!(
            compare(left, right),
            Some(Ordering::Less | Ordering::Equal)
        )),
        BinaryOp::Gt => Bool(compare(left, right) == Some(Ordering::Greater)),
        BinaryOp::Ge => Bool(matches!(
            compare(left, right),
            Some(Ordering::Greater | Ordering::Equal)
        )),
        BinaryOp::Add => match (left, right) {
            (TemplateValue::String(_) | TemplateValue::List(_) | TemplateValue::Map(_), _)
            | (_, TemplateValue::String(_) | TemplateValue::List(_) | TemplateValue::Map(_)) => {
                TemplateValue::String(left.render() + &right.render())
            }
            _ => Number(left.to_number() + right.to_number()),
        },
        BinaryOp::Sub => Number(left.to_number() - right.to_number()),
        BinaryOp::Mul => Number(left.to_number() * right.to_number()),
        BinaryOp::Div => Number(left.to_number() / right.to_number()),
        BinaryOp::Rem => Number(left.to_number() % right.to_number()),
        BinaryOp::Or if left.is_truthy() => left.clone(),
        BinaryOp::And if !left.is_truthy() => left.clone(),
        BinaryOp::Or | BinaryOp::And => right.clone(),
    }
}

fn loose_eq(left: &TemplateValue, right: &TemplateValue) -> bool {
    use TemplateValue::{Bool, Null, Number, String};
    match (left, right) {
        (Null, Null) => true,
        (Null, _) | (_, Null) => false,
        (Number(_), String(_)) | (String(_), Number(_)) | (Bool(_), _) | (_, Bool(_)) => {
            left.to_number() == right.to_number()
        }
        _ => left == right,
    }
}

fn compare(left: &TemplateValue, right: &TemplateValue) -> Option<Ordering> {
    match (left, right) {
        (TemplateValue::String(a), TemplateValue::String(b)) => Some(a.cmp(b)),
        _ => left.to_number().partial_cmp(&right.to_number()),
    }
}

// =============================================================================
// Tokenizer
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Number(f64),
    Str(String),
    Ident(String),
    Interp(Interpolation),
    Dot,
    Comma,
    LParen,
    RParen,
    Pipe,
    Assign,
    Op(&'static str),
}

/// Variable delimiters, needed to recognize nested interpolations.
#[derive(Debug, Clone, Copy)]
pub struct Delimiters<'a> {
    pub open: &'a str,
    pub close: &'a str,
}

fn tokenize(src: &str, delims: Delimiters<'_>) -> Result<Vec<Tok>, String> {
    let mut tokens = Vec::new();
    let bytes = src.as_bytes();
    let mut pos = 0;

    while pos < src.len() {
        let rest = &src[pos..];
        let c = bytes[pos];

        if c.is_ascii_whitespace() {
            pos += 1;
            continue;
        }

        if rest.starts_with(delims.open) {
            let body = pos + delims.open.len();
            let len = find_closing(&src[body..], delims.open, delims.close)
                .ok_or_else(|| format!("unterminated `{}`", delims.open))?;
            let inner = parse_interpolation(&src[body..body + len], delims)?;
            tokens.push(Tok::Interp(inner));
            pos = body + len + delims.close.len();
            continue;
        }

        if c.is_ascii_digit() {
            let after_dot = matches!(tokens.last(), Some(Tok::Dot));
            let mut end = pos;
            while end < src.len() && bytes[end].is_ascii_digit() {
                end += 1;
            }
            // Path segments such as `items.0.name` take integers only.
            if !after_dot
                && end + 1 < src.len()
                && bytes[end] == b'.'
                && bytes[end + 1].is_ascii_digit()
            {
                end += 1;
                while end < src.len() && bytes[end].is_ascii_digit() {
                    end += 1;
                }
            }
            let number = src[pos..end]
                .parse::<f64>()
                .map_err(|e| format!("invalid number `{}`: {}", &src[pos..end], e))?;
            tokens.push(Tok::Number(number));
            pos = end;
            continue;
        }

        if c.is_ascii_alphabetic() || c == b'_' || c == b'$' {
            let mut end = pos;
            while end < src.len()
                && (bytes[end].is_ascii_alphanumeric() || bytes[end] == b'_' || bytes[end] == b'$')
            {
                end += 1;
            }
            tokens.push(Tok::Ident(src[pos..end].to_string()));
            pos = end;
            continue;
        }

        if c == b'"' || c == b'\'' {
            let (text, consumed) = read_string(rest)?;
            tokens.push(Tok::Str(text));
            pos += consumed;
            continue;
        }

        const OPERATORS: [&str; 17] = [
            "===", "!==", "==", "!=", "<=", ">=", "&&", "||", "<", ">", "!", "+", "-", "*", "/",
            "%", "=",
        ];
        if let Some(op) = OPERATORS.iter().find(|op| rest.starts_with(**op)) {
            tokens.push(match *op {
                "=" => Tok::Assign,
                other => Tok::Op(other),
            });
            pos += op.len();
            continue;
        }

        let tok = match c {
            b'.' => Tok::Dot,
            b',' => Tok::Comma,
            b'(' => Tok::LParen,
            b')' => Tok::RParen,
            b'|' => Tok::Pipe,
            _ => {
                let ch = rest.chars().next().unwrap_or_default();
                return Err(format!("unexpected character `{}`", ch));
            }
        };
        tokens.push(tok);
        pos += 1;
    }

    Ok(tokens)
}

/// Read a quoted string literal, returning its value and the bytes consumed.
fn read_string(src: &str) -> Result<(String, usize), String> {
    let mut chars = src.char_indices();
    let (_, quote) = chars.next().ok_or("empty string literal")?;
    let mut out = String::new();
    while let Some((i, c)) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some((_, 'n')) => out.push('\n'),
                Some((_, 't')) => out.push('\t'),
                Some((_, 'r')) => out.push('\r'),
                Some((_, other)) => out.push(other),
                None => break,
            },
            c if c == quote => return Ok((out, i + c.len_utf8())),
            c => out.push(c),
        }
    }
    Err("unterminated string literal".to_string())
}

// =============================================================================
// Parser
// =============================================================================

struct ExprParser {
    tokens: Vec<Tok>,
    pos: usize,
}

impl ExprParser {
    fn new(src: &str, delims: Delimiters<'_>) -> Result<Self, String> {
        Ok(Self {
            tokens: tokenize(src, delims)?,
            pos: 0,
        })
    }

    fn peek(&self) -> Option<&Tok> {
        self.tokens.get(self.pos)
    }

    fn peek_at(&self, offset: usize) -> Option<&Tok> {
        self.tokens.get(self.pos + offset)
    }

    fn next(&mut self) -> Option<Tok> {
        let tok = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        tok
    }

    fn eat(&mut self, tok: &Tok) -> bool {
        if self.peek() == Some(tok) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_op(&mut self, ops: &[&'static str]) -> Option<&'static str> {
        match self.peek() {
            Some(Tok::Op(op)) if ops.contains(op) => {
                let op = *op;
                self.pos += 1;
                Some(op)
            }
            _ => None,
        }
    }

    fn expect_end(&self) -> Result<(), String> {
        match self.peek() {
            None => Ok(()),
            Some(tok) => Err(format!("unexpected {}", describe(tok))),
        }
    }

    fn interpolation(&mut self) -> Result<Interpolation, String> {
        let expr = self.expr()?;
        let mut filters = Vec::new();
        while self.eat(&Tok::Pipe) {
            let name = match self.next() {
                Some(Tok::Ident(name)) => name,
                Some(tok) => return Err(format!("expected filter name, found {}", describe(&tok))),
                None => return Err("expected filter name after `|`".to_string()),
            };
            let args = if self.eat(&Tok::LParen) {
                self.call_args()?
                    .into_iter()
                    .map(|arg| match arg.name {
                        None => Ok(arg.value),
                        Some(key) => Err(format!(
                            "filter `{}` takes no named argument `{}`",
                            name, key
                        )),
                    })
                    .collect::<Result<Vec<_>, _>>()?
            } else {
                Vec::new()
            };
            filters.push(FilterCall { name, args });
        }
        Ok(Interpolation { expr, filters })
    }

    /// Arguments after an already-consumed `(`, through the closing `)`.
    fn call_args(&mut self) -> Result<Vec<Argument>, String> {
        let mut args = Vec::new();
        if self.eat(&Tok::RParen) {
            return Ok(args);
        }
        loop {
            args.push(self.argument()?);
            if self.eat(&Tok::RParen) {
                return Ok(args);
            }
            if !self.eat(&Tok::Comma) {
                return Err("expected `,` or `)` in argument list".to_string());
            }
        }
    }

    fn argument(&mut self) -> Result<Argument, String> {
        if let (Some(Tok::Ident(name)), Some(Tok::Assign)) = (self.peek(), self.peek_at(1)) {
            let name = name.clone();
            self.pos += 2;
            return Ok(Argument {
                name: Some(name),
                value: self.expr()?,
            });
        }
        Ok(Argument {
            name: None,
            value: self.expr()?,
        })
    }

    fn expr(&mut self) -> Result<Expr, String> {
        self.binary_level(0)
    }

    fn binary_level(&mut self, level: usize) -> Result<Expr, String> {
        const LEVELS: [&[&str]; 6] = [
            &["||"],
            &["&&"],
            &["===", "!==", "==", "!="],
            &["<=", ">=", "<", ">"],
            &["+", "-"],
            &["*", "/", "%"],
        ];
        let Some(ops) = LEVELS.get(level) else {
            return self.unary();
        };

        let mut lhs = self.binary_level(level + 1)?;
        while let Some(op) = self.eat_op(ops) {
            let rhs = self.binary_level(level + 1)?;
            lhs = Expr::Binary(binary_op(op), Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr, String> {
        match self.eat_op(&["!", "-"]) {
            Some("!") => Ok(Expr::Unary(UnaryOp::Not, Box::new(self.unary()?))),
            Some(_) => Ok(Expr::Unary(UnaryOp::Neg, Box::new(self.unary()?))),
            None => self.primary(),
        }
    }

    fn primary(&mut self) -> Result<Expr, String> {
        match self.next() {
            Some(Tok::Number(n)) => Ok(Expr::Literal(TemplateValue::Number(n))),
            Some(Tok::Str(s)) => Ok(Expr::Literal(TemplateValue::String(s))),
            Some(Tok::Interp(interp)) => Ok(Expr::Interpolation(Box::new(interp))),
            Some(Tok::LParen) => {
                let inner = self.expr()?;
                if self.eat(&Tok::RParen) {
                    Ok(inner)
                } else {
                    Err("expected `)`".to_string())
                }
            }
            Some(Tok::Ident(first)) => {
                match first.as_str() {
                    "true" => return Ok(Expr::Literal(TemplateValue::Bool(true))),
                    "false" => return Ok(Expr::Literal(TemplateValue::Bool(false))),
                    "null" => return Ok(Expr::Literal(TemplateValue::Null)),
                    _ => {}
                }
                let mut path = vec![first];
                while self.eat(&Tok::Dot) {
                    match self.next() {
                        Some(Tok::Ident(segment)) => path.push(segment),
                        Some(Tok::Number(n)) if n.fract() == 0.0 && n >= 0.0 => {
                            path.push(format!("{}", n as u64));
                        }
                        _ => return Err("expected property name after `.`".to_string()),
                    }
                }
                Ok(Expr::Path(path))
            }
            Some(tok) => Err(format!("unexpected {}", describe(&tok))),
            None => Err("unexpected end of expression".to_string()),
        }
    }
}

fn binary_op(op: &str) -> BinaryOp {
    match op {
        "||" => BinaryOp::Or,
        "&&" => BinaryOp::And,
        "==" => BinaryOp::Eq,
        "!=" => BinaryOp::Ne,
        "===" => BinaryOp::StrictEq,
        "!==" => BinaryOp::StrictNe,
        "<" => BinaryOp::Lt,
        "<=" => BinaryOp::Le,
        ">" => BinaryOp::Gt,
        ">=" => BinaryOp::Ge,
        "+" => BinaryOp::Add,
        "-" => BinaryOp::Sub,
        "*" => BinaryOp::Mul,
        "/" => BinaryOp::Div,
        _ => BinaryOp::Rem,
    }
}

fn describe(tok: &Tok) -> String {
    match tok {
        Tok::Number(n) => format!("number `{}`", n),
        Tok::Str(s) => format!("string `{:?}`", s),
        Tok::Ident(name) => format!("`{}`", name),
        Tok::Interp(_) => "interpolation".to_string(),
        Tok::Dot => "`.`".to_string(),
        Tok::Comma => "`,`".to_string(),
        Tok::LParen => "`(`".to_string(),
        Tok::RParen => "`)`".to_string(),
        Tok::Pipe => "`|`".to_string(),
        Tok::Assign => "`=`".to_string(),
        Tok::Op(op) => format!("`{}`", op),
    }
}

/// Parse a complete expression.
pub fn parse_expression(src: &str, delims: Delimiters<'_>) -> Result<Expr, String> {
    let mut parser = ExprParser::new(src, delims)?;
    let expr = parser.expr()?;
    parser.expect_end()?;
    Ok(expr)
}

/// Parse the inside of `${ ... }`.
pub fn parse_interpolation(src: &str, delims: Delimiters<'_>) -> Result<Interpolation, String> {
    let mut parser = ExprParser::new(src, delims)?;
    let interp = parser.interpolation()?;
    parser.expect_end()?;
    Ok(interp)
}

/// Parse the inside of an argument list, without its parentheses.
pub fn parse_arguments(src: &str, delims: Delimiters<'_>) -> Result<Vec<Argument>, String> {
    if src.trim().is_empty() {
        return Ok(Vec::new());
    }
    let mut parser = ExprParser::new(src, delims)?;
    let mut args = vec![parser.argument()?];
    while parser.eat(&Tok::Comma) {
        args.push(parser.argument()?);
    }
    parser.expect_end()?;
    Ok(args)
}
