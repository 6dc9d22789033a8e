//! The built-in expression grammar.
//!
//! A small tokenizer and recursive-descent parser over the value language of
//! workflow scripts: strings (with `${...}` interpolation), integers, lists,
//! maps, identifiers, arithmetic and comparisons, and call syntax for
//! directive bodies. Statement blocks are opaque to the engine; for them the
//! grammar only judges completeness (balanced strings and brackets).

use std::collections::BTreeMap;

use super::{Bindings, CompileMode, EvalError, Evaluator, Value};

#[derive(Debug, Clone, PartialEq)]
pub enum Tok {
    Str(String),
    Int(i64),
    Ident(String),
    Sym(&'static str),
}

const TWO_CHAR_SYMS: &[&str] = &["==", "!=", "<=", ">="];
const ONE_CHAR_SYMS: &[&str] = &[
    "+", "-", "*", "/", "(", ")", "[", "]", "{", "}", ",", ":", "=", "<", ">", ";", ".",
];

/// Tokenize a fragment. Comments (`#` to end of line) are skipped outside
/// string literals; triple-quoted strings may span lines.
pub fn tokenize(text: &str) -> Result<Vec<Tok>, EvalError> {
    let chars: Vec<char> = text.chars().collect();
    let mut toks = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        if c == '#' {
            while i < chars.len() && chars[i] != '\n' {
                i += 1;
            }
            continue;
        }
        if c == '\'' || c == '"' {
            let (s, next) = read_string(&chars, i)?;
            toks.push(Tok::Str(s));
            i = next;
            continue;
        }
        if c.is_ascii_digit() {
            let start = i;
            while i < chars.len() && chars[i].is_ascii_digit() {
                i += 1;
            }
            if i < chars.len() && chars[i] == '.' {
                return Err(EvalError::Syntax(
                    "float literals are not supported".to_string(),
                ));
            }
            if i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                return Err(EvalError::Syntax(format!(
                    "invalid number starting at '{}'",
                    chars[start..].iter().take(8).collect::<String>()
                )));
            }
            let digits: String = chars[start..i].iter().collect();
            let n = digits
                .parse::<i64>()
                .map_err(|_| EvalError::Syntax(format!("integer out of range: {}", digits)))?;
            toks.push(Tok::Int(n));
            continue;
        }
        if c.is_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            toks.push(Tok::Ident(chars[start..i].iter().collect()));
            continue;
        }
        if i + 1 < chars.len() {
            let pair: String = chars[i..i + 2].iter().collect();
            if let Some(sym) = TWO_CHAR_SYMS.iter().find(|s| **s == pair) {
                toks.push(Tok::Sym(*sym));
                i += 2;
                continue;
            }
        }
        let single = c.to_string();
        if let Some(sym) = ONE_CHAR_SYMS.iter().find(|s| **s == single) {
            toks.push(Tok::Sym(*sym));
            i += 1;
            continue;
        }
        return Err(EvalError::Syntax(format!("unexpected character '{}'", c)));
    }
    Ok(toks)
}

/// Read a string literal starting at `start` (which holds the quote char).
/// Returns the unquoted content and the index one past the closing quote.
fn read_string(chars: &[char], start: usize) -> Result<(String, usize), EvalError> {
    let quote = chars[start];
    let triple = chars.len() >= start + 3 && chars[start + 1] == quote && chars[start + 2] == quote;
    let mut i = if triple { start + 3 } else { start + 1 };
    let mut out = String::new();

    while i < chars.len() {
        let c = chars[i];
        if c == '\\' && i + 1 < chars.len() {
            let escaped = chars[i + 1];
            match escaped {
                '\'' | '"' | '\\' => out.push(escaped),
                'n' => out.push('\n'),
                't' => out.push('\t'),
                _ => {
                    out.push('\\');
                    out.push(escaped);
                }
            }
            i += 2;
            continue;
        }
        if triple {
            if c == quote && chars.len() >= i + 3 && chars[i + 1] == quote && chars[i + 2] == quote
            {
                return Ok((out, i + 3));
            }
        } else if c == quote {
            return Ok((out, i + 1));
        }
        out.push(c);
        i += 1;
    }
    Err(EvalError::Syntax("unterminated string literal".to_string()))
}

/// Parsed expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Str(String),
    Int(i64),
    Ident(String),
    List(Vec<Expr>),
    Map(Vec<(Expr, Expr)>),
    Call(CallExpr),
    Unary(&'static str, Box<Expr>),
    Binary(&'static str, Box<Expr>, Box<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CallExpr {
    pub func: String,
    pub args: Vec<Expr>,
    pub kwargs: Vec<(String, Expr)>,
}

/// A directive body: the argument list of an implicit call.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CallArgs {
    pub args: Vec<Expr>,
    pub kwargs: Vec<(String, Expr)>,
}

struct Parser {
    toks: Vec<Tok>,
    pos: usize,
}

impl Parser {
    fn new(toks: Vec<Tok>) -> Self {
        Self { toks, pos: 0 }
    }

    fn peek(&self) -> Option<&Tok> {
        self.toks.get(self.pos)
    }

    fn peek2(&self) -> Option<&Tok> {
        self.toks.get(self.pos + 1)
    }

    fn next(&mut self) -> Option<Tok> {
        let t = self.toks.get(self.pos).cloned();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn at_sym(&self, s: &str) -> bool {
        matches!(self.peek(), Some(Tok::Sym(t)) if *t == s)
    }

    fn eat_sym(&mut self, s: &str) -> bool {
        if self.at_sym(s) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_sym(&mut self, s: &str) -> Result<(), EvalError> {
        if self.eat_sym(s) {
            Ok(())
        } else {
            Err(EvalError::Syntax(format!(
                "expected '{}', found {}",
                s,
                self.describe_current()
            )))
        }
    }

    fn describe_current(&self) -> String {
        match self.peek() {
            Some(Tok::Str(s)) => format!("string '{}'", s),
            Some(Tok::Int(n)) => format!("number {}", n),
            Some(Tok::Ident(name)) => format!("'{}'", name),
            Some(Tok::Sym(s)) => format!("'{}'", s),
            None => "end of input".to_string(),
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.toks.len()
    }

    fn parse_expr(&mut self) -> Result<Expr, EvalError> {
        let mut lhs = self.parse_additive()?;
        while let Some(Tok::Sym(op)) = self.peek() {
            let op = *op;
            if !matches!(op, "==" | "!=" | "<" | "<=" | ">" | ">=") {
                break;
            }
            self.pos += 1;
            let rhs = self.parse_additive()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_additive(&mut self) -> Result<Expr, EvalError> {
        let mut lhs = self.parse_term()?;
        while let Some(Tok::Sym(op)) = self.peek() {
            let op = *op;
            if !matches!(op, "+" | "-") {
                break;
            }
            self.pos += 1;
            let rhs = self.parse_term()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_term(&mut self) -> Result<Expr, EvalError> {
        let mut lhs = self.parse_factor()?;
        while let Some(Tok::Sym(op)) = self.peek() {
            let op = *op;
            if !matches!(op, "*" | "/") {
                break;
            }
            self.pos += 1;
            let rhs = self.parse_factor()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_factor(&mut self) -> Result<Expr, EvalError> {
        if self.eat_sym("-") {
            let inner = self.parse_factor()?;
            return Ok(Expr::Unary("-", Box::new(inner)));
        }
        self.parse_atom()
    }

    fn parse_atom(&mut self) -> Result<Expr, EvalError> {
        match self.next() {
            Some(Tok::Str(s)) => Ok(Expr::Str(s)),
            Some(Tok::Int(n)) => Ok(Expr::Int(n)),
            Some(Tok::Ident(name)) => {
                if self.eat_sym("(") {
                    let body = self.parse_args_until(Some(")"))?;
                    self.expect_sym(")")?;
                    Ok(Expr::Call(CallExpr {
                        func: name,
                        args: body.args,
                        kwargs: body.kwargs,
                    }))
                } else {
                    Ok(Expr::Ident(name))
                }
            }
            Some(Tok::Sym("(")) => {
                let inner = self.parse_expr()?;
                self.expect_sym(")")?;
                Ok(inner)
            }
            Some(Tok::Sym("[")) => {
                let mut items = Vec::new();
                while !self.at_sym("]") {
                    items.push(self.parse_expr()?);
                    if !self.eat_sym(",") {
                        break;
                    }
                }
                self.expect_sym("]")?;
                Ok(Expr::List(items))
            }
            Some(Tok::Sym("{")) => {
                let mut entries = Vec::new();
                while !self.at_sym("}") {
                    let key = self.parse_expr()?;
                    self.expect_sym(":")?;
                    let value = self.parse_expr()?;
                    entries.push((key, value));
                    if !self.eat_sym(",") {
                        break;
                    }
                }
                self.expect_sym("}")?;
                Ok(Expr::Map(entries))
            }
            Some(other) => Err(EvalError::Syntax(format!(
                "unexpected token {:?}",
                other
            ))),
            None => Err(EvalError::Syntax("unexpected end of expression".to_string())),
        }
    }

    /// Argument list: `expr` or `name=expr`, comma separated, trailing comma
    /// allowed. Stops before `stop` or end of input.
    fn parse_args_until(&mut self, stop: Option<&str>) -> Result<CallArgs, EvalError> {
        let mut out = CallArgs::default();
        loop {
            if self.at_end() || stop.is_some_and(|s| self.at_sym(s)) {
                break;
            }
            let is_kwarg = matches!(self.peek(), Some(Tok::Ident(_)))
                && matches!(self.peek2(), Some(Tok::Sym("=")));
            if is_kwarg {
                let name = match self.next() {
                    Some(Tok::Ident(n)) => n,
                    _ => unreachable!(),
                };
                self.pos += 1; // the '='
                let value = self.parse_expr()?;
                out.kwargs.push((name, value));
            } else {
                out.args.push(self.parse_expr()?);
            }
            if !self.eat_sym(",") {
                break;
            }
        }
        Ok(out)
    }
}

/// Parse `text` as exactly one expression.
pub fn parse_expression(text: &str) -> Result<Expr, EvalError> {
    let toks = tokenize(text)?;
    if toks.is_empty() {
        return Err(EvalError::Syntax("empty expression".to_string()));
    }
    let mut parser = Parser::new(toks);
    let expr = parser.parse_expr()?;
    if !parser.at_end() {
        return Err(EvalError::Syntax(format!(
            "trailing input after expression: {}",
            parser.describe_current()
        )));
    }
    Ok(expr)
}

/// Parse a directive body as the argument list of an implicit call.
pub fn parse_directive(text: &str) -> Result<CallArgs, EvalError> {
    let toks = tokenize(text)?;
    let mut parser = Parser::new(toks);
    let body = parser.parse_args_until(None)?;
    if !parser.at_end() {
        return Err(EvalError::Syntax(format!(
            "trailing input after directive arguments: {}",
            parser.describe_current()
        )));
    }
    Ok(body)
}

/// Completeness judgement for an opaque statement block: every string
/// literal terminated, brackets balanced, and no dangling operator.
pub fn statements_complete(text: &str) -> bool {
    if text.trim().is_empty() {
        return true;
    }
    let toks = match tokenize(text) {
        Ok(toks) => toks,
        Err(_) => return false,
    };
    let mut depth = 0i32;
    for tok in &toks {
        if let Tok::Sym(sym) = tok {
            match *sym {
                "(" | "[" | "{" => depth += 1,
                ")" | "]" | "}" => {
                    depth -= 1;
                    if depth < 0 {
                        return false;
                    }
                }
                _ => {}
            }
        }
    }
    if depth != 0 {
        return false;
    }
    !matches!(
        toks.last(),
        Some(Tok::Sym(
            "+" | "-" | "*" | "/" | "," | "=" | "==" | "!=" | "<" | "<=" | ">" | ">=" | ":"
        ))
    )
}

/// Evaluate a parsed expression against a binding table.
pub fn eval_expr(expr: &Expr, bindings: &Bindings) -> Result<Value, EvalError> {
    match expr {
        Expr::Str(s) => Ok(Value::Str(interpolate(s, bindings)?)),
        Expr::Int(n) => Ok(Value::Int(*n)),
        Expr::Ident(name) => match name.as_str() {
            "True" => Ok(Value::Int(1)),
            "False" => Ok(Value::Int(0)),
            _ => bindings
                .get(name)
                .cloned()
                .ok_or_else(|| EvalError::Unknown(name.clone())),
        },
        Expr::List(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(eval_expr(item, bindings)?);
            }
            Ok(Value::List(out))
        }
        Expr::Map(entries) => {
            let mut out = BTreeMap::new();
            for (key, value) in entries {
                let key = eval_expr(key, bindings)?.render();
                out.insert(key, eval_expr(value, bindings)?);
            }
            Ok(Value::Map(out))
        }
        Expr::Unary(op, inner) => {
            let value = eval_expr(inner, bindings)?;
            match (op, value) {
                (&"-", Value::Int(n)) => Ok(Value::Int(-n)),
                (_, value) => Err(EvalError::Type(format!(
                    "bad operand type for unary {}: {}",
                    op,
                    value.type_name()
                ))),
            }
        }
        Expr::Binary(op, lhs, rhs) => {
            let lhs = eval_expr(lhs, bindings)?;
            let rhs = eval_expr(rhs, bindings)?;
            eval_binary(op, lhs, rhs)
        }
        Expr::Call(call) => eval_call(call, bindings),
    }
}

fn eval_binary(op: &str, lhs: Value, rhs: Value) -> Result<Value, EvalError> {
    match op {
        "+" => match (lhs, rhs) {
            (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a + b)),
            (Value::Str(a), Value::Str(b)) => Ok(Value::Str(a + &b)),
            (Value::List(mut a), Value::List(b)) => {
                a.extend(b);
                Ok(Value::List(a))
            }
            (a, b) => Err(EvalError::Type(format!(
                "cannot add {} and {}",
                a.type_name(),
                b.type_name()
            ))),
        },
        "-" | "*" | "/" => match (lhs, rhs) {
            (Value::Int(a), Value::Int(b)) => match op {
                "-" => Ok(Value::Int(a - b)),
                "*" => Ok(Value::Int(a * b)),
                _ => {
                    if b == 0 {
                        Err(EvalError::Type("division by zero".to_string()))
                    } else {
                        Ok(Value::Int(a / b))
                    }
                }
            },
            (a, b) => Err(EvalError::Type(format!(
                "cannot apply '{}' to {} and {}",
                op,
                a.type_name(),
                b.type_name()
            ))),
        },
        "==" => Ok(Value::Int((lhs == rhs) as i64)),
        "!=" => Ok(Value::Int((lhs != rhs) as i64)),
        "<" | "<=" | ">" | ">=" => {
            let ordering = match (&lhs, &rhs) {
                (Value::Int(a), Value::Int(b)) => a.cmp(b),
                (Value::Str(a), Value::Str(b)) => a.cmp(b),
                _ => {
                    return Err(EvalError::Type(format!(
                        "cannot order {} and {}",
                        lhs.type_name(),
                        rhs.type_name()
                    )));
                }
            };
            let result = match op {
                "<" => ordering.is_lt(),
                "<=" => ordering.is_le(),
                ">" => ordering.is_gt(),
                _ => ordering.is_ge(),
            };
            Ok(Value::Int(result as i64))
        }
        _ => Err(EvalError::Syntax(format!("unknown operator '{}'", op))),
    }
}

fn eval_call(call: &CallExpr, bindings: &Bindings) -> Result<Value, EvalError> {
    match call.func.as_str() {
        "dynamic" => Err(EvalError::Dynamic),
        "named" => Err(EvalError::Type(
            "named() is only valid inside a directive".to_string(),
        )),
        "str" | "int" | "len" => {
            if !call.kwargs.is_empty() {
                return Err(EvalError::Type(format!(
                    "{}() takes no keyword arguments",
                    call.func
                )));
            }
            if call.args.len() != 1 {
                return Err(EvalError::Type(format!(
                    "{}() takes exactly one argument",
                    call.func
                )));
            }
            let value = eval_expr(&call.args[0], bindings)?;
            match call.func.as_str() {
                "str" => Ok(Value::Str(value.render())),
                "int" => match value {
                    Value::Int(n) => Ok(Value::Int(n)),
                    Value::Str(s) => s
                        .trim()
                        .parse::<i64>()
                        .map(Value::Int)
                        .map_err(|_| EvalError::Type(format!("invalid integer literal '{}'", s))),
                    other => Err(EvalError::Type(format!(
                        "cannot convert {} to integer",
                        other.type_name()
                    ))),
                },
                _ => match value {
                    Value::Str(s) => Ok(Value::Int(s.chars().count() as i64)),
                    Value::List(items) => Ok(Value::Int(items.len() as i64)),
                    Value::Map(entries) => Ok(Value::Int(entries.len() as i64)),
                    other => Err(EvalError::Type(format!(
                        "object of type {} has no length",
                        other.type_name()
                    ))),
                },
            }
        }
        other => Err(EvalError::Unknown(other.to_string())),
    }
}

/// Expand `${expr}` segments (or the bindings' sigil pair) inside a string.
pub fn interpolate(text: &str, bindings: &Bindings) -> Result<String, EvalError> {
    let (left, right) = bindings.sigil();
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(pos) = rest.find(left) {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + left.len()..];
        let mut depth = 1usize;
        let mut idx = 0usize;
        let mut end = None;
        while idx < after.len() {
            if after[idx..].starts_with(left) {
                depth += 1;
                idx += left.len();
            } else if after[idx..].starts_with(right) {
                depth -= 1;
                if depth == 0 {
                    end = Some(idx);
                    break;
                }
                idx += right.len();
            } else {
                idx += after[idx..].chars().next().map_or(1, |c| c.len_utf8());
            }
        }
        let end = end.ok_or_else(|| {
            EvalError::Syntax(format!("unterminated interpolation in '{}'", text))
        })?;
        let inner = &after[..end];
        let value = eval_expr(&parse_expression(inner)?, bindings)?;
        out.push_str(&value.render());
        rest = &after[end + right.len()..];
    }
    out.push_str(rest);
    Ok(out)
}

/// The engine's default evaluator, shared by the parser and the driver.
#[derive(Debug, Clone, Copy, Default)]
pub struct DslEvaluator;

impl Evaluator for DslEvaluator {
    fn compile(&self, text: &str, mode: CompileMode) -> bool {
        match mode {
            CompileMode::Expression => parse_expression(text).is_ok(),
            CompileMode::Directive => parse_directive(text).is_ok(),
            CompileMode::Statements => statements_complete(text),
        }
    }

    fn eval(&self, text: &str, bindings: &Bindings) -> Result<Value, EvalError> {
        eval_expr(&parse_expression(text)?, bindings)
    }
}
