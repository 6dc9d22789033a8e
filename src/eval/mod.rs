//! Expression evaluation seam.
//!
//! The engine never interprets expressions inline: the parser asks an
//! [`Evaluator`] whether an accumulated fragment is complete, and the binder
//! and DAG ask it for values. Both go through the same grammar so the parser
//! and the runtime cannot drift apart.

pub mod expr;

pub use self::expr::DslEvaluator;

use std::collections::{BTreeMap, HashMap};
use thiserror::Error;

/// Late-bound value produced by the evaluator.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Str(String),
    Int(i64),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Str(_) => "string",
            Value::Int(_) => "integer",
            Value::List(_) => "list",
            Value::Map(_) => "map",
        }
    }

    /// Render for string interpolation. Lists join with a single space,
    /// matching how target lists are spliced into action text.
    pub fn render(&self) -> String {
        match self {
            Value::Str(s) => s.clone(),
            Value::Int(n) => n.to_string(),
            Value::List(items) => items
                .iter()
                .map(Value::render)
                .collect::<Vec<_>>()
                .join(" "),
            Value::Map(entries) => {
                let body = entries
                    .iter()
                    .map(|(k, v)| format!("{}: {}", k, v.render()))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("{{{}}}", body)
            }
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::Str(s) => !s.is_empty(),
            Value::Int(n) => *n != 0,
            Value::List(items) => !items.is_empty(),
            Value::Map(entries) => !entries.is_empty(),
        }
    }
}

/// Default interpolation sigil: `${expr}`.
pub const DEFAULT_SIGIL: (&str, &str) = ("${", "}");

/// Symbol table handed to every evaluation, together with the sigil pair
/// used for string interpolation in the current section.
#[derive(Debug, Clone)]
pub struct Bindings {
    vars: HashMap<String, Value>,
    sigil: (String, String),
}

impl Default for Bindings {
    fn default() -> Self {
        Self::new()
    }
}

impl Bindings {
    pub fn new() -> Self {
        Self {
            vars: HashMap::new(),
            sigil: (DEFAULT_SIGIL.0.to_string(), DEFAULT_SIGIL.1.to_string()),
        }
    }

    pub fn with_sigil(mut self, left: impl Into<String>, right: impl Into<String>) -> Self {
        self.sigil = (left.into(), right.into());
        self
    }

    pub fn set_sigil(&mut self, left: impl Into<String>, right: impl Into<String>) {
        self.sigil = (left.into(), right.into());
    }

    pub fn sigil(&self) -> (&str, &str) {
        (&self.sigil.0, &self.sigil.1)
    }

    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.vars.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.vars.contains_key(name)
    }
}

/// What grammar a fragment must satisfy to be considered complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompileMode {
    /// A single expression, e.g. an assignment's right-hand side.
    Expression,
    /// A directive body: positional values plus keyword options, i.e. the
    /// argument list of a call.
    Directive,
    /// A block of opaque action statements.
    Statements,
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum EvalError {
    #[error("syntax error: {0}")]
    Syntax(String),

    #[error("name '{0}' is not defined")]
    Unknown(String),

    #[error("{0}")]
    Type(String),

    /// A `dynamic(...)` marker was reached: the value cannot be known
    /// until earlier steps have run.
    #[error("value cannot be determined before execution")]
    Dynamic,
}

/// The evaluation seam consumed by the parser and the driver.
pub trait Evaluator: Send + Sync {
    /// True iff `text` is a complete fragment under `mode`.
    fn compile(&self, text: &str, mode: CompileMode) -> bool;

    /// Evaluate `text` as a single expression.
    fn eval(&self, text: &str, bindings: &Bindings) -> Result<Value, EvalError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_render() {
        assert_eq!(Value::Str("a.txt".into()).render(), "a.txt");
        assert_eq!(Value::Int(42).render(), "42");
        assert_eq!(
            Value::List(vec![Value::Str("a".into()), Value::Str("b".into())]).render(),
            "a b"
        );
    }

    #[test]
    fn test_value_truthy() {
        assert!(Value::Int(1).truthy());
        assert!(!Value::Int(0).truthy());
        assert!(!Value::Str(String::new()).truthy());
        assert!(Value::List(vec![Value::Int(0)]).truthy());
    }

    #[test]
    fn test_bindings_sigil_override() {
        let b = Bindings::new().with_sigil("[", "]");
        assert_eq!(b.sigil(), ("[", "]"));
    }
}
