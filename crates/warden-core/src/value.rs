//! The common currency the matcher evaluator passes between request fields,
//! policy fields, literals, and function calls.
//!
//! Per spec.md §9's design note on the dynamic function map: the matcher
//! can't know the native type of whatever a registered function returns, so
//! everything funnels through one small closed sum type instead of `dyn Any`.

use std::cmp::Ordering;

use serde_json::Value as JsonValue;

/// A value flowing through matcher evaluation.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// A string — the type every request/policy field starts life as.
    Str(String),
    /// A 64-bit signed integer literal or arithmetic result.
    Int(i64),
    /// A 64-bit float literal or arithmetic result.
    Float(f64),
    /// A boolean literal or comparison/logical result.
    Bool(bool),
    /// A list literal, as used on the right-hand side of `in`.
    List(Vec<Value>),
    /// A nested JSON object field, reachable only when
    /// `accept_json_request` is enabled and a request field is structured.
    Json(JsonValue),
}

impl Value {
    /// The matcher's final truthiness test (spec.md §4.5.2): only a
    /// `Bool` is a legal result for a whole matcher expression or a `&&`/`||`
    /// operand.
    ///
    /// # Errors
    ///
    /// Returns a human-readable type-error message when `self` isn't a bool.
    pub fn as_bool(&self) -> Result<bool, String> {
        match self {
            Value::Bool(b) => Ok(*b),
            other => Err(format!("expected boolean, got {}", other.type_name())),
        }
    }

    /// Coerce to `f64` for numeric operators; both operands of a numeric op
    /// must already be `Int` or `Float`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Render as a string the way `r.field`/`p.field` bindings always start
    /// out and the way built-in functions expect their arguments.
    #[must_use]
    pub fn as_str_lossy(&self) -> String {
        match self {
            Value::Str(s) => s.clone(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::Bool(b) => b.to_string(),
            Value::List(items) => {
                let rendered: Vec<String> = items.iter().map(Value::as_str_lossy).collect();
                format!("[{}]", rendered.join(", "))
            }
            Value::Json(v) => v.to_string(),
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            Value::Str(_) => "string",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Bool(_) => "bool",
            Value::List(_) => "list",
            Value::Json(_) => "json",
        }
    }

    /// Value-level equality used by `==`/`!=`. Numeric values compare by
    /// value across `Int`/`Float`; everything else compares structurally.
    #[must_use]
    pub fn value_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
                self.as_f64() == other.as_f64()
            }
            _ => self == other,
        }
    }

    /// Ordering for `<`/`<=`/`>`/`>=`. Numeric pairs compare numerically;
    /// string pairs compare lexicographically; anything else has no order.
    #[must_use]
    pub fn partial_cmp_value(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
                self.as_f64().and_then(|a| other.as_f64().and_then(|b| a.partial_cmp(&b)))
            }
            (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_owned())
    }
}
