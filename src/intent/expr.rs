//! Sandboxed precondition expressions.
//!
//! Failure conditions and success actions are written in the catalog as a
//! small tagged expression AST rather than free-form code. The evaluator
//! resolves paths only against the sandbox roots (`pre_json`, `fields`,
//! `preconditions`); no ambient process state is reachable.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Expression AST: comparisons, boolean logic, and path lookups.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expr {
    /// Literal JSON value.
    Value(Value),
    /// Dotted path into the sandbox, e.g. `pre_json.calendars.busy[0].start`.
    Path(String),
    /// Path resolves to a non-null value.
    Exists(String),
    All(Vec<Expr>),
    Any(Vec<Expr>),
    Not(Box<Expr>),
    Eq(Box<Expr>, Box<Expr>),
    Ne(Box<Expr>, Box<Expr>),
    Gt(Box<Expr>, Box<Expr>),
    Gte(Box<Expr>, Box<Expr>),
    Lt(Box<Expr>, Box<Expr>),
    Lte(Box<Expr>, Box<Expr>),
    /// Left stringified contains right stringified.
    Contains(Box<Expr>, Box<Expr>),
}

/// Evaluation context exposing exactly the three sandbox roots.
#[derive(Debug, Clone, Copy)]
pub struct Sandbox<'a> {
    pub pre_json: &'a Value,
    pub fields: &'a Value,
    pub preconditions: &'a Value,
}

impl<'a> Sandbox<'a> {
    /// Resolve a dotted path. The first segment selects a sandbox root;
    /// anything else resolves to null.
    pub fn lookup(&self, path: &str) -> Value {
        let mut segments = PathSegments::new(path);
        let root = match segments.next() {
            Some(PathSegment::Key(root)) => match root.as_str() {
                "pre_json" => self.pre_json,
                "fields" => self.fields,
                "preconditions" => self.preconditions,
                _ => return Value::Null,
            },
            _ => return Value::Null,
        };

        let mut current = root;
        for segment in segments {
            current = match segment {
                PathSegment::Key(key) => match current.get(key.as_str()) {
                    Some(v) => v,
                    None => return Value::Null,
                },
                PathSegment::Index(i) => match current.get(i) {
                    Some(v) => v,
                    None => return Value::Null,
                },
            };
        }
        current.clone()
    }
}

impl Expr {
    /// Evaluate to a JSON value.
    pub fn eval(&self, sandbox: &Sandbox<'_>) -> Value {
        match self {
            Self::Value(v) => v.clone(),
            Self::Path(path) => sandbox.lookup(path),
            Self::Exists(path) => Value::Bool(!sandbox.lookup(path).is_null()),
            Self::All(exprs) => Value::Bool(exprs.iter().all(|e| e.eval_truthy(sandbox))),
            Self::Any(exprs) => Value::Bool(exprs.iter().any(|e| e.eval_truthy(sandbox))),
            Self::Not(expr) => Value::Bool(!expr.eval_truthy(sandbox)),
            Self::Eq(a, b) => Value::Bool(values_equal(&a.eval(sandbox), &b.eval(sandbox))),
            Self::Ne(a, b) => Value::Bool(!values_equal(&a.eval(sandbox), &b.eval(sandbox))),
            Self::Gt(a, b) => compare(&a.eval(sandbox), &b.eval(sandbox), |o| o > 0),
            Self::Gte(a, b) => compare(&a.eval(sandbox), &b.eval(sandbox), |o| o >= 0),
            Self::Lt(a, b) => compare(&a.eval(sandbox), &b.eval(sandbox), |o| o < 0),
            Self::Lte(a, b) => compare(&a.eval(sandbox), &b.eval(sandbox), |o| o <= 0),
            Self::Contains(a, b) => {
                let haystack = stringify(&a.eval(sandbox));
                let needle = stringify(&b.eval(sandbox));
                Value::Bool(haystack.contains(&needle))
            }
        }
    }

    /// Evaluate and coerce to a boolean (null / false / 0 / "" are falsy).
    pub fn eval_truthy(&self, sandbox: &Sandbox<'_>) -> bool {
        truthy(&self.eval(sandbox))
    }
}

/// Evaluate a success-action capture map into one JSON object.
pub fn eval_captures(captures: &BTreeMap<String, Expr>, sandbox: &Sandbox<'_>) -> Value {
    let mut object = serde_json::Map::new();
    for (key, expr) in captures {
        object.insert(key.clone(), expr.eval(sandbox));
    }
    Value::Object(object)
}

/// Truthiness for condition results: null, false, 0, and "" are falsy;
/// everything else (arrays and objects included) is truthy.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

fn compare(a: &Value, b: &Value, accept: impl Fn(i8) -> bool) -> Value {
    let ordering = match (a, b) {
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => x.partial_cmp(&y),
            _ => None,
        },
    };
    match ordering {
        Some(std::cmp::Ordering::Less) => Value::Bool(accept(-1)),
        Some(std::cmp::Ordering::Equal) => Value::Bool(accept(0)),
        Some(std::cmp::Ordering::Greater) => Value::Bool(accept(1)),
        None => Value::Bool(false),
    }
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Path parsing
// ---------------------------------------------------------------------------

enum PathSegment {
    Key(String),
    Index(usize),
}

struct PathSegments<'a> {
    rest: &'a str,
}

impl<'a> PathSegments<'a> {
    fn new(path: &'a str) -> Self {
        Self { rest: path.trim() }
    }
}

impl Iterator for PathSegments<'_> {
    type Item = PathSegment;

    fn next(&mut self) -> Option<Self::Item> {
        if self.rest.is_empty() {
            return None;
        }
        if let Some(stripped) = self.rest.strip_prefix('[') {
            let close = stripped.find(']')?;
            let index: usize = stripped[..close].trim().parse().ok()?;
            self.rest = stripped[close + 1..].trim_start_matches('.');
            return Some(PathSegment::Index(index));
        }
        let end = self
            .rest
            .find(|c| c == '.' || c == '[')
            .unwrap_or(self.rest.len());
        let key = &self.rest[..end];
        self.rest = self.rest[end..].trim_start_matches('.');
        Some(PathSegment::Key(key.to_string()))
    }
}
