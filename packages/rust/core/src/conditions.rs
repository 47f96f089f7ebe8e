//! Safe gating-condition DSL.
//!
//! Conditions are a tagged tree (leaf comparison, or `all` / `any` / `not`)
//! parsed from declarative JSON/TOML and interpreted by a total evaluator.
//! Structural mistakes fail at parse time; missing data at evaluation time
//! never fails, it just makes the leaf false.
//!
//! ```json
//! { "all": [
//!     { "path": "features.has_geo_intent", "op": "eq", "value": true },
//!     { "not": { "path": "context.candidates_count", "op": "gt", "value": 0 } }
//! ] }
//! ```

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde_json::{Map, Value, json};

use ingestkit_features::QueryFeatures;
use ingestkit_shared::{IngestError, IngestRequest, Result};

use crate::context::ExecutionContext;

// ---------------------------------------------------------------------------
// Tree
// ---------------------------------------------------------------------------

/// Leaf operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    /// Substring, array element, or object key.
    Contains,
    /// Operand is one of the listed values.
    In,
    /// Operand (scalar or list) intersects the listed values.
    AnyOf,
    /// Operand is present and not null.
    Exists,
}

impl CompareOp {
    fn parse(op: &str) -> Option<Self> {
        Some(match op {
            "eq" | "==" => Self::Eq,
            "ne" | "!=" => Self::Ne,
            "gt" | ">" => Self::Gt,
            "gte" | ">=" => Self::Gte,
            "lt" | "<" => Self::Lt,
            "lte" | "<=" => Self::Lte,
            "contains" => Self::Contains,
            "in" => Self::In,
            "any_of" => Self::AnyOf,
            "exists" => Self::Exists,
            _ => return None,
        })
    }

    fn is_ordering(self) -> bool {
        matches!(self, Self::Gt | Self::Gte | Self::Lt | Self::Lte)
    }
}

/// A validated condition tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Leaf {
        path: String,
        op: CompareOp,
        /// `Null` only for [`CompareOp::Exists`].
        value: Value,
    },
    All(Vec<Condition>),
    Any(Vec<Condition>),
    Not(Box<Condition>),
}

impl Condition {
    /// Build and validate a condition from its declarative form.
    pub fn parse(raw: &Value) -> Result<Self> {
        parse_node(raw, "$")
    }

    /// Evaluate against an [`EvalContext`]. Never fails.
    pub fn evaluate(&self, ctx: &EvalContext) -> bool {
        match self {
            Self::All(children) => children.iter().all(|c| c.evaluate(ctx)),
            Self::Any(children) => children.iter().any(|c| c.evaluate(ctx)),
            Self::Not(inner) => !inner.evaluate(ctx),
            Self::Leaf { path, op, value } => match ctx.resolve(path) {
                Some(actual) => eval_leaf(actual, *op, value),
                None => false,
            },
        }
    }
}

fn parse_node(raw: &Value, at: &str) -> Result<Condition> {
    let obj = raw
        .as_object()
        .ok_or_else(|| IngestError::condition(format!("{at}: condition must be a table/object")))?;

    for composite in ["all", "any", "not"] {
        if let Some(inner) = obj.get(composite) {
            if obj.len() != 1 {
                return Err(IngestError::condition(format!(
                    "{at}: '{composite}' cannot be combined with other keys"
                )));
            }
            return parse_composite(composite, inner, at);
        }
    }

    parse_leaf(obj, at)
}

fn parse_composite(kind: &str, inner: &Value, at: &str) -> Result<Condition> {
    if kind == "not" {
        if !inner.is_object() {
            return Err(IngestError::condition(format!(
                "{at}: 'not' takes exactly one condition"
            )));
        }
        return Ok(Condition::Not(Box::new(parse_node(inner, &format!("{at}.not"))?)));
    }

    let items = inner
        .as_array()
        .filter(|items| !items.is_empty())
        .ok_or_else(|| {
            IngestError::condition(format!("{at}: '{kind}' takes a non-empty list of conditions"))
        })?;

    let children = items
        .iter()
        .enumerate()
        .map(|(i, item)| parse_node(item, &format!("{at}.{kind}[{i}]")))
        .collect::<Result<Vec<_>>>()?;

    Ok(if kind == "all" {
        Condition::All(children)
    } else {
        Condition::Any(children)
    })
}

fn parse_leaf(obj: &Map<String, Value>, at: &str) -> Result<Condition> {
    if let Some(unknown) = obj.keys().find(|k| !matches!(k.as_str(), "path" | "op" | "value")) {
        return Err(IngestError::condition(format!("{at}: unknown key '{unknown}'")));
    }

    let path = obj
        .get("path")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .ok_or_else(|| IngestError::condition(format!("{at}: leaf condition needs a 'path'")))?;

    let op_name = obj
        .get("op")
        .and_then(Value::as_str)
        .ok_or_else(|| IngestError::condition(format!("{at}: leaf condition needs an 'op'")))?;
    let op = CompareOp::parse(op_name)
        .ok_or_else(|| IngestError::condition(format!("{at}: unknown operator '{op_name}'")))?;

    let value = obj.get("value").cloned();
    let value = match (op, value) {
        (CompareOp::Exists, None) => Value::Null,
        (CompareOp::Exists, Some(_)) => {
            return Err(IngestError::condition(format!("{at}: 'exists' takes no value")));
        }
        (_, None) | (_, Some(Value::Null)) => {
            return Err(IngestError::condition(format!(
                "{at}: '{op_name}' needs a non-null value (use 'exists' to test presence)"
            )));
        }
        (CompareOp::In | CompareOp::AnyOf, Some(v)) if !v.is_array() => {
            return Err(IngestError::condition(format!("{at}: '{op_name}' needs a list value")));
        }
        (op, Some(v)) if op.is_ordering() && !(v.is_number() || v.is_string()) => {
            return Err(IngestError::condition(format!(
                "{at}: '{op_name}' needs a number or string value"
            )));
        }
        (_, Some(v)) => v,
    };

    Ok(Condition::Leaf {
        path: path.to_string(),
        op,
        value,
    })
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

fn eval_leaf(actual: &Value, op: CompareOp, expected: &Value) -> bool {
    match op {
        CompareOp::Exists => true,
        CompareOp::Eq => values_equal(actual, expected),
        CompareOp::Ne => !values_equal(actual, expected),
        CompareOp::Gt => compare(actual, expected) == Some(Ordering::Greater),
        CompareOp::Gte => matches!(
            compare(actual, expected),
            Some(Ordering::Greater | Ordering::Equal)
        ),
        CompareOp::Lt => compare(actual, expected) == Some(Ordering::Less),
        CompareOp::Lte => matches!(
            compare(actual, expected),
            Some(Ordering::Less | Ordering::Equal)
        ),
        CompareOp::Contains => match actual {
            Value::String(s) => expected.as_str().is_some_and(|needle| s.contains(needle)),
            Value::Array(items) => items.iter().any(|item| values_equal(item, expected)),
            Value::Object(map) => expected.as_str().is_some_and(|k| map.contains_key(k)),
            _ => false,
        },
        CompareOp::In => expected
            .as_array()
            .is_some_and(|list| list.iter().any(|item| values_equal(actual, item))),
        CompareOp::AnyOf => {
            let Some(list) = expected.as_array() else {
                return false;
            };
            match actual {
                Value::Array(items) => items
                    .iter()
                    .any(|a| list.iter().any(|b| values_equal(a, b))),
                scalar => list.iter().any(|b| values_equal(scalar, b)),
            }
        }
    }
}

/// Numbers compare by value (`1 == 1.0`); everything else structurally.
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

/// Ordering between two numbers or two strings; anything else is unordered.
fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(_), Value::Number(_)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// EvalContext
// ---------------------------------------------------------------------------

/// The only data a condition can read.
#[derive(Debug, Clone)]
pub struct EvalContext {
    root: Value,
}

impl EvalContext {
    /// Assemble the evaluation context from the request, query features,
    /// live execution context, and caller-precomputed flags.
    ///
    /// This is the sole constructor.
    pub fn build(
        request: &IngestRequest,
        features: &QueryFeatures,
        context: &ExecutionContext,
        flags: &BTreeMap<String, bool>,
    ) -> Self {
        let root = json!({
            "request": serde_json::to_value(request).unwrap_or_default(),
            "features": serde_json::to_value(features).unwrap_or_default(),
            "context": {
                "candidates_count": context.candidates().len(),
                "entities_count": context.entity_count(),
                "evidence_count": context.evidence().len(),
                "seeds_count": context.seeds().len(),
                "errors_count": context.errors().len(),
                "budget_spent_usd": context.budget_spent_usd(),
                "confidence": context.confidence(),
                "seeds": context.seeds(),
                "fields": context.fields(),
            },
            "flags": flags,
        });
        Self { root }
    }

    /// Resolve a dotted path. Missing segments and JSON null both yield `None`.
    pub fn resolve(&self, path: &str) -> Option<&Value> {
        path.split('.')
            .try_fold(&self.root, |node, segment| node.as_object()?.get(segment))
            .filter(|v| !v.is_null())
    }

    #[cfg(test)]
    pub(crate) fn from_value(root: Value) -> Self {
        Self { root }
    }
}
