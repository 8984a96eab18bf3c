//! Metadata filters for retrieval.
//!
//! A [`MetadataFilter`] is a conjunction of predicates over flat metadata
//! keys. A unit that lacks a filtered key never matches, so filtering on an
//! unknown key yields an empty result rather than an error.
//!
//! Filters come from two syntaxes:
//!
//! - CLI: `type=image`, `page>=2`, `start_ts<00:01:00`
//! - JSON `where` objects: `{"type": "image"}`, `{"page": {"$gte": 2, "$lt": 5}}`,
//!   optionally wrapped as `{"$and": [{...}, {...}]}`

use serde::Deserialize;
use std::cmp::Ordering;

use crate::error::{IndexError, Result};
use crate::models::{MetaValue, Metadata, UnitKind};

#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Eq(MetaValue),
    Gt(MetaValue),
    Gte(MetaValue),
    Lt(MetaValue),
    Lte(MetaValue),
}

impl Predicate {
    pub fn matches(&self, value: &MetaValue) -> bool {
        match self {
            Predicate::Eq(expected) => values_equal(value, expected),
            Predicate::Gt(bound) => compare(value, bound) == Some(Ordering::Greater),
            Predicate::Gte(bound) => matches!(
                compare(value, bound),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            Predicate::Lt(bound) => compare(value, bound) == Some(Ordering::Less),
            Predicate::Lte(bound) => {
                matches!(compare(value, bound), Some(Ordering::Less | Ordering::Equal))
            }
        }
    }
}

/// Strings compare exactly. A string and a number are equal when the string
/// parses to the same number, so `page=2` matches a stored `2`.
fn values_equal(a: &MetaValue, b: &MetaValue) -> bool {
    match (a, b) {
        (MetaValue::Str(x), MetaValue::Str(y)) => x == y,
        (MetaValue::Str(s), n) | (n, MetaValue::Str(s)) => s
            .trim()
            .parse::<f64>()
            .ok()
            .zip(n.as_f64())
            .is_some_and(|(x, y)| x == y),
        _ => compare(a, b) == Some(Ordering::Equal),
    }
}

/// Ordering for range predicates: numeric for numbers, lexicographic for
/// strings (so `HH:MM:SS` timestamps order correctly), none when mixed.
fn compare(a: &MetaValue, b: &MetaValue) -> Option<Ordering> {
    match (a, b) {
        (MetaValue::Str(x), MetaValue::Str(y)) => Some(x.cmp(y)),
        _ => a.as_f64()?.partial_cmp(&b.as_f64()?),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(try_from = "serde_json::Value")]
pub struct MetadataFilter {
    conditions: Vec<(String, Predicate)>,
}

impl MetadataFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, predicate: Predicate) -> Self {
        self.conditions.push((key.into(), predicate));
        self
    }

    pub fn eq(self, key: impl Into<String>, value: impl Into<MetaValue>) -> Self {
        self.with(key, Predicate::Eq(value.into()))
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn conditions(&self) -> &[(String, Predicate)] {
        &self.conditions
    }

    pub fn matches(&self, metadata: &Metadata) -> bool {
        self.conditions.iter().all(|(key, predicate)| {
            metadata
                .get(key)
                .map(|value| predicate.matches(value))
                .unwrap_or(false)
        })
    }

    /// The unit type pinned by an equality on `type`, if any. `Some(None)`
    /// means the filter names a type that does not exist.
    pub fn kind_eq(&self) -> Option<Option<UnitKind>> {
        self.string_eq("type").map(UnitKind::parse)
    }

    /// The source file pinned by an equality on `source_file`, if any.
    pub fn source_file_eq(&self) -> Option<&str> {
        self.string_eq("source_file")
    }

    fn string_eq(&self, key: &str) -> Option<&str> {
        self.conditions.iter().find_map(|(k, p)| match p {
            Predicate::Eq(MetaValue::Str(s)) if k == key => Some(s.as_str()),
            _ => None,
        })
    }

    /// Parses CLI expressions such as `type=image` or `page>=2`.
    pub fn parse_cli<S: AsRef<str>>(exprs: &[S]) -> Result<Self> {
        let mut filter = Self::new();
        for expr in exprs {
            let (key, predicate) = parse_cli_expr(expr.as_ref())?;
            filter.conditions.push((key, predicate));
        }
        Ok(filter)
    }

    /// Parses a JSON `where` object.
    pub fn from_json(value: &serde_json::Value) -> Result<Self> {
        let mut filter = Self::new();
        collect_json(value, &mut filter.conditions)?;
        Ok(filter)
    }
}

impl TryFrom<serde_json::Value> for MetadataFilter {
    type Error = IndexError;

    fn try_from(value: serde_json::Value) -> Result<Self> {
        MetadataFilter::from_json(&value)
    }
}

fn parse_cli_expr(expr: &str) -> Result<(String, Predicate)> {
    let invalid = || {
        IndexError::InvalidQuery(format!(
            "filter '{}' must look like key=value, key>=value, key<value, ...",
            expr
        ))
    };
    let op_at = expr.find(['<', '>', '=']).ok_or_else(invalid)?;
    let key = expr[..op_at].trim();
    let rest = &expr[op_at..];

    let (op, value) = [">=", "<=", "==", ">", "<", "="]
        .iter()
        .find_map(|op| rest.strip_prefix(op).map(|v| (*op, v.trim())))
        .ok_or_else(invalid)?;
    if key.is_empty() || value.is_empty() {
        return Err(invalid());
    }

    // Equality keeps the text as typed; `values_equal` handles numbers.
    let predicate = match op {
        ">=" => Predicate::Gte(parse_cli_value(value)),
        "<=" => Predicate::Lte(parse_cli_value(value)),
        ">" => Predicate::Gt(parse_cli_value(value)),
        "<" => Predicate::Lt(parse_cli_value(value)),
        _ => Predicate::Eq(MetaValue::Str(value.to_string())),
    };
    Ok((key.to_string(), predicate))
}

fn parse_cli_value(raw: &str) -> MetaValue {
    if let Ok(i) = raw.parse::<i64>() {
        return MetaValue::Int(i);
    }
    match raw.parse::<f64>() {
        Ok(f) if f.is_finite() => MetaValue::Float(f),
        _ => MetaValue::Str(raw.to_string()),
    }
}

fn json_scalar(key: &str, value: &serde_json::Value) -> Result<MetaValue> {
    match value {
        serde_json::Value::String(s) => Ok(MetaValue::Str(s.clone())),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Ok(MetaValue::Int(i)),
            None => n.as_f64().map(MetaValue::Float).ok_or_else(|| {
                IndexError::InvalidQuery(format!("'{}': number out of range", key))
            }),
        },
        other => Err(IndexError::InvalidQuery(format!(
            "'{}': expected a string or number, got {}",
            key, other
        ))),
    }
}

fn collect_json(value: &serde_json::Value, out: &mut Vec<(String, Predicate)>) -> Result<()> {
    let object = match value {
        serde_json::Value::Object(map) => map,
        serde_json::Value::Null => return Ok(()),
        other => {
            return Err(IndexError::InvalidQuery(format!(
                "where must be an object, got {}",
                other
            )))
        }
    };

    for (key, cond) in object {
        if key == "$and" {
            let parts = cond.as_array().ok_or_else(|| {
                IndexError::InvalidQuery("$and expects an array of objects".to_string())
            })?;
            for part in parts {
                collect_json(part, out)?;
            }
            continue;
        }
        if key.starts_with('$') {
            return Err(IndexError::InvalidQuery(format!(
                "unsupported operator '{}'",
                key
            )));
        }

        match cond {
            serde_json::Value::Object(ops) => {
                if ops.is_empty() {
                    return Err(IndexError::InvalidQuery(format!(
                        "'{}': empty condition",
                        key
                    )));
                }
                for (op, operand) in ops {
                    let operand = json_scalar(key, operand)?;
                    let predicate = match op.as_str() {
                        "$eq" => Predicate::Eq(operand),
                        "$gt" => Predicate::Gt(operand),
                        "$gte" => Predicate::Gte(operand),
                        "$lt" => Predicate::Lt(operand),
                        "$lte" => Predicate::Lte(operand),
                        other => {
                            return Err(IndexError::InvalidQuery(format!(
                                "'{}': unsupported operator '{}'",
                                key, other
                            )))
                        }
                    };
                    out.push((key.clone(), predicate));
                }
            }
            scalar => out.push((key.clone(), Predicate::Eq(json_scalar(key, scalar)?))),
        }
    }
    Ok(())
}
