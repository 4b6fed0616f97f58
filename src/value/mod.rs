//! # Value Type System
//!
//! Scalar values stored in tables, bound as parameters and returned in rows.
//!
//! ## Design Decisions
//!
//! - **Total ordering**: `Ord` is total across types so rows can be sorted
//!   deterministically (`Null < Bool < Int64 < Float64 < String`)
//! - **SQL comparison**: [`Value::sql_cmp`] is the three-valued comparison used
//!   by predicates; any comparison involving `Null` is unknown
//! - **Labelled rows**: a [`Row`] carries the labels it was selected under, so
//!   `users_id` and `id` both resolve when statements render labels

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// A single scalar value
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int64(i64),
    Float64(f64),
    String(String),
}

impl Value {
    /// Create a string value
    pub fn string(s: &str) -> Self {
        Value::String(s.to_string())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int64(v) => Some(*v as f64),
            Value::Float64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Three-valued comparison: `None` when either side is null or the
    /// types are not comparable. Integers and floats compare numerically.
    pub fn sql_cmp(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Null, _) | (_, Value::Null) => None,
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::Int64(a), Value::Int64(b)) => Some(a.cmp(b)),
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            (Value::Int64(_) | Value::Float64(_), Value::Int64(_) | Value::Float64(_)) => {
                let (a, b) = (self.as_f64()?, other.as_f64()?);
                a.partial_cmp(&b)
            }
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int64(v) => write!(f, "{v}"),
            Value::Float64(v) => write!(f, "{v}"),
            Value::String(s) => write!(f, "'{s}'"),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int64(a), Value::Int64(b)) => a == b,
            // Bitwise so that Eq and Hash agree
            (Value::Float64(a), Value::Float64(b)) => a.to_bits() == b.to_bits(),
            (Value::String(a), Value::String(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Null => {}
            Value::Bool(b) => b.hash(state),
            Value::Int64(v) => v.hash(state),
            Value::Float64(v) => v.to_bits().hash(state),
            Value::String(s) => s.hash(state),
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Int64(a), Value::Int64(b)) => a.cmp(b),
            (Value::Float64(a), Value::Float64(b)) => a.total_cmp(b),
            (Value::String(a), Value::String(b)) => a.cmp(b),
            // Cross-type ordering: Null < Bool < Int64 < Float64 < String
            (Value::Null, _) => Ordering::Less,
            (_, Value::Null) => Ordering::Greater,
            (Value::Bool(_), _) => Ordering::Less,
            (_, Value::Bool(_)) => Ordering::Greater,
            (Value::Int64(_), _) => Ordering::Less,
            (_, Value::Int64(_)) => Ordering::Greater,
            (Value::Float64(_), _) => Ordering::Less,
            (_, Value::Float64(_)) => Ordering::Greater,
        }
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int64(i64::from(v))
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int64(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float64(v)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

/// Label of one selected column
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ColumnLabel {
    pub table: String,
    pub column: String,
    /// Name the column was rendered under (`users_id` when labels are on)
    pub label: String,
}

impl ColumnLabel {
    pub fn new(table: &str, column: &str, use_labels: bool) -> Self {
        let label = if use_labels {
            format!("{table}_{column}")
        } else {
            column.to_string()
        };
        ColumnLabel {
            table: table.to_string(),
            column: column.to_string(),
            label,
        }
    }
}

/// A result row: values plus the labels they were selected under.
///
/// Equality only considers the values.
#[derive(Debug, Clone)]
pub struct Row {
    labels: Arc<[ColumnLabel]>,
    values: Vec<Value>,
}

impl Row {
    pub fn new(labels: Arc<[ColumnLabel]>, values: Vec<Value>) -> Self {
        debug_assert_eq!(labels.len(), values.len());
        Row { labels, values }
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    pub fn labels(&self) -> &[ColumnLabel] {
        &self.labels
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get_index(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Look up a value by rendered label, falling back to the bare column name
    pub fn get(&self, key: &str) -> Option<&Value> {
        let pos = self
            .labels
            .iter()
            .position(|l| l.label == key)
            .or_else(|| self.labels.iter().position(|l| l.column == key))?;
        self.values.get(pos)
    }

    /// Replace the value under `column`; returns false when the column is absent
    pub fn set(&mut self, column: &str, value: Value) -> bool {
        match self.labels.iter().position(|l| l.column == column) {
            Some(pos) => {
                self.values[pos] = value;
                true
            }
            None => false,
        }
    }
}

impl PartialEq for Row {
    fn eq(&self, other: &Self) -> bool {
        self.values == other.values
    }
}

impl Eq for Row {}

impl fmt::Display for Row {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, v) in self.values.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{v}")?;
        }
        write!(f, ")")
    }
}

/// Bound parameter values, keyed by bind name. Later inserts win.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params(HashMap<String, Value>);

impl Params {
    pub fn new() -> Self {
        Params(HashMap::new())
    }

    /// Builder-style insert
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: &str, value: impl Into<Value>) {
        self.0.insert(key.to_string(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn extend(&mut self, other: &Params) {
        for (k, v) in &other.0 {
            self.0.insert(k.clone(), v.clone());
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// True when any bound value is null
    pub fn has_null(&self) -> bool {
        self.0.values().any(Value::is_null)
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Params {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Params(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}
