//! Column default values applied to new, not-yet-flushed instances.

use crate::error::{BakeryError, BakeryResult};
use crate::value::Value;
use std::fmt;
use std::sync::Arc;

/// Default attached to a mapped column
#[derive(Clone)]
pub enum ColumnDefault {
    /// Fixed value
    Scalar(Value),
    /// Called once per new instance
    Callable(Arc<dyn Fn() -> Value + Send + Sync>),
    /// SQL expression evaluated by the database
    Sql(String),
    /// Named database sequence
    Sequence(String),
}

impl ColumnDefault {
    pub fn callable(f: impl Fn() -> Value + Send + Sync + 'static) -> Self {
        ColumnDefault::Callable(Arc::new(f))
    }

    /// Compute the default without touching the database.
    ///
    /// SQL-level defaults need a live statement and are rejected.
    pub fn pre_compute(&self) -> BakeryResult<Value> {
        match self {
            ColumnDefault::Scalar(v) => Ok(v.clone()),
            ColumnDefault::Callable(f) => Ok(f()),
            ColumnDefault::Sql(_) | ColumnDefault::Sequence(_) => Err(
                BakeryError::NotImplemented(
                    "Can't invoke pre-default for a SQL-level column default".to_string(),
                ),
            ),
        }
    }
}

impl fmt::Debug for ColumnDefault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnDefault::Scalar(v) => write!(f, "Scalar({v})"),
            ColumnDefault::Callable(_) => write!(f, "Callable(..)"),
            ColumnDefault::Sql(sql) => write!(f, "Sql({sql})"),
            ColumnDefault::Sequence(name) => write!(f, "Sequence({name})"),
        }
    }
}
