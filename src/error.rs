//! Error Types
//!
//! One taxonomy for the whole crate. The baked layer never swallows or
//! retries: every variant surfaces directly to the caller.

use thiserror::Error;

/// Errors raised while building, compiling or executing queries
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BakeryError {
    /// Zero rows where exactly one was required
    #[error("No row was found for {0}")]
    NoResultFound(String),

    /// More than one row where at most one was expected
    #[error("Multiple rows were found for {0}")]
    MultipleResultsFound(String),

    /// Malformed arguments passed to a parameter merge
    #[error("Argument error: {0}")]
    ArgumentError(String),

    /// The requested operation cannot be performed without live SQL
    #[error("Not implemented: {0}")]
    NotImplemented(String),

    /// Entity name not present in the mapper registry
    #[error("Unknown entity: {0}")]
    UnknownEntity(String),

    /// Relationship key not configured on the entity
    #[error("Entity '{entity}' has no relationship '{key}'")]
    UnknownRelationship { entity: String, key: String },

    /// Table not present in storage
    #[error("Unknown table: {0}")]
    UnknownTable(String),

    /// Column not present on the referenced table
    #[error("Table '{table}' has no column '{column}'")]
    UnknownColumn { table: String, column: String },

    /// Bind parameter referenced by the statement but never supplied
    #[error("A value is required for bind parameter '{0}'")]
    UnboundParameter(String),

    /// Query shape the compiler or executor cannot handle
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// Mapper or strategy configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// Result type for bakery operations
pub type BakeryResult<T> = Result<T, BakeryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = BakeryError::NoResultFound("one()".to_string());
        assert_eq!(format!("{err}"), "No row was found for one()");

        let err = BakeryError::UnknownColumn {
            table: "users".to_string(),
            column: "email".to_string(),
        };
        assert_eq!(format!("{err}"), "Table 'users' has no column 'email'");

        let err = BakeryError::UnboundParameter("name".to_string());
        assert_eq!(
            format!("{err}"),
            "A value is required for bind parameter 'name'"
        );
    }
}
