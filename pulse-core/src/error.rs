//! Error types for tabular data and identities

use thiserror::Error;

use crate::data::ColumnKind;

/// Errors raised while building data sets or parsing identities
#[derive(Debug, Error)]
pub enum DataError {
    /// Row arity does not match the column list
    #[error("DataSet has {expected} columns ({headers}), but new row has {actual} (values: {values})")]
    ColumnCountMismatch {
        expected: usize,
        actual: usize,
        headers: String,
        values: String,
    },

    /// A value does not fit its column
    #[error("Column '{column}' expects {expected} values, got {actual}")]
    TypeMismatch {
        column: String,
        expected: ColumnKind,
        actual: String,
    },

    /// Name cannot be used as a table or column identifier
    #[error("'{0}' is not a valid identifier")]
    InvalidIdentifier(String),

    /// Pipeline id is not of the form `org/slug`
    #[error("Invalid pipeline id '{0}', expected 'org/slug'")]
    InvalidPipelineId(String),
}
