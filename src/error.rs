//! Engine-wide error types.
//!
//! Every layer returns a `Result` with its own error enum; conversion to a
//! wire response happens at the outer boundary, never inside the engine.
//! Internal invariant violations are logged with their location and abort the
//! query, not the process.

use std::io;
use thiserror::Error;

/// Errors raised while parsing, rewriting, compiling or evaluating a query.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueryError {
    /// Malformed query JSON: unknown node type, missing field, bad value.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// A predicate references a column, sequence or position that does not
    /// exist in the schema, or has the wrong type for the operation.
    #[error("invalid reference: {0}")]
    InvalidReference(String),

    /// The query deadline expired during evaluation.
    #[error("query exceeded its deadline after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    /// Invariant violation. A bug in the engine, never a user error.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type for the query layers.
pub type QueryResult<T> = Result<T, QueryError>;

/// Errors raised while appending a single row to a partition.
///
/// An append error aborts the offending row; the partition is left exactly
/// as it was before the call.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AppendError {
    /// An aligned sequence did not match the reference length.
    #[error("sequence '{sequence_name}' has length {actual}, reference length is {expected}")]
    BadLength {
        sequence_name: String,
        expected: usize,
        actual: usize,
    },

    /// A character outside the alphabet appeared in an aligned sequence.
    #[error("illegal symbol '{symbol}' at position {position} of sequence '{sequence_name}'")]
    IllegalSymbol {
        sequence_name: String,
        symbol: char,
        position: usize,
    },

    /// The primary key was already inserted into some partition.
    #[error("duplicate primary key: '{0}'")]
    DuplicatePrimaryKey(String),

    /// The input line does not have the JSON shape the schema expects.
    #[error("malformed input row: {0}")]
    JsonShape(String),
}

/// Result type for the append path.
pub type AppendResult<T> = Result<T, AppendError>;

/// Errors raised while building auxiliary structures from definition files.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PreprocessingError {
    /// The lineage definition file is inconsistent.
    #[error("invalid lineage definition: {0}")]
    InvalidLineageDefinition(String),

    /// The lineage graph contains a cycle; the path names the offending nodes.
    #[error("lineage definition contains a cycle: {}", .0.join(" -> "))]
    LineageCycle(Vec<String>),

    /// A phylogenetic tree file could not be parsed.
    #[error("invalid phylogenetic tree '{path}': {reason}")]
    InvalidPhyloTree { path: String, reason: String },
}

/// Result type for preprocessing.
pub type PreprocessingResult<T> = Result<T, PreprocessingError>;

/// Errors raised while saving or loading a data version directory.
#[derive(Error, Debug)]
pub enum StorageError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Binary encoding error
    #[error("serialization error: {0}")]
    Encoding(#[from] bincode::Error),

    /// YAML schema error
    #[error("schema error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// The on-disk serialization version does not match this binary.
    #[error("incompatible serialization version {found}, this binary reads version {expected}")]
    IncompatibleVersion { expected: u32, found: u32 },

    /// A data directory failed validation (missing marker, timestamp mismatch).
    #[error("invalid data directory '{path}': {reason}")]
    InvalidDataDirectory { path: String, reason: String },

    /// Structural corruption detected while loading.
    #[error("corrupt data: {0}")]
    Corrupt(String),
}

/// Result type for persistence.
pub type StorageResult<T> = Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_error_messages_name_the_offending_input() {
        let err = AppendError::IllegalSymbol {
            sequence_name: "main".to_string(),
            symbol: '?',
            position: 17,
        };
        assert!(err.to_string().contains('?'));
        assert!(err.to_string().contains("17"));
    }

    #[test]
    fn lineage_cycle_renders_as_path() {
        let err = PreprocessingError::LineageCycle(vec![
            "A".to_string(),
            "B".to_string(),
            "A".to_string(),
        ]);
        assert_eq!(
            err.to_string(),
            "lineage definition contains a cycle: A -> B -> A"
        );
    }
}
