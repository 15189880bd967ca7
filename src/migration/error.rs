//! Migration error types
//!
//! Errors are grouped by the layer that detects them:
//! - [`GraphError`] - structural integrity of the revision set
//! - [`ExecutorError`] - translation/execution of a single operation
//! - [`RunnerError`] - orchestration of an upgrade or downgrade
//! - [`LoadError`] / [`AuthoringError`] - revision files on disk

use crate::backend::BackendError;
use crate::migration::revision::RevisionId;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

fn join_ids(ids: &[RevisionId]) -> String {
    ids.iter()
        .map(RevisionId::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

fn at_operation(index: &Option<usize>) -> String {
    match index {
        Some(i) => format!(" at operation {i}"),
        None => " while recording the version".to_string(),
    }
}

/// Structural problems in a revision set
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("revision graph contains a cycle through revision {0}")]
    Cycle(RevisionId),

    #[error("revision graph has multiple roots: {}", join_ids(.0))]
    MultipleRoots(Vec<RevisionId>),

    #[error("revision {revision} references missing parent {parent}")]
    OrphanParent {
        revision: RevisionId,
        parent: RevisionId,
    },

    #[error("unknown revision: {0}")]
    UnknownRevision(String),

    #[error("revision id {0} is declared more than once")]
    DuplicateRevision(RevisionId),

    #[error("ambiguous head, multiple leaf revisions: {}", join_ids(.0))]
    MultipleHeads(Vec<RevisionId>),

    #[error("revisions {from} and {to} are on divergent branches")]
    Divergent { from: String, to: String },
}

/// Failure translating or executing one operation
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("constraint on table {table} has no name and could not be dropped later")]
    UnnamedConstraint { table: String },

    #[error("destructive operation rejected in strict mode: {operation} ({reason})")]
    DestructiveOperationRejected { operation: String, reason: String },

    #[error("backend failure: {0}")]
    BackendFailure(#[from] BackendError),
}

/// Failure orchestrating an upgrade or downgrade
#[derive(Debug, Error)]
pub enum RunnerError {
    /// One revision step failed and was rolled back
    #[error("revision {revision} failed{}: {cause}", at_operation(.operation_index))]
    StepFailed {
        revision: RevisionId,
        /// Declaration index in `operations_up`/`operations_down`
        operation_index: Option<usize>,
        #[source]
        cause: ExecutorError,
    },

    #[error("target {target} is out of range: {reason}")]
    OutOfRange { target: String, reason: String },

    #[error("could not acquire the migration lock within {waited:?}; another migration is running")]
    ConcurrentMigration { waited: Duration },

    #[error("cannot {direction} to {target}: it is {relation} the current revision")]
    WrongDirection {
        direction: &'static str,
        target: String,
        relation: &'static str,
    },

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Load(#[from] LoadError),
}

/// Failure discovering or parsing revision files
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid revision file name {0} (expected <12 hex id>_<slug>.toml)")]
    InvalidFileName(PathBuf),

    #[error("{path} declares id {declared} but its file name says {expected}")]
    IdMismatch {
        path: PathBuf,
        declared: String,
        expected: String,
    },

    #[error("{path}: invalid revision id {id:?}")]
    InvalidRevisionId { path: PathBuf, id: String },

    #[error("invalid revision file name pattern: {0}")]
    Pattern(#[from] regex::Error),
}

/// Failure creating a new revision file
#[derive(Debug, Error)]
pub enum AuthoringError {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to render revision file: {0}")]
    Render(#[from] toml::ser::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_failed_names_revision_and_index() {
        let err = RunnerError::StepFailed {
            revision: "ae1027a6acf0".into(),
            operation_index: Some(2),
            cause: ExecutorError::UnnamedConstraint {
                table: "department".into(),
            },
        };
        let msg = err.to_string();
        assert!(msg.contains("ae1027a6acf0"));
        assert!(msg.contains("operation 2"));
    }

    #[test]
    fn test_bad_file_name_pattern_is_reported() {
        let err: LoadError = regex::Regex::new("(").unwrap_err().into();
        assert!(err
            .to_string()
            .starts_with("invalid revision file name pattern"));
    }

    #[test]
    fn test_multiple_roots_lists_ids() {
        let err = GraphError::MultipleRoots(vec!["a".into(), "b".into()]);
        assert_eq!(err.to_string(), "revision graph has multiple roots: a, b");
    }
}
