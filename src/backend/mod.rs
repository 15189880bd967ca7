//! Storage backends
//!
//! A backend is the storage engine that actually holds the schema. The
//! migration engine treats it as opaque beyond the [`Backend`] trait: it can
//! execute one DDL primitive at a time, scope those in a transaction, answer a
//! row-count probe, persist the version marker, and hand out an exclusive
//! migration lock.
//!
//! Two implementations ship with the crate:
//! - [`MemoryBackend`] - an in-process catalog used for tests and dry runs
//! - [`PostgresBackend`] - PostgreSQL via `may_postgres`

pub mod memory;
pub mod postgres;

pub use memory::{MemoryBackend, SchemaSnapshot, TableSchema};
pub use postgres::PostgresBackend;

use crate::connection::ConnectionError;
use crate::migration::operation::{ColumnSpec, ColumnType, ConstraintKind};
use thiserror::Error;

/// Error reported by a storage backend
#[derive(Debug, Error)]
pub enum BackendError {
    /// `PostgreSQL` error from `may_postgres`
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] may_postgres::Error),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// The backend refused a statement (missing object, name clash, bad data)
    #[error("{0}")]
    Rejected(String),

    /// Transaction misuse (nested begin, commit without begin)
    #[error("transaction error: {0}")]
    Transaction(String),

    /// Persisted version store is not in the expected single-row shape
    #[error("corrupt version store: {0}")]
    CorruptVersionStore(String),

    /// Internal state poisoned by a panic in another handle
    #[error("backend state poisoned: {0}")]
    Poisoned(String),
}

impl BackendError {
    pub(crate) fn rejected(message: impl Into<String>) -> Self {
        BackendError::Rejected(message.into())
    }
}

/// A table constraint whose name is guaranteed present
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedConstraint {
    pub name: String,
    pub kind: ConstraintKind,
}

/// One DDL primitive, the unit a backend executes
///
/// Each variant is a single backend statement. Renames in particular are
/// in-place primitives; nothing in this vocabulary copies data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ddl {
    CreateTable {
        table: String,
        columns: Vec<ColumnSpec>,
    },
    DropTable {
        table: String,
    },
    RenameTable {
        from: String,
        to: String,
    },
    AddColumn {
        table: String,
        column: ColumnSpec,
    },
    DropColumn {
        table: String,
        column: String,
    },
    RenameColumn {
        table: String,
        from: String,
        to: String,
    },
    AlterColumnType {
        table: String,
        column: String,
        to: ColumnType,
    },
    AddConstraint {
        table: String,
        constraint: NamedConstraint,
    },
    DropConstraint {
        table: String,
        name: String,
    },
}

/// DDL-execution contract between the migration engine and a storage engine
///
/// All methods are blocking. Transactions are not nested: the runner opens
/// exactly one per revision step. The lock methods operate outside any
/// transaction and must be non-blocking; waiting is the caller's concern.
pub trait Backend {
    /// Execute a single DDL primitive
    ///
    /// # Errors
    ///
    /// Returns `BackendError` if the backend rejects or fails the statement.
    fn execute(&self, statement: &Ddl) -> Result<(), BackendError>;

    /// Open a transaction
    fn begin(&self) -> Result<(), BackendError>;

    /// Commit the open transaction
    fn commit(&self) -> Result<(), BackendError>;

    /// Discard the open transaction
    fn rollback(&self) -> Result<(), BackendError>;

    /// Number of rows currently stored in `table`
    fn row_count(&self, table: &str) -> Result<u64, BackendError>;

    /// Type of `table.column` as currently stored
    ///
    /// `Ok(None)` when the column does not exist or its type has no
    /// [`ColumnType`] equivalent.
    fn column_type(&self, table: &str, column: &str) -> Result<Option<ColumnType>, BackendError>;

    /// Create the version store structures if absent (idempotent)
    fn init_version_store(&self) -> Result<(), BackendError>;

    /// Read the stored marker; `None` when no revision is applied
    fn read_version(&self) -> Result<Option<String>, BackendError>;

    /// Replace the stored marker; `None` clears it
    fn write_version(&self, version: Option<&str>) -> Result<(), BackendError>;

    /// Try to take the exclusive migration lock without waiting
    ///
    /// Returns `Ok(true)` if this handle now holds the lock.
    fn try_lock(&self) -> Result<bool, BackendError>;

    /// Release the migration lock held by this handle
    fn unlock(&self) -> Result<(), BackendError>;
}
