//! Operation executor - classifies and runs one operation against a backend
//!
//! Each [`Operation`] maps to exactly one backend [`Ddl`] primitive. Before it
//! runs, the operation is checked for data loss:
//!
//! | operation | destructive when |
//! |---|---|
//! | `DropColumn` | always |
//! | `DropTable` | the table holds rows |
//! | `AlterColumnType` | the stored type does not convert losslessly to the new one |
//! | everything else | never |
//!
//! Destructive operations are logged as warnings and reported back to the
//! runner; in strict mode they are rejected before the backend is touched.

use crate::backend::{Backend, Ddl, NamedConstraint};
use crate::migration::error::ExecutorError;
use crate::migration::operation::Operation;

#[cfg(feature = "tracing")]
use crate::observability::tracing_helpers;

/// Runs operations against a backend
#[derive(Debug, Clone, Copy, Default)]
pub struct Executor {
    strict: bool,
}

impl Executor {
    pub fn new(strict: bool) -> Self {
        Self { strict }
    }

    #[must_use]
    pub fn is_strict(&self) -> bool {
        self.strict
    }

    /// Why `operation` would lose stored data, if it would
    pub fn classify(
        &self,
        operation: &Operation,
        backend: &dyn Backend,
    ) -> Result<Option<String>, ExecutorError> {
        let reason = match operation {
            Operation::DropColumn { table, column } => {
                let rows = backend.row_count(table)?;
                Some(if rows == 0 {
                    format!("drops column {table}.{column}")
                } else {
                    format!("drops column {table}.{column} and its values in {rows} rows")
                })
            }
            Operation::DropTable { table } => {
                let rows = backend.row_count(table)?;
                (rows > 0).then(|| format!("drops table {table} holding {rows} rows"))
            }
            Operation::AlterColumnType {
                table,
                column,
                from,
                to,
            } => {
                // The stored type wins over the declared `from` when they differ.
                let stored = backend.column_type(table, column)?.unwrap_or(*from);
                if stored.converts_losslessly_to(*to) {
                    None
                } else if stored == *from {
                    Some(format!(
                        "converting {table}.{column} from {from} to {to} may lose data"
                    ))
                } else {
                    Some(format!(
                        "converting {table}.{column} from {stored} (declared {from}) to {to} may lose data"
                    ))
                }
            }
            _ => None,
        };
        Ok(reason)
    }

    /// Translate `operation` into its single backend primitive
    pub fn translate(operation: &Operation) -> Result<Ddl, ExecutorError> {
        let ddl = match operation {
            Operation::CreateTable { table, columns } => Ddl::CreateTable {
                table: table.clone(),
                columns: columns.clone(),
            },
            Operation::DropTable { table } => Ddl::DropTable {
                table: table.clone(),
            },
            Operation::RenameTable { from, to } => Ddl::RenameTable {
                from: from.clone(),
                to: to.clone(),
            },
            Operation::AddColumn { table, column } => Ddl::AddColumn {
                table: table.clone(),
                column: column.clone(),
            },
            Operation::DropColumn { table, column } => Ddl::DropColumn {
                table: table.clone(),
                column: column.clone(),
            },
            Operation::RenameColumn { table, from, to } => Ddl::RenameColumn {
                table: table.clone(),
                from: from.clone(),
                to: to.clone(),
            },
            Operation::AlterColumnType {
                table, column, to, ..
            } => Ddl::AlterColumnType {
                table: table.clone(),
                column: column.clone(),
                to: *to,
            },
            Operation::AddConstraint { table, constraint } => {
                let name = constraint
                    .usable_name()
                    .ok_or_else(|| ExecutorError::UnnamedConstraint {
                        table: table.clone(),
                    })?;
                Ddl::AddConstraint {
                    table: table.clone(),
                    constraint: NamedConstraint {
                        name: name.to_string(),
                        kind: constraint.kind.clone(),
                    },
                }
            }
            Operation::DropConstraint { table, name } => Ddl::DropConstraint {
                table: table.clone(),
                name: name.clone(),
            },
        };
        Ok(ddl)
    }

    /// Classify and execute one operation
    ///
    /// Returns the destructive-operation warning, if any.
    pub fn apply(
        &self,
        operation: &Operation,
        backend: &dyn Backend,
    ) -> Result<Option<String>, ExecutorError> {
        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::operation_span(operation.kind(), operation.table()).entered();

        let statement = Self::translate(operation)?;
        let warning = self.classify(operation, backend)?;

        if let Some(reason) = &warning {
            if self.strict {
                return Err(ExecutorError::DestructiveOperationRejected {
                    operation: operation.to_string(),
                    reason: reason.clone(),
                });
            }
            log::warn!("destructive operation: {reason}");
        }

        log::debug!("applying {operation}");
        backend.execute(&statement)?;
        Ok(warning)
    }
}
