//! `MemoryBackend` - an in-process schema catalog
//!
//! Holds tables (ordered columns, named constraints, rows of JSON values) in
//! memory and applies [`Ddl`] with PostgreSQL-like semantics: statements on
//! missing objects or name clashes fail, renames move data in place, type
//! changes convert every stored value or fail.
//!
//! Handles created with [`MemoryBackend::connect`] share one committed catalog
//! and one migration lock, but each handle stages its own transaction, so two
//! handles behave like two sessions against the same database.

use super::{Backend, BackendError, Ddl, NamedConstraint};
use crate::migration::operation::{ColumnSpec, ColumnType, ConstraintKind};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// One stored row, keyed by column name
pub type Row = BTreeMap<String, Value>;

/// Structural definition of one table
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableSchema {
    pub columns: Vec<ColumnSpec>,
    pub constraints: Vec<NamedConstraint>,
}

impl TableSchema {
    #[must_use]
    pub fn column(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.name == name)
    }

    #[must_use]
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    #[must_use]
    pub fn constraint(&self, name: &str) -> Option<&NamedConstraint> {
        self.constraints.iter().find(|c| c.name == name)
    }
}

/// Structural snapshot of every user table (the version store is excluded)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaSnapshot {
    pub tables: BTreeMap<String, TableSchema>,
}

impl SchemaSnapshot {
    #[must_use]
    pub fn table(&self, name: &str) -> Option<&TableSchema> {
        self.tables.get(name)
    }

    #[must_use]
    pub fn has_table(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }
}

#[derive(Debug, Clone, Default)]
struct MemoryTable {
    schema: TableSchema,
    rows: Vec<Row>,
}

#[derive(Debug, Clone, Default)]
struct Catalog {
    tables: BTreeMap<String, MemoryTable>,
    /// `None` until the version store is initialised; then zero or one rows
    version_store: Option<Vec<String>>,
}

#[derive(Debug, Default)]
struct Shared {
    committed: Catalog,
    lock_owner: Option<u64>,
    next_handle: u64,
}

#[derive(Debug, Default)]
struct Session {
    staged: Option<Catalog>,
    statements: usize,
    transactions: usize,
}

/// In-memory [`Backend`]
#[derive(Debug)]
pub struct MemoryBackend {
    id: u64,
    shared: Arc<Mutex<Shared>>,
    session: Mutex<Session>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    /// Create an empty database and return the first handle to it
    #[must_use]
    pub fn new() -> Self {
        let shared = Shared {
            next_handle: 1,
            ..Shared::default()
        };
        Self {
            id: 0,
            shared: Arc::new(Mutex::new(shared)),
            session: Mutex::new(Session::default()),
        }
    }

    /// Open another handle (session) on the same database
    #[must_use]
    pub fn connect(&self) -> Self {
        let mut shared = self.shared.lock().unwrap_or_else(PoisonError::into_inner);
        let id = shared.next_handle;
        shared.next_handle += 1;
        Self {
            id,
            shared: Arc::clone(&self.shared),
            session: Mutex::new(Session::default()),
        }
    }

    /// Structural snapshot as seen by this handle (including staged changes)
    pub fn schema(&self) -> Result<SchemaSnapshot, BackendError> {
        self.inspect(|catalog| SchemaSnapshot {
            tables: catalog
                .tables
                .iter()
                .map(|(name, table)| (name.clone(), table.schema.clone()))
                .collect(),
        })
    }

    /// Insert one row; unspecified columns are stored as NULL
    pub fn insert_row<'a>(
        &self,
        table: &str,
        values: impl IntoIterator<Item = (&'a str, Value)>,
    ) -> Result<(), BackendError> {
        let values: Row = values
            .into_iter()
            .map(|(column, value)| (column.to_string(), value))
            .collect();

        self.mutate(|catalog| {
            let target = catalog.table_mut(table)?;
            for column in values.keys() {
                if target.schema.column(column).is_none() {
                    return Err(BackendError::rejected(format!(
                        "column \"{column}\" of relation \"{table}\" does not exist"
                    )));
                }
            }

            let mut row = Row::new();
            for column in &target.schema.columns {
                let value = values.get(&column.name).cloned().unwrap_or(Value::Null);
                if value.is_null() && !column.nullable {
                    return Err(BackendError::rejected(format!(
                        "null value in column \"{}\" of relation \"{table}\" violates not-null constraint",
                        column.name
                    )));
                }
                row.insert(column.name.clone(), value);
            }
            target.rows.push(row);
            Ok(())
        })
    }

    /// All rows of `table` as seen by this handle
    pub fn rows(&self, table: &str) -> Result<Vec<Row>, BackendError> {
        self.inspect(|catalog| {
            catalog
                .tables
                .get(table)
                .map(|t| t.rows.clone())
                .ok_or_else(|| missing_table(table))
        })?
    }

    /// Number of `execute` calls made through this handle
    #[must_use]
    pub fn statement_count(&self) -> usize {
        self.session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .statements
    }

    /// Number of transactions opened through this handle
    #[must_use]
    pub fn transaction_count(&self) -> usize {
        self.session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .transactions
    }

    /// Whether any handle currently holds the migration lock
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.shared
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .lock_owner
            .is_some()
    }

    fn lock_shared(&self) -> Result<MutexGuard<'_, Shared>, BackendError> {
        self.shared
            .lock()
            .map_err(|e| BackendError::Poisoned(e.to_string()))
    }

    fn lock_session(&self) -> Result<MutexGuard<'_, Session>, BackendError> {
        self.session
            .lock()
            .map_err(|e| BackendError::Poisoned(e.to_string()))
    }

    /// Run `f` against a working copy and publish it only on success, so every
    /// statement is atomic whether or not a transaction is open.
    fn mutate<R>(
        &self,
        f: impl FnOnce(&mut Catalog) -> Result<R, BackendError>,
    ) -> Result<R, BackendError> {
        let mut session = self.lock_session()?;
        if let Some(staged) = session.staged.as_mut() {
            let mut working = staged.clone();
            let out = f(&mut working)?;
            *staged = working;
            return Ok(out);
        }
        drop(session);

        let mut shared = self.lock_shared()?;
        let mut working = shared.committed.clone();
        let out = f(&mut working)?;
        shared.committed = working;
        Ok(out)
    }

    fn inspect<R>(&self, f: impl FnOnce(&Catalog) -> R) -> Result<R, BackendError> {
        let session = self.lock_session()?;
        if let Some(staged) = session.staged.as_ref() {
            return Ok(f(staged));
        }
        drop(session);

        let shared = self.lock_shared()?;
        Ok(f(&shared.committed))
    }
}

impl Backend for MemoryBackend {
    fn execute(&self, statement: &Ddl) -> Result<(), BackendError> {
        self.lock_session()?.statements += 1;
        log::trace!("memory backend: {statement:?}");
        self.mutate(|catalog| catalog.apply(statement))
    }

    fn begin(&self) -> Result<(), BackendError> {
        let mut session = self.lock_session()?;
        if session.staged.is_some() {
            return Err(BackendError::Transaction(
                "a transaction is already in progress".to_string(),
            ));
        }
        let snapshot = self.lock_shared()?.committed.clone();
        session.staged = Some(snapshot);
        session.transactions += 1;
        Ok(())
    }

    fn commit(&self) -> Result<(), BackendError> {
        let mut session = self.lock_session()?;
        let staged = session.staged.take().ok_or_else(|| {
            BackendError::Transaction("there is no transaction in progress".to_string())
        })?;
        self.lock_shared()?.committed = staged;
        Ok(())
    }

    fn rollback(&self) -> Result<(), BackendError> {
        let mut session = self.lock_session()?;
        session.staged.take().map(|_| ()).ok_or_else(|| {
            BackendError::Transaction("there is no transaction in progress".to_string())
        })
    }

    fn row_count(&self, table: &str) -> Result<u64, BackendError> {
        self.inspect(|catalog| {
            catalog
                .tables
                .get(table)
                .map(|t| t.rows.len() as u64)
                .ok_or_else(|| missing_table(table))
        })?
    }

    fn column_type(&self, table: &str, column: &str) -> Result<Option<ColumnType>, BackendError> {
        self.inspect(|catalog| {
            catalog
                .tables
                .get(table)
                .and_then(|t| t.schema.column(column))
                .map(|c| c.ty)
        })
    }

    fn init_version_store(&self) -> Result<(), BackendError> {
        self.mutate(|catalog| {
            if catalog.version_store.is_none() {
                catalog.version_store = Some(Vec::new());
            }
            Ok(())
        })
    }

    fn read_version(&self) -> Result<Option<String>, BackendError> {
        self.inspect(|catalog| match &catalog.version_store {
            None => Err(BackendError::rejected("version store has not been initialised")),
            Some(rows) => match rows.as_slice() {
                [] => Ok(None),
                [version] => Ok(Some(version.clone())),
                _ => Err(BackendError::CorruptVersionStore(format!(
                    "expected at most one row, found {}",
                    rows.len()
                ))),
            },
        })?
    }

    fn write_version(&self, version: Option<&str>) -> Result<(), BackendError> {
        self.mutate(|catalog| {
            let rows = catalog.version_store.as_mut().ok_or_else(|| {
                BackendError::rejected("version store has not been initialised")
            })?;
            rows.clear();
            rows.extend(version.map(str::to_string));
            Ok(())
        })
    }

    fn try_lock(&self) -> Result<bool, BackendError> {
        let mut shared = self.lock_shared()?;
        if shared.lock_owner.is_some() {
            return Ok(false);
        }
        shared.lock_owner = Some(self.id);
        Ok(true)
    }

    fn unlock(&self) -> Result<(), BackendError> {
        let mut shared = self.lock_shared()?;
        if shared.lock_owner == Some(self.id) {
            shared.lock_owner = None;
        }
        Ok(())
    }
}

fn missing_table(table: &str) -> BackendError {
    BackendError::rejected(format!("relation \"{table}\" does not exist"))
}

fn missing_column(table: &str, column: &str) -> BackendError {
    BackendError::rejected(format!(
        "column \"{column}\" of relation \"{table}\" does not exist"
    ))
}

impl Catalog {
    fn table_mut(&mut self, name: &str) -> Result<&mut MemoryTable, BackendError> {
        self.tables.get_mut(name).ok_or_else(|| missing_table(name))
    }

    fn table(&self, name: &str) -> Result<&MemoryTable, BackendError> {
        self.tables.get(name).ok_or_else(|| missing_table(name))
    }

    /// Foreign keys in *other* tables that point at `table` (optionally at one column)
    fn inbound_foreign_keys(&self, table: &str, column: Option<&str>) -> Vec<String> {
        self.tables
            .iter()
            .filter(|(owner, _)| owner.as_str() != table)
            .flat_map(|(_, t)| t.schema.constraints.iter())
            .filter_map(|c| match &c.kind {
                ConstraintKind::ForeignKey {
                    references_table,
                    references_columns,
                    ..
                } if references_table == table
                    && column.map_or(true, |col| references_columns.iter().any(|r| r == col)) =>
                {
                    Some(c.name.clone())
                }
                _ => None,
            })
            .collect()
    }

    fn apply(&mut self, statement: &Ddl) -> Result<(), BackendError> {
        match statement {
            Ddl::CreateTable { table, columns } => {
                if self.tables.contains_key(table) {
                    return Err(BackendError::rejected(format!(
                        "relation \"{table}\" already exists"
                    )));
                }
                for (i, column) in columns.iter().enumerate() {
                    if columns[..i].iter().any(|c| c.name == column.name) {
                        return Err(BackendError::rejected(format!(
                            "column \"{}\" specified more than once",
                            column.name
                        )));
                    }
                }
                self.tables.insert(
                    table.clone(),
                    MemoryTable {
                        schema: TableSchema {
                            columns: columns.clone(),
                            constraints: Vec::new(),
                        },
                        rows: Vec::new(),
                    },
                );
            }

            Ddl::DropTable { table } => {
                self.table(table)?;
                let dependents = self.inbound_foreign_keys(table, None);
                if !dependents.is_empty() {
                    return Err(BackendError::rejected(format!(
                        "cannot drop table \"{table}\" because constraints depend on it: {}",
                        dependents.join(", ")
                    )));
                }
                self.tables.remove(table);
            }

            Ddl::RenameTable { from, to } => {
                if self.tables.contains_key(to) {
                    return Err(BackendError::rejected(format!(
                        "relation \"{to}\" already exists"
                    )));
                }
                let moved = self.tables.remove(from).ok_or_else(|| missing_table(from))?;
                self.tables.insert(to.clone(), moved);

                for t in self.tables.values_mut() {
                    for constraint in &mut t.schema.constraints {
                        if let ConstraintKind::ForeignKey {
                            references_table, ..
                        } = &mut constraint.kind
                        {
                            if references_table == from {
                                references_table.clone_from(to);
                            }
                        }
                    }
                }
            }

            Ddl::AddColumn { table, column } => {
                let target = self.table_mut(table)?;
                if target.schema.column(&column.name).is_some() {
                    return Err(BackendError::rejected(format!(
                        "column \"{}\" of relation \"{table}\" already exists",
                        column.name
                    )));
                }
                if !column.nullable && !target.rows.is_empty() {
                    return Err(BackendError::rejected(format!(
                        "column \"{}\" of relation \"{table}\" contains null values",
                        column.name
                    )));
                }
                target.schema.columns.push(column.clone());
                for row in &mut target.rows {
                    row.insert(column.name.clone(), Value::Null);
                }
            }

            Ddl::DropColumn { table, column } => {
                let dependents = self.inbound_foreign_keys(table, Some(column));
                if !dependents.is_empty() {
                    return Err(BackendError::rejected(format!(
                        "cannot drop column \"{column}\" of table \"{table}\" because constraints depend on it: {}",
                        dependents.join(", ")
                    )));
                }
                let target = self.table_mut(table)?;
                let position = target
                    .schema
                    .columns
                    .iter()
                    .position(|c| &c.name == column)
                    .ok_or_else(|| missing_column(table, column))?;
                target.schema.columns.remove(position);
                target
                    .schema
                    .constraints
                    .retain(|c| !c.kind.columns().contains(column));
                for row in &mut target.rows {
                    row.remove(column);
                }
            }

            Ddl::RenameColumn { table, from, to } => {
                let target = self.table_mut(table)?;
                if target.schema.column(to).is_some() {
                    return Err(BackendError::rejected(format!(
                        "column \"{to}\" of relation \"{table}\" already exists"
                    )));
                }
                let spec = target
                    .schema
                    .columns
                    .iter_mut()
                    .find(|c| &c.name == from)
                    .ok_or_else(|| missing_column(table, from))?;
                spec.name.clone_from(to);

                for constraint in &mut target.schema.constraints {
                    rename_in(constraint_columns_mut(&mut constraint.kind), from, to);
                }
                for row in &mut target.rows {
                    if let Some(value) = row.remove(from) {
                        row.insert(to.clone(), value);
                    }
                }

                // Foreign keys (including self-references) follow the column.
                for t in self.tables.values_mut() {
                    for constraint in &mut t.schema.constraints {
                        if let ConstraintKind::ForeignKey {
                            references_table,
                            references_columns,
                            ..
                        } = &mut constraint.kind
                        {
                            if references_table == table {
                                rename_in(references_columns, from, to);
                            }
                        }
                    }
                }
            }

            Ddl::AlterColumnType { table, column, to } => {
                let target = self.table_mut(table)?;
                let position = target
                    .schema
                    .columns
                    .iter()
                    .position(|c| &c.name == column)
                    .ok_or_else(|| missing_column(table, column))?;

                let converted = target
                    .rows
                    .iter()
                    .map(|row| {
                        let value = row.get(column).unwrap_or(&Value::Null);
                        convert_value(value, *to).ok_or_else(|| {
                            BackendError::rejected(format!(
                                "value {value} in column \"{column}\" cannot be cast to {to}"
                            ))
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()?;

                for (row, value) in target.rows.iter_mut().zip(converted) {
                    row.insert(column.clone(), value);
                }
                target.schema.columns[position].ty = *to;
            }

            Ddl::AddConstraint { table, constraint } => {
                let owner = self.table(table)?;
                if owner.schema.constraint(&constraint.name).is_some() {
                    return Err(BackendError::rejected(format!(
                        "constraint \"{}\" for relation \"{table}\" already exists",
                        constraint.name
                    )));
                }
                for column in constraint.kind.columns() {
                    if owner.schema.column(column).is_none() {
                        return Err(missing_column(table, column));
                    }
                }
                if let ConstraintKind::ForeignKey {
                    references_table,
                    references_columns,
                    ..
                } = &constraint.kind
                {
                    let referenced = self.table(references_table)?;
                    for column in references_columns {
                        if referenced.schema.column(column).is_none() {
                            return Err(missing_column(references_table, column));
                        }
                    }
                }
                self.table_mut(table)?
                    .schema
                    .constraints
                    .push(constraint.clone());
            }

            Ddl::DropConstraint { table, name } => {
                let target = self.table_mut(table)?;
                let before = target.schema.constraints.len();
                target.schema.constraints.retain(|c| &c.name != name);
                if target.schema.constraints.len() == before {
                    return Err(BackendError::rejected(format!(
                        "constraint \"{name}\" of relation \"{table}\" does not exist"
                    )));
                }
            }
        }
        Ok(())
    }
}

fn constraint_columns_mut(kind: &mut ConstraintKind) -> &mut [String] {
    match kind {
        ConstraintKind::PrimaryKey { columns }
        | ConstraintKind::Unique { columns }
        | ConstraintKind::ForeignKey { columns, .. } => columns,
        ConstraintKind::Check { .. } => &mut [],
    }
}

fn rename_in(columns: &mut [String], from: &str, to: &str) {
    for column in columns.iter_mut().filter(|c| c.as_str() == from) {
        *column = to.to_string();
    }
}

fn as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn as_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Bool(b) => Some(i64::from(*b)),
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.fract() == 0.0 && *f >= i64::MIN as f64 && *f <= i64::MAX as f64)
                .map(|f| f as i64)
        }),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Cast one stored value, returning `None` when the cast fails
fn convert_value(value: &Value, to: ColumnType) -> Option<Value> {
    if value.is_null() {
        return Some(Value::Null);
    }

    match to {
        ColumnType::Text => Some(Value::String(as_text(value))),
        ColumnType::Varchar(limit) => {
            let text = as_text(value);
            (text.chars().count() <= limit as usize).then_some(Value::String(text))
        }
        ColumnType::Boolean => match value {
            Value::Bool(_) => Some(value.clone()),
            Value::Number(n) => match n.as_i64() {
                Some(0) => Some(Value::Bool(false)),
                Some(1) => Some(Value::Bool(true)),
                _ => None,
            },
            Value::String(s) => match s.trim() {
                "true" | "t" => Some(Value::Bool(true)),
                "false" | "f" => Some(Value::Bool(false)),
                _ => None,
            },
            _ => None,
        },
        ColumnType::Integer => as_integer(value)
            .filter(|v| i32::try_from(*v).is_ok())
            .map(Value::from),
        ColumnType::BigInteger => as_integer(value).map(Value::from),
        ColumnType::Double | ColumnType::Decimal => match value {
            Value::Number(_) => Some(value.clone()),
            Value::Bool(b) => Some(Value::from(i64::from(*b))),
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number),
            _ => None,
        },
        ColumnType::Timestamp => match value {
            Value::String(s) => {
                let parsed = chrono::DateTime::parse_from_rfc3339(s).is_ok()
                    || chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").is_ok();
                parsed.then(|| value.clone())
            }
            _ => None,
        },
        ColumnType::Json => Some(value.clone()),
    }
}
