//! PostgreSQL backend over `may_postgres`
//!
//! Table and column statements are built with `sea-query`'s
//! `PostgresQueryBuilder`; the two statements it does not cover in the shape
//! we need (`ALTER COLUMN ... TYPE ... USING` and named table constraints) are
//! rendered here with quoted identifiers.
//!
//! State lives in two tables:
//! - `strata_version` - zero or one row holding the applied revision id
//! - `strata_migration_lock` - a single-row table lock (insert-if-absent)

use super::{Backend, BackendError, Ddl, NamedConstraint};
use crate::migration::operation::{ColumnSpec, ColumnType, ConstraintKind};
use may_postgres::Client;
use sea_query::{ColumnDef, PostgresQueryBuilder, Table};

#[cfg(feature = "tracing")]
use crate::observability::tracing_helpers;

pub const VERSION_TABLE: &str = "strata_version";
pub const LOCK_TABLE: &str = "strata_migration_lock";

/// Row id of the single lock record
const LOCK_ID: i32 = 1;

/// [`Backend`] implementation for PostgreSQL
pub struct PostgresBackend {
    client: Client,
}

impl PostgresBackend {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Connect to `database_url` and wrap the client
    pub fn connect(database_url: &str) -> Result<Self, BackendError> {
        let client = crate::connection::connect(database_url)?;
        Ok(Self::new(client))
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    fn run(&self, sql: &str) -> Result<u64, BackendError> {
        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::statement_span(sql).entered();

        log::debug!("{sql}");
        Ok(self.client.execute(sql, &[])?)
    }
}

impl Backend for PostgresBackend {
    fn execute(&self, statement: &Ddl) -> Result<(), BackendError> {
        self.run(&render(statement)).map(|_| ())
    }

    fn begin(&self) -> Result<(), BackendError> {
        self.run("BEGIN").map(|_| ())
    }

    fn commit(&self) -> Result<(), BackendError> {
        self.run("COMMIT").map(|_| ())
    }

    fn rollback(&self) -> Result<(), BackendError> {
        self.run("ROLLBACK").map(|_| ())
    }

    fn row_count(&self, table: &str) -> Result<u64, BackendError> {
        let sql = format!("SELECT COUNT(*) FROM {}", quote_ident(table));
        let row = self.client.query_one(&sql, &[])?;
        let count: i64 = row.get(0);
        Ok(u64::try_from(count).unwrap_or_default())
    }

    fn column_type(&self, table: &str, column: &str) -> Result<Option<ColumnType>, BackendError> {
        let rows = self.client.query(
            "SELECT data_type::text, character_maximum_length::integer \
             FROM information_schema.columns \
             WHERE table_schema = current_schema() AND table_name = $1 AND column_name = $2",
            &[&table, &column],
        )?;
        Ok(rows.first().and_then(|row| {
            let data_type: String = row.get(0);
            column_type_from(&data_type, row.get(1))
        }))
    }

    fn init_version_store(&self) -> Result<(), BackendError> {
        self.run(&format!(
            "CREATE TABLE IF NOT EXISTS {VERSION_TABLE} (version_num VARCHAR(64) NOT NULL)"
        ))?;
        self.run(&format!(
            "CREATE TABLE IF NOT EXISTS {LOCK_TABLE} (id INTEGER PRIMARY KEY, locked_at TIMESTAMP NOT NULL)"
        ))?;
        Ok(())
    }

    fn read_version(&self) -> Result<Option<String>, BackendError> {
        let rows = self
            .client
            .query(&format!("SELECT version_num FROM {VERSION_TABLE}"), &[])?;
        match rows.as_slice() {
            [] => Ok(None),
            [row] => Ok(Some(row.get::<_, String>(0))),
            _ => Err(BackendError::CorruptVersionStore(format!(
                "{VERSION_TABLE} holds {} rows, expected at most one",
                rows.len()
            ))),
        }
    }

    fn write_version(&self, version: Option<&str>) -> Result<(), BackendError> {
        self.run(&format!("DELETE FROM {VERSION_TABLE}"))?;
        if let Some(version) = version {
            self.client.execute(
                &format!("INSERT INTO {VERSION_TABLE} (version_num) VALUES ($1)"),
                &[&version],
            )?;
        }
        Ok(())
    }

    fn try_lock(&self) -> Result<bool, BackendError> {
        // ON CONFLICT DO NOTHING makes the insert the atomic test-and-set
        let inserted = self.run(&format!(
            "INSERT INTO {LOCK_TABLE} (id, locked_at) VALUES ({LOCK_ID}, NOW()) ON CONFLICT (id) DO NOTHING"
        ))?;
        Ok(inserted > 0)
    }

    fn unlock(&self) -> Result<(), BackendError> {
        self.run(&format!("DELETE FROM {LOCK_TABLE} WHERE id = {LOCK_ID}"))
            .map(|_| ())
    }
}

/// Render one DDL primitive as PostgreSQL SQL
pub fn render(statement: &Ddl) -> String {
    match statement {
        Ddl::CreateTable { table, columns } => {
            let mut create = Table::create();
            create.table(table.clone());
            for column in columns {
                create.col(column_def(column));
            }
            create.to_owned().build(PostgresQueryBuilder)
        }
        Ddl::DropTable { table } => Table::drop()
            .table(table.clone())
            .to_owned()
            .build(PostgresQueryBuilder),
        Ddl::RenameTable { from, to } => Table::rename()
            .table(from.clone(), to.clone())
            .to_owned()
            .build(PostgresQueryBuilder),
        Ddl::AddColumn { table, column } => Table::alter()
            .table(table.clone())
            .add_column(column_def(column))
            .to_owned()
            .build(PostgresQueryBuilder),
        Ddl::DropColumn { table, column } => Table::alter()
            .table(table.clone())
            .drop_column(column.clone())
            .to_owned()
            .build(PostgresQueryBuilder),
        Ddl::RenameColumn { table, from, to } => Table::alter()
            .table(table.clone())
            .rename_column(from.clone(), to.clone())
            .to_owned()
            .build(PostgresQueryBuilder),
        Ddl::AlterColumnType { table, column, to } => {
            let ty = sql_type(*to);
            format!(
                "ALTER TABLE {} ALTER COLUMN {} TYPE {ty} USING {}::{ty}",
                quote_ident(table),
                quote_ident(column),
                quote_ident(column),
            )
        }
        Ddl::AddConstraint { table, constraint } => format!(
            "ALTER TABLE {} ADD CONSTRAINT {} {}",
            quote_ident(table),
            quote_ident(&constraint.name),
            constraint_body(constraint)
        ),
        Ddl::DropConstraint { table, name } => format!(
            "ALTER TABLE {} DROP CONSTRAINT {}",
            quote_ident(table),
            quote_ident(name)
        ),
    }
}

fn column_def(column: &ColumnSpec) -> ColumnDef {
    let mut def = ColumnDef::new(column.name.clone());
    match column.ty {
        ColumnType::Boolean => def.boolean(),
        ColumnType::Integer => def.integer(),
        ColumnType::BigInteger => def.big_integer(),
        ColumnType::Double => def.double(),
        ColumnType::Decimal => def.decimal(),
        ColumnType::Text => def.text(),
        ColumnType::Varchar(len) => def.string_len(len),
        ColumnType::Timestamp => def.timestamp(),
        ColumnType::Json => def.json(),
    };
    if column.primary_key {
        def.primary_key();
    }
    if column.nullable {
        def.null();
    } else {
        def.not_null();
    }
    def
}

fn sql_type(ty: ColumnType) -> String {
    match ty {
        ColumnType::Boolean => "BOOLEAN".to_string(),
        ColumnType::Integer => "INTEGER".to_string(),
        ColumnType::BigInteger => "BIGINT".to_string(),
        ColumnType::Double => "DOUBLE PRECISION".to_string(),
        ColumnType::Decimal => "NUMERIC".to_string(),
        ColumnType::Text => "TEXT".to_string(),
        ColumnType::Varchar(len) => format!("VARCHAR({len})"),
        ColumnType::Timestamp => "TIMESTAMP".to_string(),
        ColumnType::Json => "JSON".to_string(),
    }
}

/// Inverse of [`sql_type`] over `information_schema.columns.data_type`
fn column_type_from(data_type: &str, max_length: Option<i32>) -> Option<ColumnType> {
    let ty = match data_type {
        "boolean" => ColumnType::Boolean,
        "integer" => ColumnType::Integer,
        "bigint" => ColumnType::BigInteger,
        "double precision" => ColumnType::Double,
        "numeric" => ColumnType::Decimal,
        "text" => ColumnType::Text,
        "character varying" => ColumnType::Varchar(u32::try_from(max_length?).ok()?),
        "timestamp without time zone" => ColumnType::Timestamp,
        "json" => ColumnType::Json,
        _ => return None,
    };
    Some(ty)
}

fn constraint_body(constraint: &NamedConstraint) -> String {
    match &constraint.kind {
        ConstraintKind::PrimaryKey { columns } => format!("PRIMARY KEY ({})", ident_list(columns)),
        ConstraintKind::Unique { columns } => format!("UNIQUE ({})", ident_list(columns)),
        ConstraintKind::ForeignKey {
            columns,
            references_table,
            references_columns,
        } => format!(
            "FOREIGN KEY ({}) REFERENCES {} ({})",
            ident_list(columns),
            quote_ident(references_table),
            ident_list(references_columns)
        ),
        ConstraintKind::Check { expression } => format!("CHECK ({expression})"),
    }
}

fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

fn ident_list(idents: &[String]) -> String {
    idents
        .iter()
        .map(|i| quote_ident(i))
        .collect::<Vec<_>>()
        .join(", ")
}
