//! Operation model - the primitive schema changes a revision is built from
//!
//! Every schema change a revision can express is one of the [`Operation`]
//! variants. Operations are plain data: they are authored in revision files,
//! classified by the executor, and translated one-to-one into backend DDL.
//!
//! # Renames are primitives
//!
//! [`Operation::RenameTable`] and [`Operation::RenameColumn`] are the only
//! operations that are guaranteed lossless where the naive alternative
//! (drop the old object, create the new one) destroys stored values. No operation
//! kind expresses a rename as drop+create, so an accidental destructive rename
//! cannot be written down.
//! See [`Operation::lossless_under_drop_create`].

use serde::{Deserialize, Serialize};
use std::fmt;

/// Column storage type
///
/// Dialect-neutral; backends map these to their own type names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Boolean,
    Integer,
    BigInteger,
    Double,
    Decimal,
    Text,
    /// Bounded string with a maximum length in characters
    Varchar(u32),
    Timestamp,
    Json,
}

impl ColumnType {
    /// Widest textual rendering of a value of this type, if bounded
    fn max_text_width(self) -> Option<u32> {
        match self {
            ColumnType::Boolean => Some(5),
            ColumnType::Integer => Some(11),
            ColumnType::BigInteger => Some(20),
            ColumnType::Timestamp => Some(32),
            ColumnType::Varchar(n) => Some(n),
            ColumnType::Double | ColumnType::Decimal | ColumnType::Text | ColumnType::Json => None,
        }
    }

    /// Whether every value of `self` can be represented by `target` without loss
    ///
    /// This is the static compatibility table the executor consults to flag
    /// `AlterColumnType` as destructive. Widening numeric conversions and any
    /// conversion to text are safe; narrowing and text-to-numeric are not.
    #[must_use]
    pub fn converts_losslessly_to(self, target: ColumnType) -> bool {
        use ColumnType::*;

        if self == target {
            return true;
        }

        match (self, target) {
            (_, Text) => true,
            (Varchar(from), Varchar(to)) => to >= from,
            (Boolean, Integer | BigInteger | Decimal) => true,
            (Integer, BigInteger | Double | Decimal) => true,
            (BigInteger, Decimal) => true,
            (Boolean | Integer | BigInteger | Timestamp, Varchar(to)) => {
                self.max_text_width().is_some_and(|width| to >= width)
            }
            (Boolean | Integer | BigInteger | Double | Text | Varchar(_), Json) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnType::Boolean => write!(f, "boolean"),
            ColumnType::Integer => write!(f, "integer"),
            ColumnType::BigInteger => write!(f, "big_integer"),
            ColumnType::Double => write!(f, "double"),
            ColumnType::Decimal => write!(f, "decimal"),
            ColumnType::Text => write!(f, "text"),
            ColumnType::Varchar(n) => write!(f, "varchar({n})"),
            ColumnType::Timestamp => write!(f, "timestamp"),
            ColumnType::Json => write!(f, "json"),
        }
    }
}

fn default_nullable() -> bool {
    true
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// Column definition carried by `CreateTable` and `AddColumn`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,

    #[serde(rename = "type")]
    pub ty: ColumnType,

    #[serde(default = "default_nullable")]
    pub nullable: bool,

    #[serde(default, skip_serializing_if = "is_false")]
    pub primary_key: bool,
}

impl ColumnSpec {
    /// Nullable, non-key column
    pub fn new(name: impl Into<String>, ty: ColumnType) -> Self {
        Self {
            name: name.into(),
            ty,
            nullable: true,
            primary_key: false,
        }
    }

    #[must_use]
    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Mark as primary key (implies NOT NULL)
    #[must_use]
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }
}

/// What a table constraint enforces
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConstraintKind {
    PrimaryKey {
        columns: Vec<String>,
    },
    Unique {
        columns: Vec<String>,
    },
    ForeignKey {
        columns: Vec<String>,
        references_table: String,
        references_columns: Vec<String>,
    },
    Check {
        expression: String,
    },
}

impl ConstraintKind {
    /// Columns of the owning table this constraint covers
    #[must_use]
    pub fn columns(&self) -> &[String] {
        match self {
            ConstraintKind::PrimaryKey { columns }
            | ConstraintKind::Unique { columns }
            | ConstraintKind::ForeignKey { columns, .. } => columns,
            ConstraintKind::Check { .. } => &[],
        }
    }
}

/// Constraint as authored; the name is optional here so that unnamed
/// constraints can be rejected with a precise error instead of failing to parse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstraintSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(flatten)]
    pub kind: ConstraintKind,
}

impl ConstraintSpec {
    pub fn named(name: impl Into<String>, kind: ConstraintKind) -> Self {
        Self {
            name: Some(name.into()),
            kind,
        }
    }

    pub fn unnamed(kind: ConstraintKind) -> Self {
        Self { name: None, kind }
    }

    /// The constraint name, if present and non-blank
    #[must_use]
    pub fn usable_name(&self) -> Option<&str> {
        self.name.as_deref().map(str::trim).filter(|n| !n.is_empty())
    }
}

/// One primitive, reversible-in-principle schema change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
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
        from: ColumnType,
        to: ColumnType,
    },
    AddConstraint {
        table: String,
        constraint: ConstraintSpec,
    },
    DropConstraint {
        table: String,
        name: String,
    },
}

impl Operation {
    /// Short snake_case name of the variant, as used in revision files
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Operation::CreateTable { .. } => "create_table",
            Operation::DropTable { .. } => "drop_table",
            Operation::RenameTable { .. } => "rename_table",
            Operation::AddColumn { .. } => "add_column",
            Operation::DropColumn { .. } => "drop_column",
            Operation::RenameColumn { .. } => "rename_column",
            Operation::AlterColumnType { .. } => "alter_column_type",
            Operation::AddConstraint { .. } => "add_constraint",
            Operation::DropConstraint { .. } => "drop_constraint",
        }
    }

    /// Table the operation acts on (the source name for a table rename)
    #[must_use]
    pub fn table(&self) -> &str {
        match self {
            Operation::CreateTable { table, .. }
            | Operation::DropTable { table }
            | Operation::AddColumn { table, .. }
            | Operation::DropColumn { table, .. }
            | Operation::RenameColumn { table, .. }
            | Operation::AlterColumnType { table, .. }
            | Operation::AddConstraint { table, .. }
            | Operation::DropConstraint { table, .. } => table,
            Operation::RenameTable { from, .. } => from,
        }
    }

    #[must_use]
    pub fn is_rename(&self) -> bool {
        matches!(
            self,
            Operation::RenameTable { .. } | Operation::RenameColumn { .. }
        )
    }

    /// Whether this operation preserves stored values where the drop+create
    /// alternative would not
    ///
    /// Only the two rename primitives carry this guarantee. A rename moves the
    /// existing object (and every value in it) under a new name in a single
    /// step; dropping the old object and creating a fresh one loses the data.
    /// Every other operation either has no drop+create alternative or is
    /// itself the drop.
    #[must_use]
    pub fn lossless_under_drop_create(&self) -> bool {
        self.is_rename()
    }

    /// The operation that exactly undoes this one, when derivable from the
    /// operation alone
    ///
    /// Drop operations return `None`: they do not carry the definition of
    /// what they remove, so the inverse has to be authored by hand.
    #[must_use]
    pub fn inverse(&self) -> Option<Operation> {
        match self {
            Operation::CreateTable { table, .. } => Some(Operation::DropTable {
                table: table.clone(),
            }),
            Operation::RenameTable { from, to } => Some(Operation::RenameTable {
                from: to.clone(),
                to: from.clone(),
            }),
            Operation::AddColumn { table, column } => Some(Operation::DropColumn {
                table: table.clone(),
                column: column.name.clone(),
            }),
            Operation::RenameColumn { table, from, to } => Some(Operation::RenameColumn {
                table: table.clone(),
                from: to.clone(),
                to: from.clone(),
            }),
            Operation::AlterColumnType {
                table,
                column,
                from,
                to,
            } => Some(Operation::AlterColumnType {
                table: table.clone(),
                column: column.clone(),
                from: *to,
                to: *from,
            }),
            Operation::AddConstraint { table, constraint } => {
                constraint
                    .usable_name()
                    .map(|name| Operation::DropConstraint {
                        table: table.clone(),
                        name: name.to_string(),
                    })
            }
            Operation::DropTable { .. }
            | Operation::DropColumn { .. }
            | Operation::DropConstraint { .. } => None,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::CreateTable { table, columns } => {
                let names: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();
                write!(f, "create table {table} ({})", names.join(", "))
            }
            Operation::DropTable { table } => write!(f, "drop table {table}"),
            Operation::RenameTable { from, to } => write!(f, "rename table {from} -> {to}"),
            Operation::AddColumn { table, column } => {
                write!(f, "add column {table}.{} {}", column.name, column.ty)
            }
            Operation::DropColumn { table, column } => write!(f, "drop column {table}.{column}"),
            Operation::RenameColumn { table, from, to } => {
                write!(f, "rename column {table}.{from} -> {to}")
            }
            Operation::AlterColumnType {
                table,
                column,
                from,
                to,
            } => write!(f, "alter column {table}.{column} {from} -> {to}"),
            Operation::AddConstraint { table, constraint } => write!(
                f,
                "add constraint {} on {table}",
                constraint.usable_name().unwrap_or("<unnamed>")
            ),
            Operation::DropConstraint { table, name } => {
                write!(f, "drop constraint {name} on {table}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_renames_are_lossless_under_drop_create() {
        let ops = vec![
            Operation::CreateTable {
                table: "t".into(),
                columns: vec![],
            },
            Operation::DropTable { table: "t".into() },
            Operation::RenameTable {
                from: "t".into(),
                to: "u".into(),
            },
            Operation::AddColumn {
                table: "t".into(),
                column: ColumnSpec::new("c", ColumnType::Text),
            },
            Operation::DropColumn {
                table: "t".into(),
                column: "c".into(),
            },
            Operation::RenameColumn {
                table: "t".into(),
                from: "a".into(),
                to: "b".into(),
            },
            Operation::AlterColumnType {
                table: "t".into(),
                column: "c".into(),
                from: ColumnType::Integer,
                to: ColumnType::Text,
            },
            Operation::DropConstraint {
                table: "t".into(),
                name: "n".into(),
            },
        ];

        let lossless: Vec<&str> = ops
            .iter()
            .filter(|op| op.lossless_under_drop_create())
            .map(Operation::kind)
            .collect();
        assert_eq!(lossless, vec!["rename_table", "rename_column"]);
    }

    #[test]
    fn test_compatibility_table() {
        use ColumnType::*;

        assert!(Integer.converts_losslessly_to(Text));
        assert!(Integer.converts_losslessly_to(BigInteger));
        assert!(Boolean.converts_losslessly_to(Integer));
        assert!(Varchar(10).converts_losslessly_to(Varchar(20)));
        assert!(Integer.converts_losslessly_to(Varchar(11)));

        assert!(!Text.converts_losslessly_to(Integer));
        assert!(!BigInteger.converts_losslessly_to(Integer));
        assert!(!Double.converts_losslessly_to(Integer));
        assert!(!Varchar(20).converts_losslessly_to(Varchar(10)));
        assert!(!BigInteger.converts_losslessly_to(Varchar(5)));
        assert!(!Json.converts_losslessly_to(Integer));
    }

    #[test]
    fn test_inverse_of_renames_swaps_names() {
        let op = Operation::RenameColumn {
            table: "departments".into(),
            from: "address".into(),
            to: "location".into(),
        };
        assert_eq!(
            op.inverse(),
            Some(Operation::RenameColumn {
                table: "departments".into(),
                from: "location".into(),
                to: "address".into(),
            })
        );
    }

    #[test]
    fn test_drops_have_no_derivable_inverse() {
        assert!(Operation::DropTable { table: "t".into() }.inverse().is_none());
        assert!(Operation::DropColumn {
            table: "t".into(),
            column: "c".into()
        }
        .inverse()
        .is_none());
    }

    #[test]
    fn test_unnamed_constraint_has_no_inverse() {
        let op = Operation::AddConstraint {
            table: "t".into(),
            constraint: ConstraintSpec::unnamed(ConstraintKind::Unique {
                columns: vec!["c".into()],
            }),
        };
        assert!(op.inverse().is_none());
    }

    #[test]
    fn test_operation_toml_shape() {
        #[derive(Deserialize)]
        struct Doc {
            up: Vec<Operation>,
        }

        let doc: Doc = toml::from_str(
            r#"
            [[up]]
            op = "create_table"
            table = "department"
            columns = [
                { name = "id", type = "integer", nullable = false, primary_key = true },
                { name = "address", type = { varchar = 255 } },
            ]

            [[up]]
            op = "add_constraint"
            table = "department"
            constraint = { name = "uq_department_address", kind = "unique", columns = ["address"] }
            "#,
        )
        .unwrap();

        assert_eq!(doc.up.len(), 2);
        match &doc.up[0] {
            Operation::CreateTable { columns, .. } => {
                assert_eq!(columns[0], ColumnSpec::new("id", ColumnType::Integer).primary_key());
                assert_eq!(columns[1].ty, ColumnType::Varchar(255));
                assert!(columns[1].nullable);
            }
            other => panic!("unexpected operation {other:?}"),
        }
        match &doc.up[1] {
            Operation::AddConstraint { constraint, .. } => {
                assert_eq!(constraint.usable_name(), Some("uq_department_address"));
            }
            other => panic!("unexpected operation {other:?}"),
        }
    }
}
