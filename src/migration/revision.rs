//! `Revision` - one identified, reversible unit of schema change

use crate::migration::operation::Operation;
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

/// Opaque revision identifier
///
/// Any non-empty token without whitespace is accepted. Generated ids are
/// 12 lowercase hex characters.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RevisionId(String);

impl RevisionId {
    /// Create an id from a token, rejecting empty or whitespace-containing input
    pub fn parse(token: impl Into<String>) -> Option<Self> {
        let token = token.into();
        if token.is_empty() || token.chars().any(char::is_whitespace) {
            None
        } else {
            Some(Self(token))
        }
    }

    /// Fresh random id (first 12 hex digits of a v4 UUID)
    #[must_use]
    pub fn generate() -> Self {
        let uuid = uuid::Uuid::new_v4().simple().to_string();
        Self(uuid[..12].to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RevisionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RevisionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl Borrow<str> for RevisionId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for RevisionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A versioned schema change with forward and backward operations
///
/// `operations_down` is declared element-wise against `operations_up`
/// (`operations_down[i]` undoes `operations_up[i]`); the runner applies it in
/// reverse declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Revision {
    pub id: RevisionId,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<RevisionId>,

    #[serde(default)]
    pub message: String,

    #[serde(default, rename = "up")]
    pub operations_up: Vec<Operation>,

    #[serde(default, rename = "down")]
    pub operations_down: Vec<Operation>,
}

impl Revision {
    /// A revision with no operations yet
    pub fn new(id: RevisionId, parent_id: Option<RevisionId>, message: impl Into<String>) -> Self {
        Self {
            id,
            parent_id,
            message: message.into(),
            operations_up: Vec::new(),
            operations_down: Vec::new(),
        }
    }

    /// Append a forward operation
    #[must_use]
    pub fn up(mut self, operation: Operation) -> Self {
        self.operations_up.push(operation);
        self
    }

    /// Append a backward operation
    #[must_use]
    pub fn down(mut self, operation: Operation) -> Self {
        self.operations_down.push(operation);
        self
    }

    /// Build a revision whose downgrade is derived from its upgrade
    ///
    /// Each forward operation must have an [`Operation::inverse`]; the first
    /// one that does not is returned as the error.
    pub fn reversible(
        id: RevisionId,
        parent_id: Option<RevisionId>,
        message: impl Into<String>,
        operations_up: Vec<Operation>,
    ) -> Result<Self, Operation> {
        let operations_down = operations_up
            .iter()
            .map(|op| op.inverse().ok_or_else(|| op.clone()))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            id,
            parent_id,
            message: message.into(),
            operations_up,
            operations_down,
        })
    }

    #[must_use]
    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::operation::{ColumnSpec, ColumnType};

    #[test]
    fn test_revision_id_parse() {
        assert!(RevisionId::parse("ae1027a6acf").is_some());
        assert!(RevisionId::parse("").is_none());
        assert!(RevisionId::parse("has space").is_none());
    }

    #[test]
    fn test_generated_ids_are_short_hex() {
        let id = RevisionId::generate();
        assert_eq!(id.as_str().len(), 12);
        assert!(id.as_str().chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(id, RevisionId::generate());
    }

    #[test]
    fn test_reversible_derives_element_wise_inverses() {
        let rev = Revision::reversible(
            "a1".into(),
            None,
            "add column",
            vec![
                Operation::AddColumn {
                    table: "department".into(),
                    column: ColumnSpec::new("budget", ColumnType::Integer),
                },
                Operation::RenameTable {
                    from: "department".into(),
                    to: "departments".into(),
                },
            ],
        )
        .unwrap();

        assert_eq!(
            rev.operations_down,
            vec![
                Operation::DropColumn {
                    table: "department".into(),
                    column: "budget".into(),
                },
                Operation::RenameTable {
                    from: "departments".into(),
                    to: "department".into(),
                },
            ]
        );
    }

    #[test]
    fn test_reversible_rejects_drop() {
        let drop = Operation::DropTable {
            table: "department".into(),
        };
        let err = Revision::reversible("a1".into(), None, "drop", vec![drop.clone()]).unwrap_err();
        assert_eq!(err, drop);
    }
}
