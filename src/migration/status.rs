//! Migration status and run reports

use crate::migration::graph::Direction;
use crate::migration::revision::{Revision, RevisionId};
use std::time::Duration;

/// Where the database stands relative to the revision set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationStatus {
    /// Applied revision, `None` at base
    pub current: Option<RevisionId>,

    /// Leaf revisions of the graph
    pub heads: Vec<RevisionId>,

    /// Applied revisions, root first
    pub applied: Vec<RevisionId>,

    /// Revisions not yet applied, parents before children
    pub pending: Vec<RevisionId>,
}

impl MigrationStatus {
    #[must_use]
    pub fn is_up_to_date(&self) -> bool {
        self.pending.is_empty()
    }

    #[must_use]
    pub fn is_at_head(&self) -> bool {
        match &self.current {
            Some(current) => self.heads.len() == 1 && self.heads[0] == *current,
            None => self.heads.is_empty(),
        }
    }
}

/// Outcome of one revision step
#[derive(Debug, Clone)]
pub struct StepReport {
    pub revision: RevisionId,
    pub message: String,
    /// Destructive-operation warnings raised while applying the step
    pub warnings: Vec<String>,
    pub elapsed: Duration,
}

/// Outcome of an upgrade or downgrade
#[derive(Debug, Clone)]
pub struct MigrationReport {
    pub direction: Direction,
    pub from: Option<RevisionId>,
    pub to: Option<RevisionId>,
    pub steps: Vec<StepReport>,
}

impl MigrationReport {
    /// Nothing was applied
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn warnings(&self) -> impl Iterator<Item = &str> {
        self.steps
            .iter()
            .flat_map(|s| s.warnings.iter().map(String::as_str))
    }
}

/// Steps an upgrade or downgrade would take, computed without executing
#[derive(Debug, Clone)]
pub struct MigrationPlan {
    pub direction: Direction,
    pub from: Option<RevisionId>,
    pub to: Option<RevisionId>,
    /// Revisions in application order
    pub revisions: Vec<Revision>,
}

impl MigrationPlan {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.revisions.is_empty()
    }
}
