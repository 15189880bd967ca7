//! Migrator - the migration runner
//!
//! Drives a backend from its current marker to a target revision:
//!
//! 1. create the version store if needed
//! 2. take the migration lock (held until the run returns)
//! 3. read the marker and resolve the target
//! 4. compute the path through the revision graph
//! 5. apply each revision in its own transaction, writing the marker before
//!    committing
//!
//! A failing operation rolls back its whole revision step and stops the run.
//! Steps committed before it stay applied.

use crate::backend::Backend;
use crate::config::MigrationConfig;
use crate::migration::error::{ExecutorError, GraphError, RunnerError};
use crate::migration::executor::Executor;
use crate::migration::file::RevisionSource;
use crate::migration::graph::{Direction, RevisionGraph};
use crate::migration::lock::MigrationLockGuard;
use crate::migration::operation::Operation;
use crate::migration::revision::{Revision, RevisionId};
use crate::migration::status::{MigrationPlan, MigrationReport, MigrationStatus, StepReport};
use crate::migration::version_store::VersionStore;
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};

#[cfg(feature = "tracing")]
use crate::observability::tracing_helpers;

/// Default time to wait for the migration lock
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(60);

/// Where an upgrade or downgrade should end
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// The single leaf revision
    Head,
    /// Nothing applied
    Base,
    Revision(RevisionId),
    /// `+N` / `-N` steps from the current marker
    Relative(i64),
}

impl FromStr for Target {
    type Err = GraphError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s {
            "head" => return Ok(Target::Head),
            "base" => return Ok(Target::Base),
            _ => {}
        }
        if s.starts_with('+') || s.starts_with('-') {
            if let Ok(steps) = s.parse::<i64>() {
                return Ok(Target::Relative(steps));
            }
        }
        RevisionId::parse(s)
            .map(Target::Revision)
            .ok_or_else(|| GraphError::UnknownRevision(s.to_string()))
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Head => write!(f, "head"),
            Target::Base => write!(f, "base"),
            Target::Revision(id) => write!(f, "{id}"),
            Target::Relative(n) => write!(f, "{n:+}"),
        }
    }
}

impl From<RevisionId> for Target {
    fn from(id: RevisionId) -> Self {
        Target::Revision(id)
    }
}

/// Applies revisions from a validated graph to a backend
pub struct Migrator {
    graph: RevisionGraph,
    executor: Executor,
    lock_timeout: Duration,
}

impl Migrator {
    pub fn new(graph: RevisionGraph) -> Self {
        Self {
            graph,
            executor: Executor::default(),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    /// Load and validate every revision from `source`
    pub fn from_source(source: &dyn RevisionSource) -> Result<Self, RunnerError> {
        let graph = RevisionGraph::build(source.load()?)?;
        Ok(Self::new(graph))
    }

    /// Apply the runner settings from `config`
    #[must_use]
    pub fn with_config(self, config: &MigrationConfig) -> Self {
        self.strict(config.strict).lock_timeout(config.lock_timeout())
    }

    /// Reject destructive operations instead of warning
    #[must_use]
    pub fn strict(mut self, strict: bool) -> Self {
        self.executor = Executor::new(strict);
        self
    }

    #[must_use]
    pub fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn graph(&self) -> &RevisionGraph {
        &self.graph
    }

    /// Revisions, parents before children
    pub fn history(&self) -> Vec<&Revision> {
        self.graph.history()
    }

    /// Create the version store (idempotent)
    pub fn init(&self, backend: &dyn Backend) -> Result<(), RunnerError> {
        VersionStore::new(backend).init()?;
        Ok(())
    }

    /// The applied revision, checked against the graph
    pub fn current(&self, backend: &dyn Backend) -> Result<Option<RevisionId>, RunnerError> {
        let store = VersionStore::new(backend);
        store.init()?;
        let current = store.current()?;
        if let Some(id) = &current {
            self.graph.require(id.as_str())?;
        }
        Ok(current)
    }

    pub fn status(&self, backend: &dyn Backend) -> Result<MigrationStatus, RunnerError> {
        let current = self.current(backend)?;
        let (applied, pending): (Vec<&Revision>, Vec<&Revision>) = self
            .graph
            .history()
            .into_iter()
            .partition(|r| self.graph.is_ancestor(Some(&r.id), current.as_ref()));

        Ok(MigrationStatus {
            current,
            heads: self.graph.heads().into_iter().map(|r| r.id.clone()).collect(),
            applied: applied.into_iter().map(|r| r.id.clone()).collect(),
            pending: pending.into_iter().map(|r| r.id.clone()).collect(),
        })
    }

    /// Resolve `target` relative to `current`
    pub fn resolve(
        &self,
        target: &Target,
        current: Option<&RevisionId>,
    ) -> Result<Option<RevisionId>, RunnerError> {
        match target {
            Target::Head => Ok(self.graph.head()?.map(|r| r.id.clone())),
            Target::Base => Ok(None),
            Target::Revision(id) => Ok(Some(self.graph.require(id.as_str())?.id.clone())),
            Target::Relative(steps) if *steps >= 0 => {
                let mut cursor = current.cloned();
                for taken in 0..*steps {
                    let children = self.graph.children(cursor.as_ref());
                    cursor = match children.as_slice() {
                        [] => {
                            return Err(RunnerError::OutOfRange {
                                target: target.to_string(),
                                reason: format!("only {taken} revision(s) above the current one"),
                            })
                        }
                        [only] => Some(only.id.clone()),
                        _ => {
                            return Err(GraphError::MultipleHeads(
                                children.iter().map(|r| r.id.clone()).collect(),
                            )
                            .into())
                        }
                    };
                }
                Ok(cursor)
            }
            Target::Relative(steps) => {
                let mut cursor = current.cloned();
                for taken in 0..steps.unsigned_abs() {
                    let Some(id) = cursor else {
                        return Err(RunnerError::OutOfRange {
                            target: target.to_string(),
                            reason: if taken == 0 {
                                "no revision is applied".to_string()
                            } else {
                                format!("only {taken} revision(s) are applied")
                            },
                        });
                    };
                    cursor = self.graph.require(id.as_str())?.parent_id.clone();
                }
                Ok(cursor)
            }
        }
    }

    /// Compute what `upgrade`/`downgrade` would do, without taking the lock or
    /// executing anything
    pub fn plan(
        &self,
        backend: &dyn Backend,
        direction: Direction,
        target: &Target,
    ) -> Result<MigrationPlan, RunnerError> {
        let current = self.current(backend)?;
        self.plan_from(current, direction, target)
    }

    fn plan_from(
        &self,
        current: Option<RevisionId>,
        direction: Direction,
        target: &Target,
    ) -> Result<MigrationPlan, RunnerError> {
        let to = self.resolve(target, current.as_ref())?;
        let path = self.graph.path_to(current.as_ref(), to.as_ref())?;

        if !path.is_empty() && path.direction != direction {
            return Err(RunnerError::WrongDirection {
                direction: direction.verb(),
                target: target.to_string(),
                relation: match direction {
                    Direction::Forward => "an ancestor of",
                    Direction::Backward => "a descendant of",
                },
            });
        }

        Ok(MigrationPlan {
            direction,
            from: current,
            to,
            revisions: path.revisions.into_iter().cloned().collect(),
        })
    }

    /// Apply revisions forward until `target` is the current revision
    pub fn upgrade(
        &self,
        backend: &dyn Backend,
        target: &Target,
    ) -> Result<MigrationReport, RunnerError> {
        self.run(backend, Direction::Forward, target)
    }

    /// Unapply revisions until `target` is the current revision
    pub fn downgrade(
        &self,
        backend: &dyn Backend,
        target: &Target,
    ) -> Result<MigrationReport, RunnerError> {
        self.run(backend, Direction::Backward, target)
    }

    fn run(
        &self,
        backend: &dyn Backend,
        direction: Direction,
        target: &Target,
    ) -> Result<MigrationReport, RunnerError> {
        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::migrate_span(direction.verb(), &target.to_string()).entered();

        self.init(backend)?;
        let _lock = MigrationLockGuard::acquire(backend, self.lock_timeout)?;

        let current = self.current(backend)?;
        let plan = self.plan_from(current, direction, target)?;

        if plan.is_empty() {
            log::info!("already at {}, nothing to {direction}", describe(plan.to.as_ref()));
        }

        let mut steps = Vec::with_capacity(plan.revisions.len());
        for revision in &plan.revisions {
            let step = self.apply_step(backend, revision, direction)?;
            log::info!(
                "{direction} {} ({}) in {:?}",
                step.revision,
                step.message,
                step.elapsed
            );
            steps.push(step);
        }

        Ok(MigrationReport {
            direction,
            from: plan.from,
            to: plan.to,
            steps,
        })
    }

    /// One revision, one transaction
    fn apply_step(
        &self,
        backend: &dyn Backend,
        revision: &Revision,
        direction: Direction,
    ) -> Result<StepReport, RunnerError> {
        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::revision_step_span(revision.id.as_str(), direction.verb()).entered();

        let started = Instant::now();
        let failed = |operation_index: Option<usize>, cause: ExecutorError| RunnerError::StepFailed {
            revision: revision.id.clone(),
            operation_index,
            cause,
        };

        backend.begin().map_err(|e| failed(None, e.into()))?;

        let operations: Vec<(usize, &Operation)> = match direction {
            Direction::Forward => revision.operations_up.iter().enumerate().collect(),
            Direction::Backward => revision.operations_down.iter().enumerate().rev().collect(),
        };

        let mut warnings = Vec::new();
        for (index, operation) in operations {
            match self.executor.apply(operation, backend) {
                Ok(warning) => warnings.extend(warning),
                Err(cause) => {
                    log::error!("{direction} {} failed at operation {index}: {cause}", revision.id);
                    rollback_quietly(backend);
                    return Err(failed(Some(index), cause));
                }
            }
        }

        let marker = match direction {
            Direction::Forward => Some(&revision.id),
            Direction::Backward => revision.parent_id.as_ref(),
        };
        if let Err(e) = VersionStore::new(backend).set(marker) {
            rollback_quietly(backend);
            return Err(failed(None, e.into()));
        }
        if let Err(e) = backend.commit() {
            rollback_quietly(backend);
            return Err(failed(None, e.into()));
        }

        Ok(StepReport {
            revision: revision.id.clone(),
            message: revision.message.clone(),
            warnings,
            elapsed: started.elapsed(),
        })
    }
}

fn rollback_quietly(backend: &dyn Backend) {
    if let Err(e) = backend.rollback() {
        log::error!("rollback failed: {e}");
    }
}

fn describe(id: Option<&RevisionId>) -> String {
    id.map_or_else(|| "base".to_string(), ToString::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::migration::file::StaticSource;
    use crate::migration::operation::{ColumnSpec, ColumnType};

    fn revisions() -> Vec<Revision> {
        vec![
            Revision::reversible(
                "aaaaaaaaaaaa".into(),
                None,
                "create department",
                vec![Operation::CreateTable {
                    table: "department".into(),
                    columns: vec![ColumnSpec::new("id", ColumnType::Integer).primary_key()],
                }],
            )
            .unwrap(),
            Revision::reversible(
                "bbbbbbbbbbbb".into(),
                Some("aaaaaaaaaaaa".into()),
                "add address",
                vec![Operation::AddColumn {
                    table: "department".into(),
                    column: ColumnSpec::new("address", ColumnType::Text),
                }],
            )
            .unwrap(),
            Revision::reversible(
                "cccccccccccc".into(),
                Some("bbbbbbbbbbbb".into()),
                "rename department",
                vec![Operation::RenameTable {
                    from: "department".into(),
                    to: "departments".into(),
                }],
            )
            .unwrap(),
        ]
    }

    fn migrator() -> Migrator {
        Migrator::from_source(&StaticSource::new(revisions())).unwrap()
    }

    #[test]
    fn test_target_parsing() {
        assert_eq!("head".parse::<Target>().unwrap(), Target::Head);
        assert_eq!("base".parse::<Target>().unwrap(), Target::Base);
        assert_eq!("+2".parse::<Target>().unwrap(), Target::Relative(2));
        assert_eq!("-1".parse::<Target>().unwrap(), Target::Relative(-1));
        assert_eq!(
            "ae1027a6acf0".parse::<Target>().unwrap(),
            Target::Revision("ae1027a6acf0".into())
        );
        assert!("has space".parse::<Target>().is_err());
        assert_eq!(Target::Relative(-1).to_string(), "-1");
    }

    #[test]
    fn test_upgrade_then_downgrade_to_base() {
        let backend = MemoryBackend::new();
        let migrator = migrator();

        let report = migrator.upgrade(&backend, &Target::Head).unwrap();
        assert_eq!(report.steps.len(), 3);
        assert_eq!(report.to, Some("cccccccccccc".into()));
        assert!(backend.schema().unwrap().has_table("departments"));
        assert!(!backend.is_locked());

        let report = migrator.downgrade(&backend, &Target::Base).unwrap();
        assert_eq!(report.steps.len(), 3);
        assert_eq!(migrator.current(&backend).unwrap(), None);
        assert!(backend.schema().unwrap().tables.is_empty());
    }

    #[test]
    fn test_relative_targets() {
        let backend = MemoryBackend::new();
        let migrator = migrator();

        migrator.upgrade(&backend, &Target::Relative(2)).unwrap();
        assert_eq!(migrator.current(&backend).unwrap(), Some("bbbbbbbbbbbb".into()));

        let err = migrator.upgrade(&backend, &Target::Relative(2)).unwrap_err();
        assert!(matches!(err, RunnerError::OutOfRange { .. }));

        migrator.downgrade(&backend, &Target::Relative(-1)).unwrap();
        assert_eq!(migrator.current(&backend).unwrap(), Some("aaaaaaaaaaaa".into()));

        let err = migrator.downgrade(&backend, &Target::Relative(-2)).unwrap_err();
        assert!(matches!(err, RunnerError::OutOfRange { .. }));
        assert_eq!(migrator.current(&backend).unwrap(), Some("aaaaaaaaaaaa".into()));
    }

    #[test]
    fn test_wrong_direction() {
        let backend = MemoryBackend::new();
        let migrator = migrator();
        migrator.upgrade(&backend, &Target::Head).unwrap();

        let err = migrator
            .upgrade(&backend, &Target::Revision("aaaaaaaaaaaa".into()))
            .unwrap_err();
        assert!(matches!(err, RunnerError::WrongDirection { .. }));
    }

    #[test]
    fn test_plan_does_not_execute() {
        let backend = MemoryBackend::new();
        let migrator = migrator();
        let plan = migrator.plan(&backend, Direction::Forward, &Target::Head).unwrap();
        assert_eq!(plan.revisions.len(), 3);
        assert_eq!(backend.transaction_count(), 0);
        assert!(backend.schema().unwrap().tables.is_empty());
    }

    #[test]
    fn test_status_partitions_applied_and_pending() {
        let backend = MemoryBackend::new();
        let migrator = migrator();
        migrator.upgrade(&backend, &Target::Relative(1)).unwrap();

        let status = migrator.status(&backend).unwrap();
        assert_eq!(status.applied, vec![RevisionId::from("aaaaaaaaaaaa")]);
        assert_eq!(
            status.pending,
            vec![RevisionId::from("bbbbbbbbbbbb"), RevisionId::from("cccccccccccc")]
        );
        assert!(!status.is_up_to_date());
    }

    #[test]
    fn test_unknown_marker() {
        let backend = MemoryBackend::new();
        backend.init_version_store().unwrap();
        backend.write_version(Some("ffffffffffff")).unwrap();
        let err = migrator().current(&backend).unwrap_err();
        assert!(matches!(err, RunnerError::Graph(GraphError::UnknownRevision(_))));
    }
}
