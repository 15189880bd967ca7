//! Versioned, reversible schema migrations
//!
//! A migration set is a tree of [`Revision`]s linked by `parent_id`. Each
//! revision carries forward (`up`) and backward (`down`) [`Operation`]s. The
//! [`Migrator`] walks the [`RevisionGraph`] from the revision recorded in the
//! version store to a target, applying one revision per transaction through
//! a [`Backend`](crate::backend::Backend).
//!
//! # Example
//!
//! ```rust
//! use strata::backend::MemoryBackend;
//! use strata::migration::{
//!     ColumnSpec, ColumnType, Migrator, Operation, Revision, StaticSource, Target,
//! };
//!
//! let create = Revision::reversible(
//!     "ae1027a6acf0".into(),
//!     None,
//!     "create department",
//!     vec![Operation::CreateTable {
//!         table: "department".into(),
//!         columns: vec![ColumnSpec::new("id", ColumnType::Integer).primary_key()],
//!     }],
//! )
//! .expect("create table is reversible");
//!
//! let backend = MemoryBackend::new();
//! let migrator = Migrator::from_source(&StaticSource::new(vec![create]))?;
//! let report = migrator.upgrade(&backend, &Target::Head)?;
//! assert_eq!(report.steps.len(), 1);
//! # Ok::<(), strata::migration::RunnerError>(())
//! ```

pub mod checksum;
pub mod error;
pub mod executor;
pub mod file;
pub mod graph;
pub mod lock;
pub mod migrator;
pub mod operation;
pub mod revision;
pub mod status;
pub mod version_store;

pub use checksum::checksum;
pub use error::{AuthoringError, ExecutorError, GraphError, LoadError, RunnerError};
pub use executor::Executor;
pub use file::{
    create_revision_file, DirectorySource, RevisionFile, RevisionSource, StaticSource,
};
pub use graph::{Direction, MigrationPath, RevisionGraph};
pub use lock::MigrationLockGuard;
pub use migrator::{Migrator, Target};
pub use operation::{ColumnSpec, ColumnType, ConstraintKind, ConstraintSpec, Operation};
pub use revision::{Revision, RevisionId};
pub use status::{MigrationPlan, MigrationReport, MigrationStatus, StepReport};
pub use version_store::VersionStore;
