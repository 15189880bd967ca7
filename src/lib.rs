//! # Strata
//!
//! Versioned, reversible schema migrations: revision graphs, rename-preserving
//! operations, and a lock-guarded version marker. Ships an in-memory backend
//! and a PostgreSQL backend built on the `may` coroutine runtime.

pub mod backend;
pub mod config;
pub mod connection;
pub mod migration;
pub mod observability;

pub use backend::{Backend, BackendError, MemoryBackend, PostgresBackend};
pub use config::MigrationConfig;
pub use migration::{Migrator, Revision, RevisionId, Target};
