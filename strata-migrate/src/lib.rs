//! Strata migration CLI
//!
//! Argument parsing and command handlers live here so they can be driven from
//! tests with an in-memory backend; `main.rs` only wires up logging,
//! configuration and the PostgreSQL connection.

pub mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use strata::migration::{AuthoringError, ExecutorError, GraphError, RunnerError};

pub const EXIT_SUCCESS: i32 = 0;
/// Configuration, IO, connection and revision-file failures
pub const EXIT_FAILURE: i32 = 1;
pub const EXIT_GRAPH: i32 = 2;
pub const EXIT_EXECUTOR: i32 = 3;
/// Orchestration failures: out of range, concurrent migration, wrong direction
pub const EXIT_RUNNER: i32 = 4;

#[derive(Debug, Parser)]
#[command(name = "strata-migrate")]
#[command(about = "Versioned schema migration tool")]
#[command(version)]
pub struct Cli {
    /// Database connection URL
    #[arg(long, global = true)]
    pub database_url: Option<String>,

    /// Revision files directory
    #[arg(long, global = true)]
    pub migrations_dir: Option<PathBuf>,

    /// Seconds to wait for the migration lock
    #[arg(long, global = true)]
    pub lock_timeout: Option<u64>,

    /// Reject destructive operations instead of warning
    #[arg(long, global = true)]
    pub strict: bool,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Quiet output (errors only)
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Create the version store (idempotent)
    Init,

    /// Create a new, empty revision file on top of the current head
    #[command(alias = "revision")]
    Migrate {
        /// Revision message
        #[arg(short, long)]
        message: String,
    },

    /// Upgrade to a later revision
    Upgrade {
        /// `head`, a revision id, or `+N`
        #[arg(default_value = "head", allow_hyphen_values = true)]
        target: String,

        /// Show what would be applied without running it
        #[arg(long)]
        dry_run: bool,
    },

    /// Revert to an earlier revision
    Downgrade {
        /// `base`, a revision id, or `-N`
        #[arg(allow_hyphen_values = true)]
        target: String,

        /// Show what would be reverted without running it
        #[arg(long)]
        dry_run: bool,
    },

    /// Show the current revision
    Current,

    /// List revisions from root to head (`--verbose` adds paths and checksums)
    History,

    /// Show applied and pending revisions
    Status,
}

impl Commands {
    /// Whether the command talks to the database
    #[must_use]
    pub fn needs_database(&self) -> bool {
        !matches!(self, Commands::Migrate { .. } | Commands::History)
    }
}

/// Process exit code for a failed command
#[must_use]
pub fn exit_code(err: &anyhow::Error) -> i32 {
    if let Some(e) = err.downcast_ref::<RunnerError>() {
        return match e {
            RunnerError::Graph(_) => EXIT_GRAPH,
            RunnerError::StepFailed { .. } => EXIT_EXECUTOR,
            RunnerError::Load(_) | RunnerError::Backend(_) => EXIT_FAILURE,
            RunnerError::OutOfRange { .. }
            | RunnerError::ConcurrentMigration { .. }
            | RunnerError::WrongDirection { .. } => EXIT_RUNNER,
        };
    }
    if err.downcast_ref::<GraphError>().is_some() {
        return EXIT_GRAPH;
    }
    if let Some(AuthoringError::Graph(_)) = err.downcast_ref::<AuthoringError>() {
        return EXIT_GRAPH;
    }
    if err.downcast_ref::<ExecutorError>().is_some() {
        return EXIT_EXECUTOR;
    }
    EXIT_FAILURE
}
