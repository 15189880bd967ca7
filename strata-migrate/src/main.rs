//! Strata Migration CLI Tool
//!
//! Command-line interface for authoring revision files and moving a
//! PostgreSQL database between revisions.

use anyhow::Context;
use clap::Parser;
use colored::Colorize;
use std::io::{self, Write};
use std::process;
use strata::connection::redact;
use strata::migration::{DirectorySource, Migrator};
use strata::{MigrationConfig, PostgresBackend};
use strata_migrate::{commands, exit_code, Cli, Commands, EXIT_FAILURE, EXIT_SUCCESS};

fn main() {
    let cli = Cli::parse();

    let filter = if cli.quiet {
        "error"
    } else if cli.verbose {
        "debug"
    } else {
        "info"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter)).init();

    dotenv::dotenv().ok();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{} {e:#}", "Error:".red());
            process::exit(EXIT_FAILURE);
        }
    };

    let stdout = io::stdout();
    let mut out = stdout.lock();
    let result = execute(&cli, &config, &mut out);
    let _ = out.flush();

    match result {
        Ok(()) => process::exit(EXIT_SUCCESS),
        Err(e) => {
            eprintln!("{} {e:#}", "Error:".red());
            process::exit(exit_code(&e));
        }
    }
}

/// Config file and env, then command-line overrides, then `DATABASE_URL`
fn load_config(cli: &Cli) -> anyhow::Result<MigrationConfig> {
    let mut config = MigrationConfig::load().context("failed to load configuration")?;

    if let Some(url) = &cli.database_url {
        config.database_url.clone_from(url);
    } else if std::env::var("STRATA__MIGRATION__DATABASE_URL").is_err() {
        if let Ok(url) = std::env::var("DATABASE_URL") {
            config.database_url = url;
        }
    }
    if let Some(dir) = &cli.migrations_dir {
        config.migrations_dir.clone_from(dir);
    }
    if let Some(seconds) = cli.lock_timeout {
        config.lock_timeout_seconds = seconds;
    }
    if cli.strict {
        config.strict = true;
    }
    Ok(config)
}

fn execute(cli: &Cli, config: &MigrationConfig, out: &mut dyn Write) -> anyhow::Result<()> {
    if !cli.command.needs_database() {
        return match &cli.command {
            Commands::Migrate { message } => commands::migrate(&config.migrations_dir, message, out),
            _ => commands::history(&config.migrations_dir, cli.verbose, out),
        };
    }

    let migrator = Migrator::from_source(&DirectorySource::new(&config.migrations_dir))?
        .with_config(config);

    log::debug!("connecting to {}", redact(&config.database_url));
    let backend = PostgresBackend::connect(&config.database_url)
        .with_context(|| format!("failed to connect to {}", redact(&config.database_url)))?;

    match &cli.command {
        Commands::Init => commands::init(&migrator, &backend, out),
        Commands::Upgrade { target, dry_run } => {
            commands::upgrade(&migrator, &backend, target, *dry_run, out)
        }
        Commands::Downgrade { target, dry_run } => {
            commands::downgrade(&migrator, &backend, target, *dry_run, out)
        }
        Commands::Current => commands::current(&migrator, &backend, out),
        Commands::Status => commands::status(&migrator, &backend, out),
        Commands::Migrate { .. } | Commands::History => Ok(()),
    }
}
