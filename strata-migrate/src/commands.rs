//! Command handlers
//!
//! Each handler writes human-readable output to `out` and returns an
//! `anyhow::Result`; the typed library error stays inside the `anyhow::Error`
//! so [`exit_code`](crate::exit_code) can classify it.

use anyhow::Result;
use colored::Colorize;
use std::collections::HashMap;
use std::io::Write;
use std::path::Path;
use strata::backend::Backend;
use strata::migration::{
    create_revision_file, Direction, DirectorySource, MigrationPlan, MigrationReport, Migrator,
    Operation, Revision, RevisionGraph, RevisionId, Target,
};

fn describe(id: Option<&RevisionId>) -> String {
    id.map_or_else(|| "base".to_string(), ToString::to_string)
}

/// `init` - create the version store
pub fn init(migrator: &Migrator, backend: &dyn Backend, out: &mut dyn Write) -> Result<()> {
    migrator.init(backend)?;
    writeln!(out, "{} version store ready", "✓".green())?;
    Ok(())
}

/// `migrate -m <message>` - author a new revision file
pub fn migrate(migrations_dir: &Path, message: &str, out: &mut dyn Write) -> Result<()> {
    let file = create_revision_file(migrations_dir, message)?;
    writeln!(
        out,
        "{} generated revision {} ({})",
        "✓".green(),
        file.revision.id.to_string().yellow(),
        file.path.display()
    )?;
    writeln!(out, "  parent: {}", describe(file.revision.parent_id.as_ref()))?;
    writeln!(out, "  edit the file to fill in `up` and `down`")?;
    Ok(())
}

/// `upgrade [target] [--dry-run]`
pub fn upgrade(
    migrator: &Migrator,
    backend: &dyn Backend,
    target: &str,
    dry_run: bool,
    out: &mut dyn Write,
) -> Result<()> {
    run(migrator, backend, Direction::Forward, target, dry_run, out)
}

/// `downgrade <target> [--dry-run]`
pub fn downgrade(
    migrator: &Migrator,
    backend: &dyn Backend,
    target: &str,
    dry_run: bool,
    out: &mut dyn Write,
) -> Result<()> {
    run(migrator, backend, Direction::Backward, target, dry_run, out)
}

fn run(
    migrator: &Migrator,
    backend: &dyn Backend,
    direction: Direction,
    target: &str,
    dry_run: bool,
    out: &mut dyn Write,
) -> Result<()> {
    let target: Target = target.parse()?;

    if dry_run {
        let plan = migrator.plan(backend, direction, &target)?;
        return print_plan(&plan, out);
    }

    let report = match direction {
        Direction::Forward => migrator.upgrade(backend, &target)?,
        Direction::Backward => migrator.downgrade(backend, &target)?,
    };
    print_report(&report, out)
}

fn operations_in_order(revision: &Revision, direction: Direction) -> Vec<&Operation> {
    match direction {
        Direction::Forward => revision.operations_up.iter().collect(),
        Direction::Backward => revision.operations_down.iter().rev().collect(),
    }
}

fn print_plan(plan: &MigrationPlan, out: &mut dyn Write) -> Result<()> {
    if plan.is_empty() {
        writeln!(out, "Already at {}, nothing to {}", describe(plan.to.as_ref()), plan.direction)?;
        return Ok(());
    }

    writeln!(
        out,
        "Would {} {} -> {} ({} revision(s)):",
        plan.direction,
        describe(plan.from.as_ref()),
        describe(plan.to.as_ref()),
        plan.revisions.len()
    )?;
    for (i, revision) in plan.revisions.iter().enumerate() {
        writeln!(
            out,
            "  {}. {} {}",
            i + 1,
            revision.id.to_string().yellow(),
            revision.message
        )?;
        for operation in operations_in_order(revision, plan.direction) {
            writeln!(out, "       {operation}")?;
        }
    }
    Ok(())
}

fn print_report(report: &MigrationReport, out: &mut dyn Write) -> Result<()> {
    if report.is_noop() {
        writeln!(
            out,
            "{} already at {}",
            "✓".green(),
            describe(report.to.as_ref())
        )?;
        return Ok(());
    }

    for step in &report.steps {
        writeln!(
            out,
            "{} {} {} {} ({:.1?})",
            "✓".green(),
            report.direction,
            step.revision.to_string().yellow(),
            step.message,
            step.elapsed
        )?;
        for warning in &step.warnings {
            writeln!(out, "    {} {warning}", "⚠ destructive:".red())?;
        }
    }
    writeln!(out, "Now at {}", describe(report.to.as_ref()).bold())?;
    Ok(())
}

/// `current` - print the applied revision id, or `none`
pub fn current(migrator: &Migrator, backend: &dyn Backend, out: &mut dyn Write) -> Result<()> {
    match migrator.current(backend)? {
        Some(id) => {
            let message = migrator
                .graph()
                .get(id.as_str())
                .map(|r| r.message.as_str())
                .unwrap_or_default();
            let heads = migrator.graph().heads();
            let marker = if heads.len() == 1 && heads[0].id == id {
                " (head)"
            } else {
                ""
            };
            writeln!(out, "{}{marker} {message}", id.to_string().yellow())?;
        }
        None => writeln!(out, "none")?,
    }
    Ok(())
}

/// `history [--verbose]` - list revisions from root to head
pub fn history(migrations_dir: &Path, verbose: bool, out: &mut dyn Write) -> Result<()> {
    let files = DirectorySource::new(migrations_dir).discover()?;
    let details: HashMap<RevisionId, (String, String)> = files
        .iter()
        .map(|f| {
            (
                f.revision.id.clone(),
                (f.path.display().to_string(), f.checksum.clone()),
            )
        })
        .collect();
    let graph = RevisionGraph::build(files.into_iter().map(|f| f.revision).collect())?;

    if graph.is_empty() {
        writeln!(out, "no revisions in {}", migrations_dir.display())?;
        return Ok(());
    }

    let heads: Vec<&RevisionId> = graph.heads().into_iter().map(|r| &r.id).collect();
    for revision in graph.history() {
        let head = if heads.contains(&&revision.id) { " (head)" } else { "" };
        writeln!(
            out,
            "{} -> {}{head}, {}",
            describe(revision.parent_id.as_ref()),
            revision.id.to_string().yellow(),
            revision.message
        )?;
        if verbose {
            if let Some((path, checksum)) = details.get(&revision.id) {
                writeln!(out, "    path:     {path}")?;
                writeln!(out, "    checksum: {checksum}")?;
            }
            writeln!(
                out,
                "    ops:      {} up, {} down",
                revision.operations_up.len(),
                revision.operations_down.len()
            )?;
        }
    }
    Ok(())
}

/// `status` - applied and pending revisions
pub fn status(migrator: &Migrator, backend: &dyn Backend, out: &mut dyn Write) -> Result<()> {
    let status = migrator.status(backend)?;

    writeln!(out, "Current: {}", describe(status.current.as_ref()).bold())?;
    let heads: Vec<String> = status.heads.iter().map(ToString::to_string).collect();
    writeln!(
        out,
        "Head:    {}",
        if heads.is_empty() {
            "none".to_string()
        } else {
            heads.join(", ")
        }
    )?;

    writeln!(out, "\nApplied ({}):", status.applied.len())?;
    for id in &status.applied {
        writeln!(out, "  {} {id}", "✓".green())?;
    }
    writeln!(out, "\nPending ({}):", status.pending.len())?;
    for id in &status.pending {
        writeln!(out, "  {} {id}", "…".yellow())?;
    }

    if status.is_up_to_date() {
        writeln!(out, "\n{}", "Up to date".green())?;
    }
    Ok(())
}
