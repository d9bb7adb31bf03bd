//! Terminal output for command results.

use owo_colors::OwoColorize;
use std::time::Duration;
use strata::migrate::{RollbackReport, RunReport, StatusEntry};
use strata::{DriftReport, GeneratedMigration, MigrationStatus, SchemaModel, StatusReport};

fn ms(duration: Duration) -> String {
    format!("{}ms", duration.as_millis())
}

pub fn analysis(model: &SchemaModel) {
    println!(
        "{} {} tables, {} views, {} functions",
        "analyzed".green().bold(),
        model.tables.len(),
        model.views.len(),
        model.functions.len()
    );
    for table in &model.tables {
        println!(
            "  {} ({} columns, {} indexes)",
            table.qualified_name(),
            table.columns.len(),
            table.indexes.len()
        );
    }
}

pub fn run_report(report: &RunReport) {
    if report.dry_run {
        if report.pending.is_empty() {
            println!("No pending migrations.");
            return;
        }
        println!("Would apply {} migration(s):", report.pending.len());
        for (i, migration) in report.pending.iter().enumerate() {
            println!("  {}. {} {}", i + 1, migration.version, migration.id);
        }
        return;
    }

    if report.pending.is_empty() {
        println!("No pending migrations.");
        return;
    }
    for applied in &report.applied {
        println!(
            "  {} {} {}",
            "✓".green(),
            applied.id,
            ms(applied.duration).dimmed()
        );
    }
    for failed in &report.failed {
        println!("  {} {}: {}", "✗".red(), failed.id, failed.error.red());
    }
    for skipped in &report.skipped {
        println!("  {} {}", "-".dimmed(), skipped.dimmed());
    }
    println!(
        "{} applied, {} failed, {} not attempted",
        report.applied.len(),
        report.failed.len(),
        report.skipped.len()
    );
}

pub fn rollback_report(report: &RollbackReport) {
    if report.targets.is_empty() {
        println!("Nothing to roll back.");
        return;
    }
    if report.dry_run {
        println!("Would roll back {} migration(s):", report.targets.len());
        for migration in &report.targets {
            println!("  {} {}", migration.version, migration.id);
        }
        return;
    }
    for done in &report.rolled_back {
        println!("  {} {} {}", "↶".green(), done.id, ms(done.duration).dimmed());
    }
    for failed in &report.failed {
        println!("  {} {}: {}", "✗".red(), failed.id, failed.error.red());
    }
}

fn status_label(entry: &StatusEntry) -> String {
    let status = entry.migration.status;
    let label = status.as_str();
    match status {
        MigrationStatus::Completed if entry.modified => format!("{} (modified)", label).yellow().to_string(),
        MigrationStatus::Completed => label.green().to_string(),
        MigrationStatus::Failed => label.red().to_string(),
        MigrationStatus::RolledBack => label.yellow().to_string(),
        MigrationStatus::Pending => label.dimmed().to_string(),
    }
}

pub fn status(report: &StatusReport) {
    if report.entries.is_empty() {
        println!("No migrations.");
        return;
    }
    for entry in &report.entries {
        let mut line = format!(
            "  {:<12} {:<40} {}",
            entry.migration.version.as_str(),
            entry.migration.id,
            status_label(entry)
        );
        if entry.missing_file {
            line.push_str(&format!(" {}", "(file missing)".red()));
        }
        println!("{}", line);
        if let Some(error) = &entry.migration.error
            && entry.migration.status == MigrationStatus::Failed
        {
            println!("      {}", error.dimmed());
        }
    }
    println!(
        "{} completed, {} pending, {} failed, {} rolled back",
        report.count(MigrationStatus::Completed),
        report.count(MigrationStatus::Pending),
        report.count(MigrationStatus::Failed),
        report.count(MigrationStatus::RolledBack)
    );
}

pub fn drift(report: &DriftReport) {
    if report.is_empty() {
        println!("{}", "No drift.".green());
        return;
    }
    for entry in &report.entries {
        let kind = format!("{:?}", entry.kind);
        let kind = if entry.kind.is_extra() {
            kind.yellow().to_string()
        } else {
            kind.red().to_string()
        };
        println!("  {:<28} {}", kind, entry.object);
    }
    println!(
        "{} missing, {} extra, {} mismatched",
        report.missing(),
        report.extra(),
        report.mismatched()
    );
}

pub fn migration_written(path: &camino::Utf8Path, migration: &GeneratedMigration) {
    println!(
        "{} {} ({} statements)",
        "wrote".green().bold(),
        path,
        migration.up.len()
    );
    for advisory in &migration.advisories {
        println!("  {} {}", "note:".yellow(), advisory);
    }
}
