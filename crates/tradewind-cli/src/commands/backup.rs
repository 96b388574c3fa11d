//! `tradewind backup` command group.

use std::path::PathBuf;

use clap::{Args, Subcommand};
use tabled::{Table, Tabled};

use tradewind_core::ErrorKind;

use super::{exit_code, report_failure, CommandContext};

#[derive(Args)]
pub struct BackupArgs {
    #[command(subcommand)]
    command: BackupCommand,
}

#[derive(Subcommand)]
enum BackupCommand {
    /// Create and replicate a full backup now
    RunNow,
    /// List backups visible at each storage location
    List,
    /// Restore a backup
    Restore {
        /// Backup id
        backup_id: String,
        /// Directory to restore into
        #[arg(long)]
        target: Option<PathBuf>,
    },
    /// Apply retention cleanup now
    Cleanup,
}

#[derive(Tabled)]
struct BackupRow {
    #[tabled(rename = "Location")]
    location: String,
    #[tabled(rename = "Backup")]
    backup: String,
    #[tabled(rename = "Created")]
    created: String,
    #[tabled(rename = "Size")]
    size: u64,
    #[tabled(rename = "Files")]
    files: usize,
    #[tabled(rename = "Warning")]
    warning: String,
}

pub async fn execute(args: BackupArgs, context: &CommandContext) -> i32 {
    let plane = match super::build_plane(context).await {
        Ok(plane) => plane,
        Err(code) => return code,
    };

    match args.command {
        BackupCommand::RunNow => match plane.create_backup().await {
            Ok((record, outcome)) => {
                println!(
                    "backup {} created: {} files, {} bytes encrypted, ratio {:.2}",
                    record.id,
                    record.source_files.len(),
                    record.encrypted_size,
                    record.compression_ratio
                );
                println!(
                    "replicated to {} location(s): {}",
                    outcome.copies.len(),
                    outcome.copies.join(", ")
                );
                for failure in &outcome.failures {
                    eprintln!("  failed at {}: {}", failure.location_id, failure.error);
                }
                if outcome.insufficient {
                    eprintln!(
                        "error ({}): only {} of {} required copies written",
                        ErrorKind::InsufficientCopies,
                        outcome.copies.len(),
                        outcome.min_copies
                    );
                    return exit_code(ErrorKind::InsufficientCopies);
                }
                0
            }
            Err(e) => report_failure(context, &e),
        },
        BackupCommand::List => {
            let mut rows = Vec::new();
            for listing in plane.list_backups().await {
                if let Some(error) = &listing.error {
                    eprintln!("location {} unavailable: {error}", listing.location_id);
                }
                for record in &listing.records {
                    rows.push(BackupRow {
                        location: listing.location_id.clone(),
                        backup: record.id.clone(),
                        created: record.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
                        size: record.encrypted_size,
                        files: record.source_files.len(),
                        warning: if record.replication_warning {
                            "insufficient-copies".to_string()
                        } else {
                            String::new()
                        },
                    });
                }
            }
            if rows.is_empty() {
                println!("no backups visible");
            } else {
                println!("{}", Table::new(rows));
            }
            0
        }
        BackupCommand::Restore { backup_id, target } => {
            match plane.restore_backup(&backup_id, target).await {
                Ok(restored) => {
                    println!("restored {} file(s) from {backup_id}", restored.len());
                    0
                }
                Err(e) => report_failure(context, &e),
            }
        }
        BackupCommand::Cleanup => match plane.cleanup_backups().await {
            Ok(report) => {
                println!("cleanup removed {} backup(s)", report.total_deleted());
                for location in &report.locations {
                    if !location.skipped_corrupt.is_empty() {
                        eprintln!(
                            "  {}: skipped {} corrupt side-car(s)",
                            location.location_id,
                            location.skipped_corrupt.len()
                        );
                    }
                    if let Some(error) = &location.error {
                        eprintln!("  {}: {error}", location.location_id);
                    }
                }
                0
            }
            Err(e) => report_failure(context, &e),
        },
    }
}
