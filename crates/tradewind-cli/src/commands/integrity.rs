//! `tradewind integrity` command group.

use clap::{Args, Subcommand};

use tradewind_core::ErrorKind;

use super::{exit_code, report_failure, CommandContext};

#[derive(Args)]
pub struct IntegrityArgs {
    #[command(subcommand)]
    command: IntegrityCommand,
}

#[derive(Subcommand)]
enum IntegrityCommand {
    /// Run an integrity pass over recent backups now
    RunNow,
    /// Show past integrity runs
    History,
}

pub async fn execute(args: IntegrityArgs, context: &CommandContext) -> i32 {
    let plane = match super::build_plane(context).await {
        Ok(plane) => plane,
        Err(code) => return code,
    };

    match args.command {
        IntegrityCommand::RunNow => match plane.run_integrity_tests().await {
            Ok(report) => {
                println!(
                    "integrity run {}: {} passed, {} failed",
                    report.run_id, report.passed, report.failed
                );
                for case in &report.cases {
                    println!(
                        "  {} @ {}: {}{}",
                        case.backup_id,
                        case.location_id,
                        if case.passed { "pass" } else { "FAIL" },
                        case.failure
                            .as_ref()
                            .map(|f| format!(" ({f:?})"))
                            .unwrap_or_default()
                    );
                }
                if report.failed > 0 {
                    exit_code(ErrorKind::ChecksumMismatch)
                } else {
                    0
                }
            }
            Err(e) => report_failure(context, &e),
        },
        IntegrityCommand::History => {
            let history = plane.integrity_history().await;
            if history.is_empty() {
                println!("no integrity runs recorded");
            }
            for report in history {
                println!(
                    "{}  {}  {} passed, {} failed ({} cases)",
                    report.started_at.format("%Y-%m-%d %H:%M:%S"),
                    report.run_id,
                    report.passed,
                    report.failed,
                    report.cases.len()
                );
            }
            0
        }
    }
}
