//! `tradewind dr-test` command group.

use clap::{Args, Subcommand};

use tradewind_core::ErrorKind;
use tradewind_drtest::ExecutionStatus;

use super::{exit_code, report_failure, CommandContext};

#[derive(Args)]
pub struct DrTestArgs {
    #[command(subcommand)]
    command: DrTestCommand,
}

#[derive(Subcommand)]
enum DrTestCommand {
    /// Run the configured DR scenarios now
    RunNow,
    /// Show the most recent execution
    Status,
    /// Print one past execution as JSON
    Report {
        /// Execution id
        exec_id: String,
    },
}

pub async fn execute(args: DrTestArgs, context: &CommandContext) -> i32 {
    let plane = match super::build_plane(context).await {
        Ok(plane) => plane,
        Err(code) => return code,
    };

    match args.command {
        DrTestCommand::RunNow => match plane.run_dr_test().await {
            Ok(execution) => {
                println!(
                    "DR execution {}: {:?} ({} passed, {} failed, {} skipped)",
                    execution.id,
                    execution.status,
                    execution.metrics.passed,
                    execution.metrics.failed,
                    execution.metrics.skipped
                );
                for result in &execution.results {
                    println!(
                        "  {} -> {:?}{}",
                        result.scenario_name,
                        result.status,
                        result
                            .actual_recovery_ms
                            .map(|ms| format!(" (recovered in {ms}ms)"))
                            .unwrap_or_default()
                    );
                    for issue in &result.issues {
                        println!("      [{:?}] {}", issue.severity, issue.description);
                    }
                }
                if execution.status == ExecutionStatus::Completed {
                    0
                } else {
                    exit_code(ErrorKind::ServiceValidationFailed)
                }
            }
            Err(e) => report_failure(context, &e),
        },
        DrTestCommand::Status => {
            match plane.dr_test_status().await {
                Some(execution) => {
                    println!(
                        "{}  {:?}  started {}  {} passed, {} failed",
                        execution.id,
                        execution.status,
                        execution.started_at.format("%Y-%m-%d %H:%M:%S"),
                        execution.metrics.passed,
                        execution.metrics.failed
                    );
                }
                None => println!("no DR test executions recorded"),
            }
            0
        }
        DrTestCommand::Report { exec_id } => match plane.dr_test_report(&exec_id).await {
            Ok(execution) => match serde_json::to_string_pretty(&execution) {
                Ok(json) => {
                    println!("{json}");
                    0
                }
                Err(e) => {
                    eprintln!("error (internal): {e}");
                    9
                }
            },
            Err(e) => report_failure(context, &e),
        },
    }
}
