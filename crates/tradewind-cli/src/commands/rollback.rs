//! `tradewind rollback` command group.

use clap::{Args, Subcommand};

use tradewind_core::ErrorKind;

use super::{exit_code, report_failure, CommandContext};

#[derive(Args)]
pub struct RollbackArgs {
    #[command(subcommand)]
    command: RollbackCommand,
}

#[derive(Subcommand)]
enum RollbackCommand {
    /// Execute a rollback to a target version
    Run {
        /// Target version id
        target: String,
    },
    /// Plan a rollback without executing it
    DryRun {
        /// Target version id
        target: String,
    },
    /// List versions eligible as rollback targets
    Targets,
    /// Cancel the in-flight rollback
    Abort,
}

pub async fn execute(args: RollbackArgs, context: &CommandContext) -> i32 {
    let plane = match super::build_plane(context).await {
        Ok(plane) => plane,
        Err(code) => return code,
    };

    match args.command {
        RollbackCommand::Run { target } => match plane.rollback(&target).await {
            Ok(result) => {
                println!(
                    "rollback {} -> {:?} in {}ms ({}/{} groups)",
                    result.run_id,
                    result.state,
                    result.duration_ms,
                    result.completed_groups,
                    result.total_groups
                );
                for step in &result.steps {
                    println!(
                        "  step {:>2} {:<18} {:<16} {:?}{}",
                        step.step,
                        step.action,
                        step.target,
                        step.status,
                        step.error
                            .as_deref()
                            .map(|e| format!(" ({e})"))
                            .unwrap_or_default()
                    );
                }
                if let Some(validation) = &result.validation {
                    println!(
                        "validation: {}",
                        if validation.all_healthy {
                            "all services healthy"
                        } else {
                            "UNHEALTHY services present"
                        }
                    );
                }
                if result.succeeded() {
                    0
                } else {
                    let kind = result.kind.unwrap_or(ErrorKind::Internal);
                    eprintln!(
                        "error ({kind}): {}",
                        result.message.as_deref().unwrap_or("rollback failed")
                    );
                    exit_code(kind)
                }
            }
            Err(e) => report_failure(context, &e),
        },
        RollbackCommand::DryRun { target } => match plane.analyze_rollback(&target).await {
            Ok(plan) => {
                println!(
                    "{} groups, estimated {}s (sequential {}s, gain {}s)",
                    plan.groups.len(),
                    plan.estimated_duration_secs,
                    plan.sequential_duration_secs,
                    plan.parallel_gain_secs()
                );
                for group in &plan.groups {
                    let steps: Vec<String> = group
                        .instructions
                        .iter()
                        .map(|i| format!("{} {}", i.action, i.target))
                        .collect();
                    println!(
                        "  group {:>2} ({}s): {}",
                        group.index,
                        group.estimated_secs,
                        steps.join(", ")
                    );
                }
                match plane.rollback_blast_radius(&target).await {
                    Ok(radius) => {
                        let mut notes = Vec::new();
                        if radius.entire_fleet {
                            notes.push("entire fleet stops".to_string());
                        }
                        if radius.config_touched {
                            notes.push("configuration rewritten".to_string());
                        }
                        if radius.database_touched {
                            notes.push("database restored".to_string());
                        }
                        println!(
                            "blast radius: {} service(s) direct, {} dependent(s){}",
                            radius.services.len(),
                            radius.dependents.len(),
                            if notes.is_empty() {
                                String::new()
                            } else {
                                format!(" [{}]", notes.join(", "))
                            }
                        );
                    }
                    Err(e) => return report_failure(context, &e),
                }
                0
            }
            Err(e) => report_failure(context, &e),
        },
        RollbackCommand::Targets => {
            let targets = plane.list_rollback_targets().await;
            if targets.is_empty() {
                println!("no rollback targets");
            }
            for target in targets {
                println!(
                    "{}  {}  {}",
                    target.id,
                    target.version,
                    target.created_at.format("%Y-%m-%d %H:%M:%S")
                );
            }
            0
        }
        RollbackCommand::Abort => match plane.abort_rollback() {
            Ok(()) => {
                println!("abort requested");
                0
            }
            Err(e) => report_failure(context, &e),
        },
    }
}
