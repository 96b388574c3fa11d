//! `tradewind version` command group.

use clap::{Args, Subcommand};
use tabled::{Table, Tabled};

use super::{report_failure, CommandContext};

#[derive(Args)]
pub struct VersionArgs {
    #[command(subcommand)]
    command: VersionCommand,
}

#[derive(Subcommand)]
enum VersionCommand {
    /// List every version, newest first
    List,
    /// Make a version active
    Activate {
        /// Version id
        id: String,
    },
    /// Archive a non-active version
    Archive {
        /// Version id
        id: String,
    },
    /// Compare two versions
    Compare {
        /// Older version id
        from: String,
        /// Newer version id
        to: String,
    },
    /// Chronological history of one service
    History {
        /// Service name
        service: String,
    },
}

#[derive(Tabled)]
struct VersionRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Version")]
    version: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Created")]
    created: String,
    #[tabled(rename = "Services")]
    services: usize,
}

pub async fn execute(args: VersionArgs, context: &CommandContext) -> i32 {
    let plane = match super::build_plane(context).await {
        Ok(plane) => plane,
        Err(code) => return code,
    };

    match args.command {
        VersionCommand::List => {
            let rows: Vec<VersionRow> = plane
                .list_versions()
                .await
                .into_iter()
                .map(|v| VersionRow {
                    id: v.id.clone(),
                    version: v.version.clone(),
                    status: format!("{:?}", v.status).to_lowercase(),
                    created: v.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
                    services: v.services.len(),
                })
                .collect();
            if rows.is_empty() {
                println!("no versions recorded");
            } else {
                println!("{}", Table::new(rows));
            }
            0
        }
        VersionCommand::Activate { id } => match plane.activate_version(&id).await {
            Ok(previous) => {
                match previous {
                    Some(previous) => println!("activated {id} (was {previous})"),
                    None => println!("activated {id}"),
                }
                0
            }
            Err(e) => report_failure(context, &e),
        },
        VersionCommand::Archive { id } => match plane.archive_version(&id).await {
            Ok(()) => {
                println!("archived {id}");
                0
            }
            Err(e) => report_failure(context, &e),
        },
        VersionCommand::Compare { from, to } => {
            match plane.compare_versions(&from, &to).await {
                Ok(diff) => {
                    match serde_json::to_string_pretty(&diff) {
                        Ok(json) => println!("{json}"),
                        Err(e) => {
                            eprintln!("error (internal): {e}");
                            return 9;
                        }
                    }
                    0
                }
                Err(e) => report_failure(context, &e),
            }
        }
        VersionCommand::History { service } => {
            let history = plane.service_history(&service).await;
            if history.is_empty() {
                println!("no history for {service}");
                return 0;
            }
            for entry in history {
                println!(
                    "{}  {}  {}  {}",
                    entry.created_at.format("%Y-%m-%d %H:%M:%S"),
                    entry.version_id,
                    entry.service_version,
                    entry.artifact_fingerprint
                );
            }
            0
        }
    }
}
