//! `tradewind status`: aggregated control-plane status.

use clap::Args;
use tabled::{Table, Tabled};

use super::CommandContext;

#[derive(Args)]
pub struct StatusArgs {
    /// Emit machine-readable JSON instead of tables
    #[arg(long)]
    json: bool,
}

#[derive(Tabled)]
struct ProcessRow {
    #[tabled(rename = "Service")]
    service: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "PID")]
    pid: String,
    #[tabled(rename = "Uptime (s)")]
    uptime: u64,
}

pub async fn execute(args: StatusArgs, context: &CommandContext) -> i32 {
    let plane = match super::build_plane(context).await {
        Ok(plane) => plane,
        Err(code) => return code,
    };

    let status = plane.system_status().await;

    if args.json {
        match serde_json::to_string_pretty(&status) {
            Ok(json) => {
                println!("{json}");
                return 0;
            }
            Err(e) => {
                eprintln!("error (internal): {e}");
                return 9;
            }
        }
    }

    println!(
        "active version : {}",
        status.active_version.as_deref().unwrap_or("none")
    );
    println!("versions held  : {}", status.version_count);
    println!("executor state : {:?}", status.executor_state);
    println!(
        "backups        : {} visible, {} under-replicated",
        status.backups_visible, status.under_replicated
    );
    if let Some((passed, failed)) = status.last_integrity {
        println!("last integrity : {passed} passed, {failed} failed");
    }
    if let Some((passed, failed)) = status.last_dr_test {
        println!("last DR test   : {passed} passed, {failed} failed");
    }
    println!("dropped events : {}", status.dropped_events);

    println!("\nstorage locations:");
    for location in &status.locations {
        println!(
            "  {} (priority {}, {})",
            location.id,
            location.priority,
            if location.enabled { "enabled" } else { "disabled" }
        );
    }

    if !status.processes.is_empty() {
        let rows: Vec<ProcessRow> = status
            .processes
            .iter()
            .map(|p| ProcessRow {
                service: p.name.clone(),
                status: format!("{:?}", p.status).to_lowercase(),
                pid: p.pid.map(|pid| pid.to_string()).unwrap_or_default(),
                uptime: p.uptime_secs,
            })
            .collect();
        println!("\n{}", Table::new(rows));
    }

    let recent = plane.recent_events(5);
    if !recent.is_empty() {
        println!("\nrecent events:");
        for entry in recent {
            println!(
                "  {}  {}",
                entry.observed_at.format("%H:%M:%S"),
                entry.event.label()
            );
        }
    }

    0
}
