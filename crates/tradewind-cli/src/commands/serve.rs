//! `tradewind serve`: run the scheduler tracks in the foreground.

use clap::Args;
use tracing::info;

use tradewind_events::ControlEvent;

use super::{report_failure, CommandContext};

#[derive(Args)]
pub struct ServeArgs {
    /// Print every control-plane event to stdout
    #[arg(long)]
    print_events: bool,
}

pub async fn execute(args: ServeArgs, context: &CommandContext) -> i32 {
    let plane = match super::build_plane(context).await {
        Ok(plane) => plane,
        Err(code) => return code,
    };

    let handle = match plane.start_scheduler() {
        Ok(handle) => handle,
        Err(e) => return report_failure(context, &e),
    };
    info!("scheduler tracks running; press ctrl-c to stop");

    let mut events = plane.subscribe("serve");
    let printer = args.print_events;
    let event_task = tokio::spawn(async move {
        while let Some(event) = events.next().await {
            if printer {
                println!("[event] {}", describe(&event));
            }
        }
    });

    if tokio::signal::ctrl_c().await.is_err() {
        eprintln!("error (internal): failed to listen for shutdown signal");
        return 9;
    }
    info!("shutting down scheduler tracks");
    handle.shutdown().await;
    event_task.abort();
    0
}

fn describe(event: &ControlEvent) -> String {
    match event {
        ControlEvent::ScheduleFired { track, occurrence } => {
            format!("{} fired for {occurrence}", track)
        }
        ControlEvent::ScheduleFailed {
            track,
            kind,
            message,
        } => format!("{track} failed ({kind}): {message}"),
        ControlEvent::BackupCompleted {
            backup_id, copies, ..
        } => format!("backup {backup_id} replicated to {copies} location(s)"),
        other => other.label().to_string(),
    }
}
