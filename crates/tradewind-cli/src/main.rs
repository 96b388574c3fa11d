use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

#[derive(Parser)]
#[command(name = "tradewind")]
#[command(version, about = "Tradewind deployment control plane CLI", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to the control-plane configuration file
    #[arg(short, long, global = true, default_value = "tradewind.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Print full error details
    #[arg(long, global = true)]
    detail: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect and manage deployment versions
    Version(commands::version::VersionArgs),

    /// Plan, execute and abort rollbacks
    Rollback(commands::rollback::RollbackArgs),

    /// Create, list and restore backups
    Backup(commands::backup::BackupArgs),

    /// Run and inspect backup integrity audits
    Integrity(commands::integrity::IntegrityArgs),

    /// Run and inspect disaster-recovery tests
    DrTest(commands::drtest::DrTestArgs),

    /// Run the scheduler tracks in the foreground
    Serve(commands::serve::ServeArgs),

    /// Show aggregated control-plane status
    Status(commands::status::StatusArgs),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_level = if cli.debug {
        "debug"
    } else if cli.verbose {
        "info"
    } else {
        "warn"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("tradewind={log_level}").into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let context = commands::CommandContext {
        config_path: cli.config,
        detail: cli.detail,
    };

    let code = match cli.command {
        Commands::Version(args) => commands::version::execute(args, &context).await,
        Commands::Rollback(args) => commands::rollback::execute(args, &context).await,
        Commands::Backup(args) => commands::backup::execute(args, &context).await,
        Commands::Integrity(args) => commands::integrity::execute(args, &context).await,
        Commands::DrTest(args) => commands::drtest::execute(args, &context).await,
        Commands::Serve(args) => commands::serve::execute(args, &context).await,
        Commands::Status(args) => commands::status::execute(args, &context).await,
    };

    std::process::exit(code);
}
