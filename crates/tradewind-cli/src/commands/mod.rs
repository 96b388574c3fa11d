//! CLI command implementations.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tradewind_control::{ControlPlane, ControlPlaneConfig, PortSet};
use tradewind_core::{ErrorKind, Kinded};
use tradewind_ports::{GcmCrypto, SimProbe, SimSupervisor, SystemClock};

pub mod backup;
pub mod drtest;
pub mod integrity;
pub mod rollback;
pub mod serve;
pub mod status;
pub mod version;

/// Shared invocation context.
pub struct CommandContext {
    /// Configuration file path.
    pub config_path: PathBuf,
    /// Print full error chains.
    pub detail: bool,
}

/// Stable exit codes per error kind.
pub fn exit_code(kind: ErrorKind) -> i32 {
    match kind {
        ErrorKind::InvalidArgument
        | ErrorKind::NotFound
        | ErrorKind::AlreadyExists
        | ErrorKind::AlreadyActive => 2,
        ErrorKind::OperationBusy | ErrorKind::RollbackInProgress => 3,
        ErrorKind::DeadlineExceeded | ErrorKind::Timeout => 4,
        ErrorKind::ServiceValidationFailed | ErrorKind::ServiceStartFailed => 5,
        ErrorKind::ChecksumMismatch
        | ErrorKind::DecryptFailed
        | ErrorKind::DecompressFailed
        | ErrorKind::MetadataInvalid => 6,
        ErrorKind::InsufficientCopies => 7,
        _ => 9,
    }
}

/// Prints a one-line failure summary (plus detail when requested) and
/// returns the mapped exit code.
pub fn report_failure<E: Kinded + std::fmt::Display + std::fmt::Debug>(
    context: &CommandContext,
    error: &E,
) -> i32 {
    eprintln!("error ({}): {error}", error.kind());
    if context.detail {
        eprintln!("{error:#?}");
    }
    exit_code(error.kind())
}

/// Loads configuration and composes a fresh control plane.
///
/// The binary wires the built-in simulation supervisor and probe; real
/// deployments embed the library and supply their production adapters
/// through [`PortSet`].
pub async fn build_plane(context: &CommandContext) -> Result<Arc<ControlPlane>, i32> {
    let config = ControlPlaneConfig::load(&context.config_path).map_err(|e| {
        eprintln!("error ({}): {e}", e.kind());
        exit_code(e.kind())
    })?;

    let services = discover_services(&config.version_store.root).await;
    let supervisor = Arc::new(SimSupervisor::new(services));
    let probe = Arc::new(SimProbe::attached(supervisor.clone()));

    ControlPlane::new(
        config,
        PortSet {
            supervisor,
            probe,
            clock: Arc::new(SystemClock),
            crypto: Arc::new(GcmCrypto),
            remote_store_factory: None,
        },
    )
    .await
    .map_err(|e| {
        eprintln!("error ({}): {e}", e.kind());
        exit_code(e.kind())
    })
}

/// Collects every service name mentioned by persisted version records so
/// the simulated supervisor knows the fleet.
async fn discover_services(version_root: &Path) -> Vec<String> {
    let mut names = std::collections::BTreeSet::new();
    if let Ok(mut entries) = tokio::fs::read_dir(version_root).await {
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if path.extension().map(|e| e != "json").unwrap_or(true) {
                continue;
            }
            if let Ok(data) = tokio::fs::read(&path).await {
                if let Ok(value) = serde_json::from_slice::<serde_json::Value>(&data) {
                    if let Some(services) = value.get("services").and_then(|s| s.as_array()) {
                        for service in services {
                            if let Some(name) = service.get("name").and_then(|n| n.as_str()) {
                                names.insert(name.to_string());
                            }
                        }
                    }
                }
            }
        }
    }
    names.into_iter().collect()
}
