//! Scheduled-job adapters binding the scheduler tracks to the facade.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::info;

use tradewind_backup::{JobFailure, ScheduledJob};
use tradewind_core::Kinded;

use crate::plane::ControlPlane;

fn failure_of<E: Kinded + std::fmt::Display>(error: &E) -> JobFailure {
    JobFailure {
        kind: error.kind(),
        message: error.to_string(),
    }
}

/// Daily track: full backup plus retention cleanup.
pub struct DailyBackupJob {
    plane: Arc<ControlPlane>,
}

impl DailyBackupJob {
    /// Binds the job to the facade.
    pub fn new(plane: Arc<ControlPlane>) -> Self {
        Self { plane }
    }
}

#[async_trait]
impl ScheduledJob for DailyBackupJob {
    async fn run(&self, _cancel: &CancellationToken) -> Result<(), JobFailure> {
        let (record, outcome) = self
            .plane
            .create_backup()
            .await
            .map_err(|e| failure_of(&e))?;
        info!(
            backup_id = %record.id,
            copies = outcome.copies.len(),
            "scheduled backup complete"
        );

        let cleanup = self
            .plane
            .cleanup_backups()
            .await
            .map_err(|e| failure_of(&e))?;
        if cleanup.total_deleted() > 0 {
            info!(deleted = cleanup.total_deleted(), "retention cleanup removed backups");
        }
        Ok(())
    }
}

/// Weekly track: integrity pass over recent backups.
pub struct WeeklyIntegrityJob {
    plane: Arc<ControlPlane>,
}

impl WeeklyIntegrityJob {
    /// Binds the job to the facade.
    pub fn new(plane: Arc<ControlPlane>) -> Self {
        Self { plane }
    }
}

#[async_trait]
impl ScheduledJob for WeeklyIntegrityJob {
    async fn run(&self, _cancel: &CancellationToken) -> Result<(), JobFailure> {
        let report = self
            .plane
            .run_integrity_tests()
            .await
            .map_err(|e| failure_of(&e))?;
        info!(
            run_id = %report.run_id,
            passed = report.passed,
            failed = report.failed,
            "scheduled integrity run complete"
        );
        Ok(())
    }
}

/// Monthly track: configured DR scenarios.
pub struct MonthlyDrTestJob {
    plane: Arc<ControlPlane>,
}

impl MonthlyDrTestJob {
    /// Binds the job to the facade.
    pub fn new(plane: Arc<ControlPlane>) -> Self {
        Self { plane }
    }
}

#[async_trait]
impl ScheduledJob for MonthlyDrTestJob {
    async fn run(&self, _cancel: &CancellationToken) -> Result<(), JobFailure> {
        let execution = self
            .plane
            .run_dr_test()
            .await
            .map_err(|e| failure_of(&e))?;
        info!(
            execution_id = %execution.id,
            status = ?execution.status,
            "scheduled DR test complete"
        );
        Ok(())
    }
}
