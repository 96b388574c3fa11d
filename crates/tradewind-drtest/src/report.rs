//! DR test report rendering.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{DrTestError, Result};
use crate::harness::TestExecution;

/// Supported report formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    /// Structured JSON, the canonical artifact.
    Json,
    /// Minimal human-readable HTML table.
    Html,
    /// One CSV row per scenario.
    Csv,
}

impl ReportFormat {
    /// File extension for the format.
    pub fn extension(self) -> &'static str {
        match self {
            ReportFormat::Json => "json",
            ReportFormat::Html => "html",
            ReportFormat::Csv => "csv",
        }
    }
}

impl std::str::FromStr for ReportFormat {
    type Err = DrTestError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(ReportFormat::Json),
            "html" => Ok(ReportFormat::Html),
            "csv" => Ok(ReportFormat::Csv),
            other => Err(DrTestError::InvalidScenario {
                name: "report-format".to_string(),
                reason: format!("unknown format {other:?}"),
            }),
        }
    }
}

/// Writes `execution` into `dir` once per requested format. Returns the
/// written paths.
pub async fn write_reports(
    execution: &TestExecution,
    dir: &Path,
    formats: &[ReportFormat],
) -> Result<Vec<PathBuf>> {
    tokio::fs::create_dir_all(dir).await?;
    let mut written = Vec::with_capacity(formats.len());
    for format in formats {
        let path = dir.join(format!("{}.{}", execution.id, format.extension()));
        let contents = match format {
            ReportFormat::Json => serde_json::to_vec_pretty(execution)?,
            ReportFormat::Html => render_html(execution).into_bytes(),
            ReportFormat::Csv => render_csv(execution)?,
        };
        tokio::fs::write(&path, contents).await?;
        info!(path = %path.display(), "DR report written");
        written.push(path);
    }
    Ok(written)
}

fn render_csv(execution: &TestExecution) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer
        .write_record([
            "scenario_id",
            "scenario_name",
            "status",
            "expected_recovery_ms",
            "actual_recovery_ms",
            "validations_passed",
            "validations_total",
            "issues",
        ])
        .map_err(|e| DrTestError::Io(std::io::Error::other(e)))?;
    for result in &execution.results {
        writer
            .write_record([
                result.scenario_id.clone(),
                result.scenario_name.clone(),
                format!("{:?}", result.status).to_lowercase(),
                result.expected_recovery_ms.to_string(),
                result
                    .actual_recovery_ms
                    .map(|v| v.to_string())
                    .unwrap_or_default(),
                result
                    .validations
                    .iter()
                    .filter(|v| v.passed)
                    .count()
                    .to_string(),
                result.validations.len().to_string(),
                result.issues.len().to_string(),
            ])
            .map_err(|e| DrTestError::Io(std::io::Error::other(e)))?;
    }
    writer
        .into_inner()
        .map_err(|e| DrTestError::Io(std::io::Error::other(e)))
}

fn render_html(execution: &TestExecution) -> String {
    let mut rows = String::new();
    for result in &execution.results {
        rows.push_str(&format!(
            "<tr><td>{}</td><td>{:?}</td><td>{}</td><td>{}</td><td>{}</td></tr>\n",
            result.scenario_name,
            result.status,
            result.expected_recovery_ms,
            result
                .actual_recovery_ms
                .map(|v| v.to_string())
                .unwrap_or_else(|| "-".to_string()),
            result.issues.len(),
        ));
    }
    format!(
        "<!doctype html>\n<html><head><title>DR test {id}</title></head><body>\n\
         <h1>DR test execution {id}</h1>\n\
         <p>Status: {status:?} ({passed} passed, {failed} failed, {skipped} skipped)</p>\n\
         <table border=\"1\"><tr><th>Scenario</th><th>Status</th>\
         <th>Budget (ms)</th><th>Actual (ms)</th><th>Issues</th></tr>\n{rows}</table>\n\
         </body></html>\n",
        id = execution.id,
        status = execution.status,
        passed = execution.metrics.passed,
        failed = execution.metrics.failed,
        skipped = execution.metrics.skipped,
        rows = rows,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harness::{ExecutionStatus, ScenarioStatus, TestMetrics, TestResult};
    use chrono::Utc;

    fn execution() -> TestExecution {
        TestExecution {
            id: "dr-test-report".to_string(),
            started_at: Utc::now(),
            completed_at: Some(Utc::now()),
            status: ExecutionStatus::Completed,
            results: vec![TestResult {
                scenario_id: "s1".to_string(),
                scenario_name: "Stop gateway".to_string(),
                status: ScenarioStatus::Passed,
                expected_recovery_ms: 30_000,
                actual_recovery_ms: Some(1_200),
                validations: vec![],
                issues: vec![],
            }],
            metrics: TestMetrics {
                total: 1,
                passed: 1,
                ..Default::default()
            },
        }
    }

    #[tokio::test]
    async fn writes_all_formats() {
        let dir = tempfile::tempdir().unwrap();
        let written = write_reports(
            &execution(),
            dir.path(),
            &[ReportFormat::Json, ReportFormat::Html, ReportFormat::Csv],
        )
        .await
        .unwrap();
        assert_eq!(written.len(), 3);

        let json = tokio::fs::read_to_string(dir.path().join("dr-test-report.json"))
            .await
            .unwrap();
        let parsed: TestExecution = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.results.len(), 1);

        let csv = tokio::fs::read_to_string(dir.path().join("dr-test-report.csv"))
            .await
            .unwrap();
        assert!(csv.starts_with("scenario_id,"));
        assert!(csv.contains("Stop gateway"));

        let html = tokio::fs::read_to_string(dir.path().join("dr-test-report.html"))
            .await
            .unwrap();
        assert!(html.contains("<table"));
    }

    #[test]
    fn format_parsing() {
        assert_eq!("json".parse::<ReportFormat>().unwrap(), ReportFormat::Json);
        assert_eq!("HTML".parse::<ReportFormat>().unwrap(), ReportFormat::Html);
        assert!("xml".parse::<ReportFormat>().is_err());
    }
}
