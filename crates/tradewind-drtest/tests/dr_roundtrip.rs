//! End-to-end DR harness round-trip against the simulated fleet.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use tradewind_drtest::{
    Assertion, DataLossClass, DrTestConfig, DrTestError, DrTestHarness, ExecutionStatus,
    ExpectedOutcome, FailureKind, ProbeMetric, ReportFormat, Scenario, ScenarioStatus,
    TestExecution, ValidationStep,
};
use tradewind_events::EventBus;
use tradewind_ports::{SimProbe, SimSupervisor, Supervisor};
use tradewind_rollback::{ActionConfig, ExecutorConfig, PortActionHandler, RollbackExecutor};
use tradewind_versions::{
    NewVersion, RetentionPolicy, RollbackPlan, ServiceRecord, SystemDependencies, VersionMetadata,
    VersionStore,
};

struct World {
    harness: Arc<DrTestHarness>,
    supervisor: Arc<SimSupervisor>,
    report_dir: tempfile::TempDir,
    _dirs: Vec<tempfile::TempDir>,
}

fn service(name: &str) -> ServiceRecord {
    ServiceRecord {
        name: name.to_string(),
        version: "1.0".to_string(),
        artifact_fingerprint: format!("sha256:{name}"),
        config_fingerprint: format!("sha256:{name}-cfg"),
        depends_on: vec![],
        health_endpoint: Some(format!("http://localhost/{name}/health")),
        startup_timeout_secs: 30,
    }
}

async fn world() -> World {
    let store_dir = tempfile::tempdir().unwrap();
    let snap_dir = tempfile::tempdir().unwrap();
    let work_dir = tempfile::tempdir().unwrap();
    let report_dir = tempfile::tempdir().unwrap();

    let services = vec![service("order-gateway")];
    let versions = Arc::new(
        VersionStore::open(store_dir.path(), 10, RetentionPolicy::NeverDelete)
            .await
            .unwrap(),
    );

    let config_snapshot = snap_dir.path().join("config");
    tokio::fs::create_dir_all(&config_snapshot).await.unwrap();
    tokio::fs::write(config_snapshot.join("app.toml"), b"mode = \"live\"")
        .await
        .unwrap();
    let mut artifact_snapshots = BTreeMap::new();
    let artifact_dir = snap_dir.path().join("order-gateway");
    tokio::fs::create_dir_all(&artifact_dir).await.unwrap();
    tokio::fs::write(artifact_dir.join("binary"), b"gateway-v1")
        .await
        .unwrap();
    artifact_snapshots.insert("order-gateway".to_string(), artifact_dir);

    let plan = RollbackPlan::standard(
        &services,
        Some(config_snapshot),
        artifact_snapshots,
        Some(snap_dir.path().to_path_buf()),
    )
    .unwrap();

    let version = versions
        .create(NewVersion {
            version: "2024.18.2".to_string(),
            services,
            metadata: VersionMetadata::default(),
            dependencies: SystemDependencies::default(),
            rollback_plan: plan,
        })
        .await
        .unwrap();
    versions.activate(&version.id).await.unwrap();

    let supervisor = Arc::new(
        SimSupervisor::new(["order-gateway"]).with_launch_delay(Duration::from_millis(50)),
    );
    supervisor.start_all().await.unwrap();
    let probe = Arc::new(SimProbe::attached(supervisor.clone()));

    let handler = Arc::new(PortActionHandler::new(
        supervisor.clone(),
        probe.clone(),
        ActionConfig {
            graceful_shutdown: Duration::from_secs(2),
            probe_poll_interval: Duration::from_millis(50),
            install_root: work_dir.path().join("services"),
            config_root: work_dir.path().join("config"),
        },
    ));

    let bus = EventBus::new(256);
    let executor = Arc::new(RollbackExecutor::new(
        versions.clone(),
        supervisor.clone(),
        probe.clone(),
        handler,
        bus.clone(),
        ExecutorConfig::default(),
    ));

    let harness = Arc::new(DrTestHarness::new(
        executor,
        versions,
        supervisor.clone(),
        probe,
        bus,
        DrTestConfig {
            dry_run: false,
            report_dir: report_dir.path().to_path_buf(),
            report_formats: vec![ReportFormat::Json, ReportFormat::Csv],
            history_limit: 4,
        },
    ));

    World {
        harness,
        supervisor,
        report_dir,
        _dirs: vec![store_dir, snap_dir, work_dir],
    }
}

fn stop_gateway_scenario() -> Scenario {
    Scenario {
        id: "stop-gateway".to_string(),
        name: "Stop order gateway for five seconds".to_string(),
        failure: FailureKind::StopService,
        targets: vec!["order-gateway".to_string()],
        failure_duration_ms: 5_000,
        expected: ExpectedOutcome {
            max_recovery_time_ms: 30_000,
            data_loss: DataLossClass::None,
            min_availability_pct: 100.0,
            trading_must_resume: true,
        },
        validations: vec![ValidationStep {
            name: "gateway healthy".to_string(),
            service: "order-gateway".to_string(),
            metric: ProbeMetric::Healthy,
            assertion: Assertion::Equals(1.0),
        }],
        recovery_version: None,
    }
}

#[tokio::test(start_paused = true)]
async fn stop_service_scenario_round_trip() {
    let world = world().await;
    let cancel = CancellationToken::new();

    let execution = world
        .harness
        .run(&[stop_gateway_scenario()], &cancel)
        .await
        .unwrap();

    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(execution.metrics.passed, 1);

    let result = &execution.results[0];
    assert_eq!(result.status, ScenarioStatus::Passed);
    let actual = result.actual_recovery_ms.expect("recovery ran");
    assert!(actual <= 30_000, "recovery took {actual}ms");
    assert!(result.validations.iter().all(|v| v.passed));

    // The gateway is back.
    assert!(world.supervisor.is_running("order-gateway"));

    // The JSON report exists and round-trips.
    let json_path = world
        .report_dir
        .path()
        .join(format!("{}.json", execution.id));
    let raw = tokio::fs::read_to_string(&json_path).await.unwrap();
    let parsed: TestExecution = serde_json::from_str(&raw).unwrap();
    assert_eq!(parsed.results[0].status, ScenarioStatus::Passed);
    assert!(parsed.results[0].actual_recovery_ms.unwrap() <= 30_000);

    // CSV exists too.
    assert!(world
        .report_dir
        .path()
        .join(format!("{}.csv", execution.id))
        .exists());
}

#[tokio::test(start_paused = true)]
async fn only_one_execution_runs_at_a_time() {
    let world = world().await;

    let harness = world.harness.clone();
    let first = tokio::spawn(async move {
        harness
            .run(&[stop_gateway_scenario()], &CancellationToken::new())
            .await
    });

    // Let the first execution claim the harness and park on its
    // failure-duration timer.
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }

    let err = world
        .harness
        .run(&[stop_gateway_scenario()], &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, DrTestError::ExecutionInProgress));

    let execution = first.await.unwrap().unwrap();
    assert_eq!(execution.status, ExecutionStatus::Completed);

    // History retained both the bound and the content.
    assert_eq!(world.harness.history().await.len(), 1);
    assert!(world.harness.latest().await.is_some());
}

#[tokio::test(start_paused = true)]
async fn failed_recovery_is_scored_failed() {
    let world = world().await;
    world.supervisor.inject_start_failure("order-gateway");

    let mut scenario = stop_gateway_scenario();
    scenario.failure_duration_ms = 100;

    let execution = world
        .harness
        .run(&[scenario], &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert_eq!(execution.results[0].status, ScenarioStatus::Failed);
    assert!(!execution.results[0].issues.is_empty());
}
