//! Configuration files run through a local shell transport.
//!
//! These tests spawn `sh`, so they exercise the real process client and
//! the config builder together.

use crate::common::{ids, script};
use fleetrun::report::{self, BatchReport};
use fleetrun::{
    BatchDefaults, BatchOrchestrator, ExecutionStatus, InstanceId, ProcessClient, RetryPolicy,
    ScriptTask, Transport, load_batch_plan, resolve_targets,
};
use std::fs;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const CONFIG: &str = r#"
execution:
  default_timeout: 30
  max_parallel: 2
  poll_interval: 1
transport:
  type: local
instances:
  ids: [web-1, web-2, db-1]
  managed: [web-1, web-2]
  platforms:
    db-1: windows
scripts:
  - name: greet
    source: scripts/greet.sh
    parallel_execution: true
  - name: broken
    inline: "echo partial; echo oops >&2; exit 3"
    parallel_execution: true
"#;

#[tokio::test]
async fn test_config_driven_batch_over_local_shell() {
    let dir = TempDir::new().unwrap();
    fs::create_dir(dir.path().join("scripts")).unwrap();
    fs::write(
        dir.path().join("scripts/greet.sh"),
        "echo \"hello from $FLEETRUN_INSTANCE\"\n",
    )
    .unwrap();
    let config_path = dir.path().join("fleetrun.yaml");
    fs::write(&config_path, CONFIG).unwrap();

    let plan = load_batch_plan(&config_path).unwrap();
    let targets = resolve_targets(&plan.inventory, &plan.instances).await;
    assert_eq!(targets.eligible, ids(&["web-1", "web-2"]));
    assert_eq!(targets.excluded[0].instance, InstanceId::new("db-1"));

    let client = Arc::new(ProcessClient::new(plan.transport.clone()));
    let batch = BatchOrchestrator::new(client.clone(), plan.defaults.clone())
        .run(&plan.tasks, &targets.eligible)
        .await;

    assert_eq!(batch.script_names(), vec!["greet", "broken"]);
    assert_eq!(client.tracked_count().await, 0);

    let greet = batch.get("greet").unwrap();
    let web1 = &greet[&InstanceId::new("web-1")];
    assert_eq!(web1.status, ExecutionStatus::Success);
    assert_eq!(web1.output.trim(), "hello from web-1");
    assert_eq!(web1.attempts, 1);

    let broken = batch.get("broken").unwrap();
    let web2 = &broken[&InstanceId::new("web-2")];
    assert_eq!(web2.status, ExecutionStatus::Failed);
    assert_eq!(web2.output.trim(), "partial");
    assert_eq!(web2.error.trim(), "oops");

    let out = dir.path().join("output");
    let path = BatchReport::new(&batch, &targets.excluded)
        .write_json(&out)
        .unwrap();
    let value: serde_json::Value = serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap();
    assert_eq!(value["summary"]["succeeded"], 2);
    assert_eq!(value["summary"]["failed"], 2);
    assert_eq!(value["excluded"][0]["platform"], "windows");

    assert_eq!(report::exit_code(&batch, false), 0);
    assert_ne!(report::exit_code(&batch, true), 0);
}

#[tokio::test]
async fn test_remote_timeout_is_retried_then_reported() {
    let client = Arc::new(ProcessClient::new(Transport::local()));
    let orchestrator = BatchOrchestrator::new(
        client.clone(),
        BatchDefaults::new(Duration::from_millis(100), 2),
    );
    let task = script("hang", "sleep 5", 1, false);

    let batch = orchestrator.run(&[task], &ids(&["local"])).await;

    let result = &batch.get("hang").unwrap()[&InstanceId::new("local")];
    assert_eq!(result.status, ExecutionStatus::Failed);
    assert_eq!(result.attempts, 2);
    assert!(result.error.contains("timed out"));
    assert_eq!(client.running_count().await, 0);
    assert_eq!(client.tracked_count().await, 0);
}

#[tokio::test]
async fn test_attempt_deadline_bounds_a_stuck_attempt() {
    let client = Arc::new(ProcessClient::new(Transport::local()));
    let orchestrator = BatchOrchestrator::new(client, BatchDefaults::default());
    let task = ScriptTask::builder("stuck", "sleep 5")
        .retry_policy(
            RetryPolicy::fixed(0, Duration::from_millis(20))
                .with_deadline(Duration::from_millis(200)),
        )
        .build();

    let batch = orchestrator.run(&[task], &ids(&["local"])).await;

    let result = &batch.get("stuck").unwrap()[&InstanceId::new("local")];
    assert_eq!(result.status, ExecutionStatus::Failed);
    assert_eq!(result.attempts, 1);
    assert!(result.error.contains("did not complete"));
}
