//! Batch scenarios driven through the scriptable mock client.

use crate::common::{RecordingHandler, ids, script};
use fleetrun::testing::{MockAttempt, MockCommandClient};
use fleetrun::{
    BatchDefaults, BatchOrchestrator, Event, EventBus, ExecutionStatus, InstanceId,
    StaticInventory, resolve_targets,
};
use std::sync::Arc;
use std::time::Duration;

fn defaults() -> BatchDefaults {
    BatchDefaults::new(Duration::from_secs(60), 4)
}

#[tokio::test]
async fn test_retry_scenario_across_a_batch() {
    let client = Arc::new(
        MockCommandClient::new()
            .on_instance("i-1", [MockAttempt::fails("locked"), MockAttempt::succeeds("patched")])
            .on_instance(
                "i-2",
                [MockAttempt::fails("locked"), MockAttempt::fails("still locked")],
            ),
    );
    let orchestrator = BatchOrchestrator::new(client.clone(), defaults());

    let batch = orchestrator
        .run(&[script("patch", "yum update -y", 1, true)], &ids(&["i-1", "i-2"]))
        .await;

    let patch = batch.get("patch").unwrap();
    let i1 = &patch[&InstanceId::new("i-1")];
    assert_eq!(i1.status, ExecutionStatus::Success);
    assert_eq!(i1.output, "patched");
    assert_eq!(i1.attempts, 2);

    let i2 = &patch[&InstanceId::new("i-2")];
    assert_eq!(i2.status, ExecutionStatus::Failed);
    assert_eq!(i2.error, "still locked");
    assert_eq!(i2.attempts, 2);

    assert_eq!(client.submissions(&InstanceId::new("i-1")).await, 2);
    assert_eq!(client.submissions(&InstanceId::new("i-2")).await, 2);
}

#[tokio::test]
async fn test_nonexistent_instance_fails_without_polling() {
    let client = Arc::new(MockCommandClient::new().reject_instance("i-404", "instance not found"));
    let orchestrator = BatchOrchestrator::new(client.clone(), defaults());

    let batch = orchestrator
        .run(&[script("uptime", "uptime", 3, false)], &ids(&["i-1", "i-404"]))
        .await;

    let results = batch.get("uptime").unwrap();
    assert!(results[&InstanceId::new("i-1")].is_success());
    let missing = &results[&InstanceId::new("i-404")];
    assert_eq!(missing.status, ExecutionStatus::Failed);
    assert!(missing.error.contains("instance not found"));
    assert_eq!(client.submissions(&InstanceId::new("i-404")).await, 1);
    assert_eq!(client.polls(&InstanceId::new("i-404")).await, 0);
}

#[tokio::test]
async fn test_second_script_runs_after_first_fails_everywhere() {
    let client = Arc::new(
        MockCommandClient::new()
            .on_instance("i-1", [MockAttempt::fails("boom"), MockAttempt::succeeds("ok")])
            .on_instance("i-2", [MockAttempt::fails("boom"), MockAttempt::succeeds("ok")]),
    );
    let orchestrator = BatchOrchestrator::new(client.clone(), defaults());
    let tasks = [script("break", "exit 1", 0, true), script("check", "true", 0, false)];

    let batch = orchestrator.run(&tasks, &ids(&["i-1", "i-2"])).await;

    assert_eq!(batch.script_names(), vec!["break", "check"]);
    assert!(batch.get("break").unwrap().values().all(|r| !r.is_success()));
    assert!(batch.get("check").unwrap().values().all(|r| r.is_success()));
    assert_eq!(batch.success_count(), 2);
    assert_eq!(batch.failure_count(), 2);
}

#[tokio::test]
async fn test_script_order_survives_uneven_completion() {
    // The first script is slow everywhere, the second finishes at once.
    let client = Arc::new(
        MockCommandClient::new().with_default(MockAttempt::succeeds("done").after_pending(5)),
    );
    let orchestrator = BatchOrchestrator::new(client, defaults());
    let tasks = [script("slow", "sleep 5", 0, true), script("fast", "true", 0, true)];

    let batch = orchestrator.run(&tasks, &ids(&["i-1", "i-2", "i-3"])).await;

    assert_eq!(batch.script_names(), vec!["slow", "fast"]);
}

#[tokio::test]
async fn test_events_cover_the_whole_batch() {
    let recorder = RecordingHandler::new();
    let bus = Arc::new(EventBus::new());
    bus.register(recorder.clone()).await;

    let client = Arc::new(
        MockCommandClient::new()
            .on_instance("i-1", [MockAttempt::fails("flaky"), MockAttempt::succeeds("ok")]),
    );
    let orchestrator = BatchOrchestrator::new(client, defaults()).with_event_bus(bus);
    let tasks = [script("a", "true", 1, false), script("b", "true", 0, true)];

    orchestrator.run(&tasks, &ids(&["i-1", "i-2"])).await;

    assert_eq!(
        recorder
            .count(|e| matches!(e, Event::ScriptStarted { .. }))
            .await,
        2
    );
    assert_eq!(
        recorder
            .count(|e| matches!(e, Event::InstanceCompleted { .. }))
            .await,
        4
    );
    assert_eq!(
        recorder
            .count(|e| matches!(e, Event::AttemptRetrying { .. }))
            .await,
        1
    );

    let events = recorder.events().await;
    match events.last() {
        Some(Event::BatchCompleted {
            scripts,
            succeeded,
            failed,
            ..
        }) => {
            assert_eq!(*scripts, 2);
            assert_eq!(*succeeded, 4);
            assert_eq!(*failed, 0);
        }
        other => panic!("expected BatchCompleted last, got {:?}", other),
    }
}

#[tokio::test]
async fn test_unmanaged_instances_never_reach_the_client() {
    let inventory = StaticInventory::new().with_managed(["i-1", "i-3"]);
    let client = Arc::new(MockCommandClient::new());
    let orchestrator = BatchOrchestrator::new(client.clone(), defaults());

    let targets = resolve_targets(&inventory, &ids(&["i-1", "i-2", "i-3"])).await;
    let batch = orchestrator
        .run(&[script("a", "true", 0, true)], &targets.eligible)
        .await;

    assert_eq!(targets.excluded.len(), 1);
    assert_eq!(batch.get("a").unwrap().len(), 2);
    assert_eq!(client.submissions(&InstanceId::new("i-2")).await, 0);
}
