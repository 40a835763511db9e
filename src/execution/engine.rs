//! Retry-poll engine.
//!
//! The `RetryPollEngine` drives one script on one instance to a terminal
//! [`ExecutionResult`]:
//! - submit the script body with the task timeout
//! - wait the poll interval, then poll the command handle
//! - resubmit on a failed execution while retry budget remains
//! - treat poll faults and overdue attempts as spent retry units
//!
//! It never returns an error: every failure becomes a `Failed` result.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tracing::{Instrument, debug, info_span, warn};

use crate::client::{CommandClient, CommandStatus, SubmissionError};
use crate::core::result::{AttemptOutcome, ExecutionAttempt, ExecutionResult};
use crate::core::script::ScriptTask;
use crate::core::types::InstanceId;
use crate::events::{Event, EventBus};

/// Error text when poll faults use up the retry budget.
pub const MAX_RETRIES_EXCEEDED: &str = "maximum retries exceeded";

/// Engine that runs a script on a single instance with retries.
pub struct RetryPollEngine {
    client: Arc<dyn CommandClient>,
    event_bus: Option<Arc<EventBus>>,
}

impl RetryPollEngine {
    /// Create an engine that dispatches through `client`.
    pub fn new(client: Arc<dyn CommandClient>) -> Self {
        Self {
            client,
            event_bus: None,
        }
    }

    /// Emit attempt and completion events on `bus`.
    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(bus);
        self
    }

    /// Run `task` on `instance` until it succeeds or its budget is spent.
    pub async fn run(
        &self,
        task: &ScriptTask,
        instance: &InstanceId,
        timeout: Duration,
    ) -> ExecutionResult {
        let span = info_span!(
            "script_execution",
            script = %task.name(),
            instance = %instance,
        );

        async {
            let start = Instant::now();
            let result = self.drive(task, instance, timeout).await;

            debug!(
                status = %result.status,
                attempts = result.attempts,
                duration_ms = %start.elapsed().as_millis(),
                "execution finished"
            );
            self.emit(Event::instance_completed(
                task.name(),
                instance.clone(),
                result.status,
                result.attempts,
                start.elapsed(),
            ))
            .await;

            result
        }
        .instrument(span)
        .await
    }

    async fn drive(
        &self,
        task: &ScriptTask,
        instance: &InstanceId,
        timeout: Duration,
    ) -> ExecutionResult {
        let policy = task.retry_policy();
        let max_attempts = policy.max_submissions();
        let mut consumed = 0u32;

        let mut attempt = match self.submit(task, instance, timeout, 1).await {
            Ok(attempt) => attempt,
            Err(err) => return ExecutionResult::failure("", err.to_string(), 1),
        };
        let mut submitted_at = Instant::now();

        loop {
            sleep(policy.poll_interval).await;

            let invocation = match self.client.poll(&attempt.handle).await {
                Ok(invocation) => invocation,
                Err(err) => {
                    consumed += 1;
                    warn!(
                        handle = %attempt.handle,
                        consumed,
                        error = %err,
                        "failed to check command status"
                    );
                    if !policy.has_budget(consumed) {
                        return ExecutionResult::failure("", MAX_RETRIES_EXCEEDED, attempt.sequence);
                    }
                    continue;
                }
            };

            let (output, error) = match invocation.status {
                CommandStatus::Success => {
                    attempt.finish(AttemptOutcome::Succeeded);
                    return ExecutionResult::success(
                        invocation.stdout,
                        invocation.stderr,
                        attempt.sequence,
                    );
                }
                CommandStatus::Pending => {
                    let overdue = policy
                        .attempt_deadline
                        .filter(|deadline| submitted_at.elapsed() >= *deadline);
                    let Some(deadline) = overdue else {
                        continue;
                    };
                    attempt.finish(AttemptOutcome::DeadlineExceeded);
                    (
                        invocation.stdout,
                        format!("command did not complete within {:?}", deadline),
                    )
                }
                CommandStatus::Failed => {
                    attempt.finish(AttemptOutcome::Failed);
                    (invocation.stdout, invocation.stderr)
                }
            };

            consumed += 1;
            if !policy.has_budget(consumed) {
                return ExecutionResult::failure(output, error, attempt.sequence);
            }

            warn!(
                attempt = attempt.sequence,
                max_attempts,
                "script execution failed, resubmitting"
            );
            self.emit(Event::attempt_retrying(
                task.name(),
                instance.clone(),
                attempt.sequence,
                max_attempts,
                error.clone(),
            ))
            .await;

            let sequence = attempt.sequence + 1;
            attempt = match self.submit(task, instance, timeout, sequence).await {
                Ok(attempt) => attempt,
                Err(err) => return ExecutionResult::failure(output, err.to_string(), sequence),
            };
            submitted_at = Instant::now();
        }
    }

    async fn submit(
        &self,
        task: &ScriptTask,
        instance: &InstanceId,
        timeout: Duration,
        sequence: u32,
    ) -> Result<ExecutionAttempt, SubmissionError> {
        match self.client.submit(instance, task.body(), timeout).await {
            Ok(handle) => {
                debug!(handle = %handle, attempt = sequence, "command submitted");
                self.emit(Event::attempt_submitted(
                    task.name(),
                    instance.clone(),
                    sequence,
                    handle,
                ))
                .await;
                Ok(ExecutionAttempt::new(handle, sequence))
            }
            Err(err) => {
                warn!(attempt = sequence, error = %err, "command submission rejected");
                Err(err)
            }
        }
    }

    async fn emit(&self, event: Event) {
        if let Some(bus) = &self.event_bus {
            bus.emit(event).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::result::ExecutionStatus;
    use crate::core::retry::RetryPolicy;
    use crate::testing::{MockAttempt, MockCommandClient};

    const POLL: Duration = Duration::from_millis(5);

    fn task(retries: u32) -> ScriptTask {
        ScriptTask::builder("patch", "yum update -y")
            .retry_policy(RetryPolicy::fixed(retries, POLL))
            .build()
    }

    fn engine(client: &Arc<MockCommandClient>) -> RetryPollEngine {
        RetryPollEngine::new(client.clone())
    }

    #[tokio::test]
    async fn test_success_on_first_attempt() {
        let client = Arc::new(
            MockCommandClient::new()
                .on_instance("i-1", [MockAttempt::succeeds("patched\n").with_stderr("warn")]),
        );
        let instance = InstanceId::new("i-1");

        let result = engine(&client).run(&task(0), &instance, Duration::from_secs(60)).await;

        assert_eq!(result.status, ExecutionStatus::Success);
        assert_eq!(result.output, "patched\n");
        assert_eq!(result.error, "warn");
        assert_eq!(result.attempts, 1);
        assert_eq!(client.submissions(&instance).await, 1);
    }

    #[tokio::test]
    async fn test_pending_polls_do_not_consume_retries() {
        let client = Arc::new(
            MockCommandClient::new().on_instance("i-1", [MockAttempt::succeeds("ok").after_pending(3)]),
        );
        let instance = InstanceId::new("i-1");

        let result = engine(&client).run(&task(0), &instance, Duration::from_secs(60)).await;

        assert!(result.is_success());
        assert_eq!(result.attempts, 1);
        assert_eq!(client.polls(&instance).await, 4);
    }

    #[tokio::test]
    async fn test_failed_execution_is_resubmitted() {
        let client = Arc::new(MockCommandClient::new().on_instance(
            "i-1",
            [MockAttempt::fails("lock held"), MockAttempt::succeeds("done")],
        ));
        let instance = InstanceId::new("i-1");

        let result = engine(&client).run(&task(1), &instance, Duration::from_secs(60)).await;

        assert!(result.is_success());
        assert_eq!(result.attempts, 2);
        assert_eq!(client.submissions(&instance).await, 2);
    }

    #[tokio::test]
    async fn test_zero_budget_reports_failure_without_resubmission() {
        let client = Arc::new(
            MockCommandClient::new()
                .on_instance("i-1", [MockAttempt::fails("disk full").with_stdout("partial")]),
        );
        let instance = InstanceId::new("i-1");

        let result = engine(&client).run(&task(0), &instance, Duration::from_secs(60)).await;

        assert_eq!(result.status, ExecutionStatus::Failed);
        assert_eq!(result.output, "partial");
        assert_eq!(result.error, "disk full");
        assert_eq!(result.attempts, 1);
        assert_eq!(client.submissions(&instance).await, 1);
    }

    #[tokio::test]
    async fn test_submissions_never_exceed_budget_plus_one() {
        for retries in 0..4 {
            let client =
                Arc::new(MockCommandClient::new().on_instance("i-1", [MockAttempt::fails("nope")]));
            let instance = InstanceId::new("i-1");

            let result = engine(&client)
                .run(&task(retries), &instance, Duration::from_secs(60))
                .await;

            assert!(!result.is_success());
            assert_eq!(result.attempts, retries + 1);
            assert_eq!(client.submissions(&instance).await, retries + 1);
        }
    }

    #[tokio::test]
    async fn test_submission_error_fails_immediately_without_polling() {
        let client = Arc::new(MockCommandClient::new().reject_instance("i-404", "instance not found"));
        let instance = InstanceId::new("i-404");

        let result = engine(&client).run(&task(3), &instance, Duration::from_secs(60)).await;

        assert_eq!(result.status, ExecutionStatus::Failed);
        assert!(result.error.contains("instance not found"));
        assert_eq!(result.attempts, 1);
        assert_eq!(client.polls(&instance).await, 0);
    }

    #[tokio::test]
    async fn test_poll_errors_exhaust_budget() {
        let client = Arc::new(
            MockCommandClient::new().on_instance("i-1", [MockAttempt::succeeds("late").after_poll_errors(5)]),
        );
        let instance = InstanceId::new("i-1");

        let result = engine(&client).run(&task(2), &instance, Duration::from_secs(60)).await;

        assert_eq!(result.status, ExecutionStatus::Failed);
        assert_eq!(result.error, MAX_RETRIES_EXCEEDED);
        assert_eq!(result.attempts, 1);
        // Three faults: two within budget, the third exhausts it.
        assert_eq!(client.polls(&instance).await, 3);
    }

    #[tokio::test]
    async fn test_poll_error_within_budget_repolls_same_handle() {
        let client = Arc::new(
            MockCommandClient::new().on_instance("i-1", [MockAttempt::succeeds("ok").after_poll_errors(1)]),
        );
        let instance = InstanceId::new("i-1");

        let result = engine(&client).run(&task(1), &instance, Duration::from_secs(60)).await;

        assert!(result.is_success());
        assert_eq!(result.attempts, 1);
        assert_eq!(client.submissions(&instance).await, 1);
    }

    #[tokio::test]
    async fn test_overdue_attempt_is_retried_then_failed() {
        let client =
            Arc::new(MockCommandClient::new().on_instance("i-1", [MockAttempt::never_finishes()]));
        let instance = InstanceId::new("i-1");
        let task = ScriptTask::builder("hang", "sleep infinity")
            .retry_policy(RetryPolicy::fixed(1, POLL).with_deadline(Duration::from_millis(20)))
            .build();

        let result = engine(&client).run(&task, &instance, Duration::from_secs(60)).await;

        assert_eq!(result.status, ExecutionStatus::Failed);
        assert!(result.error.contains("did not complete"));
        assert_eq!(result.attempts, 2);
        assert_eq!(client.submissions(&instance).await, 2);
    }

    #[tokio::test]
    async fn test_rejected_resubmission_keeps_attempt_count() {
        let client = Arc::new(
            MockCommandClient::new()
                .on_instance("i-1", [MockAttempt::fails("first")])
                .reject_after("i-1", 1, "throttled"),
        );
        let instance = InstanceId::new("i-1");

        let result = engine(&client).run(&task(3), &instance, Duration::from_secs(60)).await;

        assert_eq!(result.status, ExecutionStatus::Failed);
        assert!(result.error.contains("throttled"));
        assert_eq!(result.attempts, 2);
    }

    #[tokio::test]
    async fn test_emits_retry_and_completion_events() {
        use crate::events::EventHandler;
        use async_trait::async_trait;
        use tokio::sync::Mutex;

        struct Recorder(Mutex<Vec<Event>>);

        #[async_trait]
        impl EventHandler for Recorder {
            async fn handle(&self, event: &Event) {
                self.0.lock().await.push(event.clone());
            }
        }

        let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
        let bus = Arc::new(EventBus::new());
        bus.register(recorder.clone()).await;

        let client = Arc::new(MockCommandClient::new().on_instance(
            "i-1",
            [MockAttempt::fails("flaky"), MockAttempt::succeeds("ok")],
        ));
        let engine = RetryPollEngine::new(client).with_event_bus(bus);

        engine
            .run(&task(1), &InstanceId::new("i-1"), Duration::from_secs(60))
            .await;

        let events = recorder.0.lock().await;
        let submitted = events
            .iter()
            .filter(|e| matches!(e, Event::AttemptSubmitted { .. }))
            .count();
        let retrying = events
            .iter()
            .filter(|e| matches!(e, Event::AttemptRetrying { .. }))
            .count();
        assert_eq!(submitted, 2);
        assert_eq!(retrying, 1);
        assert!(matches!(
            events.last(),
            Some(Event::InstanceCompleted { attempts: 2, .. })
        ));
    }
}
