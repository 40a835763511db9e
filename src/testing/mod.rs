//! Testing utilities for users of the fleetrun library.
//!
//! This module provides a scriptable [`CommandClient`] test double:
//!
//! - [`MockCommandClient`]: per-instance queues of attempts, rejected
//!   instances, and counters for submissions, polls and in-flight commands
//! - [`MockAttempt`]: the sequence of poll responses one submission yields

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::Mutex;

use crate::client::{CommandClient, CommandInvocation, PollError, SubmissionError};
use crate::core::types::{CommandId, InstanceId};

/// One scripted response to a poll.
#[derive(Debug, Clone)]
pub enum MockPoll {
    /// Command still running.
    Pending,
    /// Communication fault while polling.
    Error(String),
    /// Terminal status.
    Done(CommandInvocation),
}

/// Poll responses for a single submission.
///
/// Once the list is exhausted the last response repeats.
///
/// # Example
///
/// ```
/// use fleetrun::testing::MockAttempt;
///
/// // Pending twice, then succeeds with output.
/// let attempt = MockAttempt::succeeds("done").after_pending(2);
/// ```
#[derive(Debug, Clone)]
pub struct MockAttempt {
    polls: Vec<MockPoll>,
}

impl MockAttempt {
    /// Attempt with an explicit response sequence.
    pub fn new(polls: Vec<MockPoll>) -> Self {
        Self { polls }
    }

    /// Completes successfully with `stdout`.
    pub fn succeeds(stdout: impl Into<String>) -> Self {
        Self::new(vec![MockPoll::Done(CommandInvocation::success(stdout, ""))])
    }

    /// Completes with a failing status and `stderr`.
    pub fn fails(stderr: impl Into<String>) -> Self {
        Self::new(vec![MockPoll::Done(CommandInvocation::failed("", stderr))])
    }

    /// Stays pending forever.
    pub fn never_finishes() -> Self {
        Self::new(vec![MockPoll::Pending])
    }

    /// Report `count` pending polls before the current sequence.
    pub fn after_pending(mut self, count: usize) -> Self {
        self.prepend(count, MockPoll::Pending);
        self
    }

    /// Fail `count` polls with a communication fault before the current sequence.
    pub fn after_poll_errors(mut self, count: usize) -> Self {
        self.prepend(count, MockPoll::Error("connection reset".to_string()));
        self
    }

    /// Set stdout on every terminal response.
    pub fn with_stdout(mut self, stdout: impl Into<String>) -> Self {
        let stdout = stdout.into();
        for poll in &mut self.polls {
            if let MockPoll::Done(invocation) = poll {
                invocation.stdout = stdout.clone();
            }
        }
        self
    }

    /// Set stderr on every terminal response.
    pub fn with_stderr(mut self, stderr: impl Into<String>) -> Self {
        let stderr = stderr.into();
        for poll in &mut self.polls {
            if let MockPoll::Done(invocation) = poll {
                invocation.stderr = stderr.clone();
            }
        }
        self
    }

    fn prepend(&mut self, count: usize, poll: MockPoll) {
        let mut polls = vec![poll; count];
        polls.append(&mut self.polls);
        self.polls = polls;
    }

    fn response(&self, index: usize) -> MockPoll {
        self.polls
            .get(index)
            .or_else(|| self.polls.last())
            .cloned()
            .unwrap_or(MockPoll::Pending)
    }
}

/// Submission rejection rule for an instance.
#[derive(Debug, Clone)]
struct Rejection {
    /// Submissions accepted before rejecting.
    after: u32,
    message: String,
}

struct InFlight {
    instance: InstanceId,
    attempt: MockAttempt,
    cursor: usize,
    finished: bool,
}

#[derive(Default)]
struct MockState {
    plans: HashMap<InstanceId, VecDeque<MockAttempt>>,
    rejections: HashMap<InstanceId, Rejection>,
    panics: Vec<InstanceId>,
    handles: HashMap<CommandId, InFlight>,
    submissions: HashMap<InstanceId, u32>,
    polls: HashMap<InstanceId, u32>,
    bodies: Vec<(InstanceId, String, Duration)>,
    in_flight: usize,
    max_in_flight: usize,
}

/// A scriptable [`CommandClient`] for tests.
///
/// Each submission to an instance takes the next [`MockAttempt`] queued for
/// it; the final queued attempt repeats. Instances with nothing queued
/// succeed on the first poll with empty output.
///
/// Safe for concurrent use: all state sits behind one mutex.
///
/// # Example
///
/// ```
/// use fleetrun::testing::{MockAttempt, MockCommandClient};
///
/// let client = MockCommandClient::new()
///     .on_instance("i-1", [MockAttempt::fails("busy"), MockAttempt::succeeds("ok")])
///     .reject_instance("i-404", "instance not found");
/// ```
pub struct MockCommandClient {
    state: Mutex<MockState>,
    default_attempt: MockAttempt,
}

impl MockCommandClient {
    /// Create a client where every instance succeeds immediately.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState::default()),
            default_attempt: MockAttempt::succeeds(""),
        }
    }

    /// Attempt used for instances without a queued plan.
    pub fn with_default(mut self, attempt: MockAttempt) -> Self {
        self.default_attempt = attempt;
        self
    }

    /// Queue attempts for an instance, consumed one per submission.
    pub fn on_instance<I>(mut self, instance: impl Into<InstanceId>, attempts: I) -> Self
    where
        I: IntoIterator<Item = MockAttempt>,
    {
        self.state
            .get_mut()
            .plans
            .insert(instance.into(), attempts.into_iter().collect());
        self
    }

    /// Reject every submission to an instance.
    pub fn reject_instance(self, instance: impl Into<InstanceId>, message: impl Into<String>) -> Self {
        self.reject_after(instance, 0, message)
    }

    /// Accept `accepted` submissions to an instance, then reject the rest.
    pub fn reject_after(
        mut self,
        instance: impl Into<InstanceId>,
        accepted: u32,
        message: impl Into<String>,
    ) -> Self {
        self.state
            .get_mut()
            .rejections
            .insert(
                instance.into(),
                Rejection {
                    after: accepted,
                    message: message.into(),
                },
            );
        self
    }

    /// Panic inside `submit` for an instance, simulating a crashed worker.
    pub fn panic_on(mut self, instance: impl Into<InstanceId>) -> Self {
        self.state.get_mut().panics.push(instance.into());
        self
    }

    /// Submissions received for an instance, accepted or rejected.
    pub async fn submissions(&self, instance: &InstanceId) -> u32 {
        self.state
            .lock()
            .await
            .submissions
            .get(instance)
            .copied()
            .unwrap_or(0)
    }

    /// Polls made against handles of an instance.
    pub async fn polls(&self, instance: &InstanceId) -> u32 {
        self.state.lock().await.polls.get(instance).copied().unwrap_or(0)
    }

    /// Total submissions across all instances.
    pub async fn total_submissions(&self) -> u32 {
        self.state.lock().await.submissions.values().sum()
    }

    /// Highest number of commands running at the same time.
    pub async fn max_in_flight(&self) -> usize {
        self.state.lock().await.max_in_flight
    }

    /// Every accepted submission as (instance, body, timeout), in order.
    pub async fn submitted_bodies(&self) -> Vec<(InstanceId, String, Duration)> {
        self.state.lock().await.bodies.clone()
    }
}

impl Default for MockCommandClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CommandClient for MockCommandClient {
    async fn submit(
        &self,
        instance: &InstanceId,
        body: &str,
        timeout: Duration,
    ) -> Result<CommandId, SubmissionError> {
        let mut state = self.state.lock().await;

        if state.panics.contains(instance) {
            drop(state);
            panic!("mock client crashed submitting to {}", instance);
        }

        let previous = state.submissions.get(instance).copied().unwrap_or(0);
        state.submissions.insert(instance.clone(), previous + 1);

        if let Some(rejection) = state.rejections.get(instance)
            && previous >= rejection.after
        {
            return Err(SubmissionError::Rejected(rejection.message.clone()));
        }

        let attempt = match state.plans.get_mut(instance) {
            Some(queue) if queue.len() > 1 => queue.pop_front(),
            Some(queue) => queue.front().cloned(),
            None => None,
        }
        .unwrap_or_else(|| self.default_attempt.clone());

        let handle = CommandId::new();
        state.handles.insert(
            handle,
            InFlight {
                instance: instance.clone(),
                attempt,
                cursor: 0,
                finished: false,
            },
        );
        state
            .bodies
            .push((instance.clone(), body.to_string(), timeout));
        state.in_flight += 1;
        state.max_in_flight = state.max_in_flight.max(state.in_flight);

        Ok(handle)
    }

    async fn poll(&self, handle: &CommandId) -> Result<CommandInvocation, PollError> {
        let mut state = self.state.lock().await;

        let (instance, response, newly_finished) = {
            let Some(flight) = state.handles.get_mut(handle) else {
                return Err(PollError::UnknownHandle(*handle));
            };
            let response = flight.attempt.response(flight.cursor);
            flight.cursor += 1;

            let terminal = matches!(response, MockPoll::Done(_));
            let newly_finished = terminal && !flight.finished;
            flight.finished |= terminal;
            (flight.instance.clone(), response, newly_finished)
        };

        *state.polls.entry(instance).or_insert(0) += 1;
        if newly_finished {
            state.in_flight = state.in_flight.saturating_sub(1);
        }

        match response {
            MockPoll::Pending => Ok(CommandInvocation::pending()),
            MockPoll::Error(message) => Err(PollError::Communication(message)),
            MockPoll::Done(invocation) => Ok(invocation),
        }
    }
}
