//! Retry and polling policy for remote script executions.
//!
//! A policy carries the retry budget, the fixed interval between status
//! polls, and an optional per-attempt deadline.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Interval between status polls when none is configured.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Retry policy for a script execution on one instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retry budget, not including the initial attempt (0 = no retries).
    /// `max_retries = 2` allows up to 3 submissions in total.
    pub max_retries: u32,

    /// Fixed wait before every status poll.
    #[serde(with = "serde_duration")]
    pub poll_interval: Duration,

    /// How long a single attempt may stay pending before it counts as failed.
    /// `None` leaves the attempt bounded only by the remote timeout.
    #[serde(default, with = "serde_opt_duration")]
    pub attempt_deadline: Option<Duration>,
}

impl RetryPolicy {
    /// Create a policy with no retries and the default poll interval.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            poll_interval: DEFAULT_POLL_INTERVAL,
            attempt_deadline: None,
        }
    }

    /// Create a policy with a retry budget and a fixed poll interval.
    pub fn fixed(max_retries: u32, poll_interval: Duration) -> Self {
        Self {
            max_retries,
            poll_interval,
            attempt_deadline: None,
        }
    }

    /// Builder: bound every attempt by a deadline.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.attempt_deadline = Some(deadline);
        self
    }

    /// Check if retries are enabled.
    pub fn is_enabled(&self) -> bool {
        self.max_retries > 0
    }

    /// Whether the run may continue after `consumed` retry units were spent.
    pub fn has_budget(&self, consumed: u32) -> bool {
        consumed <= self.max_retries
    }

    /// Upper bound on submissions for one (script, instance) pair.
    pub fn max_submissions(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

impl Default for RetryPolicy {
    /// Default policy: no retries.
    fn default() -> Self {
        Self::none()
    }
}

/// Serializes Duration as whole seconds (matching the YAML config format).
mod serde_duration {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

mod serde_opt_duration {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.map(|d| d.as_secs()).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = Option::<u64>::deserialize(deserializer)?;
        Ok(secs.map(Duration::from_secs))
    }
}
