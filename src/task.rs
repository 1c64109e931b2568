//! Units of work and their results.

use std::time::Duration;

use serde::{Serialize, Serializer};

/// One scheduled execution of the command on one host.
///
/// Attempt `n + 1` for a host is only created after attempt `n` came back
/// failed with retries left, so a host never has two tasks in flight.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Task {
    pub host: String,
    pub attempt: u32,
}

impl Task {
    pub fn first(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            attempt: 0,
        }
    }

    pub fn retry(&self) -> Self {
        Self {
            host: self.host.clone(),
            attempt: self.attempt + 1,
        }
    }
}

/// Result of executing one task.
///
/// `error` is set exactly when no exit code could be obtained. `succeeded`
/// means a session was established, the command ran and exited 0.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Outcome {
    pub host: String,
    pub succeeded: bool,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    #[serde(rename = "duration_s", serialize_with = "serialize_seconds")]
    pub duration: Duration,
    pub error: Option<String>,
    /// Attempts consumed by the host, counting the one that produced this
    /// outcome.
    pub attempts: u32,
}

impl Outcome {
    /// Outcome for a task whose transport failed before an exit code was
    /// available.
    pub fn transport_failure(task: &Task, error: String, duration: Duration) -> Self {
        Self {
            host: task.host.clone(),
            succeeded: false,
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
            duration,
            error: Some(error),
            attempts: task.attempt + 1,
        }
    }

    /// Outcome for a command that ran to completion, whatever its exit code.
    pub fn completed(
        task: &Task,
        exit_code: i32,
        stdout: String,
        stderr: String,
        duration: Duration,
    ) -> Self {
        Self {
            host: task.host.clone(),
            succeeded: exit_code == 0,
            exit_code: Some(exit_code),
            stdout,
            stderr,
            duration,
            error: None,
            attempts: task.attempt + 1,
        }
    }
}

/// Seconds with millisecond precision.
fn serialize_seconds<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_millis() as f64 / 1000.0)
}
