//! Task executor: connect, run, close, time it.
//!
//! Runs on a worker thread. Never touches run state; the resulting
//! [`Outcome`] goes back to the dispatcher.

use std::time::{Duration, Instant};

use tracing::debug;

use crate::session::SessionClient;
use crate::task::{Outcome, Task};

/// Hard deadlines for the two network waits of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub connect: Duration,
    pub exec: Duration,
}

/// Execute one task against `client`.
///
/// Connect and exec failures become outcomes with `error` set and no exit
/// code. A command that ran reports its exit code, whatever the value. The
/// duration covers the connect attempt through completion or failure.
pub fn execute_task(
    client: &dyn SessionClient,
    task: &Task,
    command: &str,
    timeouts: Timeouts,
) -> Outcome {
    let start = Instant::now();

    let mut session = match client.connect(&task.host, timeouts.connect) {
        Ok(s) => s,
        Err(e) => {
            debug!(host = %task.host, attempt = task.attempt, err = %e, "connect failed");
            return Outcome::transport_failure(task, e.to_string(), start.elapsed());
        }
    };

    let result = session.execute(command, timeouts.exec);
    session.close();
    let duration = start.elapsed();

    match result {
        Ok(out) => {
            debug!(
                host = %task.host,
                attempt = task.attempt,
                exit_code = out.exit_code,
                duration_ms = duration.as_millis() as u64,
                "command finished"
            );
            Outcome::completed(task, out.exit_code, out.stdout, out.stderr, duration)
        }
        Err(e) => {
            debug!(host = %task.host, attempt = task.attempt, err = %e, "exec failed");
            Outcome::transport_failure(task, e.to_string(), duration)
        }
    }
}
