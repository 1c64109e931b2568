//! Dispatcher: fans tasks out to a fixed worker pool and owns all run state.
//!
//! The dispatcher thread is the single writer. Workers pull tasks from a
//! shared queue, execute them, and report completions over an mpsc channel;
//! only the dispatcher decides retry vs finalize. A task is handed to the
//! pool only when a worker slot is free, so at most `concurrency` tasks
//! execute at once, retries included.

use std::collections::{HashMap, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Mutex;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::Duration;

use tracing::{debug, error, info, trace, warn};

use crate::aggregator::ResultAggregator;
use crate::cancel::CancellationController;
use crate::executor::{self, Timeouts};
use crate::report::Report;
use crate::session::{SessionClient, SessionError};
use crate::task::{Outcome, Task};

/// How often the dispatcher wakes to check for cancellation while waiting on
/// completions.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Parameters for one run.
#[derive(Debug, Clone)]
pub struct RunParams {
    /// The command as the user gave it; recorded in the report.
    pub command: String,
    /// The command actually sent to each host (after wrapping).
    pub remote_command: String,
    pub concurrency: usize,
    pub max_retries: u32,
    pub timeouts: Timeouts,
}

/// A finished task on its way back from a worker.
#[derive(Debug)]
struct Completion {
    task: Task,
    outcome: Outcome,
}

/// Hosts waiting for a worker and hosts currently executing.
/// Finalized hosts live in the aggregator.
#[derive(Debug)]
struct RunState {
    ready: VecDeque<Task>,
    in_flight: HashMap<String, u32>,
    /// Worker count; `in_flight` never grows past it.
    slots: usize,
}

impl RunState {
    fn new(hosts: &[String], slots: usize) -> Self {
        Self {
            ready: hosts.iter().map(Task::first).collect(),
            in_flight: HashMap::new(),
            slots,
        }
    }

    fn is_finished(&self, draining: bool) -> bool {
        self.in_flight.is_empty() && (draining || self.ready.is_empty())
    }
}

pub struct Dispatcher<'a> {
    client: &'a dyn SessionClient,
    cancel: &'a CancellationController,
}

impl<'a> Dispatcher<'a> {
    pub fn new(client: &'a dyn SessionClient, cancel: &'a CancellationController) -> Self {
        Self { client, cancel }
    }

    /// Run the command on every host and return the report.
    ///
    /// Returns once every host has a terminal outcome, or once in-flight
    /// tasks have drained after cancellation. Outcomes that arrive during the
    /// drain are discarded, so an interrupted report holds only hosts that
    /// finished before the interrupt. `hosts` must not contain duplicates.
    pub fn run(&self, hosts: &[String], params: &RunParams) -> Report {
        let mut aggregator = ResultAggregator::new(params.command.clone());
        let workers = params.concurrency.min(hosts.len());

        info!(
            hosts = hosts.len(),
            concurrency = params.concurrency,
            workers,
            max_retries = params.max_retries,
            "starting run"
        );

        if workers == 0 {
            let drained = self.cancel.finish();
            return aggregator.export(drained);
        }

        let mut state = RunState::new(hosts, workers);
        let (task_tx, task_rx) = mpsc::channel::<Task>();
        let task_rx = Mutex::new(task_rx);
        let (done_tx, done_rx) = mpsc::channel::<Completion>();

        thread::scope(|scope| {
            for id in 0..workers {
                let done_tx = done_tx.clone();
                let task_rx = &task_rx;
                let client = self.client;
                let command = params.remote_command.as_str();
                let timeouts = params.timeouts;
                scope.spawn(move || worker_loop(id, client, task_rx, done_tx, command, timeouts));
            }
            drop(done_tx);

            self.drive(&mut state, &mut aggregator, params.max_retries, &task_tx, &done_rx);

            // Closing the task queue lets idle workers exit.
            drop(task_tx);
        });

        let drained = self.cancel.finish();
        let summary = aggregator.summary();
        if drained {
            let abandoned = hosts.len() - summary.total;
            warn!(
                finalized = summary.total,
                abandoned, "run drained after interrupt; report is partial"
            );
        }
        info!(total = summary.total, succeeded = summary.succeeded, "run complete");

        aggregator.export(drained)
    }

    /// The dispatcher loop: fill free slots, then wait for one completion.
    fn drive(
        &self,
        state: &mut RunState,
        aggregator: &mut ResultAggregator,
        max_retries: u32,
        task_tx: &Sender<Task>,
        done_rx: &Receiver<Completion>,
    ) {
        loop {
            let draining = self.cancel.is_draining();

            if !draining {
                while state.in_flight.len() < state.slots {
                    let Some(task) = state.ready.pop_front() else {
                        break;
                    };
                    debug_assert!(!state.in_flight.contains_key(&task.host));
                    debug!(host = %task.host, attempt = task.attempt, "dispatching");
                    state.in_flight.insert(task.host.clone(), task.attempt);
                    if task_tx.send(task).is_err() {
                        error!("worker pool closed unexpectedly");
                        return;
                    }
                }
            }

            if state.is_finished(draining) {
                if draining && !state.ready.is_empty() {
                    debug!(
                        skipped = state.ready.len(),
                        "hosts left undispatched after interrupt"
                    );
                }
                return;
            }

            let Completion { task, outcome } = match done_rx.recv_timeout(POLL_INTERVAL) {
                Ok(c) => c,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    error!(
                        in_flight = state.in_flight.len(),
                        "all workers exited with tasks in flight"
                    );
                    return;
                }
            };

            let expected = state.in_flight.remove(&task.host);
            debug_assert_eq!(expected, Some(task.attempt));

            // Re-read: an interrupt may have arrived while we waited. Anything
            // received from here on was still running at cancellation.
            if self.cancel.is_draining() {
                info!(
                    host = %task.host,
                    attempt = task.attempt,
                    succeeded = outcome.succeeded,
                    "discarding outcome that finished after interrupt"
                );
                continue;
            }

            let retry = !outcome.succeeded && task.attempt < max_retries;
            if retry {
                warn!(
                    host = %task.host,
                    attempt = task.attempt,
                    exit_code = outcome.exit_code,
                    err = outcome.error.as_deref().unwrap_or(""),
                    "attempt failed; retrying"
                );
                state.ready.push_back(task.retry());
                continue;
            }

            debug_assert!(!aggregator.is_finalized(&outcome.host));
            log_final(&outcome);
            aggregator.finalize(outcome);
            debug!(
                finalized = aggregator.summary().total,
                pending = state.ready.len() + state.in_flight.len(),
                "progress"
            );
        }
    }
}

fn log_final(outcome: &Outcome) {
    let duration_ms = outcome.duration.as_millis() as u64;
    if outcome.succeeded {
        info!(
            host = %outcome.host,
            attempts = outcome.attempts,
            duration_ms,
            "host succeeded"
        );
    } else {
        warn!(
            host = %outcome.host,
            attempts = outcome.attempts,
            exit_code = outcome.exit_code,
            err = outcome.error.as_deref().unwrap_or(""),
            duration_ms,
            "host failed"
        );
    }
}

fn worker_loop(
    id: usize,
    client: &dyn SessionClient,
    tasks: &Mutex<Receiver<Task>>,
    done: Sender<Completion>,
    command: &str,
    timeouts: Timeouts,
) {
    loop {
        // The guard is dropped at the end of this statement, before the task runs.
        let next = match tasks.lock() {
            Ok(rx) => rx.recv(),
            Err(_) => break,
        };
        let Ok(task) = next else {
            break;
        };

        trace!(worker = id, host = %task.host, attempt = task.attempt, "task started");
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            executor::execute_task(client, &task, command, timeouts)
        }))
        .unwrap_or_else(|_| {
            error!(worker = id, host = %task.host, "task panicked");
            let err = SessionError::Exec("worker panicked".to_owned());
            Outcome::transport_failure(&task, err.to_string(), Duration::ZERO)
        });

        if done.send(Completion { task, outcome }).is_err() {
            break;
        }
    }
    trace!(worker = id, "worker exiting");
}
