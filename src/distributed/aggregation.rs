//! Dispatch and result collection
//!
//! The aggregation manager owns every registered worker connection for the
//! rest of the run. It sends each worker its assignment, then waits on all
//! connections at once and reads exactly one RESULT record from each as it
//! becomes ready. Partial sums are added in arrival order.
//!
//! A worker that disconnects, misses the result deadline or sends a malformed
//! record is handled by the [`CompletionPolicy`].

use crate::distributed::error::{DistributedError, NetResult};
use crate::distributed::net::enable_keepalive;
use crate::distributed::protocol::{read_message, write_message, Assignment, Message, MessageKind};
use crate::distributed::registration::{RegisteredWorker, WorkerState};
use crate::distributed::with_deadline;
use crate::worker::WorkerExecutor;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// What to do when a worker drops out after registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum CompletionPolicy {
    /// Fail the whole run
    #[default]
    Abort,
    /// Integrate the lost worker's assignment on the coordinator
    Recompute,
}

impl fmt::Display for CompletionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Abort => write!(f, "abort"),
            Self::Recompute => write!(f, "recompute"),
        }
    }
}

/// Where a partial sum came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResultSource {
    Worker,
    Recomputed,
}

/// One worker's contribution to the final sum
#[derive(Debug, Clone, Serialize)]
pub struct PartialResult {
    pub slot: usize,
    pub peer: SocketAddr,
    pub core_count: u32,
    pub assignment: Assignment,
    pub value: f64,
    pub source: ResultSource,
}

/// Add partial sums in the order given
pub fn aggregate(results: &[PartialResult]) -> f64 {
    results.iter().map(|r| r.value).sum()
}

struct Dispatched {
    worker: RegisteredWorker,
    assignment: Assignment,
}

struct Lost {
    slot: usize,
    peer: SocketAddr,
    core_count: u32,
    assignment: Assignment,
    reason: String,
}

type PendingResult = (Dispatched, NetResult<Message>);

/// Sends assignments and gathers partial results
pub struct AggregationManager {
    workers: Vec<RegisteredWorker>,
    dispatched: Vec<Dispatched>,
    lost: Vec<Lost>,
    policy: CompletionPolicy,
    io_timeout: Option<Duration>,
    result_timeout: Option<Duration>,
    fallback: Option<WorkerExecutor>,
}

impl AggregationManager {
    pub fn new(workers: Vec<RegisteredWorker>, policy: CompletionPolicy) -> Self {
        Self {
            workers,
            dispatched: Vec::new(),
            lost: Vec::new(),
            policy,
            io_timeout: None,
            result_timeout: None,
            fallback: None,
        }
    }

    /// Deadline for sending one assignment, and for the whole collection phase
    pub fn with_timeouts(mut self, io: Option<Duration>, result: Option<Duration>) -> Self {
        self.io_timeout = io;
        self.result_timeout = result;
        self
    }

    /// Executor used to recompute a lost worker's assignment
    pub fn with_fallback(mut self, executor: WorkerExecutor) -> Self {
        self.fallback = Some(executor);
        self
    }

    /// Send `assignments[i]` to the `i`th registered worker
    pub async fn dispatch(&mut self, assignments: &[Assignment]) -> NetResult<()> {
        if assignments.len() != self.workers.len() {
            return Err(DistributedError::Partition(format!(
                "{} assignments for {} workers",
                assignments.len(),
                self.workers.len()
            )));
        }
        if self.policy == CompletionPolicy::Recompute && self.fallback.is_none() {
            return Err(DistributedError::Config(
                "recompute policy needs a local executor".to_string(),
            ));
        }

        let io_timeout = self.io_timeout;
        for (mut worker, assignment) in self.workers.drain(..).zip(assignments.iter().copied()) {
            if let Err(e) = enable_keepalive(&worker.stream) {
                debug!(slot = worker.slot, "Could not enable keepalive: {}", e);
            }
            if let Err(e) = worker.stream.set_nodelay(true) {
                debug!(slot = worker.slot, "Could not set TCP_NODELAY: {}", e);
            }

            let sent = with_deadline(
                "sending an assignment",
                io_timeout,
                write_message(&mut worker.stream, &Message::Assign(assignment)),
            )
            .await;

            match sent {
                Ok(()) => {
                    worker.advance(WorkerState::TaskSent);
                    info!(
                        slot = worker.slot,
                        peer = %worker.peer,
                        steps = assignment.step_count,
                        start = assignment.interval_start,
                        end = assignment.interval_end,
                        "Assignment sent"
                    );
                    self.dispatched.push(Dispatched { worker, assignment });
                }
                Err(e) => {
                    let lost = Lost {
                        slot: worker.slot,
                        peer: worker.peer,
                        core_count: worker.core_count,
                        assignment,
                        reason: e.to_string(),
                    };
                    if self.policy == CompletionPolicy::Abort {
                        error!(slot = lost.slot, peer = %lost.peer, "Failed to send assignment: {}", e);
                        return Err(DistributedError::WorkerLost {
                            slot: lost.slot,
                            reason: lost.reason,
                        });
                    }
                    warn!(slot = lost.slot, peer = %lost.peer, "Failed to send assignment, will recompute: {}", e);
                    self.lost.push(lost);
                }
            }
        }

        Ok(())
    }

    /// Wait for every dispatched worker's result
    ///
    /// Results are returned in arrival order, recomputed assignments last.
    pub async fn collect(self) -> NetResult<Vec<PartialResult>> {
        let Self {
            dispatched,
            mut lost,
            policy,
            result_timeout,
            fallback,
            ..
        } = self;

        let expected = dispatched.len() + lost.len();
        let mut results = Vec::with_capacity(expected);
        let mut final_sum = 0.0;
        let mut ready_count = 0usize;

        info!(workers = dispatched.len(), "Waiting for results");

        let mut pending: JoinSet<PendingResult> = JoinSet::new();
        for mut entry in dispatched {
            pending.spawn(async move {
                let msg = with_deadline(
                    "waiting for a worker's result",
                    result_timeout,
                    read_message(&mut entry.worker.stream, MessageKind::Result),
                )
                .await;
                (entry, msg)
            });
        }

        while let Some(joined) = pending.join_next().await {
            let (mut entry, msg) = joined.map_err(|_| DistributedError::TaskPanicked)?;
            let worker = &mut entry.worker;

            let outcome = match msg {
                Ok(Message::Result { partial_sum }) => Ok(partial_sum),
                Ok(other) => Err(format!("expected RESULT, got {:?}", other)),
                Err(e) => Err(e.to_string()),
            };

            match outcome {
                Ok(value) => {
                    if !value.is_finite() {
                        warn!(slot = worker.slot, peer = %worker.peer, partial_sum = value, "Worker sent a non-finite partial sum");
                    }
                    worker.advance(WorkerState::ResultReceived);
                    final_sum += value;
                    ready_count += 1;
                    info!(
                        slot = worker.slot,
                        peer = %worker.peer,
                        partial_sum = value,
                        ready = ready_count,
                        expected,
                        "Result received"
                    );
                    results.push(PartialResult {
                        slot: worker.slot,
                        peer: worker.peer,
                        core_count: worker.core_count,
                        assignment: entry.assignment,
                        value,
                        source: ResultSource::Worker,
                    });
                }
                Err(reason) => {
                    if policy == CompletionPolicy::Abort {
                        error!(slot = worker.slot, peer = %worker.peer, "Worker lost: {}", reason);
                        pending.abort_all();
                        return Err(DistributedError::WorkerLost {
                            slot: worker.slot,
                            reason,
                        });
                    }
                    warn!(slot = worker.slot, peer = %worker.peer, "Worker lost, will recompute: {}", reason);
                    lost.push(Lost {
                        slot: worker.slot,
                        peer: worker.peer,
                        core_count: worker.core_count,
                        assignment: entry.assignment,
                        reason,
                    });
                }
            }
        }

        if !lost.is_empty() {
            let executor = fallback.ok_or_else(|| {
                DistributedError::Config("recompute policy needs a local executor".to_string())
            })?;

            for gone in lost {
                info!(
                    slot = gone.slot,
                    steps = gone.assignment.step_count,
                    reason = %gone.reason,
                    "Recomputing lost assignment locally"
                );
                let executor = executor.clone();
                let assignment = gone.assignment;
                let summary = tokio::task::spawn_blocking(move || executor.execute(&assignment))
                    .await
                    .map_err(|_| DistributedError::TaskPanicked)??;

                final_sum += summary.partial_sum;
                ready_count += 1;
                results.push(PartialResult {
                    slot: gone.slot,
                    peer: gone.peer,
                    core_count: gone.core_count,
                    assignment: gone.assignment,
                    value: summary.partial_sum,
                    source: ResultSource::Recomputed,
                });
            }
        }

        debug_assert_eq!(ready_count, expected);
        info!(ready = ready_count, final_sum, "All results collected");

        Ok(results)
    }
}
