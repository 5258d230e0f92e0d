//! Worker node service
//!
//! One worker session:
//! - Finds the coordinator (UDP announcement, or a configured static address)
//! - Connects and registers its core count
//! - Waits for an assignment
//! - Integrates it on a group of threads
//! - Sends the partial sum back
//!
//! Retryable failures (deadlines, refused or reset connections) restart the
//! session from discovery, up to `max_retries` more times.

use crate::config::validator::parse_coordinator_addr;
use crate::config::Config;
use crate::distributed::error::{DistributedError, NetResult, ProtocolError};
use crate::distributed::net::enable_keepalive;
use crate::distributed::protocol::{read_message, write_message, Assignment, Message, MessageKind};
use crate::distributed::rendezvous::DiscoveryListener;
use crate::distributed::with_deadline;
use crate::integrate::SharedIntegrand;
use crate::worker::affinity::parse_cpu_list;
use crate::worker::WorkerExecutor;
use anyhow::{Context, Result};
use serde::Serialize;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

/// What a worker did in a successful session
#[derive(Debug, Clone, Serialize)]
pub struct WorkerReport {
    pub hostname: String,
    pub coordinator: SocketAddr,
    pub assignment: Assignment,
    pub threads: usize,
    pub partial_sum: f64,
    /// Per-thread sums, in slice order
    pub task_sums: Vec<f64>,
    /// Sessions started, including the successful one
    pub attempts: u32,
    pub compute_secs: f64,
    pub elapsed_secs: f64,
}

/// Worker node service
pub struct NodeService {
    config: Arc<Config>,
    integrand: SharedIntegrand,
}

impl NodeService {
    pub fn new(config: Arc<Config>, integrand: SharedIntegrand) -> Self {
        Self { config, integrand }
    }

    /// Run sessions until one succeeds or a failure is not worth retrying
    pub async fn run(&self) -> Result<WorkerReport> {
        let executor = self.executor()?;
        let worker = &self.config.worker;
        let started = Instant::now();
        let mut attempt: u32 = 0;

        info!(
            cores = worker.effective_cores(),
            node = %node_id(),
            "Worker starting"
        );

        loop {
            attempt += 1;

            match self.session(&executor).await {
                Ok(mut report) => {
                    report.attempts = attempt;
                    report.elapsed_secs = started.elapsed().as_secs_f64();
                    return Ok(report);
                }
                Err(e) if e.is_retryable() && attempt <= worker.max_retries => {
                    warn!(
                        attempt,
                        max_retries = worker.max_retries,
                        "Session failed, retrying in {:?}: {}",
                        worker.retry_backoff(),
                        e
                    );
                    tokio::time::sleep(worker.retry_backoff()).await;
                }
                Err(e) => {
                    return Err(e).with_context(|| format!("Worker failed after {} attempt(s)", attempt));
                }
            }
        }
    }

    fn executor(&self) -> Result<WorkerExecutor> {
        let executor = WorkerExecutor::new(Arc::clone(&self.integrand));
        match self.config.worker.cpu_list {
            Some(ref list) => {
                let cpus = parse_cpu_list(list).context("Invalid cpu_list")?;
                Ok(executor.with_cpu_list(cpus))
            }
            None => Ok(executor),
        }
    }

    /// Static address if configured, otherwise wait for an announcement
    async fn locate(&self) -> NetResult<SocketAddr> {
        let net = &self.config.network;

        if let Some(ref addr) = self.config.worker.coordinator_addr {
            return parse_coordinator_addr(addr).map_err(|e| DistributedError::Config(format!("{:#}", e)));
        }

        let listener = DiscoveryListener::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, net.discovery_port))?;
        info!(port = net.discovery_port, "Waiting for coordinator announcement");
        listener.wait_for_coordinator(net.discovery_timeout()).await
    }

    async fn session(&self, executor: &WorkerExecutor) -> NetResult<WorkerReport> {
        let net = &self.config.network;
        let cores = self.config.worker.effective_cores();

        let coordinator = self.locate().await?;

        let mut stream = with_deadline("connecting to the coordinator", net.io_timeout(), async {
            TcpStream::connect(coordinator)
                .await
                .map_err(|e| DistributedError::transport(format!("failed to connect to {}", coordinator), e))
        })
        .await?;

        if let Err(e) = stream.set_nodelay(true) {
            debug!("Could not set TCP_NODELAY: {}", e);
        }
        if let Err(e) = enable_keepalive(&stream) {
            debug!("Could not enable keepalive: {}", e);
        }
        info!(%coordinator, "Connected to coordinator");

        with_deadline(
            "registering with the coordinator",
            net.io_timeout(),
            write_message(&mut stream, &Message::Register { core_count: cores }),
        )
        .await?;
        info!(cores, "Registered, waiting for assignment");

        // The coordinator only assigns once every worker has registered
        let assignment = match with_deadline(
            "waiting for an assignment",
            net.registration_timeout(),
            read_message(&mut stream, MessageKind::Assign),
        )
        .await?
        {
            Message::Assign(assignment) => assignment,
            other => {
                return Err(ProtocolError::InvalidField {
                    field: "message",
                    value: format!("{:?}", other),
                }
                .into())
            }
        };

        info!(
            steps = assignment.step_count,
            start = assignment.interval_start,
            end = assignment.interval_end,
            step_width = assignment.step_width,
            threads = assignment.core_count,
            "Assignment received"
        );

        let job = executor.clone();
        let summary = tokio::task::spawn_blocking(move || job.execute(&assignment))
            .await
            .map_err(|_| DistributedError::TaskPanicked)??;

        with_deadline(
            "sending the result",
            net.io_timeout(),
            write_message(&mut stream, &Message::Result { partial_sum: summary.partial_sum }),
        )
        .await?;

        info!(
            partial_sum = summary.partial_sum,
            compute_secs = summary.elapsed.as_secs_f64(),
            "Result sent"
        );

        Ok(WorkerReport {
            hostname: node_id(),
            coordinator,
            assignment,
            threads: summary.task_sums.len(),
            partial_sum: summary.partial_sum,
            task_sums: summary.task_sums,
            attempts: 0,
            compute_secs: summary.elapsed.as_secs_f64(),
            elapsed_secs: 0.0,
        })
    }
}

/// Node identifier for reports
fn node_id() -> String {
    hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string())
}
