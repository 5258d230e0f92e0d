//! Distributed coordinator
//!
//! The coordinator session owns every socket of a run and walks a fixed state
//! machine:
//!
//! ```text
//! Broadcasting -> Registering -> Partitioning -> Dispatched -> Collecting -> Done
//! ```
//!
//! The broadcaster runs on its own task from the moment the listening socket
//! is bound until registration closes. Everything else happens on the session
//! task.

use crate::config::Config;
use crate::distributed::aggregation::{aggregate, AggregationManager, CompletionPolicy, PartialResult};
use crate::distributed::partition::{partition, IntegrationPlan};
use crate::distributed::registration::RegistrationManager;
use crate::distributed::rendezvous::Broadcaster;
use crate::integrate::SharedIntegrand;
use crate::worker::WorkerExecutor;
use anyhow::{Context, Result};
use serde::Serialize;
use std::net::{SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tracing::{debug, info};

/// Coordinator lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CoordinatorState {
    Broadcasting,
    Registering,
    Partitioning,
    Dispatched,
    Collecting,
    Done,
}

/// Outcome of a coordinator run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub function: String,
    /// Sum of every partial result
    pub result: f64,
    /// Closed-form value, when the integrand has one
    pub exact: Option<f64>,
    pub plan: IntegrationPlan,
    pub step_width: f64,
    pub total_cores: u64,
    pub completion_policy: CompletionPolicy,
    /// Per-worker contributions, ordered by slot
    pub workers: Vec<PartialResult>,
    pub elapsed_secs: f64,
}

impl RunReport {
    pub fn absolute_error(&self) -> Option<f64> {
        self.exact.map(|exact| (self.result - exact).abs())
    }
}

/// Coordinator session
pub struct Coordinator {
    config: Arc<Config>,
    integrand: SharedIntegrand,
    listener: Option<TcpListener>,
    local_addr: SocketAddr,
    state: CoordinatorState,
}

impl Coordinator {
    /// Bind the worker listening socket
    pub async fn bind(config: Arc<Config>, integrand: SharedIntegrand) -> Result<Self> {
        let net = &config.network;
        let addr = SocketAddr::new(net.listen_addr, net.listen_port);
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind coordinator listener on {}", addr))?;
        let local_addr = listener
            .local_addr()
            .context("Failed to query coordinator listener")?;

        info!(%local_addr, "Coordinator listening");

        Ok(Self {
            config,
            integrand,
            listener: Some(listener),
            local_addr,
            state: CoordinatorState::Broadcasting,
        })
    }

    /// Address workers connect to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn state(&self) -> CoordinatorState {
        self.state
    }

    fn transition(&mut self, next: CoordinatorState) {
        debug_assert!(next > self.state, "{:?} -> {:?}", self.state, next);
        debug!(from = ?self.state, to = ?next, "Coordinator state change");
        self.state = next;
    }

    /// Run one integration to completion
    pub async fn run(&mut self) -> Result<RunReport> {
        let started = Instant::now();
        let config = Arc::clone(&self.config);
        let net = &config.network;
        let plan = config.integral.plan();

        let listener = self
            .listener
            .take()
            .context("Coordinator has already run")?;

        // Broadcasting
        let target = SocketAddrV4::new(net.broadcast_addr, net.discovery_port);
        let broadcaster = Broadcaster::bind(target, self.local_addr.port(), net.broadcast_interval())
            .await
            .context("Failed to start discovery broadcast")?;
        let mut broadcast = broadcaster.spawn();
        info!(%target, port = self.local_addr.port(), "Announcing rendezvous port");

        // Registering
        self.transition(CoordinatorState::Registering);
        let manager = RegistrationManager::new(listener, config.coordinator.clients_max)
            .with_timeouts(net.registration_timeout(), net.io_timeout());
        let registered = tokio::select! {
            registered = manager.register() => registered,
            failure = broadcast.failed() => Err(failure),
        };
        broadcast.stop().await;
        let registration = registered.context("Worker registration failed")?;

        // Partitioning
        self.transition(CoordinatorState::Partitioning);
        let capacities = registration.capacities();
        let assignments = partition(&plan, &capacities).context("Failed to partition work")?;
        info!(
            workers = assignments.len(),
            total_cores = registration.total_cores,
            steps = plan.steps,
            step_width = plan.step_width(),
            "Work partitioned"
        );

        // Dispatched
        let mut aggregation = AggregationManager::new(registration.workers, config.coordinator.completion_policy)
            .with_timeouts(net.io_timeout(), net.result_timeout())
            .with_fallback(WorkerExecutor::new(Arc::clone(&self.integrand)));
        aggregation
            .dispatch(&assignments)
            .await
            .context("Failed to dispatch assignments")?;
        self.transition(CoordinatorState::Dispatched);

        // Collecting
        self.transition(CoordinatorState::Collecting);
        let mut results = aggregation
            .collect()
            .await
            .context("Failed to collect results")?;
        let result = aggregate(&results);
        results.sort_by_key(|r| r.slot);

        self.transition(CoordinatorState::Done);
        let elapsed = started.elapsed();
        info!(result, elapsed_secs = elapsed.as_secs_f64(), "Integration complete");

        Ok(RunReport {
            function: config.integral.function.to_string(),
            result,
            exact: config.integral.function.antiderivative_delta(plan.start, plan.end),
            plan,
            step_width: plan.step_width(),
            total_cores: registration.total_cores,
            completion_policy: config.coordinator.completion_policy,
            workers: results,
            elapsed_secs: elapsed.as_secs_f64(),
        })
    }
}
