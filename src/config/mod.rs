//! Configuration module
//!
//! Handles CLI argument parsing, TOML configuration files, and validation.

pub mod cli;
pub mod toml;
pub mod validator;

use crate::distributed::aggregation::CompletionPolicy;
use crate::distributed::partition::IntegrationPlan;
use crate::distributed::protocol::DEFAULT_DISCOVERY_PORT;
use crate::distributed::timeout_from_secs;
use crate::integrate::FunctionKind;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::time::Duration;

/// Complete run configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub integral: IntegralConfig,
    #[serde(default)]
    pub coordinator: CoordinatorConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

/// The global integration problem
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegralConfig {
    /// Integrand, identical on coordinator and workers
    #[serde(default)]
    pub function: FunctionKind,
    /// Lower bound
    #[serde(default)]
    pub start: f64,
    /// Upper bound
    #[serde(default = "default_end")]
    pub end: f64,
    /// Global number of Simpson steps
    #[serde(default = "default_steps")]
    pub steps: u64,
}

fn default_end() -> f64 {
    1.0
}

fn default_steps() -> u64 {
    1_000_000
}

impl Default for IntegralConfig {
    fn default() -> Self {
        Self {
            function: FunctionKind::default(),
            start: 0.0,
            end: default_end(),
            steps: default_steps(),
        }
    }
}

impl IntegralConfig {
    pub fn plan(&self) -> IntegrationPlan {
        IntegrationPlan::new(self.start, self.end, self.steps)
    }
}

/// Coordinator settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Number of workers to wait for before partitioning
    #[serde(default = "default_clients_max")]
    pub clients_max: usize,
    /// What to do when a worker drops out after registration
    #[serde(default)]
    pub completion_policy: CompletionPolicy,
    /// Write the run report as JSON to this file
    pub json_output: Option<PathBuf>,
}

fn default_clients_max() -> usize {
    1
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            clients_max: default_clients_max(),
            completion_policy: CompletionPolicy::default(),
            json_output: None,
        }
    }
}

/// Worker settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Declared core count (defaults to the number of logical CPUs)
    pub cores: Option<u32>,
    /// CPU cores to pin integration threads to (e.g. "0,2-4")
    pub cpu_list: Option<String>,
    /// Connect to this coordinator ("host:port") instead of waiting for a broadcast
    pub coordinator_addr: Option<String>,
    /// Further attempts after a retryable failure
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Pause between attempts (milliseconds)
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    1000
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            cores: None,
            cpu_list: None,
            coordinator_addr: None,
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

impl WorkerConfig {
    /// Declared core count, falling back to the machine's CPU count
    pub fn effective_cores(&self) -> u32 {
        self.cores
            .unwrap_or_else(|| u32::try_from(num_cpus::get()).unwrap_or(u32::MAX))
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

/// Sockets, ports and deadlines
///
/// A timeout of 0 seconds disables that deadline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// UDP port announcements are sent to
    #[serde(default = "default_discovery_port")]
    pub discovery_port: u16,
    /// Destination address for announcements
    #[serde(default = "default_broadcast_addr")]
    pub broadcast_addr: Ipv4Addr,
    /// Address the coordinator accepts workers on
    #[serde(default = "default_listen_addr")]
    pub listen_addr: IpAddr,
    /// TCP port the coordinator accepts workers on (0 = ephemeral)
    #[serde(default)]
    pub listen_port: u16,
    /// Time between announcements (milliseconds)
    #[serde(default = "default_broadcast_interval_ms")]
    pub broadcast_interval_ms: u64,
    /// Worker: how long to wait for an announcement
    #[serde(default = "default_discovery_timeout_secs")]
    pub discovery_timeout_secs: u64,
    /// Coordinator: how long registration may take
    #[serde(default = "default_registration_timeout_secs")]
    pub registration_timeout_secs: u64,
    /// Coordinator: how long to wait for results once work is dispatched
    #[serde(default = "default_result_timeout_secs")]
    pub result_timeout_secs: u64,
    /// Single connect, read or write
    #[serde(default = "default_io_timeout_secs")]
    pub io_timeout_secs: u64,
}

fn default_discovery_port() -> u16 {
    DEFAULT_DISCOVERY_PORT
}

fn default_broadcast_addr() -> Ipv4Addr {
    Ipv4Addr::BROADCAST
}

fn default_listen_addr() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_broadcast_interval_ms() -> u64 {
    1000
}

fn default_discovery_timeout_secs() -> u64 {
    60
}

fn default_registration_timeout_secs() -> u64 {
    300
}

fn default_result_timeout_secs() -> u64 {
    600
}

fn default_io_timeout_secs() -> u64 {
    30
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            discovery_port: default_discovery_port(),
            broadcast_addr: default_broadcast_addr(),
            listen_addr: default_listen_addr(),
            listen_port: 0,
            broadcast_interval_ms: default_broadcast_interval_ms(),
            discovery_timeout_secs: default_discovery_timeout_secs(),
            registration_timeout_secs: default_registration_timeout_secs(),
            result_timeout_secs: default_result_timeout_secs(),
            io_timeout_secs: default_io_timeout_secs(),
        }
    }
}

impl NetworkConfig {
    pub fn broadcast_interval(&self) -> Duration {
        Duration::from_millis(self.broadcast_interval_ms)
    }

    pub fn discovery_timeout(&self) -> Option<Duration> {
        timeout_from_secs(self.discovery_timeout_secs)
    }

    pub fn registration_timeout(&self) -> Option<Duration> {
        timeout_from_secs(self.registration_timeout_secs)
    }

    pub fn result_timeout(&self) -> Option<Duration> {
        timeout_from_secs(self.result_timeout_secs)
    }

    pub fn io_timeout(&self) -> Option<Duration> {
        timeout_from_secs(self.io_timeout_secs)
    }
}

/// Runtime configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Enable debug logging
    #[serde(default)]
    pub debug: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.integral.function, FunctionKind::Square);
        assert_eq!(config.integral.steps, 1_000_000);
        assert_eq!(config.coordinator.clients_max, 1);
        assert_eq!(config.coordinator.completion_policy, CompletionPolicy::Abort);
        assert_eq!(config.worker.max_retries, 3);
        assert_eq!(config.network.discovery_port, 31123);
        assert_eq!(config.network.broadcast_addr, Ipv4Addr::BROADCAST);
        assert_eq!(config.network.io_timeout(), Some(Duration::from_secs(30)));
        assert!(!config.runtime.debug);
    }

    #[test]
    fn test_zero_timeout_disables_deadline() {
        let network = NetworkConfig {
            result_timeout_secs: 0,
            ..NetworkConfig::default()
        };
        assert_eq!(network.result_timeout(), None);
    }

    #[test]
    fn test_effective_cores() {
        let mut worker = WorkerConfig::default();
        assert_eq!(worker.effective_cores() as usize, num_cpus::get());

        worker.cores = Some(6);
        assert_eq!(worker.effective_cores(), 6);
    }

    #[test]
    fn test_plan_from_integral() {
        let integral = IntegralConfig {
            start: 1.0,
            end: 3.0,
            steps: 400,
            ..IntegralConfig::default()
        };
        let plan = integral.plan();
        assert_eq!(plan.steps, 400);
        assert!((plan.step_width() - 0.005).abs() < 1e-15);
    }
}
