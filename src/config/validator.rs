//! Configuration validation

use super::*;
use crate::worker::affinity::{parse_cpu_list, warn_if_oversubscribed};
use anyhow::{Context, Result};
use std::net::{SocketAddr, ToSocketAddrs};

/// Validate complete configuration
pub fn validate_config(config: &Config) -> Result<()> {
    validate_integral(&config.integral)?;
    validate_coordinator(&config.coordinator)?;
    validate_worker(&config.worker)?;
    validate_network(&config.network)?;

    Ok(())
}

/// Validate the integration problem
pub fn validate_integral(integral: &IntegralConfig) -> Result<()> {
    if integral.steps == 0 {
        anyhow::bail!("steps must be at least 1");
    }

    if !integral.start.is_finite() || !integral.end.is_finite() {
        anyhow::bail!(
            "integration bounds must be finite, got [{}, {}]",
            integral.start,
            integral.end
        );
    }

    if integral.start >= integral.end {
        anyhow::bail!(
            "start ({}) must be less than end ({})",
            integral.start,
            integral.end
        );
    }

    if integral.function == FunctionKind::InverseSquareRoot && integral.start <= 0.0 {
        anyhow::bail!(
            "{} needs start > 0, got start = {}",
            integral.function,
            integral.start
        );
    }

    Ok(())
}

/// Validate coordinator configuration
pub fn validate_coordinator(coordinator: &CoordinatorConfig) -> Result<()> {
    if coordinator.clients_max == 0 {
        anyhow::bail!("clients_max must be at least 1");
    }

    if let Some(ref path) = coordinator.json_output {
        if path.is_dir() {
            anyhow::bail!("json_output must be a file path, {} is a directory", path.display());
        }
    }

    Ok(())
}

/// Validate worker configuration
pub fn validate_worker(worker: &WorkerConfig) -> Result<()> {
    if worker.cores == Some(0) {
        anyhow::bail!("cores must be at least 1");
    }

    if let Some(ref cpu_list) = worker.cpu_list {
        let cores = parse_cpu_list(cpu_list).context("Invalid cpu_list")?;
        let cpu_count = num_cpus::get();
        if let Some(&core) = cores.iter().find(|&&c| c >= cpu_count) {
            anyhow::bail!(
                "cpu_list names core {} but this machine has {} CPUs",
                core,
                cpu_count
            );
        }
    }

    if let Some(ref addr) = worker.coordinator_addr {
        parse_coordinator_addr(addr)?;
    }

    warn_if_oversubscribed(worker.effective_cores() as usize);

    Ok(())
}

/// Validate network configuration
pub fn validate_network(network: &NetworkConfig) -> Result<()> {
    if network.discovery_port == 0 {
        anyhow::bail!("discovery_port must be non-zero");
    }

    if network.broadcast_interval_ms == 0 {
        anyhow::bail!("broadcast_interval_ms must be non-zero");
    }

    if network.listen_port != 0 && network.listen_port == network.discovery_port {
        tracing::warn!(
            port = network.listen_port,
            "listen_port equals discovery_port"
        );
    }

    Ok(())
}

/// Resolve a static coordinator address ("host:port")
pub fn parse_coordinator_addr(addr: &str) -> Result<SocketAddr> {
    addr.to_socket_addrs()
        .with_context(|| format!("Invalid coordinator address: {}", addr))?
        .next()
        .with_context(|| format!("Coordinator address {} did not resolve", addr))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&Config::default()).is_ok());
    }

    #[test]
    fn test_validate_integral() {
        let mut integral = IntegralConfig::default();
        assert!(validate_integral(&integral).is_ok());

        integral.steps = 0;
        assert!(validate_integral(&integral).is_err());

        integral.steps = 10;
        integral.start = 2.0;
        integral.end = 1.0;
        assert!(validate_integral(&integral).is_err());

        integral.end = f64::INFINITY;
        assert!(validate_integral(&integral).is_err());

        integral.start = -1.0;
        integral.end = 1.0;
        integral.function = FunctionKind::InverseSquareRoot;
        assert!(validate_integral(&integral).is_err());

        // Singular at the left bound
        integral.start = 0.0;
        assert!(validate_integral(&integral).is_err());

        integral.start = 0.25;
        assert!(validate_integral(&integral).is_ok());
    }

    #[test]
    fn test_validate_coordinator() {
        let mut coordinator = CoordinatorConfig::default();
        assert!(validate_coordinator(&coordinator).is_ok());

        coordinator.clients_max = 0;
        assert!(validate_coordinator(&coordinator).is_err());

        coordinator.clients_max = 2;
        coordinator.json_output = Some(std::env::temp_dir());
        assert!(validate_coordinator(&coordinator).is_err());
    }

    #[test]
    fn test_validate_worker() {
        let mut worker = WorkerConfig {
            cores: Some(1),
            ..WorkerConfig::default()
        };
        assert!(validate_worker(&worker).is_ok());

        worker.cores = Some(0);
        assert!(validate_worker(&worker).is_err());

        worker.cores = Some(1);
        worker.cpu_list = Some("0".to_string());
        assert!(validate_worker(&worker).is_ok());

        worker.cpu_list = Some("x-y".to_string());
        assert!(validate_worker(&worker).is_err());

        worker.cpu_list = Some(format!("{}", num_cpus::get() + 64));
        assert!(validate_worker(&worker).is_err());
    }

    #[test]
    fn test_validate_network() {
        let mut network = NetworkConfig::default();
        assert!(validate_network(&network).is_ok());

        network.broadcast_interval_ms = 0;
        assert!(validate_network(&network).is_err());

        network.broadcast_interval_ms = 1000;
        network.discovery_port = 0;
        assert!(validate_network(&network).is_err());
    }

    #[test]
    fn test_parse_coordinator_addr() {
        let addr = parse_coordinator_addr("127.0.0.1:4000").unwrap();
        assert_eq!(addr.port(), 4000);

        assert!(parse_coordinator_addr("no-port-here").is_err());
    }
}
