//! TOML configuration file parsing

use super::*;
use crate::config::cli::Cli;
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

/// Parse TOML configuration file
pub fn parse_toml_file(path: &Path) -> Result<Config> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_toml_string(&contents)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Parse TOML configuration from string
pub fn parse_toml_string(contents: &str) -> Result<Config> {
    let config: Config = ::toml::from_str(contents)
        .context("Failed to parse TOML configuration")?;

    Ok(config)
}

/// Load the config file named on the command line, or start from defaults
pub fn load_config(cli: &Cli) -> Result<Config> {
    let config = match &cli.config {
        Some(path) => parse_toml_file(path)?,
        None => Config::default(),
    };
    merge_cli_with_config(cli, config)
}

/// Merge CLI arguments with TOML configuration (CLI takes precedence)
pub fn merge_cli_with_config(cli: &Cli, mut config: Config) -> Result<Config> {
    // Integral
    if let Some(function) = cli.function {
        config.integral.function = function;
    }
    if let Some(start) = cli.start {
        config.integral.start = start;
    }
    if let Some(end) = cli.end {
        config.integral.end = end;
    }
    if let Some(steps) = cli.steps {
        config.integral.steps = steps;
    }

    // Coordinator
    if let Some(clients_max) = cli.clients_max {
        config.coordinator.clients_max = clients_max;
    }
    if let Some(policy) = cli.completion_policy {
        config.coordinator.completion_policy = policy;
    }
    if let Some(ref path) = cli.json_output {
        config.coordinator.json_output = Some(path.clone());
    }

    // Worker
    if let Some(cores) = cli.cores {
        config.worker.cores = Some(cores);
    }
    if let Some(ref cpu_list) = cli.cpu_list {
        config.worker.cpu_list = Some(cpu_list.clone());
    }
    if let Some(ref addr) = cli.coordinator_addr {
        config.worker.coordinator_addr = Some(addr.clone());
    }
    if let Some(retries) = cli.max_retries {
        config.worker.max_retries = retries;
    }

    // Network
    if let Some(port) = cli.discovery_port {
        config.network.discovery_port = port;
    }
    if let Some(addr) = cli.broadcast_addr {
        config.network.broadcast_addr = addr;
    }
    if let Some(addr) = cli.listen_addr {
        config.network.listen_addr = addr;
    }
    if let Some(port) = cli.listen_port {
        config.network.listen_port = port;
    }
    if let Some(interval) = cli.broadcast_interval_ms {
        config.network.broadcast_interval_ms = interval;
    }
    if let Some(secs) = cli.result_timeout {
        config.network.result_timeout_secs = secs;
    }

    // Runtime
    if cli.debug {
        config.runtime.debug = true;
    }

    Ok(config)
}
