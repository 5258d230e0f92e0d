//! CLI argument parsing using clap

use crate::distributed::aggregation::CompletionPolicy;
use crate::integrate::FunctionKind;
use clap::{Parser, ValueEnum};
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;

/// Execution mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ExecutionMode {
    /// Coordinator - announce, register workers, partition and aggregate
    Coordinator,
    /// Worker - find the coordinator, integrate the assigned interval
    Worker,
}

/// QuadPulse - distributed Simpson integration
#[derive(Parser, Debug)]
#[command(name = "quadpulse")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Execution mode: coordinator or worker
    #[arg(long, value_enum)]
    pub mode: ExecutionMode,

    // === Integral Options ===
    /// Integrand (must match on coordinator and workers)
    #[arg(short = 'f', long, value_enum)]
    pub function: Option<FunctionKind>,

    /// Lower integration bound
    #[arg(long, allow_negative_numbers = true)]
    pub start: Option<f64>,

    /// Upper integration bound
    #[arg(long, allow_negative_numbers = true)]
    pub end: Option<f64>,

    /// Global number of Simpson steps
    #[arg(short = 'n', long)]
    pub steps: Option<u64>,

    // === Coordinator Options ===
    /// Number of workers to wait for (coordinator mode)
    #[arg(long)]
    pub clients_max: Option<usize>,

    /// What to do when a worker drops out: abort or recompute (coordinator mode)
    #[arg(long, value_enum)]
    pub completion_policy: Option<CompletionPolicy>,

    /// Write the run report as JSON to this file (coordinator mode)
    #[arg(long)]
    pub json_output: Option<PathBuf>,

    // === Worker Options ===
    /// Declared core count (worker mode, defaults to the CPU count)
    #[arg(long)]
    pub cores: Option<u32>,

    /// CPU cores to pin integration threads to, e.g. "0,2-4" (worker mode)
    #[arg(long)]
    pub cpu_list: Option<String>,

    /// Connect to this coordinator ("host:port") and skip discovery (worker mode)
    #[arg(long)]
    pub coordinator_addr: Option<String>,

    /// Further attempts after a retryable failure (worker mode)
    #[arg(long)]
    pub max_retries: Option<u32>,

    // === Network Options ===
    /// UDP discovery port
    #[arg(long, env = "QUADPULSE_DISCOVERY_PORT")]
    pub discovery_port: Option<u16>,

    /// Destination address for announcements (coordinator mode)
    #[arg(long)]
    pub broadcast_addr: Option<Ipv4Addr>,

    /// Address to accept workers on (coordinator mode)
    #[arg(long)]
    pub listen_addr: Option<IpAddr>,

    /// TCP port to accept workers on, 0 for ephemeral (coordinator mode)
    #[arg(long)]
    pub listen_port: Option<u16>,

    /// Time between announcements in milliseconds (coordinator mode)
    #[arg(long)]
    pub broadcast_interval_ms: Option<u64>,

    /// Seconds to wait for results after dispatch, 0 to wait forever (coordinator mode)
    #[arg(long)]
    pub result_timeout: Option<u64>,

    // === Configuration File ===
    /// TOML configuration file
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// Enable debug output
    #[arg(long)]
    pub debug: bool,
}

impl Cli {
    /// Parse CLI arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate CLI arguments
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.mode == ExecutionMode::Worker {
            if self.clients_max.is_some() || self.completion_policy.is_some() || self.json_output.is_some() {
                anyhow::bail!("--clients-max, --completion-policy and --json-output are coordinator options");
            }
        }
        if self.mode == ExecutionMode::Coordinator {
            if self.cores.is_some() || self.cpu_list.is_some() || self.coordinator_addr.is_some() {
                anyhow::bail!("--cores, --cpu-list and --coordinator-addr are worker options");
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_discovery_port_from_environment() {
        let command = Cli::command();
        let arg = command
            .get_arguments()
            .find(|a| a.get_id() == "discovery_port")
            .unwrap();
        assert_eq!(
            arg.get_env().and_then(|v| v.to_str()),
            Some("QUADPULSE_DISCOVERY_PORT")
        );
    }

    #[test]
    fn test_parse_coordinator() {
        let cli = Cli::try_parse_from([
            "quadpulse",
            "--mode",
            "coordinator",
            "--function",
            "sine",
            "--start",
            "-1.5",
            "--end",
            "2",
            "-n",
            "5000",
            "--clients-max",
            "3",
            "--completion-policy",
            "recompute",
        ])
        .unwrap();

        assert_eq!(cli.mode, ExecutionMode::Coordinator);
        assert_eq!(cli.function, Some(FunctionKind::Sine));
        assert_eq!(cli.start, Some(-1.5));
        assert_eq!(cli.steps, Some(5000));
        assert_eq!(cli.clients_max, Some(3));
        assert_eq!(cli.completion_policy, Some(CompletionPolicy::Recompute));
        assert!(cli.validate().is_ok());
    }

    #[test]
    fn test_parse_worker() {
        let cli = Cli::try_parse_from([
            "quadpulse",
            "--mode",
            "worker",
            "--cores",
            "4",
            "--coordinator-addr",
            "10.0.0.1:4000",
        ])
        .unwrap();

        assert_eq!(cli.mode, ExecutionMode::Worker);
        assert_eq!(cli.cores, Some(4));
        assert!(cli.validate().is_ok());
    }

    #[test]
    fn test_mode_is_required() {
        assert!(Cli::try_parse_from(["quadpulse"]).is_err());
    }

    #[test]
    fn test_validate_rejects_mixed_roles() {
        let cli = Cli::try_parse_from(["quadpulse", "--mode", "worker", "--clients-max", "2"]).unwrap();
        assert!(cli.validate().is_err());

        let cli = Cli::try_parse_from(["quadpulse", "--mode", "coordinator", "--cores", "2"]).unwrap();
        assert!(cli.validate().is_err());
    }
}
