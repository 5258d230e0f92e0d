//! QuadPulse CLI entry point

use anyhow::{Context, Result};
use quadpulse::config::cli::{Cli, ExecutionMode};
use quadpulse::config::Config;
use quadpulse::distributed::{Coordinator, NodeService};
use quadpulse::output::{json, text};
use std::sync::Arc;

fn main() -> Result<()> {
    println!("QuadPulse v{}", env!("CARGO_PKG_VERSION"));
    println!("Distributed Simpson integration");
    println!();

    // Parse CLI arguments
    let cli = Cli::parse_args();
    cli.validate()?;

    let config = quadpulse::config::toml::load_config(&cli)?;

    let level = if config.runtime.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    quadpulse::config::validator::validate_config(&config)
        .context("Configuration validation failed")?;

    print_configuration(cli.mode, &config);

    // Handle different execution modes
    match cli.mode {
        ExecutionMode::Coordinator => run_coordinator(config),
        ExecutionMode::Worker => run_worker(config),
    }
}

/// Print configuration summary
fn print_configuration(mode: ExecutionMode, config: &Config) {
    println!("Configuration:");
    println!("  Integral:");
    println!("    Function: {}", config.integral.function);
    println!("    Interval: [{}, {}]", config.integral.start, config.integral.end);
    println!("    Steps: {}", config.integral.steps);

    match mode {
        ExecutionMode::Coordinator => {
            println!("  Coordinator:");
            println!("    Workers: {}", config.coordinator.clients_max);
            println!("    Completion policy: {}", config.coordinator.completion_policy);
            println!(
                "    Announcing on: {}:{}",
                config.network.broadcast_addr, config.network.discovery_port
            );
        }
        ExecutionMode::Worker => {
            println!("  Worker:");
            println!("    Cores: {}", config.worker.effective_cores());
            if let Some(ref cores) = config.worker.cpu_list {
                println!("    CPU list: {}", cores);
            }
            match config.worker.coordinator_addr {
                Some(ref addr) => println!("    Coordinator: {}", addr),
                None => println!("    Discovery port: {}", config.network.discovery_port),
            }
        }
    }
    println!();
}

/// Run in coordinator mode
fn run_coordinator(config: Config) -> Result<()> {
    let integrand = config.integral.function.integrand();
    let json_output = config.coordinator.json_output.clone();

    let runtime = tokio::runtime::Runtime::new()
        .context("Failed to create tokio runtime")?;

    let report = runtime.block_on(async {
        let mut coordinator = Coordinator::bind(Arc::new(config), integrand).await?;
        coordinator.run().await
    })?;

    text::print_run_report(&report);

    if let Some(path) = json_output {
        json::write_run_report(&path, &report)?;
        println!("Run report written to: {}", path.display());
    }

    Ok(())
}

/// Run in worker mode
fn run_worker(config: Config) -> Result<()> {
    let integrand = config.integral.function.integrand();

    let runtime = tokio::runtime::Runtime::new()
        .context("Failed to create tokio runtime")?;

    let report = runtime.block_on(async {
        let service = NodeService::new(Arc::new(config), integrand);
        service.run().await
    })?;

    text::print_worker_report(&report);

    Ok(())
}
