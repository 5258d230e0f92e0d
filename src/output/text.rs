//! Human-readable text output

use crate::distributed::aggregation::ResultSource;
use crate::distributed::coordinator::RunReport;
use crate::distributed::node_service::WorkerReport;

/// Print the coordinator's run report to console
///
/// Displays the integral value, the discretization, and one row per worker
/// with its step share, interval and partial sum.
pub fn print_run_report(report: &RunReport) {
    println!("═══════════════════════════════════════════════════════════");
    println!("                  INTEGRATION RESULT");
    println!("═══════════════════════════════════════════════════════════");
    println!();

    println!("Function:   {}", report.function);
    println!(
        "Interval:   [{}, {}]",
        report.plan.start, report.plan.end
    );
    println!(
        "Steps:      {} (width {:.6e})",
        format_number(report.plan.steps),
        report.step_width
    );
    println!("Workers:    {} ({} cores)", report.workers.len(), report.total_cores);
    println!("Elapsed:    {:.3}s", report.elapsed_secs);
    println!();

    println!("Result:     {:.15}", report.result);
    if let (Some(exact), Some(error)) = (report.exact, report.absolute_error()) {
        println!("Exact:      {:.15}", exact);
        println!("Abs error:  {:.3e}", error);
    }
    println!();

    println!("Per-Worker Contributions:");
    println!(
        "  {:>4}  {:<21}  {:>5}  {:>12}  {:>25}  {:>20}",
        "slot", "peer", "cores", "steps", "interval", "partial sum"
    );
    for worker in &report.workers {
        let marker = match worker.source {
            ResultSource::Worker => "",
            ResultSource::Recomputed => "  (recomputed)",
        };
        println!(
            "  {:>4}  {:<21}  {:>5}  {:>12}  {:>25}  {:>20.15}{}",
            worker.slot,
            worker.peer.to_string(),
            worker.core_count,
            format_number(u64::from(worker.assignment.step_count)),
            format_interval(worker.assignment.interval_start, worker.assignment.interval_end),
            worker.value,
            marker
        );
    }
    println!();

    println!("═══════════════════════════════════════════════════════════");
}

/// Print what this worker did
pub fn print_worker_report(report: &WorkerReport) {
    println!("═══════════════════════════════════════════════════════════");
    println!("                    WORKER RESULT");
    println!("═══════════════════════════════════════════════════════════");
    println!();

    println!("Node:        {}", report.hostname);
    println!("Coordinator: {}", report.coordinator);
    if report.attempts > 1 {
        println!("Attempts:    {}", report.attempts);
    }
    println!(
        "Assignment:  {} steps over {}",
        format_number(u64::from(report.assignment.step_count)),
        format_interval(report.assignment.interval_start, report.assignment.interval_end)
    );
    println!("Threads:     {}", report.threads);
    println!("Compute:     {:.3}s", report.compute_secs);
    println!("Elapsed:     {:.3}s", report.elapsed_secs);
    println!();

    println!("Partial sum: {:.15}", report.partial_sum);
    if report.task_sums.len() > 1 {
        for (k, sum) in report.task_sums.iter().enumerate() {
            println!("  Thread {:>3}: {:.15}", k, sum);
        }
    }
    println!();

    println!("═══════════════════════════════════════════════════════════");
}

/// Format a number with thousands separators
fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::new();

    for (count, c) in s.chars().rev().enumerate() {
        if count > 0 && count % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }

    result.chars().rev().collect()
}

fn format_interval(start: f64, end: f64) -> String {
    format!("[{:.6}, {:.6})", start, end)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1_000_000), "1,000,000");
        assert_eq!(format_number(12_345_678), "12,345,678");
    }

    #[test]
    fn test_format_interval() {
        assert_eq!(format_interval(0.0, 0.5), "[0.000000, 0.500000)");
    }
}
