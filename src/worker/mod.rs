//! Worker-side parallel integration
//!
//! The executor takes one [`Assignment`] and splits it into `core_count`
//! contiguous slices on the step grid, one per thread. Each thread runs the
//! Simpson kernel over its own slice with no shared mutable state; the
//! executor joins them all and adds their sums into the worker's partial
//! result.
//!
//! # Uneven Splits
//!
//! When the step count is not a multiple of the core count, the first
//! `step_count % core_count` slices take one extra step each. Slices past the
//! step count (more cores than steps) are empty and contribute 0.0.
//!
//! # Example
//!
//! ```
//! use quadpulse::distributed::protocol::Assignment;
//! use quadpulse::integrate::FunctionKind;
//! use quadpulse::worker::WorkerExecutor;
//!
//! let executor = WorkerExecutor::new(FunctionKind::Square.integrand());
//! let assignment = Assignment {
//!     core_count: 4,
//!     step_count: 1000,
//!     interval_start: 0.0,
//!     interval_end: 1.0,
//!     step_width: 0.001,
//! };
//!
//! let summary = executor.execute(&assignment)?;
//! assert!((summary.partial_sum - 1.0 / 3.0).abs() < 1e-12);
//! # Ok::<(), quadpulse::distributed::DistributedError>(())
//! ```

pub mod affinity;

use crate::distributed::error::{DistributedError, NetResult};
use crate::distributed::protocol::Assignment;
use crate::integrate::{simpson_slice, SharedIntegrand};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// One thread's share of an assignment
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntegrationTask {
    pub index: usize,
    pub start: f64,
    pub step_width: f64,
    pub steps: u64,
}

/// Split an assignment into `core_count` contiguous slices
pub fn plan_tasks(assignment: &Assignment) -> Vec<IntegrationTask> {
    let threads = u64::from(assignment.core_count.max(1));
    let steps = u64::from(assignment.step_count);
    let base = steps / threads;
    let extra = steps % threads;

    let mut offset = 0u64;
    (0..threads)
        .map(|k| {
            let task_steps = base + u64::from(k < extra);
            let task = IntegrationTask {
                index: k as usize,
                start: assignment.interval_start + offset as f64 * assignment.step_width,
                step_width: assignment.step_width,
                steps: task_steps,
            };
            offset += task_steps;
            task
        })
        .collect()
}

/// Outcome of one executed assignment
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionSummary {
    /// Sum of every thread's result
    pub partial_sum: f64,
    /// Per-thread results, in slice order
    pub task_sums: Vec<f64>,
    pub elapsed: Duration,
}

/// Runs one assignment across a group of integration threads
#[derive(Clone)]
pub struct WorkerExecutor {
    integrand: SharedIntegrand,
    cpu_list: Option<Arc<Vec<usize>>>,
}

impl WorkerExecutor {
    pub fn new(integrand: SharedIntegrand) -> Self {
        Self {
            integrand,
            cpu_list: None,
        }
    }

    /// Pin thread `k` to `cpu_list[k % cpu_list.len()]`
    pub fn with_cpu_list(mut self, cpu_list: Vec<usize>) -> Self {
        if !cpu_list.is_empty() {
            self.cpu_list = Some(Arc::new(cpu_list));
        }
        self
    }

    /// Integrate the assignment on `core_count` threads and sum the results
    ///
    /// Blocks until every thread has finished.
    pub fn execute(&self, assignment: &Assignment) -> NetResult<ExecutionSummary> {
        let started = Instant::now();
        let tasks = plan_tasks(assignment);

        debug!(
            threads = tasks.len(),
            steps = assignment.step_count,
            start = assignment.interval_start,
            end = assignment.interval_end,
            "Spawning integration threads"
        );

        let mut handles = Vec::with_capacity(tasks.len());
        for task in tasks {
            let integrand = self.integrand.clone();
            let cpu = self
                .cpu_list
                .as_ref()
                .map(|cpus| cpus[task.index % cpus.len()]);

            let handle = std::thread::Builder::new()
                .name(format!("simpson-{}", task.index))
                .spawn(move || {
                    if let Some(cpu) = cpu {
                        if let Err(e) = affinity::set_cpu_affinity(cpu) {
                            warn!(thread = task.index, cpu, "Running unpinned: {:#}", e);
                        }
                    }
                    simpson_slice(integrand.as_ref(), task.start, task.step_width, task.steps)
                })
                .map_err(DistributedError::Spawn)?;

            handles.push(handle);
        }

        // Join every thread before reporting, even if one of them panicked
        let mut task_sums = Vec::with_capacity(handles.len());
        let mut panicked = false;
        for handle in handles {
            match handle.join() {
                Ok(sum) => task_sums.push(sum),
                Err(_) => panicked = true,
            }
        }
        if panicked {
            return Err(DistributedError::TaskPanicked);
        }

        let partial_sum = task_sums.iter().sum();
        Ok(ExecutionSummary {
            partial_sum,
            task_sums,
            elapsed: started.elapsed(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributed::partition::{partition, IntegrationPlan};
    use crate::integrate::FunctionKind;

    fn assignment(cores: u32, steps: u32, start: f64, h: f64) -> Assignment {
        Assignment {
            core_count: cores,
            step_count: steps,
            interval_start: start,
            interval_end: start + f64::from(steps) * h,
            step_width: h,
        }
    }

    #[test]
    fn test_plan_tasks_even_split() {
        let tasks = plan_tasks(&assignment(4, 1000, 0.0, 0.001));
        assert_eq!(tasks.len(), 4);
        assert!(tasks.iter().all(|t| t.steps == 250));
        assert_eq!(tasks[0].start, 0.0);
        assert!((tasks[2].start - 0.5).abs() < 1e-15);
    }

    #[test]
    fn test_plan_tasks_remainder_to_first_slices() {
        let tasks = plan_tasks(&assignment(4, 10, 0.0, 0.1));
        let steps: Vec<u64> = tasks.iter().map(|t| t.steps).collect();
        assert_eq!(steps, vec![3, 3, 2, 2]);
        assert_eq!(steps.iter().sum::<u64>(), 10);
        // Slices stay contiguous on the step grid
        assert!((tasks[1].start - 0.3).abs() < 1e-15);
        assert!((tasks[2].start - 0.6).abs() < 1e-15);
        assert!((tasks[3].start - 0.8).abs() < 1e-15);
    }

    #[test]
    fn test_plan_tasks_more_cores_than_steps() {
        let tasks = plan_tasks(&assignment(8, 3, 0.0, 0.5));
        assert_eq!(tasks.len(), 8);
        assert_eq!(tasks.iter().filter(|t| t.steps == 1).count(), 3);
        assert_eq!(tasks.iter().filter(|t| t.steps == 0).count(), 5);
    }

    #[test]
    fn test_execute_square() {
        let executor = WorkerExecutor::new(FunctionKind::Square.integrand());
        let summary = executor.execute(&assignment(3, 999, 0.0, 1.0 / 999.0)).unwrap();

        assert_eq!(summary.task_sums.len(), 3);
        assert!((summary.partial_sum - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_thread_count_does_not_change_result() {
        let executor = WorkerExecutor::new(FunctionKind::Sine.integrand());
        let single = executor.execute(&assignment(1, 5000, 0.0, 0.0006)).unwrap();

        for cores in [2, 3, 7, 16] {
            let split = executor.execute(&assignment(cores, 5000, 0.0, 0.0006)).unwrap();
            assert!(
                (split.partial_sum - single.partial_sum).abs() < 1e-12,
                "{} cores: {} vs {}",
                cores,
                split.partial_sum,
                single.partial_sum
            );
        }
    }

    #[test]
    fn test_workers_add_up_to_unsplit_integral() {
        let plan = IntegrationPlan::new(0.5, 2.0, 30_000);
        let f = FunctionKind::Exp.integrand();
        let executor = WorkerExecutor::new(f.clone());

        let unsplit = simpson_slice(f.as_ref(), plan.start, plan.step_width(), plan.steps);

        let mixes: [&[u32]; 5] = [&[1], &[1, 1], &[2, 4], &[5, 1, 3], &[8, 8, 1, 2]];
        for caps in mixes {
            let total: f64 = partition(&plan, caps)
                .unwrap()
                .iter()
                .map(|a| executor.execute(a).unwrap().partial_sum)
                .sum();
            assert!(
                (total - unsplit).abs() < 1e-10 * unsplit.abs(),
                "{:?}: {} vs {}",
                caps,
                total,
                unsplit
            );
        }
    }

    #[test]
    fn test_empty_assignment() {
        let executor = WorkerExecutor::new(FunctionKind::Cube.integrand());
        let summary = executor.execute(&assignment(4, 0, 0.25, 0.01)).unwrap();
        assert_eq!(summary.partial_sum, 0.0);
    }

    #[test]
    fn test_panicking_integrand() {
        let executor = WorkerExecutor::new(Arc::new(|x: f64| {
            if x > 0.5 {
                panic!("integrand blew up");
            }
            x
        }));
        let err = executor.execute(&assignment(2, 10, 0.0, 0.1)).unwrap_err();
        assert!(matches!(err, DistributedError::TaskPanicked));
    }

    #[test]
    fn test_cpu_list_still_computes() {
        let executor =
            WorkerExecutor::new(FunctionKind::Square.integrand()).with_cpu_list(vec![0]);
        let summary = executor.execute(&assignment(2, 100, 0.0, 0.01)).unwrap();
        assert!((summary.partial_sum - 1.0 / 3.0).abs() < 1e-12);
    }
}
