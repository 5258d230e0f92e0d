//! Capacity-weighted work partitioning
//!
//! Splits the global step count across workers in proportion to their declared
//! core counts. Step shares are `floor(steps * cores_i / total_cores)` in exact
//! integer arithmetic, and whatever the flooring leaves over goes to the last
//! worker, so the shares always add up to the global step count.
//!
//! Interval boundaries sit on the global step grid at each worker's cumulative
//! step offset. A worker's interval is therefore exactly `step_count *
//! step_width` wide, and neighbouring intervals share their boundary value.

use crate::distributed::error::{DistributedError, NetResult};
use crate::distributed::protocol::Assignment;
use serde::{Deserialize, Serialize};

/// The global integration problem
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IntegrationPlan {
    pub start: f64,
    pub end: f64,
    pub steps: u64,
}

impl IntegrationPlan {
    pub fn new(start: f64, end: f64, steps: u64) -> Self {
        Self { start, end, steps }
    }

    /// Width of one Simpson step
    pub fn step_width(&self) -> f64 {
        (self.end - self.start) / self.steps as f64
    }

    /// Abscissa of grid point `offset`, with the last point pinned to `end`
    fn grid_point(&self, offset: u64) -> f64 {
        if offset >= self.steps {
            self.end
        } else {
            self.start + (self.end - self.start) * (offset as f64 / self.steps as f64)
        }
    }

    fn validate(&self) -> NetResult<()> {
        if self.steps == 0 {
            return Err(DistributedError::Partition("step count must be positive".to_string()));
        }
        if !(self.start.is_finite() && self.end.is_finite()) {
            return Err(DistributedError::Partition(format!(
                "bounds must be finite, got [{}, {}]",
                self.start, self.end
            )));
        }
        if self.start >= self.end {
            return Err(DistributedError::Partition(format!(
                "start ({}) must be below end ({})",
                self.start, self.end
            )));
        }
        Ok(())
    }
}

/// Produce one assignment per worker, in the order of `capacities`
///
/// `capacities[i]` is worker `i`'s declared core count.
pub fn partition(plan: &IntegrationPlan, capacities: &[u32]) -> NetResult<Vec<Assignment>> {
    plan.validate()?;

    if capacities.is_empty() {
        return Err(DistributedError::Partition("no workers registered".to_string()));
    }
    if let Some(slot) = capacities.iter().position(|c| *c == 0) {
        return Err(DistributedError::Partition(format!("worker {} declared zero cores", slot)));
    }

    let total_cores: u64 = capacities.iter().map(|c| u64::from(*c)).sum();
    let step_width = plan.step_width();
    let last = capacities.len() - 1;

    let mut assignments = Vec::with_capacity(capacities.len());
    let mut offset: u64 = 0;

    for (i, &cores) in capacities.iter().enumerate() {
        let steps = if i == last {
            plan.steps - offset
        } else {
            (u128::from(plan.steps) * u128::from(cores) / u128::from(total_cores)) as u64
        };

        let step_count = u32::try_from(steps).map_err(|_| {
            DistributedError::Partition(format!(
                "worker {} would receive {} steps, more than a record can carry",
                i, steps
            ))
        })?;

        assignments.push(Assignment {
            core_count: cores,
            step_count,
            interval_start: plan.grid_point(offset),
            interval_end: plan.grid_point(offset + steps),
            step_width,
        });

        offset += steps;
    }

    Ok(assignments)
}
