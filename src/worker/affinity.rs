//! CPU pinning for integration threads
//!
//! A worker may pin each integration thread to one core from a configured CPU
//! list. Thread `k` takes `cpu_list[k % cpu_list.len()]`, so a list shorter
//! than the declared core count wraps around.
//!
//! # Platform Support
//!
//! Pinning uses `sched_setaffinity` and is only available on Linux. Elsewhere
//! the call fails and the caller runs the thread unpinned.
//!
//! # Example
//!
//! ```no_run
//! use quadpulse::worker::affinity::{parse_cpu_list, set_cpu_affinity};
//!
//! let cores = parse_cpu_list("0,2-4").unwrap();
//! set_cpu_affinity(cores[0]).unwrap();
//! ```

use crate::Result;
use anyhow::Context;
use tracing::warn;

/// Bind the calling thread to a single CPU core
///
/// # Errors
///
/// Returns an error if the core ID is out of range for a `cpu_set_t` or the
/// syscall fails (for example because the core is offline).
#[cfg(target_os = "linux")]
pub fn set_cpu_affinity(core: usize) -> Result<()> {
    use libc::{cpu_set_t, sched_setaffinity, CPU_SET, CPU_ZERO};
    use std::mem;

    if core >= 1024 {
        anyhow::bail!("CPU core ID {} is too large (max 1023)", core);
    }

    let result = unsafe {
        let mut cpu_set: cpu_set_t = mem::zeroed();
        CPU_ZERO(&mut cpu_set);
        CPU_SET(core, &mut cpu_set);

        // 0 = calling thread
        sched_setaffinity(0, mem::size_of::<cpu_set_t>(), &cpu_set)
    };

    if result != 0 {
        let err = std::io::Error::last_os_error();
        return Err(err).with_context(|| format!("Failed to pin thread to core {}", core));
    }

    Ok(())
}

#[cfg(not(target_os = "linux"))]
pub fn set_cpu_affinity(_core: usize) -> Result<()> {
    anyhow::bail!("CPU affinity is only supported on Linux")
}

/// Parse a comma-separated list of CPU cores or ranges
///
/// Accepts "0,1,2", "0-3" and mixes such as "0,2-4,7". The result is sorted
/// and free of duplicates.
///
/// ```
/// use quadpulse::worker::affinity::parse_cpu_list;
///
/// assert_eq!(parse_cpu_list("0,2-4,7").unwrap(), vec![0, 2, 3, 4, 7]);
/// ```
pub fn parse_cpu_list(list: &str) -> Result<Vec<usize>> {
    let mut cores = Vec::new();

    for part in list.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }

        if let Some((lo, hi)) = part.split_once('-') {
            if hi.contains('-') {
                anyhow::bail!("Invalid CPU range format: {}", part);
            }
            let start: usize = lo
                .trim()
                .parse()
                .with_context(|| format!("Invalid CPU core number: {}", lo))?;
            let end: usize = hi
                .trim()
                .parse()
                .with_context(|| format!("Invalid CPU core number: {}", hi))?;

            if start > end {
                anyhow::bail!("Invalid CPU range: start ({}) > end ({})", start, end);
            }
            cores.extend(start..=end);
        } else {
            let core: usize = part
                .parse()
                .with_context(|| format!("Invalid CPU core number: {}", part))?;
            cores.push(core);
        }
    }

    if cores.is_empty() {
        anyhow::bail!("CPU core list cannot be empty");
    }

    cores.sort_unstable();
    cores.dedup();

    Ok(cores)
}

/// Number of logical CPUs on this machine
pub fn num_cpus() -> usize {
    num_cpus::get()
}

/// Warn when a worker declares more cores than the machine has
///
/// Returns true if the declared count is oversubscribed.
pub fn warn_if_oversubscribed(declared: usize) -> bool {
    let cpu_count = num_cpus();
    if declared > cpu_count {
        warn!(
            declared,
            cpu_count, "Declared core count exceeds CPU count; integration threads will share cores"
        );
        true
    } else {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cpu_list_single() {
        assert_eq!(parse_cpu_list("0").unwrap(), vec![0]);
    }

    #[test]
    fn test_parse_cpu_list_range() {
        assert_eq!(parse_cpu_list("0-3").unwrap(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_parse_cpu_list_mixed_with_spaces() {
        assert_eq!(parse_cpu_list("0, 2-4, 7").unwrap(), vec![0, 2, 3, 4, 7]);
    }

    #[test]
    fn test_parse_cpu_list_dedup_and_sort() {
        assert_eq!(parse_cpu_list("3,1,1,2-3,0").unwrap(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_parse_cpu_list_errors() {
        assert!(parse_cpu_list("").is_err());
        assert!(parse_cpu_list(" , ").is_err());
        assert!(parse_cpu_list("0,abc").is_err());
        assert!(parse_cpu_list("5-2").is_err());
        assert!(parse_cpu_list("0-2-4").is_err());
    }

    #[test]
    fn test_num_cpus() {
        let cpus = num_cpus();
        assert!(cpus > 0);
    }

    #[test]
    fn test_warn_if_oversubscribed() {
        let cpu_count = num_cpus();
        assert!(!warn_if_oversubscribed(cpu_count));
        assert!(warn_if_oversubscribed(cpu_count + 1));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_set_cpu_affinity_rejects_huge_core() {
        assert!(set_cpu_affinity(4096).is_err());
    }

    #[cfg(not(target_os = "linux"))]
    #[test]
    fn test_set_cpu_affinity_unsupported() {
        assert!(set_cpu_affinity(0).is_err());
    }
}
