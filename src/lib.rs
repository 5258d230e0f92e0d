//! QuadPulse - Distributed Simpson integration
//!
//! QuadPulse splits one definite integral across a dynamically discovered set
//! of worker processes and adds their partial sums into a single result.
//!
//! # Architecture
//!
//! - **Rendezvous**: the coordinator announces its TCP port over UDP broadcast
//! - **Registration**: workers connect and declare how many cores they bring
//! - **Partitioning**: the step grid is split in proportion to declared cores
//! - **Parallel integration**: each worker runs one Simpson slice per core
//! - **Aggregation**: partial sums are collected over all connections at once
//!
//! Every blocking network wait has a deadline. Workers retry transient
//! failures, and the coordinator can recompute a lost worker's share.

pub mod config;
pub mod distributed;
pub mod integrate;
pub mod output;
pub mod worker;

// Re-export commonly used types
pub use config::Config;
pub use distributed::{Coordinator, NodeService};
pub use integrate::{FunctionKind, Integrand};

/// Result type used throughout QuadPulse
pub type Result<T> = anyhow::Result<T>;
