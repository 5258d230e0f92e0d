//! Distributed integration
//!
//! One coordinator and an a-priori unknown number of workers.
//!
//! # Architecture
//!
//! - **Rendezvous**: the coordinator announces its TCP port over UDP broadcast
//! - **Registration**: workers connect and declare their core counts
//! - **Partition**: the coordinator splits the interval by declared capacity
//! - **Aggregation**: assignments go out, partial sums come back and are added
//!
//! # Modules
//!
//! - `protocol`: wire record and typed messages
//! - `rendezvous`: broadcaster task and worker-side discovery
//! - `registration`: accepting workers and learning their capacity
//! - `partition`: capacity-weighted split of the global problem
//! - `aggregation`: dispatch, collection and completion policy
//! - `coordinator`: the coordinator session and its state machine
//! - `node_service`: the worker session, with retry

pub mod aggregation;
pub mod coordinator;
pub mod error;
pub mod net;
pub mod node_service;
pub mod partition;
pub mod protocol;
pub mod registration;
pub mod rendezvous;

pub use aggregation::{AggregationManager, CompletionPolicy, PartialResult, ResultSource};
pub use coordinator::{Coordinator, CoordinatorState, RunReport};
pub use error::{DistributedError, NetResult, ProtocolError};
pub use node_service::{NodeService, WorkerReport};
pub use partition::{partition, IntegrationPlan};
pub use protocol::{Assignment, Message, MessageKind, WorkDescriptor, RECORD_SIZE};
pub use registration::{RegisteredWorker, Registration, RegistrationManager, WorkerState};

use std::future::Future;
use std::time::Duration;

/// Convert an optional timeout in seconds (0 = none) into a deadline
pub fn timeout_from_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

/// Await `fut`, failing with a retryable timeout once `limit` has passed
pub(crate) async fn with_deadline<F, T>(phase: &'static str, limit: Option<Duration>, fut: F) -> NetResult<T>
where
    F: Future<Output = NetResult<T>>,
{
    match limit {
        Some(after) => tokio::time::timeout(after, fut)
            .await
            .map_err(|_| DistributedError::Timeout { phase, after })?,
        None => fut.await,
    }
}
