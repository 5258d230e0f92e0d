//! Worker registration
//!
//! Accepts up to `clients_max` connections and reads one REGISTER record from
//! each. Accepting and reading are multiplexed in a single wait: the listener
//! and every pending connection are polled together, so a slow worker never
//! holds up the others.
//!
//! Each accepted connection takes the first free slot. A connection that closes,
//! times out or sends a malformed record before registering is dropped and its
//! slot freed. Registered connections stay in the same wait: if one closes, its
//! slot is freed and its cores no longer count. Registration ends once
//! `clients_max` live workers have declared their capacity; the listening
//! socket is closed at that point.

use crate::distributed::error::{DistributedError, NetResult};
use crate::distributed::protocol::{read_message, Message, MessageKind};
use crate::distributed::with_deadline;
use serde::Serialize;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Lifecycle of a worker connection on the coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum WorkerState {
    Connected,
    Registered,
    TaskSent,
    ResultReceived,
}

/// A worker that has declared its capacity
#[derive(Debug)]
pub struct RegisteredWorker {
    pub slot: usize,
    pub peer: SocketAddr,
    pub core_count: u32,
    pub state: WorkerState,
    pub stream: TcpStream,
}

impl RegisteredWorker {
    /// Move the worker forward in its lifecycle; states never go backwards
    pub(crate) fn advance(&mut self, next: WorkerState) {
        debug_assert!(next > self.state, "{:?} -> {:?}", self.state, next);
        self.state = next;
    }
}

/// Outcome of a completed registration phase
#[derive(Debug)]
pub struct Registration {
    /// Registered workers, ordered by slot
    pub workers: Vec<RegisteredWorker>,
    pub total_cores: u64,
}

impl Registration {
    /// Declared core counts in slot order
    pub fn capacities(&self) -> Vec<u32> {
        self.workers.iter().map(|w| w.core_count).collect()
    }
}

/// Something that happened on a worker connection during registration
enum ConnectionEvent {
    /// A new connection's first record, or the failure to read it
    Declared(RegisteredWorker, NetResult<Message>),
    /// A registered connection closed or sent data out of turn
    Dropped(RegisteredWorker, String),
    /// A registered connection handed back once every slot is filled
    Released(RegisteredWorker),
}

/// Read the REGISTER record of a freshly accepted connection
async fn read_declaration(mut worker: RegisteredWorker, timeout: Option<Duration>) -> ConnectionEvent {
    let msg = with_deadline(
        "waiting for a worker's core count",
        timeout,
        read_message(&mut worker.stream, MessageKind::Register),
    )
    .await;
    ConnectionEvent::Declared(worker, msg)
}

/// Hold a registered connection until it closes or registration completes
///
/// A registered worker sends nothing until it has its assignment, so any
/// readiness here is either end of stream or a protocol violation.
async fn watch_registered(worker: RegisteredWorker, mut release: watch::Receiver<bool>) -> ConnectionEvent {
    let mut probe = [0u8; 1];
    tokio::select! {
        _ = release.changed() => ConnectionEvent::Released(worker),
        peeked = worker.stream.peek(&mut probe) => {
            let reason = match peeked {
                Ok(0) => "connection closed by peer".to_string(),
                Ok(_) => "unexpected data before assignment".to_string(),
                Err(e) => e.to_string(),
            };
            ConnectionEvent::Dropped(worker, reason)
        }
    }
}

/// Slot table and running capacity
struct Roster {
    clients_max: usize,
    slots: Vec<Option<SocketAddr>>,
    live: usize,
    total_cores: u64,
}

impl Roster {
    fn new(clients_max: usize) -> Self {
        Self {
            clients_max,
            slots: vec![None; clients_max],
            live: 0,
            total_cores: 0,
        }
    }

    fn free_slot(&self) -> Option<usize> {
        self.slots.iter().position(Option::is_none)
    }

    fn is_full(&self) -> bool {
        self.live == self.clients_max
    }

    /// Apply one connection event; released workers are handed back
    fn apply(
        &mut self,
        event: ConnectionEvent,
        connections: &mut JoinSet<ConnectionEvent>,
        release: &watch::Sender<bool>,
    ) -> Option<RegisteredWorker> {
        match event {
            ConnectionEvent::Declared(mut worker, Ok(Message::Register { core_count })) => {
                worker.core_count = core_count;
                worker.advance(WorkerState::Registered);
                self.live += 1;
                self.total_cores += u64::from(core_count);
                info!(
                    slot = worker.slot,
                    peer = %worker.peer,
                    core_count,
                    registered = self.live,
                    clients_max = self.clients_max,
                    "Worker registered"
                );
                connections.spawn(watch_registered(worker, release.subscribe()));
                None
            }
            ConnectionEvent::Declared(worker, Ok(other)) => {
                warn!(slot = worker.slot, peer = %worker.peer, "Dropping connection: expected REGISTER, got {:?}", other);
                self.slots[worker.slot] = None;
                None
            }
            ConnectionEvent::Declared(worker, Err(e)) => {
                warn!(slot = worker.slot, peer = %worker.peer, "Dropping connection before registration: {}", e);
                self.slots[worker.slot] = None;
                None
            }
            ConnectionEvent::Dropped(worker, reason) => {
                self.live -= 1;
                self.total_cores -= u64::from(worker.core_count);
                self.slots[worker.slot] = None;
                warn!(
                    slot = worker.slot,
                    peer = %worker.peer,
                    core_count = worker.core_count,
                    registered = self.live,
                    "Registered worker dropped: {}",
                    reason
                );
                None
            }
            ConnectionEvent::Released(worker) => Some(worker),
        }
    }
}

/// Accepts workers and learns their capacity
pub struct RegistrationManager {
    listener: TcpListener,
    clients_max: usize,
    phase_timeout: Option<Duration>,
    connection_timeout: Option<Duration>,
}

impl RegistrationManager {
    pub fn new(listener: TcpListener, clients_max: usize) -> Self {
        Self {
            listener,
            clients_max,
            phase_timeout: None,
            connection_timeout: None,
        }
    }

    /// Deadline for the whole phase, and for each connection's REGISTER record
    pub fn with_timeouts(mut self, phase: Option<Duration>, per_connection: Option<Duration>) -> Self {
        self.phase_timeout = phase;
        self.connection_timeout = per_connection;
        self
    }

    /// Port workers should connect to
    pub fn local_port(&self) -> NetResult<u16> {
        self.listener
            .local_addr()
            .map(|addr| addr.port())
            .map_err(|e| DistributedError::transport("failed to query listening socket", e))
    }

    /// Run the registration phase to completion
    pub async fn register(self) -> NetResult<Registration> {
        let Self {
            listener,
            clients_max,
            phase_timeout,
            connection_timeout,
        } = self;

        if clients_max == 0 {
            return Err(DistributedError::Config("clients_max must be at least 1".to_string()));
        }

        info!(clients_max, "Waiting for workers to register");

        let mut roster = Roster::new(clients_max);
        let mut connections: JoinSet<ConnectionEvent> = JoinSet::new();
        let mut release = watch::channel(false).0;

        let deadline = phase_timeout.map(|after| (Instant::now() + after, after));
        let expired = async {
            match deadline {
                Some((at, _)) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(expired);

        let mut workers = loop {
            if roster.is_full() {
                // Every slot holds a registered worker, so only watchers are running
                release.send_replace(true);
                let mut released = Vec::with_capacity(clients_max);
                while let Some(joined) = connections.join_next().await {
                    let event = joined.map_err(|_| DistributedError::TaskPanicked)?;
                    released.extend(roster.apply(event, &mut connections, &release));
                }
                if roster.is_full() {
                    break released;
                }

                // Someone left while being released; keep waiting for a replacement
                release = watch::channel(false).0;
                for worker in released {
                    connections.spawn(watch_registered(worker, release.subscribe()));
                }
                continue;
            }

            let free_slot = roster.free_slot();

            tokio::select! {
                accepted = listener.accept(), if free_slot.is_some() => {
                    let (stream, peer) = accepted
                        .map_err(|e| DistributedError::transport("failed to accept worker connection", e))?;
                    let slot = free_slot.unwrap_or_default();
                    roster.slots[slot] = Some(peer);

                    if let Err(e) = stream.set_nodelay(true) {
                        debug!(%peer, "Could not set TCP_NODELAY: {}", e);
                    }
                    info!(slot, %peer, "New connection");

                    let worker = RegisteredWorker {
                        slot,
                        peer,
                        core_count: 0,
                        state: WorkerState::Connected,
                        stream,
                    };
                    connections.spawn(read_declaration(worker, connection_timeout));
                }

                Some(joined) = connections.join_next() => {
                    let event = joined.map_err(|_| DistributedError::TaskPanicked)?;
                    if let Some(worker) = roster.apply(event, &mut connections, &release) {
                        // Nothing releases workers before the roster is full
                        connections.spawn(watch_registered(worker, release.subscribe()));
                    }
                }

                _ = &mut expired => {
                    let after = deadline.map(|(_, after)| after).unwrap_or_default();
                    warn!(registered = roster.live, clients_max, "Registration deadline passed");
                    return Err(DistributedError::Timeout {
                        phase: "waiting for workers to register",
                        after,
                    });
                }
            }
        };

        // No further registrations
        drop(listener);

        workers.sort_by_key(|w| w.slot);
        info!(workers = workers.len(), total_cores = roster.total_cores, "Registration closed");

        Ok(Registration {
            workers,
            total_cores: roster.total_cores,
        })
    }
}
