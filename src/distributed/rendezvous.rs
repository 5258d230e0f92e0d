//! Rendezvous: how workers find the coordinator without prior configuration
//!
//! The coordinator binds an ephemeral TCP port and announces it over UDP
//! broadcast on a well-known discovery port, once per interval, until
//! registration closes. A worker listens on the discovery port, takes the
//! first announcement, and connects back to the sender's address at the
//! announced port.
//!
//! The broadcaster runs as its own task with its own socket; nothing is
//! shared with the registration loop. It is stopped by aborting the task.

use crate::distributed::error::{DistributedError, NetResult, ProtocolError};
use crate::distributed::net::bind_reusable_udp;
use crate::distributed::protocol::{
    deserialize_message, serialize_message, Message, MessageKind, RECORD_SIZE,
};
use crate::distributed::with_deadline;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Periodic announcement of the coordinator's rendezvous port
pub struct Broadcaster {
    socket: UdpSocket,
    target: SocketAddrV4,
    period: Duration,
    record: [u8; RECORD_SIZE],
}

impl Broadcaster {
    /// Open a broadcast-enabled UDP socket announcing `rendezvous_port` to `target`
    pub async fn bind(target: SocketAddrV4, rendezvous_port: u16, period: Duration) -> NetResult<Self> {
        if period.is_zero() {
            return Err(DistributedError::Config("broadcast interval must be non-zero".to_string()));
        }

        let socket = UdpSocket::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0))
            .await
            .map_err(|e| DistributedError::transport("failed to bind broadcast socket", e))?;
        socket
            .set_broadcast(true)
            .map_err(|e| DistributedError::transport("failed to enable SO_BROADCAST", e))?;

        let record = serialize_message(&Message::Announce { rendezvous_port })?;

        Ok(Self {
            socket,
            target,
            period,
            record,
        })
    }

    /// Start announcing on a background task
    pub fn spawn(self) -> BroadcastHandle {
        BroadcastHandle {
            handle: tokio::spawn(self.run()),
        }
    }

    async fn run(self) -> NetResult<()> {
        let mut ticker = tokio::time::interval(self.period);
        let mut sent_count: u64 = 0;

        loop {
            ticker.tick().await;

            let sent = self
                .socket
                .send_to(&self.record, self.target)
                .await
                .map_err(|e| DistributedError::transport(format!("failed to announce to {}", self.target), e))?;
            if sent != RECORD_SIZE {
                return Err(ProtocolError::WrongSize {
                    expected: RECORD_SIZE,
                    got: sent,
                }
                .into());
            }

            sent_count += 1;
            debug!(target = %self.target, sent_count, "announcement sent");
        }
    }
}

/// Handle to a running broadcaster task
pub struct BroadcastHandle {
    handle: JoinHandle<NetResult<()>>,
}

impl BroadcastHandle {
    /// Resolves only if the broadcaster stops on its own, which is always a failure
    pub async fn failed(&mut self) -> DistributedError {
        match (&mut self.handle).await {
            Ok(Err(e)) => e,
            Ok(Ok(())) => DistributedError::Config("broadcaster stopped unexpectedly".to_string()),
            Err(e) if e.is_panic() => DistributedError::TaskPanicked,
            Err(_) => DistributedError::Config("broadcaster was cancelled".to_string()),
        }
    }

    /// Cancel the broadcaster and wait for it to wind down
    pub async fn stop(self) {
        self.handle.abort();
        let _ = self.handle.await;
        info!("Broadcast stopped");
    }
}

/// Worker-side listener for coordinator announcements
pub struct DiscoveryListener {
    socket: UdpSocket,
}

impl DiscoveryListener {
    /// Bind the discovery port, sharing it with other workers on this host
    pub fn bind(addr: SocketAddrV4) -> NetResult<Self> {
        let std_socket = bind_reusable_udp(addr)
            .map_err(|e| DistributedError::transport(format!("failed to bind discovery port {}", addr), e))?;
        std_socket
            .set_nonblocking(true)
            .map_err(|e| DistributedError::transport("failed to make discovery socket non-blocking", e))?;
        let socket = UdpSocket::from_std(std_socket)
            .map_err(|e| DistributedError::transport("failed to register discovery socket", e))?;

        Ok(Self { socket })
    }

    pub fn local_addr(&self) -> NetResult<SocketAddr> {
        self.socket
            .local_addr()
            .map_err(|e| DistributedError::transport("failed to query discovery socket", e))
    }

    /// Wait for exactly one announcement and return the coordinator's TCP address
    ///
    /// A datagram that is not exactly one record long is a protocol error.
    pub async fn wait_for_coordinator(&self, timeout: Option<Duration>) -> NetResult<SocketAddr> {
        // Larger than a record so oversized datagrams are seen, not truncated
        let mut buf = [0u8; RECORD_SIZE * 2];

        let (len, from) = with_deadline("waiting for coordinator announcement", timeout, async {
            self.socket
                .recv_from(&mut buf)
                .await
                .map_err(|e| DistributedError::transport("failed to receive announcement", e))
        })
        .await?;

        match deserialize_message(MessageKind::Announce, &buf[..len])? {
            Message::Announce { rendezvous_port } => {
                let coordinator = SocketAddr::new(from.ip(), rendezvous_port);
                info!(%coordinator, bytes = len, "Received coordinator announcement");
                Ok(coordinator)
            }
            other => Err(ProtocolError::InvalidField {
                field: "message",
                value: format!("{:?}", other),
            }
            .into()),
        }
    }
}
