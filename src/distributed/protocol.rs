//! Wire protocol between coordinator and workers
//!
//! Every message, in every direction, is one fixed-size binary record. There is
//! no length prefix and no version tag: the record size itself is the framing.
//!
//! # Record Layout
//!
//! Encoded with bincode's fixed-int little-endian encoding (36 bytes):
//!
//! ```text
//! offset  size  field
//!      0     4  rendezvous_port  i32
//!      4     4  core_count       u32
//!      8     4  step_count       u32
//!     12     8  interval_start   f64
//!     20     8  interval_end     f64
//!     28     8  step_width       f64
//! ```
//!
//! # Message Flow
//!
//! ```text
//! Coordinator                          Worker
//!     |                                   |
//!     |~~~~ ANNOUNCE(port) (UDP bcast) ~~>|
//!     |                                   |
//!     |<------- REGISTER(cores) ----------|   (TCP from here on)
//!     |                                   |
//!     |-- ASSIGN(steps, [start,end), h) ->|
//!     |                                   |
//!     |<------- RESULT(partial sum) ------|
//! ```
//!
//! The same record shape carries four different messages. Rust code never
//! touches the raw record: [`Message`] is the typed envelope, and decoding is
//! directed by the [`MessageKind`] the receiver expects in its current phase.
//! Fields a message does not use are zero on the wire.

use crate::distributed::error::{DistributedError, NetResult, ProtocolError};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Size of one encoded record in bytes
pub const RECORD_SIZE: usize = 36;

/// Well-known UDP port the coordinator announces itself on
pub const DEFAULT_DISCOVERY_PORT: u16 = 31123;

/// The raw wire record
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct WorkDescriptor {
    pub rendezvous_port: i32,
    pub core_count: u32,
    pub step_count: u32,
    pub interval_start: f64,
    pub interval_end: f64,
    /// Width of one Simpson step in an assignment; the partial sum in a result
    pub step_width: f64,
}

/// A unit of work for one worker
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    /// Number of parallel integration tasks the worker runs
    pub core_count: u32,
    /// Number of Simpson steps in `[interval_start, interval_end)`
    pub step_count: u32,
    pub interval_start: f64,
    pub interval_end: f64,
    /// Width of one Simpson step, identical for every worker in a run
    pub step_width: f64,
}

/// Typed protocol message
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Message {
    /// Coordinator -> workers (broadcast): where to connect
    Announce { rendezvous_port: u16 },
    /// Worker -> coordinator: declared parallelism
    Register { core_count: u32 },
    /// Coordinator -> worker: work assignment
    Assign(Assignment),
    /// Worker -> coordinator: partial integral over the assignment
    Result { partial_sum: f64 },
}

/// Which message a receiver expects in its current protocol phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Announce,
    Register,
    Assign,
    Result,
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Announce => "ANNOUNCE",
            Self::Register => "REGISTER",
            Self::Assign => "ASSIGN",
            Self::Result => "RESULT",
        };
        write!(f, "{}", name)
    }
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Announce { .. } => MessageKind::Announce,
            Self::Register { .. } => MessageKind::Register,
            Self::Assign(_) => MessageKind::Assign,
            Self::Result { .. } => MessageKind::Result,
        }
    }

    /// Lay the message out on the shared record shape
    pub fn to_descriptor(&self) -> WorkDescriptor {
        match *self {
            Self::Announce { rendezvous_port } => WorkDescriptor {
                rendezvous_port: i32::from(rendezvous_port),
                ..WorkDescriptor::default()
            },
            Self::Register { core_count } => WorkDescriptor {
                core_count,
                ..WorkDescriptor::default()
            },
            Self::Assign(a) => WorkDescriptor {
                rendezvous_port: 0,
                core_count: a.core_count,
                step_count: a.step_count,
                interval_start: a.interval_start,
                interval_end: a.interval_end,
                step_width: a.step_width,
            },
            Self::Result { partial_sum } => WorkDescriptor {
                step_width: partial_sum,
                ..WorkDescriptor::default()
            },
        }
    }

    /// Interpret a record as the message `kind`, validating the fields it uses
    pub fn from_descriptor(kind: MessageKind, d: WorkDescriptor) -> Result<Self, ProtocolError> {
        match kind {
            MessageKind::Announce => {
                let port = u16::try_from(d.rendezvous_port)
                    .ok()
                    .filter(|p| *p != 0)
                    .ok_or_else(|| invalid("rendezvous_port", d.rendezvous_port))?;
                Ok(Self::Announce { rendezvous_port: port })
            }
            MessageKind::Register => {
                if d.core_count == 0 {
                    return Err(invalid("core_count", d.core_count));
                }
                Ok(Self::Register { core_count: d.core_count })
            }
            MessageKind::Assign => {
                if d.core_count == 0 {
                    return Err(invalid("core_count", d.core_count));
                }
                if !d.interval_start.is_finite() {
                    return Err(invalid("interval_start", d.interval_start));
                }
                if !d.interval_end.is_finite() {
                    return Err(invalid("interval_end", d.interval_end));
                }
                if !(d.step_width.is_finite() && d.step_width > 0.0) {
                    return Err(invalid("step_width", d.step_width));
                }
                Ok(Self::Assign(Assignment {
                    core_count: d.core_count,
                    step_count: d.step_count,
                    interval_start: d.interval_start,
                    interval_end: d.interval_end,
                    step_width: d.step_width,
                }))
            }
            MessageKind::Result => Ok(Self::Result { partial_sum: d.step_width }),
        }
    }
}

fn invalid(field: &'static str, value: impl fmt::Display) -> ProtocolError {
    ProtocolError::InvalidField {
        field,
        value: value.to_string(),
    }
}

/// Serialize a message into one wire record
pub fn serialize_message(msg: &Message) -> Result<[u8; RECORD_SIZE], ProtocolError> {
    let bytes = bincode::serialize(&msg.to_descriptor()).map_err(ProtocolError::Encode)?;

    let mut record = [0u8; RECORD_SIZE];
    if bytes.len() != RECORD_SIZE {
        return Err(ProtocolError::WrongSize {
            expected: RECORD_SIZE,
            got: bytes.len(),
        });
    }
    record.copy_from_slice(&bytes);

    Ok(record)
}

/// Deserialize one complete record as the message `kind`
///
/// `buf` must be exactly [`RECORD_SIZE`] bytes long.
pub fn deserialize_message(kind: MessageKind, buf: &[u8]) -> Result<Message, ProtocolError> {
    if buf.len() != RECORD_SIZE {
        return Err(ProtocolError::WrongSize {
            expected: RECORD_SIZE,
            got: buf.len(),
        });
    }

    let descriptor: WorkDescriptor = bincode::deserialize(buf).map_err(ProtocolError::Decode)?;
    Message::from_descriptor(kind, descriptor)
}

/// Read exactly one record from a stream
///
/// End of stream before the first byte is [`ProtocolError::ConnectionClosed`];
/// end of stream part-way through is [`ProtocolError::ShortRecord`].
pub async fn read_record<R>(reader: &mut R) -> NetResult<[u8; RECORD_SIZE]>
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; RECORD_SIZE];
    let mut filled = 0;

    while filled < RECORD_SIZE {
        let n = reader
            .read(&mut buf[filled..])
            .await
            .map_err(|e| DistributedError::transport("failed to read record", e))?;

        if n == 0 {
            return Err(if filled == 0 {
                ProtocolError::ConnectionClosed
            } else {
                ProtocolError::ShortRecord {
                    expected: RECORD_SIZE,
                    got: filled,
                }
            }
            .into());
        }
        filled += n;
    }

    Ok(buf)
}

/// Read one record from a stream and decode it as the message `kind`
pub async fn read_message<R>(reader: &mut R, kind: MessageKind) -> NetResult<Message>
where
    R: AsyncRead + Unpin,
{
    let record = read_record(reader).await?;
    Ok(deserialize_message(kind, &record)?)
}

/// Write one message to a stream and flush it
pub async fn write_message<W>(writer: &mut W, msg: &Message) -> NetResult<()>
where
    W: AsyncWrite + Unpin,
{
    let record = serialize_message(msg)?;

    writer
        .write_all(&record)
        .await
        .map_err(|e| DistributedError::transport(format!("failed to write {}", msg.kind()), e))?;
    writer
        .flush()
        .await
        .map_err(|e| DistributedError::transport("failed to flush stream", e))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_assignment() -> Assignment {
        Assignment {
            core_count: 4,
            step_count: 666,
            interval_start: 0.333,
            interval_end: 1.0,
            step_width: 0.001,
        }
    }

    #[test]
    fn test_record_size() {
        let record = serialize_message(&Message::Register { core_count: 8 }).unwrap();
        assert_eq!(record.len(), RECORD_SIZE);
    }

    #[test]
    fn test_record_layout() {
        let record = serialize_message(&Message::Assign(sample_assignment())).unwrap();

        assert_eq!(&record[0..4], &0i32.to_le_bytes());
        assert_eq!(&record[4..8], &4u32.to_le_bytes());
        assert_eq!(&record[8..12], &666u32.to_le_bytes());
        assert_eq!(&record[12..20], &0.333f64.to_le_bytes());
        assert_eq!(&record[20..28], &1.0f64.to_le_bytes());
        assert_eq!(&record[28..36], &0.001f64.to_le_bytes());
    }

    #[test]
    fn test_announce_only_carries_port() {
        let record = serialize_message(&Message::Announce { rendezvous_port: 40123 }).unwrap();
        assert_eq!(&record[0..4], &40123i32.to_le_bytes());
        assert!(record[4..].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_result_travels_in_last_slot() {
        let record = serialize_message(&Message::Result { partial_sum: 0.125 }).unwrap();
        assert_eq!(&record[28..36], &0.125f64.to_le_bytes());

        match deserialize_message(MessageKind::Result, &record).unwrap() {
            Message::Result { partial_sum } => assert_eq!(partial_sum, 0.125),
            other => panic!("Wrong message type: {:?}", other),
        }
    }

    #[test]
    fn test_assignment_decodes() {
        let record = serialize_message(&Message::Assign(sample_assignment())).unwrap();
        let msg = deserialize_message(MessageKind::Assign, &record).unwrap();
        assert_eq!(msg, Message::Assign(sample_assignment()));
    }

    #[test]
    fn test_wrong_size_rejected() {
        let record = serialize_message(&Message::Register { core_count: 2 }).unwrap();

        let short = deserialize_message(MessageKind::Register, &record[..RECORD_SIZE - 1]);
        assert!(matches!(short, Err(ProtocolError::WrongSize { expected: 36, got: 35 })));

        let mut long = record.to_vec();
        long.extend_from_slice(&[0u8; 4]);
        let long = deserialize_message(MessageKind::Register, &long);
        assert!(matches!(long, Err(ProtocolError::WrongSize { expected: 36, got: 40 })));
    }

    #[test]
    fn test_invalid_fields_rejected() {
        let zero_cores = serialize_message(&Message::Register { core_count: 0 }).unwrap();
        assert!(matches!(
            deserialize_message(MessageKind::Register, &zero_cores),
            Err(ProtocolError::InvalidField { field: "core_count", .. })
        ));

        let mut bad_port = WorkDescriptor::default();
        bad_port.rendezvous_port = 70000;
        assert!(Message::from_descriptor(MessageKind::Announce, bad_port).is_err());
        bad_port.rendezvous_port = -1;
        assert!(Message::from_descriptor(MessageKind::Announce, bad_port).is_err());

        let mut bad_width = Message::Assign(sample_assignment()).to_descriptor();
        bad_width.step_width = f64::NAN;
        assert!(Message::from_descriptor(MessageKind::Assign, bad_width).is_err());
    }

    #[tokio::test]
    async fn test_stream_round_trip() {
        let (mut client, mut server) = tokio::io::duplex(256);

        write_message(&mut client, &Message::Register { core_count: 3 }).await.unwrap();
        write_message(&mut client, &Message::Result { partial_sum: 1.5 }).await.unwrap();

        let first = read_message(&mut server, MessageKind::Register).await.unwrap();
        let second = read_message(&mut server, MessageKind::Result).await.unwrap();
        assert_eq!(first, Message::Register { core_count: 3 });
        assert_eq!(second, Message::Result { partial_sum: 1.5 });
    }

    #[tokio::test]
    async fn test_short_stream_is_protocol_error() {
        let partial = [7u8; 20];
        let mut reader: &[u8] = &partial;

        let err = read_message(&mut reader, MessageKind::Register).await.unwrap_err();
        assert!(matches!(
            err,
            DistributedError::Protocol(ProtocolError::ShortRecord { expected: 36, got: 20 })
        ));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_closed_stream() {
        let mut reader: &[u8] = &[];
        let err = read_record(&mut reader).await.unwrap_err();
        assert!(matches!(err, DistributedError::Protocol(ProtocolError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_records_split_across_reads() {
        let (mut client, mut server) = tokio::io::duplex(8);
        let record = serialize_message(&Message::Register { core_count: 5 }).unwrap();

        let writer = tokio::spawn(async move {
            for chunk in record.chunks(5) {
                client.write_all(chunk).await.unwrap();
            }
        });

        let msg = read_message(&mut server, MessageKind::Register).await.unwrap();
        assert_eq!(msg, Message::Register { core_count: 5 });
        writer.await.unwrap();
    }
}
