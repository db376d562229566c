//! Structured transfer events.
//!
//! Pipeline stages report what they do through a [`TransferLogger`]. The
//! default sink forwards to `tracing`; tests plug in their own to assert on
//! exactly which packets were sent, retransmitted or re-acknowledged.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// One event, tagged with the stage that produced it.
#[derive(Debug, Clone)]
pub struct TransferLog<'a> {
    pub component: &'static str,
    /// Label of the transfer, normally the file name.
    pub transfer: &'a str,
    pub event: TransferEvent,
}

/// Events emitted by the four pipeline stages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferEvent {
    /// Reader: packet deposited into the send queue.
    PacketQueued { index: i32, size: usize },
    /// Reader: end of file reached and sentinel queued.
    ReadComplete { packets: u64, bytes: u64 },
    /// Sender: first transmission of a packet.
    PacketSent { index: i32, size: usize },
    /// Sender: timeout expired, same bytes sent again.
    Retransmit { index: i32, attempt: u32 },
    /// Sender: matching acknowledgment arrived.
    AckReceived { index: i32 },
    /// Sender: datagram that does not acknowledge the outstanding packet.
    StaleAck { got: Option<i32>, outstanding: i32 },
    /// Receiver: in-order packet accepted and acknowledged.
    PacketReceived { index: i32, size: usize },
    /// Receiver: packet already delivered, acknowledged again and dropped.
    DuplicateAcked { index: i32 },
    /// Receiver: packet ahead of the expected index, dropped unacknowledged.
    OutOfOrder { got: i32, expected: i32 },
    /// Receiver: datagram too short to hold an index.
    MalformedDatagram { len: usize },
    /// Writer: destination file created.
    FileOpened { path: PathBuf },
    /// Writer: payload appended to the destination file.
    PacketWritten { index: i32, size: usize },
    /// Sender or writer: stream finished.
    TransferComplete {
        packets: u64,
        bytes: u64,
        retransmits: u64,
        duration_ms: u64,
    },
    /// Any stage: fatal error.
    Error { message: String },
}

impl fmt::Display for TransferEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PacketQueued { index, size } => {
                write!(f, "packet_queued idx={} size={}", index, size)
            }
            Self::ReadComplete { packets, bytes } => {
                write!(f, "read_complete packets={} bytes={}", packets, bytes)
            }
            Self::PacketSent { index, size } => {
                write!(f, "packet_sent idx={} size={}", index, size)
            }
            Self::Retransmit { index, attempt } => {
                write!(f, "retransmit idx={} attempt={}", index, attempt)
            }
            Self::AckReceived { index } => write!(f, "ack_received idx={}", index),
            Self::StaleAck { got, outstanding } => match got {
                Some(got) => write!(f, "stale_ack got={} outstanding={}", got, outstanding),
                None => write!(f, "stale_ack got=<not an ack> outstanding={}", outstanding),
            },
            Self::PacketReceived { index, size } => {
                write!(f, "packet_received idx={} size={}", index, size)
            }
            Self::DuplicateAcked { index } => write!(f, "duplicate_acked idx={}", index),
            Self::OutOfOrder { got, expected } => {
                write!(f, "out_of_order got={} expected={}", got, expected)
            }
            Self::MalformedDatagram { len } => write!(f, "malformed_datagram len={}", len),
            Self::FileOpened { path } => write!(f, "file_opened path={}", path.display()),
            Self::PacketWritten { index, size } => {
                write!(f, "packet_written idx={} size={}", index, size)
            }
            Self::TransferComplete {
                packets,
                bytes,
                retransmits,
                duration_ms,
            } => write!(
                f,
                "transfer_complete packets={} bytes={} retransmits={} duration_ms={}",
                packets, bytes, retransmits, duration_ms
            ),
            Self::Error { message } => write!(f, "error: {}", message),
        }
    }
}

/// Sink for transfer events. Implementations must be cheap; stages call
/// this once per packet.
pub trait TransferLogger: Send + Sync {
    fn log(&self, entry: TransferLog<'_>);
}

/// Forwards events to `tracing` under the stage and transfer label.
pub struct TracingLogger;

impl TransferLogger for TracingLogger {
    fn log(&self, entry: TransferLog<'_>) {
        // Lifecycle events at info, per-packet traffic at debug.
        match &entry.event {
            TransferEvent::Error { .. } => {
                tracing::warn!(
                    component = entry.component,
                    transfer = entry.transfer,
                    "{}",
                    entry.event,
                );
            }
            TransferEvent::ReadComplete { .. }
            | TransferEvent::FileOpened { .. }
            | TransferEvent::TransferComplete { .. } => {
                tracing::info!(
                    component = entry.component,
                    transfer = entry.transfer,
                    "{}",
                    entry.event,
                );
            }
            _ => {
                tracing::debug!(
                    component = entry.component,
                    transfer = entry.transfer,
                    "{}",
                    entry.event,
                );
            }
        }
    }
}

/// Discards every event.
pub struct NullLogger;

impl TransferLogger for NullLogger {
    fn log(&self, _entry: TransferLog<'_>) {}
}

/// A stage's handle on the logger, carrying its component and transfer label.
#[derive(Clone)]
pub(crate) struct EventSink {
    logger: Arc<dyn TransferLogger>,
    component: &'static str,
    transfer: Arc<str>,
}

impl EventSink {
    pub(crate) fn new(
        logger: Arc<dyn TransferLogger>,
        component: &'static str,
        transfer: Arc<str>,
    ) -> Self {
        Self {
            logger,
            component,
            transfer,
        }
    }

    pub(crate) fn emit(&self, event: TransferEvent) {
        self.logger.log(TransferLog {
            component: self.component,
            transfer: &self.transfer,
            event,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_key_value() {
        let event = TransferEvent::Retransmit { index: 3, attempt: 2 };
        assert_eq!(event.to_string(), "retransmit idx=3 attempt=2");
        let event = TransferEvent::StaleAck {
            got: None,
            outstanding: 5,
        };
        assert_eq!(event.to_string(), "stale_ack got=<not an ack> outstanding=5");
    }
}
