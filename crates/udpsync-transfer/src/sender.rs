//! Stop-and-wait sender: 2-thread pipeline.
//!
//! ```text
//! [Reader] ---> bounded queue ---> [Sender] ---> datagram link
//! file → packets    (6 slots)       one packet in flight,
//!                                   retransmit on ack timeout
//! ```
//!
//! The sender cycles through three states per packet:
//! - **Fetching**: withdraw the next packet from the queue.
//! - **AwaitingAck**: packet transmitted; wait for its acknowledgment,
//!   retransmitting the identical bytes every `ack_timeout`.
//! - **Done**: the sentinel was acknowledged; the link is dropped (closed).

use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use crate::config::TransferConfig;
use crate::context::TransferContext;
use crate::error::{Result, TransferError, join_stages};
use crate::link::DatagramLink;
use crate::logging::{EventSink, TransferEvent};
use crate::protocol::{Packet, decode_ack};
use crate::queue::{QueueConsumer, packet_queue};
use crate::reader::read_file;

/// Largest datagram read while waiting for an acknowledgment. Oversized
/// strays are read whole so they can be discarded cleanly.
const RECV_BUFFER: usize = 65_535;

/// Summary of a completed send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendReport {
    /// Packets acknowledged, header and sentinel included.
    pub packets: u64,
    /// File bytes acknowledged.
    pub bytes: u64,
    /// Retransmissions across the whole transfer.
    pub retransmits: u64,
    pub duration: Duration,
}

/// Drive the sending half of the ARQ until the sentinel is acknowledged.
///
/// Exactly one packet is in flight at a time. The link is owned by this call
/// and closed on return.
pub fn send_packets<L: DatagramLink>(
    mut link: L,
    queue: QueueConsumer<Packet>,
    config: &TransferConfig,
    ctx: &TransferContext,
) -> Result<SendReport> {
    let events = ctx.sink("sender");
    let start = Instant::now();
    let mut report = SendReport {
        packets: 0,
        bytes: 0,
        retransmits: 0,
        duration: Duration::ZERO,
    };
    let mut recv_buf = vec![0u8; RECV_BUFFER];

    let result = loop {
        // Fetching
        let packet = match queue.withdraw() {
            Ok(packet) => packet,
            Err(e) => break Err(e),
        };

        // AwaitingAck
        match await_ack(&mut link, &packet, &mut recv_buf, config, ctx, &events) {
            Ok(retransmits) => report.retransmits += retransmits as u64,
            Err(e) => break Err(e),
        }
        let content_len = if packet.is_header() || packet.is_sentinel() {
            0
        } else {
            packet.payload.len()
        };
        ctx.stats().record_packet(content_len);
        report.packets += 1;
        report.bytes += content_len as u64;

        // Done
        if packet.is_sentinel() {
            break Ok(());
        }
    };
    drop(link);

    match result {
        Ok(()) => {
            report.duration = start.elapsed();
            events.emit(TransferEvent::TransferComplete {
                packets: report.packets,
                bytes: report.bytes,
                retransmits: report.retransmits,
                duration_ms: report.duration.as_millis() as u64,
            });
            Ok(report)
        }
        Err(e) => {
            events.emit(TransferEvent::Error {
                message: e.to_string(),
            });
            Err(e)
        }
    }
}

/// Transmit `packet` and block until its acknowledgment arrives.
/// Returns the number of retransmissions it took.
fn await_ack<L: DatagramLink>(
    link: &mut L,
    packet: &Packet,
    recv_buf: &mut [u8],
    config: &TransferConfig,
    ctx: &TransferContext,
    events: &EventSink,
) -> Result<u32> {
    let datagram = packet.encode();
    link.send(&datagram)?;
    events.emit(TransferEvent::PacketSent {
        index: packet.index,
        size: datagram.len(),
    });

    let mut attempts: u32 = 1;
    // Measured from the latest transmission, so stray datagrams cannot
    // postpone a retransmission.
    let mut deadline = Instant::now() + config.ack_timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            let retransmits = attempts - 1;
            if config.max_retransmits.is_some_and(|max| retransmits >= max) {
                return Err(TransferError::ProtocolDesync {
                    index: packet.index,
                    attempts,
                });
            }
            link.send(&datagram)?;
            attempts += 1;
            ctx.stats().record_retransmit();
            events.emit(TransferEvent::Retransmit {
                index: packet.index,
                attempt: attempts,
            });
            deadline = Instant::now() + config.ack_timeout;
            continue;
        }

        let Some(n) = link.recv(recv_buf, Some(remaining))? else {
            continue;
        };
        match decode_ack(&recv_buf[..n]) {
            Some(index) if index == packet.index => {
                events.emit(TransferEvent::AckReceived { index });
                return Ok(attempts - 1);
            }
            got => {
                ctx.stats().record_stale_ack();
                events.emit(TransferEvent::StaleAck {
                    got,
                    outstanding: packet.index,
                });
            }
        }
    }
}

/// Send the file at `path` over `link`: spawns the reader and sender threads,
/// joined before returning.
pub fn run_sender<L>(
    path: PathBuf,
    link: L,
    config: TransferConfig,
    ctx: TransferContext,
) -> Result<SendReport>
where
    L: DatagramLink + 'static,
{
    let (producer, consumer) = packet_queue(config.queue_capacity);
    let max_payload = config.max_payload();

    tracing::info!(
        transfer = ctx.label(),
        path = %path.display(),
        "starting send pipeline"
    );

    // ── Reader thread ──────────────────────────────────────────────────
    let ctx_reader = ctx.clone();
    let reader_handle =
        thread::spawn(move || read_file(&path, max_payload, producer, &ctx_reader));

    // ── Sender thread ──────────────────────────────────────────────────
    let ctx_sender = ctx.clone();
    let sender_handle =
        thread::spawn(move || send_packets(link, consumer, &config, &ctx_sender));

    let read_result = reader_handle
        .join()
        .map_err(|_| TransferError::ThreadPanicked("reader"))?;
    let send_result = sender_handle
        .join()
        .map_err(|_| TransferError::ThreadPanicked("sender"))?;

    let (_, report) = join_stages(read_result, send_result)?;
    Ok(report)
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::io;
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::logging::NullLogger;
    use crate::protocol::encode_ack;

    /// Scripted link: records every datagram sent and replays canned replies.
    /// `None` in the script is a receive timeout.
    struct ScriptedLink {
        sent: Arc<Mutex<Vec<Vec<u8>>>>,
        replies: VecDeque<Option<Vec<u8>>>,
    }

    impl DatagramLink for ScriptedLink {
        fn send(&mut self, datagram: &[u8]) -> io::Result<()> {
            self.sent.lock().unwrap().push(datagram.to_vec());
            Ok(())
        }

        fn recv(&mut self, buf: &mut [u8], timeout: Option<Duration>) -> io::Result<Option<usize>> {
            match self.replies.pop_front() {
                Some(Some(reply)) => {
                    buf[..reply.len()].copy_from_slice(&reply);
                    Ok(Some(reply.len()))
                }
                Some(None) => {
                    // Simulate the full wait so the deadline expires.
                    std::thread::sleep(timeout.unwrap_or_default());
                    Ok(None)
                }
                None => Err(io::Error::other("script exhausted")),
            }
        }
    }

    fn scripted(replies: Vec<Option<Vec<u8>>>) -> (ScriptedLink, Arc<Mutex<Vec<Vec<u8>>>>) {
        let sent = Arc::new(Mutex::new(Vec::new()));
        (
            ScriptedLink {
                sent: sent.clone(),
                replies: replies.into(),
            },
            sent,
        )
    }

    fn config() -> TransferConfig {
        TransferConfig {
            ack_timeout: Duration::from_millis(5),
            ..TransferConfig::default()
        }
    }

    fn ctx() -> TransferContext {
        TransferContext::new("test").with_logger(Arc::new(NullLogger))
    }

    fn queue_of(packets: Vec<Packet>) -> QueueConsumer<Packet> {
        let (producer, consumer) = packet_queue(packets.len().max(1));
        for p in packets {
            producer.deposit(p).unwrap();
        }
        consumer
    }

    #[test]
    fn each_packet_is_sent_once_when_acked() {
        let (link, sent) = scripted(vec![
            Some(encode_ack(0).to_vec()),
            Some(encode_ack(1).to_vec()),
            Some(encode_ack(-1).to_vec()),
        ]);
        let queue = queue_of(vec![
            Packet::header("f"),
            Packet::content(1, b"abc".to_vec()),
            Packet::sentinel(),
        ]);
        let ctx = ctx();
        let report = send_packets(link, queue, &config(), &ctx).unwrap();

        assert_eq!(report.packets, 3);
        assert_eq!(report.bytes, 3);
        assert_eq!(report.retransmits, 0);
        let indices: Vec<i32> = sent
            .lock()
            .unwrap()
            .iter()
            .map(|d| Packet::decode(d).unwrap().index)
            .collect();
        assert_eq!(indices, vec![0, 1, -1]);
        assert_eq!(ctx.stats().snapshot().payload_bytes, 3);
    }

    #[test]
    fn timeout_retransmits_identical_bytes() {
        let (link, sent) = scripted(vec![None, None, None, Some(encode_ack(-1).to_vec())]);
        let mut sentinel = Packet::sentinel();
        sentinel.payload = b"bye".to_vec();
        let ctx = ctx();
        let report = send_packets(link, queue_of(vec![sentinel]), &config(), &ctx).unwrap();

        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 4);
        assert!(sent.iter().all(|d| d == &sent[0]));
        assert_eq!(report.retransmits, 3);
        assert_eq!(ctx.stats().snapshot().retransmits, 3);
    }

    #[test]
    fn stale_ack_is_ignored() {
        let (link, sent) = scripted(vec![
            Some(encode_ack(0).to_vec()),
            // Late duplicate ack for the header while packet 1 is outstanding.
            Some(encode_ack(0).to_vec()),
            Some(b"garbage!".to_vec()),
            Some(encode_ack(1).to_vec()),
            Some(encode_ack(-1).to_vec()),
        ]);
        let queue = queue_of(vec![
            Packet::header("f"),
            Packet::content(1, b"x".to_vec()),
            Packet::sentinel(),
        ]);
        let ctx = ctx();
        let report = send_packets(link, queue, &config(), &ctx).unwrap();
        assert_eq!(report.retransmits, 0);
        assert_eq!(sent.lock().unwrap().len(), 3);
        assert_eq!(ctx.stats().snapshot().stale_acks, 2);
    }

    #[test]
    fn retransmit_cap_reports_desync() {
        let (link, sent) = scripted(vec![None, None, None, None]);
        let cfg = TransferConfig {
            max_retransmits: Some(2),
            ..config()
        };
        let err = send_packets(link, queue_of(vec![Packet::header("f")]), &cfg, &ctx()).unwrap_err();
        assert!(matches!(
            err,
            TransferError::ProtocolDesync { index: 0, attempts: 3 }
        ));
        assert_eq!(sent.lock().unwrap().len(), 3);
    }

    #[test]
    fn aborted_queue_stops_sender() {
        let (link, _sent) = scripted(vec![Some(encode_ack(0).to_vec())]);
        let (producer, consumer) = packet_queue(2);
        producer.deposit(Packet::header("f")).unwrap();
        drop(producer);
        let err = send_packets(link, consumer, &config(), &ctx()).unwrap_err();
        assert!(matches!(err, TransferError::QueueAborted));
    }

    #[test]
    fn missing_file_surfaces_reader_error() {
        let dir = tempfile::tempdir().unwrap();
        let (link, sent) = scripted(vec![]);
        let err = run_sender(dir.path().join("absent"), link, config(), ctx()).unwrap_err();
        assert!(matches!(err, TransferError::FileNotFound(_)));
        assert!(sent.lock().unwrap().is_empty());
    }
}
