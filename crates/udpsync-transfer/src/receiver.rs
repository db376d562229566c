//! Stop-and-wait receiver: 2-thread pipeline.
//!
//! ```text
//! datagram link ---> [Receiver] ---> bounded queue ---> [Writer]
//!                    ack in-order,    (6 slots)         packets → file
//!                    re-ack duplicates
//! ```
//!
//! Every in-order packet is acknowledged and queued exactly once. A packet
//! the receiver has already accepted means its acknowledgment was lost, so
//! it is acknowledged again and discarded. After the sentinel the receiver
//! lingers, re-acknowledging repeated sentinels, so a lost final
//! acknowledgment does not leave the sender retransmitting into a closed
//! port.

use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use crate::config::TransferConfig;
use crate::context::TransferContext;
use crate::error::{Result, TransferError, join_stages};
use crate::link::DatagramLink;
use crate::logging::{EventSink, TransferEvent};
use crate::protocol::{HEADER_INDEX, Packet, SENTINEL_INDEX, encode_ack};
use crate::queue::{QueueProducer, packet_queue};
use crate::writer::write_file;

/// Any UDP payload fits.
const RECV_BUFFER: usize = 65_535;

/// Summary of the network half of a receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiveReport {
    /// Packets accepted in order, header and sentinel included.
    pub packets: u64,
    /// File bytes accepted.
    pub bytes: u64,
    /// Duplicates acknowledged again and dropped.
    pub duplicates: u64,
}

/// A file stored by [`run_receiver`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedFile {
    pub path: PathBuf,
    pub bytes: u64,
    pub packets: u64,
    pub duplicates: u64,
}

/// Drive the receiving half of the ARQ until the sentinel arrives, then
/// linger for `config.linger` re-acknowledging repeated sentinels.
///
/// The queue is released (ending the writer's stream) as soon as the
/// sentinel is deposited, before lingering starts.
pub fn receive_packets<L: DatagramLink>(
    mut link: L,
    queue: QueueProducer<Packet>,
    config: &TransferConfig,
    ctx: &TransferContext,
) -> Result<ReceiveReport> {
    let events = ctx.sink("receiver");
    let mut buf = vec![0u8; RECV_BUFFER];

    let result = accept_stream(&mut link, queue, &mut buf, config, ctx, &events);
    match result {
        Ok(report) => {
            linger(&mut link, &mut buf, config.linger, ctx, &events)?;
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

fn accept_stream<L: DatagramLink>(
    link: &mut L,
    queue: QueueProducer<Packet>,
    buf: &mut [u8],
    config: &TransferConfig,
    ctx: &TransferContext,
    events: &EventSink,
) -> Result<ReceiveReport> {
    let mut report = ReceiveReport {
        packets: 0,
        bytes: 0,
        duplicates: 0,
    };
    let mut expected = HEADER_INDEX;
    let mut last_heard = Instant::now();

    loop {
        let wait = config
            .idle_timeout
            .map(|idle| idle.saturating_sub(last_heard.elapsed()));
        let Some(n) = link.recv(buf, wait)? else {
            // An unreachable-peer report also lands here; only a full idle
            // period of silence ends the stream.
            match config.idle_timeout {
                Some(idle) if last_heard.elapsed() >= idle => {
                    return Err(TransferError::PeerTimeout(idle));
                }
                _ => continue,
            }
        };
        last_heard = Instant::now();
        let packet = match Packet::decode(&buf[..n]) {
            Ok(packet) => packet,
            Err(_) => {
                events.emit(TransferEvent::MalformedDatagram { len: n });
                continue;
            }
        };

        if packet.is_sentinel() {
            if expected == HEADER_INDEX {
                // Left over from an earlier stream on this port. Ack it so
                // that sender can finish, but it does not end this stream.
                link.send(&encode_ack(SENTINEL_INDEX))?;
                ctx.stats().record_duplicate();
                events.emit(TransferEvent::DuplicateAcked {
                    index: SENTINEL_INDEX,
                });
                report.duplicates += 1;
                continue;
            }
            link.send(&encode_ack(SENTINEL_INDEX))?;
            events.emit(TransferEvent::PacketReceived {
                index: SENTINEL_INDEX,
                size: n,
            });
            ctx.stats().record_packet(0);
            report.packets += 1;
            queue.deposit(packet)?;
            return Ok(report);
        }

        if packet.index < expected {
            link.send(&encode_ack(packet.index))?;
            ctx.stats().record_duplicate();
            events.emit(TransferEvent::DuplicateAcked {
                index: packet.index,
            });
            report.duplicates += 1;
            continue;
        }
        if packet.index > expected {
            events.emit(TransferEvent::OutOfOrder {
                got: packet.index,
                expected,
            });
            continue;
        }

        link.send(&encode_ack(packet.index))?;
        events.emit(TransferEvent::PacketReceived {
            index: packet.index,
            size: n,
        });
        let content_len = if packet.is_header() {
            0
        } else {
            packet.payload.len()
        };
        ctx.stats().record_packet(content_len);
        report.packets += 1;
        report.bytes += content_len as u64;
        queue.deposit(packet)?;
        expected += 1;
    }
}

/// Re-acknowledge repeated sentinels until the peer has been quiet for
/// `quiet`.
fn linger<L: DatagramLink>(
    link: &mut L,
    buf: &mut [u8],
    quiet: Duration,
    ctx: &TransferContext,
    events: &EventSink,
) -> Result<()> {
    if quiet.is_zero() {
        return Ok(());
    }
    while let Some(n) = link.recv(buf, Some(quiet))? {
        if Packet::decode(&buf[..n]).is_ok_and(|p| p.is_sentinel()) {
            link.send(&encode_ack(SENTINEL_INDEX))?;
            ctx.stats().record_duplicate();
            events.emit(TransferEvent::DuplicateAcked {
                index: SENTINEL_INDEX,
            });
        }
    }
    Ok(())
}

/// Receive one file over `link` into `storage_dir`: spawns the receiver and
/// writer threads, joined before returning.
pub fn run_receiver<L>(
    storage_dir: PathBuf,
    link: L,
    config: TransferConfig,
    ctx: TransferContext,
) -> Result<ReceivedFile>
where
    L: DatagramLink + 'static,
{
    let (producer, consumer) = packet_queue(config.queue_capacity);

    tracing::info!(
        transfer = ctx.label(),
        storage = %storage_dir.display(),
        "starting receive pipeline"
    );

    // ── Receiver thread ────────────────────────────────────────────────
    let ctx_receiver = ctx.clone();
    let receiver_handle =
        thread::spawn(move || receive_packets(link, producer, &config, &ctx_receiver));

    // ── Writer thread ──────────────────────────────────────────────────
    let ctx_writer = ctx.clone();
    let writer_handle = thread::spawn(move || write_file(&storage_dir, consumer, &ctx_writer));

    let receive_result = receiver_handle
        .join()
        .map_err(|_| TransferError::ThreadPanicked("receiver"))?;
    let write_result = writer_handle
        .join()
        .map_err(|_| TransferError::ThreadPanicked("writer"))?;

    let (received, written) = join_stages(receive_result, write_result)?;
    Ok(ReceivedFile {
        path: written.path,
        bytes: written.bytes,
        packets: received.packets,
        duplicates: received.duplicates,
    })
}
