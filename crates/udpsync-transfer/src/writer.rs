//! Receive-side consumer: packets from the receive queue → file on disk.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::context::TransferContext;
use crate::error::{Result, TransferError};
use crate::logging::{EventSink, TransferEvent};
use crate::protocol::{HEADER_INDEX, Packet};
use crate::queue::QueueConsumer;

/// The file a completed stream produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteReport {
    pub path: PathBuf,
    /// File bytes written.
    pub bytes: u64,
    /// Packets withdrawn, header and sentinel included.
    pub packets: u64,
}

/// Drain `queue` into a file inside `storage_dir`.
///
/// The first packet must be the header; its file name (last path component
/// only) is created or truncated under `storage_dir`. Content payloads are
/// appended in withdrawal order until the sentinel, after which the file is
/// flushed and closed. If the queue aborts before the sentinel the partial
/// file is closed and [`TransferError::QueueAborted`] returned.
pub fn write_file(
    storage_dir: &Path,
    queue: QueueConsumer<Packet>,
    ctx: &TransferContext,
) -> Result<WriteReport> {
    let events = ctx.sink("writer");
    let result = drain_into_file(storage_dir, &queue, &events);
    if let Err(ref e) = result {
        events.emit(TransferEvent::Error {
            message: e.to_string(),
        });
    }
    result
}

fn drain_into_file(
    storage_dir: &Path,
    queue: &QueueConsumer<Packet>,
    events: &EventSink,
) -> Result<WriteReport> {
    let start = Instant::now();
    let header = queue.withdraw()?;
    if !header.is_header() {
        return Err(TransferError::UnexpectedPacket {
            expected: HEADER_INDEX,
            got: header.index,
        });
    }
    let path = storage_dir.join(header.header_file_name()?);
    let file = File::create(&path).map_err(|e| TransferError::file_io(&path, e))?;
    let mut out = BufWriter::new(file);
    events.emit(TransferEvent::FileOpened { path: path.clone() });

    let mut report = WriteReport {
        path,
        bytes: 0,
        packets: 1,
    };
    let mut expected = HEADER_INDEX + 1;
    loop {
        let packet = queue.withdraw()?;
        report.packets += 1;
        if packet.is_sentinel() {
            break;
        }
        if packet.index != expected {
            return Err(TransferError::UnexpectedPacket {
                expected,
                got: packet.index,
            });
        }
        out.write_all(&packet.payload)
            .map_err(|e| TransferError::file_io(&report.path, e))?;
        events.emit(TransferEvent::PacketWritten {
            index: packet.index,
            size: packet.payload.len(),
        });
        report.bytes += packet.payload.len() as u64;
        expected += 1;
    }

    let file = out
        .into_inner()
        .map_err(|e| TransferError::file_io(&report.path, e.into_error()))?;
    file.sync_all()
        .map_err(|e| TransferError::file_io(&report.path, e))?;

    events.emit(TransferEvent::TransferComplete {
        packets: report.packets,
        bytes: report.bytes,
        retransmits: 0,
        duration_ms: start.elapsed().as_millis() as u64,
    });
    Ok(report)
}
