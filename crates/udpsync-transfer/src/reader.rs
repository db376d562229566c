//! Send-side producer: file bytes → ordered packets in the send queue.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use crate::context::TransferContext;
use crate::error::{Result, TransferError};
use crate::logging::{EventSink, TransferEvent};
use crate::protocol::{HEADER_INDEX, Packet};
use crate::queue::QueueProducer;

/// What the reader put into the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadReport {
    /// Packets deposited, header and sentinel included.
    pub packets: u64,
    /// File bytes deposited.
    pub bytes: u64,
}

/// Stream `path` into `queue`: header packet, content packets of up to
/// `max_payload` bytes, then the sentinel.
///
/// On any error the queue handle is dropped without a sentinel, which the
/// consumer observes as [`TransferError::QueueAborted`].
pub fn read_file(
    path: &Path,
    max_payload: usize,
    queue: QueueProducer<Packet>,
    ctx: &TransferContext,
) -> Result<ReadReport> {
    assert!(max_payload > 0, "max_payload must be positive");
    let events = ctx.sink("reader");

    let result = stream_file(path, max_payload, &queue, &events);
    if let Err(ref e) = result {
        events.emit(TransferEvent::Error {
            message: e.to_string(),
        });
    }
    result
}

fn stream_file(
    path: &Path,
    max_payload: usize,
    queue: &QueueProducer<Packet>,
    events: &EventSink,
) -> Result<ReadReport> {
    let mut file = open_regular(path)?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| TransferError::InvalidFileName(path.display().to_string()))?;

    let header = Packet::header(&name);
    events.emit(TransferEvent::PacketQueued {
        index: header.index,
        size: header.payload.len(),
    });
    queue.deposit(header)?;

    let mut report = ReadReport {
        packets: 1,
        bytes: 0,
    };
    let mut index = HEADER_INDEX;
    let mut buf = vec![0u8; max_payload];
    loop {
        let n = fill(&mut file, &mut buf).map_err(|e| TransferError::file_io(path, e))?;
        if n == 0 {
            break;
        }
        index = index.checked_add(1).ok_or_else(|| {
            TransferError::file_io(
                path,
                io::Error::new(io::ErrorKind::FileTooLarge, "packet index space exhausted"),
            )
        })?;

        events.emit(TransferEvent::PacketQueued { index, size: n });
        queue.deposit(Packet::content(index, buf[..n].to_vec()))?;
        report.packets += 1;
        report.bytes += n as u64;
    }

    queue.deposit(Packet::sentinel())?;
    report.packets += 1;
    events.emit(TransferEvent::ReadComplete {
        packets: report.packets,
        bytes: report.bytes,
    });
    Ok(report)
}

fn open_regular(path: &Path) -> Result<File> {
    let metadata = std::fs::metadata(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => TransferError::FileNotFound(path.to_path_buf()),
        _ => TransferError::file_io(path, e),
    })?;
    if !metadata.is_file() {
        return Err(TransferError::file_io(
            path,
            io::Error::new(io::ErrorKind::InvalidInput, "not a regular file"),
        ));
    }
    File::open(path).map_err(|e| TransferError::file_io(path, e))
}

/// Read until `buf` is full or the input ends. Returns bytes read.
fn fill(input: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match input.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
