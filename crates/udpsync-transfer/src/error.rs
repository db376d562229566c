//! Error type shared by every stage of a transfer.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors that terminate a transfer.
///
/// Only a missing acknowledgment is retried automatically (by retransmission);
/// every variant here is fatal for the transfer that produced it.
#[derive(Debug, Error)]
pub enum TransferError {
    /// A datagram too short to carry a packet index.
    #[error("malformed packet: {len} bytes, need at least 4")]
    MalformedPacket {
        /// Length of the offending datagram.
        len: usize,
    },

    /// The source file does not exist.
    #[error("file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    /// Reading or writing a file failed.
    #[error("file I/O error on {}: {source}", path.display())]
    FileIo {
        /// File being read or written.
        path: PathBuf,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },

    /// Binding, sending or receiving on a socket failed.
    #[error("socket error: {0}")]
    Socket(#[from] io::Error),

    /// The sender gave up on a packet that was never acknowledged.
    #[error("packet {index} unacknowledged after {attempts} transmissions")]
    ProtocolDesync {
        /// Index of the outstanding packet.
        index: i32,
        /// Number of transmissions made, including the first.
        attempts: u32,
    },

    /// A packet arrived where the stream layout forbids it.
    #[error("unexpected packet: expected index {expected}, got {got}")]
    UnexpectedPacket {
        /// Index the consumer was waiting for.
        expected: i32,
        /// Index actually withdrawn.
        got: i32,
    },

    /// The other end of a bounded queue went away before the sentinel.
    #[error("transfer aborted: peer pipeline stage stopped before end of stream")]
    QueueAborted,

    /// No datagram arrived from the peer within the idle timeout.
    #[error("peer silent for {0:?}")]
    PeerTimeout(Duration),

    /// The header named a file that cannot be stored.
    #[error("invalid file name: {0:?}")]
    InvalidFileName(String),

    /// The control channel carried something other than the expected reply.
    #[error("control channel: {0}")]
    ControlProtocol(String),

    /// A pipeline thread panicked.
    #[error("{0} thread panicked")]
    ThreadPanicked(&'static str),
}

impl TransferError {
    pub(crate) fn file_io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::FileIo {
            path: path.into(),
            source,
        }
    }
}

/// Combine the outcomes of two pipeline threads sharing one queue.
///
/// A failing stage aborts the queue, so the other stage usually fails with
/// [`TransferError::QueueAborted`] as a consequence; the causing error wins.
pub(crate) fn join_stages<A, B>(first: Result<A>, second: Result<B>) -> Result<(A, B)> {
    match (first, second) {
        (Ok(a), Ok(b)) => Ok((a, b)),
        (Err(e), Ok(_)) | (Ok(_), Err(e)) => Err(e),
        (Err(TransferError::QueueAborted), Err(e)) | (Err(e), Err(_)) => Err(e),
    }
}

pub type Result<T, E = TransferError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_cause_beats_queue_abort() {
        let joined = join_stages::<(), ()>(
            Err(TransferError::QueueAborted),
            Err(TransferError::PeerTimeout(Duration::from_secs(1))),
        );
        assert!(matches!(joined, Err(TransferError::PeerTimeout(_))));

        let joined = join_stages::<(), ()>(
            Err(TransferError::InvalidFileName("..".into())),
            Err(TransferError::QueueAborted),
        );
        assert!(matches!(joined, Err(TransferError::InvalidFileName(_))));
    }

    #[test]
    fn single_failure_is_reported() {
        let joined = join_stages::<(), u8>(Ok(()), Err(TransferError::QueueAborted));
        assert!(matches!(joined, Err(TransferError::QueueAborted)));
        assert_eq!(join_stages::<u8, u8>(Ok(1), Ok(2)).unwrap(), (1, 2));
    }
}
