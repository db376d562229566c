//! Datagram wire format for file transfer.
//!
//! ```text
//! [0..4]   Packet index (i32 BE, -1 = end of stream)
//! [4..]    Payload (up to MAX_DATAGRAM_SIZE - 4 bytes)
//! ```
//!
//! Index 0 is the header packet (`fileName:<name>`), indices 1.. carry file
//! content in read order, and the sentinel (index -1, empty payload) closes
//! the stream. An acknowledgment is a datagram holding exactly the 4-byte
//! index it acknowledges.

use std::path::{Component, Path};
use std::time::Duration;

use crate::error::{Result, TransferError};

/// Size of the index prefix.
pub const INDEX_LEN: usize = 4;

/// Size of an acknowledgment datagram.
pub const ACK_LEN: usize = INDEX_LEN;

/// Largest datagram either side sends.
pub const MAX_DATAGRAM_SIZE: usize = 65_500;

/// Largest payload a packet carries at the default datagram size.
pub const MAX_PAYLOAD: usize = MAX_DATAGRAM_SIZE - INDEX_LEN;

/// Index reserved for the end-of-stream sentinel.
pub const SENTINEL_INDEX: i32 = -1;

/// Index of the header packet.
pub const HEADER_INDEX: i32 = 0;

/// Literal prefix of the header payload.
pub const HEADER_PREFIX: &str = "fileName:";

/// Default slots per bounded queue.
pub const QUEUE_CAPACITY: usize = 6;

/// How long the sender waits for an acknowledgment before retransmitting.
pub const ACK_TIMEOUT: Duration = Duration::from_millis(100);

/// TCP port of the control channel.
pub const CONTROL_PORT: u16 = 16_657;

/// UDP port the server receives on when ports are pinned.
pub const SERVER_UDP_PORT: u16 = 16_667;

/// UDP port the client sends from when ports are pinned.
pub const CLIENT_UDP_PORT: u16 = 15_550;

/// Directory received files land in.
pub const DEFAULT_STORAGE_DIR: &str = "sync-storage";

/// One unit of the transfer stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub index: i32,
    pub payload: Vec<u8>,
}

impl Packet {
    /// Header packet announcing the destination file name.
    pub fn header(file_name: &str) -> Self {
        Self {
            index: HEADER_INDEX,
            payload: format!("{HEADER_PREFIX}{file_name}").into_bytes(),
        }
    }

    /// Content packet carrying file bytes.
    pub fn content(index: i32, payload: Vec<u8>) -> Self {
        debug_assert!(index > HEADER_INDEX, "content packets start at index 1");
        Self { index, payload }
    }

    /// End-of-stream sentinel.
    pub fn sentinel() -> Self {
        Self {
            index: SENTINEL_INDEX,
            payload: Vec::new(),
        }
    }

    pub fn is_sentinel(&self) -> bool {
        self.index == SENTINEL_INDEX
    }

    pub fn is_header(&self) -> bool {
        self.index == HEADER_INDEX
    }

    /// Serialize into a datagram: index (big-endian) followed by the payload.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(INDEX_LEN + self.payload.len());
        buf.extend_from_slice(&self.index.to_be_bytes());
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// Parse a datagram. Fails only when it is too short to hold an index.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let index = read_index(data).ok_or(TransferError::MalformedPacket { len: data.len() })?;
        Ok(Self {
            index,
            payload: data[INDEX_LEN..].to_vec(),
        })
    }

    /// File name carried by a header packet.
    ///
    /// The name is reduced to its final path component, so a sender that
    /// announces `dir/report.txt` produces `report.txt` on the receiving side.
    pub fn header_file_name(&self) -> Result<String> {
        if !self.is_header() {
            return Err(TransferError::UnexpectedPacket {
                expected: HEADER_INDEX,
                got: self.index,
            });
        }
        let text = String::from_utf8_lossy(&self.payload);
        let name = text
            .strip_prefix(HEADER_PREFIX)
            .ok_or_else(|| TransferError::InvalidFileName(text.to_string()))?;
        plain_file_name(name)
    }
}

/// Encode an acknowledgment for `index`.
pub fn encode_ack(index: i32) -> [u8; ACK_LEN] {
    index.to_be_bytes()
}

/// Decode an acknowledgment. Anything other than exactly 4 bytes is not one.
pub fn decode_ack(data: &[u8]) -> Option<i32> {
    if data.len() != ACK_LEN {
        return None;
    }
    read_index(data)
}

/// Reduce `name` to a single normal path component suitable for storage.
pub fn plain_file_name(name: &str) -> Result<String> {
    let trimmed = name.trim();
    match Path::new(trimmed).components().next_back() {
        Some(Component::Normal(last)) => last
            .to_str()
            .map(str::to_owned)
            .ok_or_else(|| TransferError::InvalidFileName(name.to_string())),
        _ => Err(TransferError::InvalidFileName(name.to_string())),
    }
}

fn read_index(data: &[u8]) -> Option<i32> {
    let bytes: [u8; INDEX_LEN] = data.get(..INDEX_LEN)?.try_into().ok()?;
    Some(i32::from_be_bytes(bytes))
}
