//! Tunables for one transfer.

use std::time::Duration;

use crate::protocol::{ACK_TIMEOUT, INDEX_LEN, MAX_DATAGRAM_SIZE, QUEUE_CAPACITY};

/// Default time the receiver keeps answering a repeated sentinel.
pub const DEFAULT_LINGER: Duration = Duration::from_millis(500);

/// Default read/write timeout on control-channel connections.
pub const DEFAULT_CONTROL_TIMEOUT: Duration = Duration::from_secs(10);

/// Settings shared by both pipelines of a transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferConfig {
    /// Largest datagram sent; packets carry at most `max_datagram_size - 4`
    /// payload bytes.
    pub max_datagram_size: usize,
    /// Slots in each bounded queue.
    pub queue_capacity: usize,
    /// Sender wait before retransmitting an unacknowledged packet.
    pub ack_timeout: Duration,
    /// Give up on a packet after this many retransmissions. `None` retries
    /// forever.
    pub max_retransmits: Option<u32>,
    /// Receiver gives up when the peer is silent this long before the
    /// sentinel. `None` waits forever.
    pub idle_timeout: Option<Duration>,
    /// Quiet period the receiver waits after the sentinel, re-acknowledging
    /// repeats, before closing its socket.
    pub linger: Duration,
    /// Read/write timeout on control-channel connections.
    pub control_timeout: Duration,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            max_datagram_size: MAX_DATAGRAM_SIZE,
            queue_capacity: QUEUE_CAPACITY,
            ack_timeout: ACK_TIMEOUT,
            max_retransmits: None,
            idle_timeout: None,
            linger: DEFAULT_LINGER,
            control_timeout: DEFAULT_CONTROL_TIMEOUT,
        }
    }
}

impl TransferConfig {
    /// Defaults overridden by `UDPSYNC_*` environment variables.
    ///
    /// | variable | field |
    /// |---|---|
    /// | `UDPSYNC_MAX_DATAGRAM` | `max_datagram_size` (bytes) |
    /// | `UDPSYNC_QUEUE_CAPACITY` | `queue_capacity` |
    /// | `UDPSYNC_ACK_TIMEOUT_MS` | `ack_timeout` |
    /// | `UDPSYNC_MAX_RETRANSMITS` | `max_retransmits` |
    /// | `UDPSYNC_IDLE_TIMEOUT_MS` | `idle_timeout` |
    /// | `UDPSYNC_LINGER_MS` | `linger` |
    /// | `UDPSYNC_CONTROL_TIMEOUT_MS` | `control_timeout` |
    ///
    /// Unparseable values fall back to the default.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let parse = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());
        let defaults = Self::default();

        Self {
            max_datagram_size: parse("UDPSYNC_MAX_DATAGRAM")
                .map(|v| v as usize)
                .filter(|&v| v > INDEX_LEN && v <= MAX_DATAGRAM_SIZE)
                .unwrap_or(defaults.max_datagram_size),
            queue_capacity: parse("UDPSYNC_QUEUE_CAPACITY")
                .map(|v| v as usize)
                .filter(|&v| v > 0)
                .unwrap_or(defaults.queue_capacity),
            ack_timeout: parse("UDPSYNC_ACK_TIMEOUT_MS")
                .filter(|&v| v > 0)
                .map(Duration::from_millis)
                .unwrap_or(defaults.ack_timeout),
            max_retransmits: parse("UDPSYNC_MAX_RETRANSMITS")
                .map(|v| v.min(u32::MAX as u64) as u32)
                .or(defaults.max_retransmits),
            idle_timeout: parse("UDPSYNC_IDLE_TIMEOUT_MS")
                .filter(|&v| v > 0)
                .map(Duration::from_millis)
                .or(defaults.idle_timeout),
            linger: parse("UDPSYNC_LINGER_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.linger),
            control_timeout: parse("UDPSYNC_CONTROL_TIMEOUT_MS")
                .filter(|&v| v > 0)
                .map(Duration::from_millis)
                .unwrap_or(defaults.control_timeout),
        }
    }

    /// Payload bytes per content packet.
    pub fn max_payload(&self) -> usize {
        self.max_datagram_size - INDEX_LEN
    }
}
