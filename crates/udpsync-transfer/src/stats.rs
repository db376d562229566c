//! Transfer counters shared between pipeline threads and the caller.
//! All fields are atomic so any thread can read them while a transfer runs.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct TransferStats {
    /// Packets handed to the peer (sender) or accepted in order (receiver),
    /// header and sentinel included.
    pub packets: AtomicU64,
    /// File content bytes carried by those packets.
    pub payload_bytes: AtomicU64,
    /// Retransmissions after an acknowledgment timeout.
    pub retransmits: AtomicU64,
    /// Duplicate packets the receiver acknowledged again.
    pub duplicates: AtomicU64,
    /// Datagrams the sender ignored while awaiting an acknowledgment.
    pub stale_acks: AtomicU64,
}

/// Point-in-time copy of [`TransferStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub packets: u64,
    pub payload_bytes: u64,
    pub retransmits: u64,
    pub duplicates: u64,
    pub stale_acks: u64,
}

impl TransferStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_packet(&self, payload_bytes: usize) {
        self.packets.fetch_add(1, Ordering::Relaxed);
        self.payload_bytes
            .fetch_add(payload_bytes as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_retransmit(&self) {
        self.retransmits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_duplicate(&self) {
        self.duplicates.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_stale_ack(&self) {
        self.stale_acks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            packets: self.packets.load(Ordering::Relaxed),
            payload_bytes: self.payload_bytes.load(Ordering::Relaxed),
            retransmits: self.retransmits.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            stale_acks: self.stale_acks.load(Ordering::Relaxed),
        }
    }
}
