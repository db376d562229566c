//! Fixed-capacity blocking FIFO between one producer and one consumer thread.
//!
//! The queue is split into a [`QueueProducer`] and a [`QueueConsumer`] handle,
//! each owned by exactly one pipeline thread. Dropping either handle aborts the
//! queue: the surviving side stops blocking and gets
//! [`TransferError::QueueAborted`] instead of waiting forever on a peer that
//! will never deposit or withdraw again. Packets already queued are still
//! withdrawn in order before a consumer sees the abort.

use crossbeam_channel::{Receiver, Sender, bounded};

use crate::error::{Result, TransferError};
use crate::protocol::Packet;

/// Create a queue holding at most `capacity` items.
///
/// # Panics
/// Panics if `capacity` is zero; a zero-slot queue would be a rendezvous point,
/// not a buffer.
pub fn bounded_queue<T>(capacity: usize) -> (QueueProducer<T>, QueueConsumer<T>) {
    assert!(capacity > 0, "queue capacity must be at least 1");
    let (tx, rx) = bounded(capacity);
    (QueueProducer { tx }, QueueConsumer { rx })
}

/// Queue of transfer packets.
pub fn packet_queue(capacity: usize) -> (QueueProducer<Packet>, QueueConsumer<Packet>) {
    bounded_queue(capacity)
}

/// Depositing end of a bounded queue.
#[derive(Debug)]
pub struct QueueProducer<T> {
    tx: Sender<T>,
}

impl<T> QueueProducer<T> {
    /// Insert `item` at the tail, blocking while the queue is full.
    pub fn deposit(&self, item: T) -> Result<()> {
        self.tx.send(item).map_err(|_| TransferError::QueueAborted)
    }

    /// Number of occupied slots.
    pub fn len(&self) -> usize {
        self.tx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }

    pub fn capacity(&self) -> usize {
        // Always Some for a bounded channel.
        self.tx.capacity().unwrap_or_default()
    }
}

/// Withdrawing end of a bounded queue.
#[derive(Debug)]
pub struct QueueConsumer<T> {
    rx: Receiver<T>,
}

impl<T> QueueConsumer<T> {
    /// Remove the head item, blocking while the queue is empty.
    pub fn withdraw(&self) -> Result<T> {
        self.rx.recv().map_err(|_| TransferError::QueueAborted)
    }

    /// Number of occupied slots.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.rx.capacity().unwrap_or_default()
    }
}
