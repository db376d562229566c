/// udpsync transfer: reliable file transfer over UDP.
///
/// Provides in-order, loss-tolerant delivery of one file per transfer with:
/// - 2-thread sender pipeline: reader → stop-and-wait sender
/// - 2-thread receiver pipeline: receiver → writer
/// - Bounded blocking queues between the stages of each pipeline
/// - One packet in flight; retransmission on acknowledgment timeout
/// - Duplicate re-acknowledgment and a lingering final acknowledgment
/// - Line-oriented TCP control channel for port negotiation and deletes

pub mod config;
pub mod context;
pub mod control;
pub mod error;
pub mod link;
pub mod logging;
pub mod protocol;
pub mod queue;
pub mod reader;
pub mod receiver;
pub mod sender;
pub mod stats;
pub mod writer;

// Re-export key types for convenience.
pub use config::TransferConfig;
pub use context::TransferContext;
pub use control::{ControlRequest, SendAccepted, negotiate_send, request_delete};
pub use error::{Result, TransferError};
pub use link::{DatagramLink, LossyLink, UdpLink, bind_udp};
pub use logging::{NullLogger, TracingLogger, TransferEvent, TransferLog, TransferLogger};
pub use protocol::{
    CLIENT_UDP_PORT, CONTROL_PORT, DEFAULT_STORAGE_DIR, MAX_DATAGRAM_SIZE, MAX_PAYLOAD, Packet,
    SERVER_UDP_PORT, plain_file_name,
};
pub use queue::{QueueConsumer, QueueProducer, bounded_queue, packet_queue};
pub use receiver::{ReceiveReport, ReceivedFile, receive_packets, run_receiver};
pub use sender::{SendReport, run_sender, send_packets};
pub use stats::{StatsSnapshot, TransferStats};
