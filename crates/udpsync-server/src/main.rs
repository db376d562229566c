use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use clap::Parser;
use tracing::info;

use udpsync_server::{Server, ServerConfig};
use udpsync_transfer::{CONTROL_PORT, DEFAULT_STORAGE_DIR, TransferConfig};

#[derive(Parser, Debug, Clone)]
#[command(
    name = "udpsync-server",
    version,
    about = "Receive files over UDP into a storage directory",
    long_about = "`udpsync-server` listens for control requests over TCP. A send request is \
answered with a UDP port the file is then streamed to with stop-and-wait acknowledgments; \
a delete request removes a stored file.

Transfer tuning is read from the environment (or a .env file):
    UDPSYNC_MAX_DATAGRAM, UDPSYNC_QUEUE_CAPACITY, UDPSYNC_ACK_TIMEOUT_MS,
    UDPSYNC_MAX_RETRANSMITS, UDPSYNC_IDLE_TIMEOUT_MS, UDPSYNC_LINGER_MS,
    UDPSYNC_CONTROL_TIMEOUT_MS"
)]
struct Args {
    /// Address to listen on
    #[arg(long, env = "UDPSYNC_HOST", default_value = "0.0.0.0")]
    host: IpAddr,

    /// TCP port for control requests
    #[arg(long, env = "UDPSYNC_CONTROL_PORT", default_value_t = CONTROL_PORT)]
    control_port: u16,

    /// UDP port for transfers; 0 picks a fresh port per transfer
    #[arg(long, env = "UDPSYNC_UDP_PORT", default_value_t = 0)]
    udp_port: u16,

    /// Directory received files are stored in
    #[arg(long, env = "UDPSYNC_STORAGE_DIR", default_value = DEFAULT_STORAGE_DIR)]
    storage_dir: PathBuf,
}

fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "udpsync_server=info,udpsync_transfer=info".into()),
        )
        .init();

    let args = Args::parse();
    let transfer = TransferConfig::from_env();
    info!(
        "Transfer settings: datagram={}B queue={} ack_timeout={:?} linger={:?}",
        transfer.max_datagram_size, transfer.queue_capacity, transfer.ack_timeout, transfer.linger
    );

    let server = Server::bind(ServerConfig {
        control_addr: SocketAddr::new(args.host, args.control_port),
        udp_port: args.udp_port,
        storage_dir: args.storage_dir,
        transfer,
    })?;
    server.serve()
}
